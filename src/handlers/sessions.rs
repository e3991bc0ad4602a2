// src/handlers/sessions.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::DEFAULT_PATH_COUNT,
    error::AppError,
    handlers::exams::{SESSION_COLUMNS, fetch_exam},
    models::{
        audit::AuditAction,
        session::{
            ActivationFacts, CreateSessionRequest, ExamSession, LifecycleError, SessionStatus,
            check_activation, check_archive, check_cancellation, check_completion,
            check_deactivation, check_restore, check_revert, path_name,
        },
    },
    utils::{
        audit::{AuditEntry, log_action},
        client::ClientContext,
        html::clean_html,
        jwt::Claims,
    },
};

pub(crate) async fn fetch_session<'e, E>(executor: E, id: Uuid) -> Result<ExamSession, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, ExamSession>(&format!(
        "SELECT {} FROM exam_sessions WHERE id = $1",
        SESSION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(AppError::NotFound("Session not found".to_string()))
}

/// Writes a status change, guarded against a concurrent transition.
///
/// Entering `in_progress` stamps `actual_start`, entering `completed` stamps
/// `actual_end`.
pub(crate) async fn write_status<'e, E>(
    executor: E,
    id: Uuid,
    from: SessionStatus,
    to: SessionStatus,
) -> Result<ExamSession, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, ExamSession>(&format!(
        r#"
        UPDATE exam_sessions SET
            status = $3,
            actual_start = CASE WHEN $3 = 'in_progress' THEN NOW() ELSE actual_start END,
            actual_end = CASE WHEN $3 = 'completed' THEN NOW() ELSE actual_end END,
            updated_at = NOW()
        WHERE id = $1 AND status = $2
        RETURNING {}
        "#,
        SESSION_COLUMNS
    ))
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .fetch_optional(executor)
    .await?
    .ok_or(AppError::Conflict(
        "Session status changed meanwhile, reload and try again".to_string(),
    ))
}

pub async fn list_sessions(
    State(pool): State<PgPool>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let sessions = sqlx::query_as::<_, ExamSession>(&format!(
        "SELECT {} FROM exam_sessions WHERE exam_id = $1 ORDER BY session_date, start_time",
        SESSION_COLUMNS
    ))
    .bind(exam_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(sessions))
}

/// Creates a scheduled session on the exam date with the default paths.
pub async fn create_session(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(exam_id): Path<Uuid>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let exam = fetch_exam(&pool, exam_id).await?;
    if exam.lifecycle().is_deleted() {
        return Err(AppError::NotFound("Exam not found".to_string()));
    }
    let session_date = exam.exam_date.ok_or(AppError::BadRequest(
        "Exam has no date; set the exam date before scheduling sessions".to_string(),
    ))?;

    let mut tx = pool.begin().await?;

    let session = sqlx::query_as::<_, ExamSession>(&format!(
        r#"
        INSERT INTO exam_sessions
            (exam_id, name, session_date, session_type, start_time,
             number_of_stations, number_of_paths, status, notes, created_by)
        VALUES ($1, $2, $3, $4, COALESCE($5, '08:00'::TIME), $6, $7, 'scheduled', $8, $9)
        RETURNING {}
        "#,
        SESSION_COLUMNS
    ))
    .bind(exam.id)
    .bind(payload.name.trim())
    .bind(session_date)
    .bind(payload.session_type.as_deref().unwrap_or("morning"))
    .bind(payload.start_time)
    .bind(exam.number_of_stations)
    .bind(DEFAULT_PATH_COUNT as i32)
    .bind(clean_html(payload.notes.as_deref().unwrap_or_default()))
    .bind(claims.user_id())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        AppError::unique_violation(
            e,
            format!("A session named '{}' already exists for this exam", payload.name.trim()),
        )
    })?;

    for index in 0..DEFAULT_PATH_COUNT {
        sqlx::query("INSERT INTO paths (session_id, name, rotation_minutes) VALUES ($1, $2, $3)")
            .bind(session.id)
            .bind(path_name(index))
            .bind(exam.station_duration_minutes)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    tracing::info!(
        "Session {} created for exam {} with {} paths",
        session.id,
        exam.id,
        DEFAULT_PATH_COUNT
    );

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Create, "ExamSession", session.id)
            .describe(format!("Created session {} for exam {}", session.name, exam.name)),
    )
    .await;

    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(fetch_session(&pool, id).await?))
}

/// Student counts by status.
pub async fn session_status(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = fetch_session(&pool, id).await?;

    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM session_students WHERE session_id = $1 GROUP BY status",
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let mut counts = serde_json::Map::new();
    for status in ["registered", "checked_in", "in_progress", "completed", "absent"] {
        counts.insert(status.to_string(), json!(0));
    }
    let mut total = 0;
    for (status, count) in rows {
        total += count;
        counts.insert(status, json!(count));
    }

    Ok(Json(json!({
        "session_id": session.id,
        "status": session.status,
        "total_students": total,
        "student_status": counts,
    })))
}

async fn activation_facts(pool: &PgPool, id: Uuid) -> Result<ActivationFacts, AppError> {
    let (active_station_count, student_count, assignment_count, path_count): (i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM stations s
                   JOIN paths p ON p.id = s.path_id
                  WHERE p.session_id = $1 AND p.is_deleted = FALSE
                    AND s.active = TRUE AND s.is_deleted = FALSE),
                (SELECT COUNT(*) FROM session_students WHERE session_id = $1),
                (SELECT COUNT(*) FROM examiner_assignments WHERE session_id = $1),
                (SELECT COUNT(*) FROM paths WHERE session_id = $1 AND is_deleted = FALSE)
            "#,
        )
        .bind(id)
        .fetch_one(pool)
        .await?;

    Ok(ActivationFacts {
        active_station_count,
        student_count,
        assignment_count,
        path_count,
    })
}

pub(crate) async fn audit_transition(
    pool: &PgPool,
    claims: &Claims,
    client: &ClientContext,
    action: AuditAction,
    session: &ExamSession,
    before: SessionStatus,
) {
    log_action(
        pool,
        Some(claims),
        client,
        AuditEntry::new(action, "ExamSession", session.id)
            .describe(format!(
                "Session {}: {} -> {}",
                session.name, before, session.status
            ))
            .extra(json!({
                "before": before.as_str(),
                "after": session.status,
                "actor": claims.username,
            })),
    )
    .await;
}

/// Starts a scheduled session. Needs at least one active station.
pub async fn activate_session(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = fetch_session(&pool, id).await?;
    let current = session.parsed_status()?;

    let facts = activation_facts(&pool, id).await?;
    let warnings = check_activation(current, &facts)?;

    let session = write_status(&pool, id, current, SessionStatus::InProgress).await?;
    audit_transition(&pool, &claims, &client, AuditAction::Update, &session, current).await;

    Ok(Json(json!({
        "message": "Session activated",
        "session": session,
        "warnings": warnings,
    })))
}

/// Shared body of the single-step transitions.
async fn transition(
    pool: &PgPool,
    claims: &Claims,
    client: &ClientContext,
    id: Uuid,
    check: fn(SessionStatus) -> Result<SessionStatus, LifecycleError>,
) -> Result<ExamSession, AppError> {
    let session = fetch_session(pool, id).await?;
    let current = session.parsed_status()?;
    let next = check(current)?;

    let session = write_status(pool, id, current, next).await?;
    audit_transition(pool, claims, client, AuditAction::Update, &session, current).await;
    Ok(session)
}

pub async fn deactivate_session(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = transition(&pool, &claims, &client, id, check_deactivation).await?;
    Ok(Json(json!({ "message": "Session deactivated", "session": session })))
}

pub async fn complete_session(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = transition(&pool, &claims, &client, id, check_completion).await?;
    Ok(Json(json!({ "message": "Session completed", "session": session })))
}

pub async fn cancel_session(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = transition(&pool, &claims, &client, id, check_cancellation).await?;
    Ok(Json(json!({ "message": "Session cancelled", "session": session })))
}

pub async fn restore_session(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = transition(&pool, &claims, &client, id, check_restore).await?;
    Ok(Json(json!({ "message": "Session restored", "session": session })))
}

/// Archives a session. Sessions with recorded scores must be completed first.
pub async fn archive_session(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = fetch_session(&pool, id).await?;
    let current = session.parsed_status()?;

    let score_count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM station_scores sc
        JOIN session_students ss ON ss.id = sc.session_student_id
        WHERE ss.session_id = $1
        "#,
    )
    .bind(id)
    .fetch_one(&pool)
    .await?;

    let next = check_archive(current, score_count)?;
    let session = write_status(&pool, id, current, next).await?;
    audit_transition(&pool, &claims, &client, AuditAction::Delete, &session, current).await;

    Ok(Json(json!({ "message": "Session archived", "session": session })))
}

/// Puts an accidentally completed session back to scheduled. Admins only.
pub async fn revert_session(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !claims.is_admin() {
        return Err(AppError::Forbidden(
            "Only administrators can revert a completed session".to_string(),
        ));
    }

    let session = fetch_session(&pool, id).await?;
    let current = session.parsed_status()?;
    let next = check_revert(current)?;

    let session = write_status(&pool, id, current, next).await?;
    tracing::warn!(
        "Session {} reverted to scheduled by {}",
        session.id,
        claims.username
    );
    audit_transition(&pool, &claims, &client, AuditAction::Revert, &session, current).await;

    Ok(Json(json!({ "message": "Session reverted to scheduled", "session": session })))
}
