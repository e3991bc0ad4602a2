// src/handlers/marking.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    handlers::{
        examiners::ASSIGNMENT_DETAIL,
        scores::{SCORE_COLUMNS, fetch_score},
        sessions::fetch_session,
        stations::{fetch_items, fetch_station, item_view},
        students::STUDENT_COLUMNS,
    },
    models::{
        assignment::AssignmentDetail,
        audit::AuditAction,
        scoring::{
            ItemScore, MarkItemRequest, MarkedItem, StartMarkingRequest, StationScore,
            SubmitScoreRequest, compute_total, evaluate_critical, within_undo_window,
        },
        session::{SessionStatus, SessionStudent, student_progress},
    },
    utils::{
        audit::{AuditEntry, log_action},
        client::ClientContext,
        html::clean_html,
        jwt::Claims,
    },
};

pub(crate) async fn is_assigned<'e, E>(
    executor: E,
    examiner_id: i64,
    session_id: Uuid,
    station_id: Uuid,
) -> Result<bool, AppError>
where
    E: PgExecutor<'e>,
{
    let assigned: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM examiner_assignments
            WHERE examiner_id = $1 AND session_id = $2 AND station_id = $3
        )
        "#,
    )
    .bind(examiner_id)
    .bind(session_id)
    .bind(station_id)
    .fetch_one(executor)
    .await?;

    Ok(assigned)
}

pub(crate) async fn fetch_student<'e, E>(executor: E, id: Uuid) -> Result<SessionStudent, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, SessionStudent>(&format!(
        "SELECT {} FROM session_students WHERE id = $1",
        STUDENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(AppError::NotFound("Student not found".to_string()))
}

async fn marked_items<'e, E>(executor: E, score_id: Uuid) -> Result<Vec<MarkedItem>, AppError>
where
    E: PgExecutor<'e>,
{
    let items = sqlx::query_as::<_, MarkedItem>(
        r#"
        SELECT i.checklist_item_id, i.score, i.max_points, ci.is_critical
        FROM item_scores i
        JOIN checklist_items ci ON ci.id = i.checklist_item_id
        WHERE i.station_score_id = $1
        "#,
    )
    .bind(score_id)
    .fetch_all(executor)
    .await?;

    Ok(items)
}

/// Fetches a score and checks the caller is the examiner who owns it.
async fn owned_score(pool: &PgPool, claims: &Claims, id: Uuid) -> Result<StationScore, AppError> {
    let score = fetch_score(pool, id).await?;
    if score.examiner_id != Some(claims.user_id()) {
        tracing::warn!(
            "Examiner {} tried to modify score {} owned by {:?}",
            claims.username,
            score.id,
            score.examiner_id
        );
        return Err(AppError::Forbidden("Unauthorized".to_string()));
    }
    Ok(score)
}

/// The caller's station assignments across sessions.
pub async fn my_assignments(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let assignments = sqlx::query_as::<_, AssignmentDetail>(&format!(
        "{} WHERE a.examiner_id = $1 ORDER BY es.session_date DESC, s.station_number",
        ASSIGNMENT_DETAIL
    ))
    .bind(claims.user_id())
    .fetch_all(&pool)
    .await?;

    Ok(Json(assignments))
}

/// Students of a session the caller examines, for caching on the tablet.
pub async fn session_students(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let assigned: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM examiner_assignments WHERE examiner_id = $1 AND session_id = $2)",
    )
    .bind(claims.user_id())
    .bind(session_id)
    .fetch_one(&pool)
    .await?;

    if !assigned {
        return Err(AppError::Forbidden(
            "You are not assigned to this session".to_string(),
        ));
    }

    let students = sqlx::query_as::<_, SessionStudent>(&format!(
        "SELECT {} FROM session_students WHERE session_id = $1 ORDER BY path_id, student_number",
        STUDENT_COLUMNS
    ))
    .bind(session_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(students))
}

/// Station details and checklist with rubric levels filled in.
pub async fn station_checklist(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(station_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let assigned: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM examiner_assignments WHERE examiner_id = $1 AND station_id = $2)",
    )
    .bind(claims.user_id())
    .bind(station_id)
    .fetch_one(&pool)
    .await?;

    if !assigned {
        return Err(AppError::Forbidden(
            "You are not assigned to this station".to_string(),
        ));
    }

    let station = fetch_station(&pool, station_id).await?;
    let items = fetch_items(&pool, station_id).await?;
    let max_score: i64 = items.iter().map(|i| i64::from(i.points)).sum();

    Ok(Json(json!({
        "station": {
            "id": station.id,
            "station_number": station.station_number,
            "name": station.name,
            "scenario": station.scenario,
            "instructions": station.instructions,
            "duration_minutes": station.duration_minutes,
            "max_score": max_score,
        },
        "items": items.iter().map(item_view).collect::<Vec<_>>(),
    })))
}

/// Opens a marking sheet for a student at a station, or resumes the caller's existing one.
pub async fn start_marking(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Json(payload): Json<StartMarkingRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let examiner_id = claims.user_id();

    let student = fetch_student(&pool, payload.session_student_id).await?;
    if !is_assigned(&pool, examiner_id, student.session_id, payload.station_id).await? {
        return Err(AppError::Forbidden(
            "You are not assigned to this station".to_string(),
        ));
    }

    let session = fetch_session(&pool, student.session_id).await?;
    if session.parsed_status()? != SessionStatus::InProgress {
        return Err(AppError::BadRequest(format!(
            "Session is {}; marking is only possible while it is in progress",
            session.status
        )));
    }

    let existing = sqlx::query_as::<_, StationScore>(&format!(
        r#"
        SELECT {} FROM station_scores
        WHERE session_student_id = $1 AND station_id = $2 AND examiner_id = $3
        "#,
        SCORE_COLUMNS
    ))
    .bind(student.id)
    .bind(payload.station_id)
    .bind(examiner_id)
    .fetch_optional(&pool)
    .await?;

    if let Some(score) = existing {
        let item_scores = sqlx::query_as::<_, ItemScore>(
            r#"
            SELECT id, station_score_id, checklist_item_id, score, max_points, marked_at, notes
            FROM item_scores WHERE station_score_id = $1
            "#,
        )
        .bind(score.id)
        .fetch_all(&pool)
        .await?;

        return Ok((
            StatusCode::OK,
            Json(json!({
                "message": "Resuming existing marking session",
                "resumed": true,
                "score": score,
                "item_scores": item_scores,
            })),
        ));
    }

    let max_score: f64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(points), 0)::FLOAT8 FROM checklist_items WHERE station_id = $1",
    )
    .bind(payload.station_id)
    .fetch_one(&pool)
    .await?;

    let client_id = payload
        .client_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let local_timestamp = payload
        .local_timestamp
        .unwrap_or_else(|| Utc::now().timestamp());

    let score = sqlx::query_as::<_, StationScore>(&format!(
        r#"
        INSERT INTO station_scores
            (session_student_id, station_id, examiner_id, started_at, max_score,
             status, client_id, local_timestamp, sync_status)
        VALUES ($1, $2, $3, NOW(), $4, 'in_progress', $5, $6, 'synced')
        RETURNING {}
        "#,
        SCORE_COLUMNS
    ))
    .bind(student.id)
    .bind(payload.station_id)
    .bind(examiner_id)
    .bind(max_score)
    .bind(&client_id)
    .bind(local_timestamp)
    .fetch_one(&pool)
    .await
    .map_err(|e| AppError::unique_violation(e, "Marking already started for this student"))?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Create, "StationScore", score.id).describe(format!(
            "Started marking student {} at station {}",
            student.student_number, payload.station_id
        )),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Marking session started",
            "resumed": false,
            "score": score,
            "item_scores": [],
        })),
    ))
}

/// Records one checklist item and refreshes the running total.
pub async fn mark_item(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(score_id): Path<Uuid>,
    Json(payload): Json<MarkItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let score = owned_score(&pool, &claims, score_id).await?;
    if !score.is_editable() {
        return Err(AppError::BadRequest(
            "Score is submitted; undo the submission or ask a coordinator to unlock it".to_string(),
        ));
    }

    let (item_station, points): (Uuid, i32) =
        sqlx::query_as("SELECT station_id, points FROM checklist_items WHERE id = $1")
            .bind(payload.checklist_item_id)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::NotFound("Checklist item not found".to_string()))?;

    if item_station != score.station_id {
        return Err(AppError::BadRequest(
            "Checklist item does not belong to this station".to_string(),
        ));
    }

    let max_points = f64::from(points);
    if payload.score > max_points {
        return Err(AppError::BadRequest(format!(
            "Score {} exceeds the item's {} points",
            payload.score, points
        )));
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO item_scores (station_score_id, checklist_item_id, score, max_points, notes, marked_at)
        VALUES ($1, $2, $3, $4, $5, NOW())
        ON CONFLICT (station_score_id, checklist_item_id)
        DO UPDATE SET score = EXCLUDED.score, notes = EXCLUDED.notes, marked_at = NOW()
        "#,
    )
    .bind(score.id)
    .bind(payload.checklist_item_id)
    .bind(payload.score)
    .bind(max_points)
    .bind(clean_html(payload.notes.as_deref().unwrap_or_default()))
    .execute(&mut *tx)
    .await?;

    let items = marked_items(&mut *tx, score.id).await?;
    let (total_score, percentage) = compute_total(&items, score.max_score);

    sqlx::query(
        "UPDATE station_scores SET total_score = $2, percentage = $3, updated_at = NOW() WHERE id = $1",
    )
    .bind(score.id)
    .bind(total_score)
    .bind(percentage)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(json!({
        "success": true,
        "total_score": total_score,
        "percentage": percentage,
        "item_score": payload.score,
    })))
}

/// Submits a marking sheet and advances the student's progress.
pub async fn submit_score(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(score_id): Path<Uuid>,
    Json(payload): Json<SubmitScoreRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let score = owned_score(&pool, &claims, score_id).await?;
    if !score.is_editable() {
        return Err(AppError::BadRequest("Score is already submitted".to_string()));
    }

    let mut tx = pool.begin().await?;

    let items = marked_items(&mut *tx, score.id).await?;
    let (total_score, percentage) = compute_total(&items, score.max_score);
    let (passed_critical, failed) = evaluate_critical(&items);
    let failed_ids = failed
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",");

    let score = sqlx::query_as::<_, StationScore>(&format!(
        r#"
        UPDATE station_scores SET
            total_score = $2, percentage = $3, passed_critical = $4,
            critical_items_failed = $5, global_rating = $6, comments = $7,
            status = 'submitted', completed_at = NOW(), unlocked_for_correction = FALSE,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        SCORE_COLUMNS
    ))
    .bind(score.id)
    .bind(total_score)
    .bind(percentage)
    .bind(passed_critical)
    .bind(&failed_ids)
    .bind(payload.global_rating)
    .bind(clean_html(payload.comments.as_deref().unwrap_or_default()))
    .fetch_one(&mut *tx)
    .await?;

    let student = fetch_student(&mut *tx, score.session_student_id).await?;

    let submitted_count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(DISTINCT station_id) FROM station_scores
        WHERE session_student_id = $1 AND status = 'submitted'
        "#,
    )
    .bind(student.id)
    .fetch_one(&mut *tx)
    .await?;

    let path_station_count: Option<i64> = match student.path_id {
        Some(path_id) => Some(
            sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM stations
                WHERE path_id = $1 AND active = TRUE AND is_deleted = FALSE
                "#,
            )
            .bind(path_id)
            .fetch_one(&mut *tx)
            .await?,
        ),
        None => None,
    };

    let student_status = student_progress(submitted_count, path_station_count, &student.status);

    sqlx::query(
        r#"
        UPDATE session_students SET
            status = $2,
            completed_at = CASE WHEN $2 = 'completed' THEN COALESCE(completed_at, NOW()) ELSE completed_at END
        WHERE id = $1
        "#,
    )
    .bind(student.id)
    .bind(&student_status)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Submit, "StationScore", score.id).describe(format!(
            "Submitted score {}/{}",
            score.total_score,
            score.max_score.unwrap_or_default()
        )),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "total_score": score.total_score,
        "max_score": score.max_score,
        "percentage": score.percentage,
        "passed_critical": score.passed_critical,
        "critical_items_failed": failed,
        "student_status": student_status,
    })))
}

/// Reopens the caller's submission within the undo window.
pub async fn undo_submit(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(score_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let score = owned_score(&pool, &claims, score_id).await?;

    if !score.is_submitted() {
        return Err(AppError::BadRequest("Score is not submitted".to_string()));
    }

    if !within_undo_window(score.completed_at, Utc::now()) {
        return Err(AppError::BadRequest("Undo window has expired".to_string()));
    }

    let result = sqlx::query(
        r#"
        UPDATE station_scores SET status = 'in_progress', completed_at = NULL, updated_at = NOW()
        WHERE id = $1 AND status = 'submitted'
        "#,
    )
    .bind(score.id)
    .execute(&pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict(
            "Score changed meanwhile, reload and try again".to_string(),
        ));
    }

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Update, "StationScore", score.id).describe("Undo submit"),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Score reopened for editing",
    })))
}
