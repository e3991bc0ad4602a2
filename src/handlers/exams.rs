// src/handlers/exams.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        audit::AuditAction,
        exam::{
            CreateExamRequest, Exam, IloAllocation, IloPoints, UpdateExamRequest,
            ilo_distribution, validate_marks,
        },
        session::ExamSession,
    },
    utils::{
        audit::{AuditEntry, log_action},
        client::ClientContext,
        jwt::Claims,
    },
};

const EXAM_COLUMNS: &str = "id, course_id, name, description, exam_date, department, \
     number_of_stations, station_duration_minutes, exam_weight, status, \
     is_deleted, deleted_at, deleted_by, created_at, updated_at";

pub(crate) const SESSION_COLUMNS: &str = "id, exam_id, name, session_date, session_type, \
     start_time, number_of_stations, number_of_paths, status, actual_start, actual_end, \
     notes, created_by, created_at, updated_at";

/// Active stations of an exam: those on live paths of its sessions, plus
/// legacy rows linked to the exam directly.
const EXAM_STATIONS: &str = r#"
    FROM stations s
    LEFT JOIN paths p ON p.id = s.path_id
    LEFT JOIN exam_sessions es ON es.id = p.session_id
    WHERE ((es.exam_id = $1 AND p.is_deleted = FALSE) OR s.exam_id = $1)
      AND s.active = TRUE AND s.is_deleted = FALSE
"#;

pub(crate) async fn fetch_exam(pool: &PgPool, id: Uuid) -> Result<Exam, AppError> {
    sqlx::query_as::<_, Exam>(&format!("SELECT {} FROM exams WHERE id = $1", EXAM_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Exam not found".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct ExamListParams {
    pub course_id: Option<i64>,
    /// List the recycle bin instead of live exams.
    #[serde(default)]
    pub deleted: bool,
}

pub async fn list_exams(
    State(pool): State<PgPool>,
    Query(params): Query<ExamListParams>,
) -> Result<impl IntoResponse, AppError> {
    let exams = sqlx::query_as::<_, Exam>(&format!(
        r#"
        SELECT {}
        FROM exams
        WHERE is_deleted = $1 AND ($2::BIGINT IS NULL OR course_id = $2)
        ORDER BY exam_date DESC NULLS LAST, created_at DESC
        "#,
        EXAM_COLUMNS
    ))
    .bind(params.deleted)
    .bind(params.course_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list exams: {:?}", e);
        AppError::from(e)
    })?;

    Ok(Json(exams))
}

pub async fn create_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Json(payload): Json<CreateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let exam = sqlx::query_as::<_, Exam>(&format!(
        r#"
        INSERT INTO exams
            (course_id, name, description, exam_date, department,
             number_of_stations, station_duration_minutes, exam_weight)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {}
        "#,
        EXAM_COLUMNS
    ))
    .bind(payload.course_id)
    .bind(&payload.name)
    .bind(payload.description.unwrap_or_default())
    .bind(payload.exam_date)
    .bind(payload.department.unwrap_or_default())
    .bind(payload.number_of_stations.unwrap_or(4))
    .bind(payload.station_duration_minutes.unwrap_or(8))
    .bind(payload.exam_weight)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create exam: {:?}", e);
        AppError::from(e)
    })?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Create, "Exam", exam.id)
            .describe(format!("Created exam {}", exam.name)),
    )
    .await;

    Ok((StatusCode::CREATED, Json(exam)))
}

/// Returns an exam with its sessions.
pub async fn get_exam(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_exam(&pool, id).await?;

    let sessions = sqlx::query_as::<_, ExamSession>(&format!(
        "SELECT {} FROM exam_sessions WHERE exam_id = $1 ORDER BY session_date, start_time",
        SESSION_COLUMNS
    ))
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let lifecycle = exam.lifecycle();

    Ok(Json(json!({
        "exam": exam,
        "lifecycle": lifecycle,
        "sessions": sessions,
    })))
}

pub async fn update_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let exam = sqlx::query_as::<_, Exam>(&format!(
        r#"
        UPDATE exams SET
            name = COALESCE($2, name),
            description = COALESCE($3, description),
            exam_date = COALESCE($4, exam_date),
            department = COALESCE($5, department),
            station_duration_minutes = COALESCE($6, station_duration_minutes),
            exam_weight = COALESCE($7, exam_weight),
            status = COALESCE($8, status),
            updated_at = NOW()
        WHERE id = $1 AND is_deleted = FALSE
        RETURNING {}
        "#,
        EXAM_COLUMNS
    ))
    .bind(id)
    .bind(payload.name)
    .bind(payload.description)
    .bind(payload.exam_date)
    .bind(payload.department)
    .bind(payload.station_duration_minutes)
    .bind(payload.exam_weight)
    .bind(payload.status)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Exam not found".to_string()))?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Update, "Exam", exam.id)
            .describe(format!("Updated exam {}", exam.name)),
    )
    .await;

    Ok(Json(exam))
}

/// Moves an exam to the recycle bin.
pub async fn delete_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let exam = sqlx::query_as::<_, Exam>(&format!(
        r#"
        UPDATE exams
        SET is_deleted = TRUE, status = 'archived', deleted_at = NOW(), deleted_by = $2,
            updated_at = NOW()
        WHERE id = $1 AND is_deleted = FALSE
        RETURNING {}
        "#,
        EXAM_COLUMNS
    ))
    .bind(id)
    .bind(claims.user_id())
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Exam not found".to_string()))?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Delete, "Exam", exam.id)
            .describe(format!("Soft-deleted exam {}", exam.name)),
    )
    .await;

    Ok(Json(exam))
}

/// Brings an exam back from the recycle bin as a draft.
pub async fn restore_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let exam = sqlx::query_as::<_, Exam>(&format!(
        r#"
        UPDATE exams
        SET is_deleted = FALSE, status = 'draft', deleted_at = NULL, deleted_by = NULL,
            updated_at = NOW()
        WHERE id = $1 AND is_deleted = TRUE
        RETURNING {}
        "#,
        EXAM_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Deleted exam not found".to_string()))?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Update, "Exam", exam.id)
            .describe(format!("Restored exam {}", exam.name)),
    )
    .await;

    Ok(Json(exam))
}

/// Total marks, station count and ILO mark usage for an exam.
pub async fn exam_summary(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_exam(&pool, id).await?;

    let station_count: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(DISTINCT s.id) {}", EXAM_STATIONS))
            .bind(id)
            .fetch_one(&pool)
            .await?;

    let points = sqlx::query_as::<_, IloPoints>(&format!(
        r#"
        SELECT ci.ilo_id, ci.points
        FROM checklist_items ci
        WHERE ci.station_id IN (SELECT s.id {})
        "#,
        EXAM_STATIONS
    ))
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let allocations = sqlx::query_as::<_, IloAllocation>(
        "SELECT id, number, osce_marks FROM ilos WHERE course_id = $1 ORDER BY number",
    )
    .bind(exam.course_id)
    .fetch_all(&pool)
    .await?;

    let distribution = ilo_distribution(&points);
    let total_marks: i64 = distribution.values().sum();
    let errors = validate_marks(&distribution, &allocations);

    let ilos: Vec<_> = allocations
        .iter()
        .map(|ilo| {
            json!({
                "ilo_id": ilo.id,
                "number": ilo.number,
                "osce_marks": ilo.osce_marks,
                "used_marks": distribution.get(&Some(ilo.id)).copied().unwrap_or(0),
            })
        })
        .collect();

    Ok(Json(json!({
        "exam_id": exam.id,
        "name": exam.name,
        "total_marks": total_marks,
        "station_count": station_count,
        "exam_weight": exam.exam_weight,
        "unlinked_marks": distribution.get(&None).copied().unwrap_or(0),
        "ilo_distribution": ilos,
        "is_valid": errors.is_empty(),
        "validation_errors": errors,
    })))
}
