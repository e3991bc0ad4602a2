// src/handlers/courses.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        audit::AuditAction,
        course::{
            Course, CourseSummary, CreateCourseRequest, CreateIloRequest,
            CreateLibraryItemRequest, Ilo, IloUsage, LibraryItem,
        },
    },
    utils::{
        audit::{AuditEntry, log_action},
        client::ClientContext,
        jwt::Claims,
    },
};

/// Lists courses with their ILO count and allocated OSCE marks.
pub async fn list_courses(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let courses = sqlx::query_as::<_, CourseSummary>(
        r#"
        SELECT
            c.id, c.code, c.short_code, c.name, c.year_level,
            COUNT(i.id) AS ilo_count,
            COALESCE(SUM(i.osce_marks), 0)::BIGINT AS total_osce_marks
        FROM courses c
        LEFT JOIN ilos i ON i.course_id = c.id
        GROUP BY c.id
        ORDER BY c.code
        "#,
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list courses: {:?}", e);
        AppError::from(e)
    })?;

    Ok(Json(courses))
}

pub async fn create_course(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Json(payload): Json<CreateCourseRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let course = sqlx::query_as::<_, Course>(
        r#"
        INSERT INTO courses (code, short_code, name, description, year_level)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, code, short_code, name, description, year_level, created_at
        "#,
    )
    .bind(payload.code.trim())
    .bind(payload.short_code.unwrap_or_default())
    .bind(&payload.name)
    .bind(payload.description.unwrap_or_default())
    .bind(payload.year_level.unwrap_or(1))
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        AppError::unique_violation(e, format!("Course code '{}' already exists", payload.code))
    })?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Create, "Course", course.id)
            .describe(format!("Created course {}", course.code)),
    )
    .await;

    Ok((StatusCode::CREATED, Json(course)))
}

/// Returns a course together with its ILOs and their mark usage.
pub async fn get_course(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let course = sqlx::query_as::<_, Course>(
        "SELECT id, code, short_code, name, description, year_level, created_at FROM courses WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Course not found".to_string()))?;

    let ilos = ilo_usage(&pool, id).await?;

    Ok(Json(json!({
        "course": course,
        "ilos": ilos,
    })))
}

pub async fn delete_course(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let exam_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM exams WHERE course_id = $1 AND is_deleted = FALSE")
            .bind(id)
            .fetch_one(&pool)
            .await?;

    if exam_count > 0 {
        return Err(AppError::BadRequest(format!(
            "Cannot delete: {} exams still use this course",
            exam_count
        )));
    }

    let result = sqlx::query("DELETE FROM courses WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Course not found".to_string()));
    }

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Delete, "Course", id),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

async fn ilo_usage(pool: &PgPool, course_id: i64) -> Result<Vec<serde_json::Value>, AppError> {
    let rows = sqlx::query_as::<_, IloUsage>(
        r#"
        SELECT
            i.id, i.number, i.description, i.theme, i.osce_marks,
            COALESCE(SUM(ci.points) FILTER (WHERE s.is_deleted = FALSE), 0)::BIGINT AS used_marks
        FROM ilos i
        LEFT JOIN checklist_items ci ON ci.ilo_id = i.id
        LEFT JOIN stations s ON s.id = ci.station_id
        WHERE i.course_id = $1
        GROUP BY i.id
        ORDER BY i.number
        "#,
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|ilo| {
            let remaining = ilo.remaining_marks();
            json!({
                "id": ilo.id,
                "number": ilo.number,
                "description": ilo.description,
                "theme": ilo.theme,
                "osce_marks": ilo.osce_marks,
                "used_marks": ilo.used_marks,
                "remaining_marks": remaining,
            })
        })
        .collect())
}

pub async fn list_ilos(
    State(pool): State<PgPool>,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ilo_usage(&pool, course_id).await?))
}

pub async fn create_ilo(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(course_id): Path<i64>,
    Json(payload): Json<CreateIloRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let ilo = sqlx::query_as::<_, Ilo>(
        r#"
        INSERT INTO ilos (course_id, number, description, theme, osce_marks)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, course_id, number, description, theme, osce_marks
        "#,
    )
    .bind(course_id)
    .bind(payload.number)
    .bind(&payload.description)
    .bind(payload.theme.unwrap_or_default())
    .bind(payload.osce_marks.unwrap_or(0))
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        AppError::unique_violation(
            e,
            format!("ILO #{} already exists for this course", payload.number),
        )
    })?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Create, "ILO", ilo.id)
            .describe(format!("Created ILO #{} for course {}", ilo.number, course_id)),
    )
    .await;

    Ok((StatusCode::CREATED, Json(ilo)))
}

pub async fn delete_ilo(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM ilos WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("ILO not found".to_string()));
    }

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Delete, "ILO", id),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct LibraryParams {
    pub ilo_id: Option<i64>,
}

/// Lists reusable checklist items, optionally for one ILO.
pub async fn list_library(
    State(pool): State<PgPool>,
    Query(params): Query<LibraryParams>,
) -> Result<impl IntoResponse, AppError> {
    let items = sqlx::query_as::<_, LibraryItem>(
        r#"
        SELECT id, ilo_id, description, points, is_critical, rubric_type, created_at
        FROM checklist_library
        WHERE ($1::BIGINT IS NULL OR ilo_id = $1)
        ORDER BY id
        "#,
    )
    .bind(params.ilo_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(items))
}

pub async fn create_library_item(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Json(payload): Json<CreateLibraryItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let item = sqlx::query_as::<_, LibraryItem>(
        r#"
        INSERT INTO checklist_library (ilo_id, description, points, is_critical, rubric_type)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, ilo_id, description, points, is_critical, rubric_type, created_at
        "#,
    )
    .bind(payload.ilo_id)
    .bind(&payload.description)
    .bind(payload.points.unwrap_or(1))
    .bind(payload.is_critical.unwrap_or(false))
    .bind(payload.rubric_type.as_deref().unwrap_or("binary"))
    .fetch_one(&pool)
    .await?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Create, "ChecklistLibrary", item.id),
    )
    .await;

    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn delete_library_item(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM checklist_library WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Library item not found".to_string()));
    }

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Delete, "ChecklistLibrary", id),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
