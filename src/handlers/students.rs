// src/handlers/students.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    handlers::{marking::fetch_student, paths::fetch_path, sessions::fetch_session},
    models::{
        audit::AuditAction,
        session::{
            AssignPathRequest, CreateStudentRequest, ExamSession, SessionStudent,
            distribute_round_robin,
        },
    },
    utils::{
        audit::{AuditEntry, log_action},
        client::ClientContext,
        jwt::Claims,
    },
};

pub(crate) const STUDENT_COLUMNS: &str = "id, session_id, path_id, student_number, full_name, \
     photo_url, status, checked_in_at, completed_at";

/// Checks that a path belongs to the session and is usable.
async fn ensure_session_path(pool: &PgPool, session_id: Uuid, path_id: Uuid) -> Result<(), AppError> {
    let path = fetch_path(pool, path_id).await?;
    if path.session_id != session_id || path.lifecycle().is_deleted() {
        return Err(AppError::BadRequest(
            "Path does not belong to this session".to_string(),
        ));
    }
    Ok(())
}

/// Registrations are frozen once the session has been activated.
fn ensure_not_started(session: &ExamSession, action: &str) -> Result<(), AppError> {
    if session.actual_start.is_some() {
        return Err(AppError::Forbidden(format!(
            "Cannot {} after session has been activated",
            action
        )));
    }
    Ok(())
}

pub async fn list_students(
    State(pool): State<PgPool>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let students = sqlx::query_as::<_, SessionStudent>(&format!(
        "SELECT {} FROM session_students WHERE session_id = $1 ORDER BY full_name",
        STUDENT_COLUMNS
    ))
    .bind(session_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(students))
}

pub async fn add_student(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<CreateStudentRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let session = fetch_session(&pool, session_id).await?;
    if let Some(path_id) = payload.path_id {
        ensure_session_path(&pool, session.id, path_id).await?;
    }

    let student = sqlx::query_as::<_, SessionStudent>(&format!(
        r#"
        INSERT INTO session_students (session_id, path_id, student_number, full_name, photo_url)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {}
        "#,
        STUDENT_COLUMNS
    ))
    .bind(session.id)
    .bind(payload.path_id)
    .bind(&payload.student_number)
    .bind(payload.full_name.trim())
    .bind(payload.photo_url.as_deref().unwrap_or_default())
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        AppError::unique_violation(
            e,
            format!(
                "Student {} is already registered in this session",
                payload.student_number
            ),
        )
    })?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Create, "SessionStudent", student.id).describe(format!(
            "Registered student {} in session {}",
            student.student_number, session.name
        )),
    )
    .await;

    Ok((StatusCode::CREATED, Json(student)))
}

/// Moves a student to another path of the same session, or off any path.
pub async fn assign_student_path(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(student_id): Path<Uuid>,
    Json(payload): Json<AssignPathRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session_id: Uuid =
        sqlx::query_scalar("SELECT session_id FROM session_students WHERE id = $1")
            .bind(student_id)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::NotFound("Student not found".to_string()))?;

    if let Some(path_id) = payload.path_id {
        ensure_session_path(&pool, session_id, path_id).await?;
    }

    let student = sqlx::query_as::<_, SessionStudent>(&format!(
        "UPDATE session_students SET path_id = $2 WHERE id = $1 RETURNING {}",
        STUDENT_COLUMNS
    ))
    .bind(student_id)
    .bind(payload.path_id)
    .fetch_one(&pool)
    .await?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Update, "SessionStudent", student.id)
            .describe("Changed path assignment")
            .extra(json!({ "path_id": payload.path_id })),
    )
    .await;

    Ok(Json(student))
}

pub async fn delete_student(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(student_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let student = fetch_student(&pool, student_id).await?;
    let session = fetch_session(&pool, student.session_id).await?;
    ensure_not_started(&session, "delete students")?;

    let result = sqlx::query("DELETE FROM session_students WHERE id = $1")
        .bind(student.id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Student not found".to_string()));
    }

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Delete, "SessionStudent", student_id),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Removes every student registered in a session.
pub async fn delete_all_students(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = fetch_session(&pool, session_id).await?;
    ensure_not_started(&session, "delete students")?;

    let result = sqlx::query("DELETE FROM session_students WHERE session_id = $1")
        .bind(session.id)
        .execute(&pool)
        .await?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Delete, "ExamSession", session.id).describe(format!(
            "Removed {} students from session {}",
            result.rows_affected(),
            session.name
        )),
    )
    .await;

    Ok(Json(json!({ "deleted": result.rows_affected() })))
}

/// Live path ids of a session, in path name order.
async fn session_path_ids(pool: &PgPool, session_id: Uuid) -> Result<Vec<(Uuid, String)>, AppError> {
    let paths: Vec<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT id, name FROM paths
        WHERE session_id = $1 AND is_deleted = FALSE
        ORDER BY LENGTH(name), name
        "#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    if paths.is_empty() {
        return Err(AppError::BadRequest(
            "No paths defined for this session".to_string(),
        ));
    }
    Ok(paths)
}

/// Writes a round-robin plan in one transaction and reports the per-path counts.
async fn apply_distribution(
    pool: &PgPool,
    students: &[Uuid],
    paths: &[(Uuid, String)],
) -> Result<Vec<serde_json::Value>, AppError> {
    let path_ids: Vec<Uuid> = paths.iter().map(|(id, _)| *id).collect();
    let plan = distribute_round_robin(students, &path_ids);

    let mut tx = pool.begin().await?;
    let mut counts: HashMap<Uuid, usize> = HashMap::new();
    for (student_id, path_id) in &plan {
        sqlx::query("UPDATE session_students SET path_id = $2 WHERE id = $1")
            .bind(student_id)
            .bind(path_id)
            .execute(&mut *tx)
            .await?;
        *counts.entry(*path_id).or_insert(0) += 1;
    }
    tx.commit().await?;

    Ok(paths
        .iter()
        .map(|(id, name)| {
            json!({
                "path_id": id,
                "path_name": name,
                "assigned": counts.get(id).copied().unwrap_or(0),
            })
        })
        .collect())
}

/// Spreads students without a path round-robin across the live paths.
pub async fn auto_assign_paths(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = fetch_session(&pool, session_id).await?;
    let paths = session_path_ids(&pool, session.id).await?;

    let unassigned: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM session_students
        WHERE session_id = $1 AND path_id IS NULL
        ORDER BY student_number
        "#,
    )
    .bind(session.id)
    .fetch_all(&pool)
    .await?;

    if unassigned.is_empty() {
        return Ok(Json(json!({
            "message": "All students already assigned",
            "distribution": [],
        })));
    }

    let distribution = apply_distribution(&pool, &unassigned, &paths).await?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Update, "ExamSession", session.id).describe(format!(
            "Auto-assigned {} students to {} paths",
            unassigned.len(),
            paths.len()
        )),
    )
    .await;

    Ok(Json(json!({
        "message": format!("Assigned {} students to {} paths", unassigned.len(), paths.len()),
        "distribution": distribution,
    })))
}

/// Redistributes every student of the session. Refused once the session has started.
pub async fn redistribute_students(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = fetch_session(&pool, session_id).await?;
    ensure_not_started(&session, "redistribute students")?;

    let paths = session_path_ids(&pool, session.id).await?;

    let students: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM session_students WHERE session_id = $1 ORDER BY student_number",
    )
    .bind(session.id)
    .fetch_all(&pool)
    .await?;

    let distribution = apply_distribution(&pool, &students, &paths).await?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Update, "ExamSession", session.id).describe(format!(
            "Redistributed {} students across {} paths",
            students.len(),
            paths.len()
        )),
    )
    .await;

    Ok(Json(json!({
        "message": format!("Distributed {} students across {} paths", students.len(), paths.len()),
        "distribution": distribution,
    })))
}
