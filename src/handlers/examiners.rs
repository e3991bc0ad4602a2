// src/handlers/examiners.rs

use std::collections::HashSet;

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
    config::Config,
    error::AppError,
    handlers::{paths::fetch_path, sessions::fetch_session},
    models::{
        assignment::{
            AssignmentDetail, BulkAssignOutcome, BulkAssignRequest, missing_primary,
            slot_examiners,
        },
        audit::AuditAction,
        user::{CreateUserRequest, Role, USER_COLUMNS, User},
    },
    utils::{
        audit::{AuditEntry, log_action},
        client::ClientContext,
        hash::hash_password,
        jwt::Claims,
    },
};

fn examiner_view(user: &User) -> serde_json::Value {
    json!({
        "id": user.id,
        "username": user.username,
        "email": user.email,
        "full_name": user.full_name,
        "title": user.title,
        "display_name": user.display_name(),
        "department": user.department,
        "role": user.role,
        "is_active": user.is_active,
        "must_change_password": user.must_change_password,
    })
}

/// Lists active (not deleted) accounts.
pub async fn list_examiners(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE is_deleted = FALSE ORDER BY full_name",
        USER_COLUMNS
    ))
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list examiners: {:?}", e);
        AppError::from(e)
    })?;

    Ok(Json(users.iter().map(examiner_view).collect::<Vec<_>>()))
}

/// Provisions an account.
///
/// Without a password the configured default is used and the user must
/// change it at first login. Only admins may create staff roles.
pub async fn create_examiner(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let role = payload.role.unwrap_or(Role::Examiner);
    if role != Role::Examiner && !claims.is_admin() {
        return Err(AppError::Forbidden(
            "Only administrators can create staff accounts".to_string(),
        ));
    }

    let (password, must_change) = match &payload.password {
        Some(password) => (password.as_str(), false),
        None => (config.default_user_password.as_str(), true),
    };
    let hashed_password = hash_password(password)?;

    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users
            (username, email, full_name, title, department, password, role, must_change_password)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(payload.username.trim())
    .bind(payload.email.trim())
    .bind(payload.full_name.trim())
    .bind(payload.title.as_deref().unwrap_or_default())
    .bind(payload.department.as_deref().unwrap_or_default())
    .bind(&hashed_password)
    .bind(role.as_str())
    .bind(must_change)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        AppError::unique_violation(
            e,
            format!("Username '{}' or email already exists", payload.username),
        )
    })?;

    tracing::info!("Provisioned {} account {}", user.role, user.username);

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Create, "Examiner", user.id)
            .describe(format!("Created {} {}", user.role, user.username))
            .extra(json!({ "must_change_password": must_change })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(examiner_view(&user))))
}

pub(crate) const ASSIGNMENT_DETAIL: &str = r#"
    SELECT
        a.id, a.session_id, es.name AS session_name, es.session_date, es.status AS session_status,
        a.station_id, s.station_number, s.name AS station_name, p.name AS path_name,
        a.examiner_id, u.full_name AS examiner_name, a.is_primary
    FROM examiner_assignments a
    JOIN exam_sessions es ON es.id = a.session_id
    JOIN stations s ON s.id = a.station_id
    LEFT JOIN paths p ON p.id = s.path_id
    JOIN users u ON u.id = a.examiner_id
"#;

pub async fn list_assignments(
    State(pool): State<PgPool>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let assignments = sqlx::query_as::<_, AssignmentDetail>(&format!(
        "{} WHERE a.session_id = $1 ORDER BY p.name, s.station_number, a.is_primary DESC",
        ASSIGNMENT_DETAIL
    ))
    .bind(session_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(assignments))
}

/// Assigns examiners to every station of a path in one transaction.
///
/// Examiner 1 is required per station, examiner 2 is optional and must
/// differ. Existing assignments are skipped. Any error rolls back the batch.
pub async fn bulk_assign(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<BulkAssignRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = fetch_session(&pool, session_id).await?;
    let path = fetch_path(&pool, payload.path_id).await?;
    if path.session_id != session.id {
        return Err(AppError::BadRequest(
            "Path does not belong to this session".to_string(),
        ));
    }

    let missing = missing_primary(&payload.stations);
    if !missing.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Examiner 1 is required for {} station(s)",
            missing.len()
        )));
    }

    let path_stations: HashSet<Uuid> = sqlx::query_scalar(
        "SELECT id FROM stations WHERE path_id = $1 AND is_deleted = FALSE",
    )
    .bind(path.id)
    .fetch_all(&pool)
    .await?
    .into_iter()
    .collect();

    let active_examiners: HashSet<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM users
        WHERE is_active = TRUE AND is_deleted = FALSE
          AND role = 'examiner' AND is_superuser = FALSE
        "#,
    )
    .fetch_all(&pool)
    .await?
    .into_iter()
    .collect();

    let mut outcome = BulkAssignOutcome::default();
    let mut tx = pool.begin().await?;

    for slot in &payload.stations {
        if !path_stations.contains(&slot.station_id) {
            outcome
                .errors
                .push(format!("Station {} is not on path {}", slot.station_id, path.name));
            continue;
        }

        let examiners = match slot_examiners(slot) {
            Ok(examiners) => examiners,
            Err(message) => {
                outcome.errors.push(format!("Station {}: {}", slot.station_id, message));
                continue;
            }
        };

        for (examiner_id, is_primary) in examiners {
            if !active_examiners.contains(&examiner_id) {
                outcome
                    .errors
                    .push(format!("Examiner {} not found, inactive or not an examiner", examiner_id));
                continue;
            }

            let result = sqlx::query(
                r#"
                INSERT INTO examiner_assignments (session_id, station_id, examiner_id, is_primary)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (session_id, station_id, examiner_id) DO NOTHING
                "#,
            )
            .bind(session.id)
            .bind(slot.station_id)
            .bind(examiner_id)
            .bind(is_primary)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                outcome.skipped += 1;
            } else {
                outcome.created += 1;
            }
        }
    }

    if !outcome.errors.is_empty() {
        tx.rollback().await?;
        return Err(AppError::BadRequest(outcome.errors.join("; ")));
    }

    tx.commit().await?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Create, "ExaminerAssignment", session.id)
            .describe(format!(
                "Assigned examiners on path {}: {} created, {} skipped",
                path.name, outcome.created, outcome.skipped
            )),
    )
    .await;

    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn delete_assignment(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM examiner_assignments WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Assignment not found".to_string()));
    }

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Delete, "ExaminerAssignment", id),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
