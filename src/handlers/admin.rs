// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    config::Config,
    error::AppError,
    handlers::sessions::{audit_transition, fetch_session, write_status},
    models::{
        audit::{AuditAction, AuditListParams, AuditLog, LoginAuditLog},
        session::check_revert,
        user::{USER_COLUMNS, User},
    },
    utils::{
        audit::{AuditEntry, log_action},
        client::ClientContext,
        hash::hash_password,
        jwt::Claims,
    },
};

/// Lists every account, deleted ones included.
/// Admin only.
pub async fn list_users(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users ORDER BY id DESC",
        USER_COLUMNS
    ))
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list users: {:?}", e);
        AppError::from(e)
    })?;

    Ok(Json(users))
}

/// Resets a password to the default temporary one and forces a change at next login.
/// Admin only.
pub async fn reset_password(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let hashed = hash_password(&config.default_user_password)?;

    let username: String = sqlx::query_scalar(
        r#"
        UPDATE users SET password = $2, must_change_password = TRUE
        WHERE id = $1 AND is_deleted = FALSE
        RETURNING username
        "#,
    )
    .bind(id)
    .bind(&hashed)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    tracing::info!("Password of {} reset by {}", username, claims.username);

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Update, "Examiner", id)
            .describe(format!("Reset password for {}", username)),
    )
    .await;

    Ok(Json(json!({
        "message": format!("Password reset for {}; a change is required at next login", username),
    })))
}

/// Soft-deletes and deactivates an account.
/// Admin only. Prevents deleting self.
pub async fn deactivate_examiner(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if id == claims.user_id() {
        return Err(AppError::BadRequest("Cannot delete yourself".to_string()));
    }

    let username: String = sqlx::query_scalar(
        r#"
        UPDATE users SET is_deleted = TRUE, is_active = FALSE, deleted_at = NOW()
        WHERE id = $1 AND is_deleted = FALSE
        RETURNING username
        "#,
    )
    .bind(id)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to deactivate user: {:?}", e);
        AppError::from(e)
    })?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Delete, "Examiner", id)
            .describe(format!("Deactivated {}", username)),
    )
    .await;

    Ok(Json(json!({ "message": format!("{} deactivated", username) })))
}

#[derive(Debug, Deserialize)]
pub struct BulkRevertRequest {
    pub session_ids: Vec<Uuid>,
}

/// Reverts several completed sessions to scheduled.
/// All or nothing: one refused session rolls back the whole batch.
pub async fn bulk_revert_sessions(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Json(payload): Json<BulkRevertRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.session_ids.is_empty() {
        return Err(AppError::BadRequest("No sessions selected".to_string()));
    }

    let mut tx = pool.begin().await?;
    let mut reverted = Vec::with_capacity(payload.session_ids.len());

    for id in &payload.session_ids {
        let session = fetch_session(&mut *tx, *id).await?;
        let current = session.parsed_status()?;
        let next = check_revert(current)
            .map_err(|e| AppError::BadRequest(format!("{}: {}", session.name, e)))?;
        let session = write_status(&mut *tx, session.id, current, next).await?;
        reverted.push((session, current));
    }

    tx.commit().await?;

    tracing::warn!(
        "{} sessions reverted to scheduled by {}",
        reverted.len(),
        claims.username
    );

    for (session, before) in &reverted {
        audit_transition(&pool, &claims, &client, AuditAction::Revert, session, *before).await;
    }

    Ok(Json(json!({
        "reverted": reverted.len(),
        "sessions": reverted.iter().map(|(s, _)| s.id).collect::<Vec<_>>(),
    })))
}

fn page_size(params: &AuditListParams) -> i64 {
    params.limit.unwrap_or(50).clamp(1, 200)
}

/// Read-only listing of the action audit trail, newest first.
pub async fn list_audit_logs(
    State(pool): State<PgPool>,
    Query(params): Query<AuditListParams>,
) -> Result<impl IntoResponse, AppError> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT id, user_id, username, action, resource_type, resource_id, description, \
         ip_address, user_agent, extra_data, created_at FROM audit_logs WHERE 1 = 1",
    );

    if let Some(action) = &params.action {
        builder.push(" AND action = ");
        builder.push_bind(action.to_uppercase());
    }
    if let Some(username) = &params.username {
        builder.push(" AND username = ");
        builder.push_bind(username.clone());
    }
    if let Some(cursor) = params.cursor {
        builder.push(" AND created_at < ");
        builder.push_bind(cursor);
    }
    builder.push(" ORDER BY created_at DESC LIMIT ");
    builder.push_bind(page_size(&params));

    let logs = builder
        .build_query_as::<AuditLog>()
        .fetch_all(&pool)
        .await?;

    Ok(Json(logs))
}

/// Read-only listing of login attempts, newest first.
pub async fn list_login_audit_logs(
    State(pool): State<PgPool>,
    Query(params): Query<AuditListParams>,
) -> Result<impl IntoResponse, AppError> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT id, user_id, username_attempted, ip_address, user_agent, success, created_at \
         FROM login_audit_logs WHERE 1 = 1",
    );

    if let Some(username) = &params.username {
        builder.push(" AND username_attempted = ");
        builder.push_bind(username.clone());
    }
    if let Some(cursor) = params.cursor {
        builder.push(" AND created_at < ");
        builder.push_bind(cursor);
    }
    builder.push(" ORDER BY created_at DESC LIMIT ");
    builder.push_bind(page_size(&params));

    let logs = builder
        .build_query_as::<LoginAuditLog>()
        .fetch_all(&pool)
        .await?;

    Ok(Json(logs))
}

/// Headline counts for the admin dashboard.
pub async fn stats_overview(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let (users, exams, sessions, scores, failed_logins): (i64, i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users WHERE is_deleted = FALSE),
                (SELECT COUNT(*) FROM exams WHERE is_deleted = FALSE),
                (SELECT COUNT(*) FROM exam_sessions WHERE status = 'in_progress'),
                (SELECT COUNT(*) FROM station_scores WHERE status = 'submitted'),
                (SELECT COUNT(*) FROM login_audit_logs
                    WHERE success = FALSE AND created_at > NOW() - INTERVAL '24 hours')
            "#,
        )
        .fetch_one(&pool)
        .await?;

    Ok(Json(json!({
        "active_users": users,
        "exams": exams,
        "sessions_in_progress": sessions,
        "submitted_scores": scores,
        "failed_logins_24h": failed_logins,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(limit: Option<i64>) -> AuditListParams {
        AuditListParams {
            action: None,
            username: None,
            cursor: None,
            limit,
        }
    }

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(page_size(&params(None)), 50);
        assert_eq!(page_size(&params(Some(500))), 200);
        assert_eq!(page_size(&params(Some(0))), 1);
        assert_eq!(page_size(&params(Some(20))), 20);
    }
}
