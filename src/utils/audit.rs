// src/utils/audit.rs

use sqlx::PgPool;

use crate::{
    models::audit::AuditAction,
    utils::{client::ClientContext, jwt::Claims},
};

/// One audit trail entry waiting to be written.
pub struct AuditEntry<'a> {
    pub action: AuditAction,
    pub resource_type: &'a str,
    pub resource_id: String,
    pub description: String,
    pub extra_data: Option<serde_json::Value>,
}

impl<'a> AuditEntry<'a> {
    pub fn new(action: AuditAction, resource_type: &'a str, resource_id: impl ToString) -> Self {
        Self {
            action,
            resource_type,
            resource_id: resource_id.to_string(),
            description: String::new(),
            extra_data: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn extra(mut self, extra: serde_json::Value) -> Self {
        self.extra_data = Some(extra);
        self
    }
}

/// Records an action in `audit_logs`.
///
/// Best-effort: a failed write is logged and swallowed so the primary action
/// still succeeds. `actor` is `None` for system actions.
pub async fn log_action(
    pool: &PgPool,
    actor: Option<&Claims>,
    client: &ClientContext,
    entry: AuditEntry<'_>,
) {
    let (user_id, username) = match actor {
        Some(claims) => (Some(claims.user_id()), claims.username.clone()),
        None => (None, "system".to_string()),
    };

    let result = sqlx::query(
        r#"
        INSERT INTO audit_logs
            (user_id, username, action, resource_type, resource_id,
             description, ip_address, user_agent, extra_data)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(user_id)
    .bind(&username)
    .bind(entry.action.as_str())
    .bind(entry.resource_type)
    .bind(&entry.resource_id)
    .bind(&entry.description)
    .bind(&client.ip)
    .bind(&client.user_agent)
    .bind(&entry.extra_data)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!(
            "Failed to write audit log [{}] {} {}: {:?}",
            entry.action.as_str(),
            entry.resource_type,
            entry.resource_id,
            e
        );
    }
}

/// Records a login attempt in `login_audit_logs`. Best-effort like `log_action`.
pub async fn log_login_attempt(
    pool: &PgPool,
    user_id: Option<i64>,
    username_attempted: &str,
    client: &ClientContext,
    success: bool,
) {
    if success {
        tracing::info!(
            "LOGIN_SUCCESS | user={} | ip={:?}",
            username_attempted,
            client.ip
        );
    } else {
        tracing::warn!(
            "LOGIN_FAILED | user={} | ip={:?}",
            username_attempted,
            client.ip
        );
    }

    let result = sqlx::query(
        r#"
        INSERT INTO login_audit_logs (user_id, username_attempted, ip_address, user_agent, success)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user_id)
    .bind(username_attempted)
    .bind(&client.ip)
    .bind(&client.user_agent)
    .bind(success)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!("Failed to write login audit log: {:?}", e);
    }
}
