// src/handlers/auth.rs

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    models::{
        audit::{AuditAction, LoginAttempt, is_locked_out},
        user::{ChangePasswordRequest, LoginRequest, USER_COLUMNS, User},
    },
    utils::{
        audit::{AuditEntry, log_action, log_login_attempt},
        client::ClientContext,
        hash::{hash_password, verify_password},
        jwt::{Claims, sign_jwt},
    },
};

pub(crate) async fn fetch_user(pool: &PgPool, id: i64) -> Result<User, AppError> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE id = $1 AND is_deleted = FALSE",
        USER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))
}

/// Consecutive failures for a username inside the cooloff window.
async fn locked_out(pool: &PgPool, config: &Config, username: &str) -> Result<bool, AppError> {
    if config.login_failure_limit == 0 {
        return Ok(false);
    }

    let now = Utc::now();
    let cooloff = chrono::Duration::minutes(config.login_cooloff_minutes);

    let attempts = sqlx::query_as::<_, LoginAttempt>(
        r#"
        SELECT success, created_at
        FROM login_audit_logs
        WHERE username_attempted = $1 AND created_at >= $2
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    )
    .bind(username)
    .bind(now - cooloff)
    .bind(i64::from(config.login_failure_limit))
    .fetch_all(pool)
    .await?;

    Ok(is_locked_out(
        &attempts,
        now,
        config.login_failure_limit,
        cooloff,
    ))
}

/// Authenticates a user and returns a JWT token.
///
/// Every attempt lands in the login audit log. Repeated failures lock the
/// username out for the cooloff period (429).
pub async fn login(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Extension(client): Extension<ClientContext>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    if locked_out(&pool, &config, &payload.username).await? {
        tracing::warn!(
            "LOGIN_LOCKED | user={} | ip={:?}",
            payload.username,
            client.ip
        );
        return Err(AppError::TooManyRequests(format!(
            "Too many failed login attempts. Try again in {} minutes.",
            config.login_cooloff_minutes
        )));
    }

    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE username = $1 AND is_deleted = FALSE",
        USER_COLUMNS
    ))
    .bind(&payload.username)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Login DB error: {:?}", e);
        AppError::from(e)
    })?;

    let user = match user {
        Some(user) if user.is_active && verify_password(&payload.password, &user.password)? => {
            user
        }
        other => {
            log_login_attempt(
                &pool,
                other.map(|u| u.id),
                &payload.username,
                &client,
                false,
            )
            .await;
            return Err(AppError::AuthError(
                "Invalid username or password".to_string(),
            ));
        }
    };

    log_login_attempt(&pool, Some(user.id), &user.username, &client, true).await;

    let claims = Claims::for_user(&user, config.jwt_expiration)?;
    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Login, "User", user.id).describe("Logged in"),
    )
    .await;

    let token = sign_jwt(&user, &config.jwt_secret, config.jwt_expiration)?;

    Ok(Json(json!({
        "token": token,
        "type": "Bearer",
        "expires_in": config.jwt_expiration,
        "must_change_password": user.must_change_password,
        "user": {
            "id": user.id,
            "username": user.username,
            "display_name": user.display_name(),
            "role": user.role,
            "is_superuser": user.is_superuser,
        }
    })))
}

/// Changes the caller's password and clears the forced-change flag.
///
/// Returns a fresh token, since the old one still carries the flag.
pub async fn change_password(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = fetch_user(&pool, claims.user_id()).await?;

    if !verify_password(&payload.current_password, &user.password)? {
        return Err(AppError::BadRequest(
            "Current password is incorrect".to_string(),
        ));
    }

    if payload.current_password == payload.new_password {
        return Err(AppError::BadRequest(
            "New password must differ from the current one".to_string(),
        ));
    }

    let hashed = hash_password(&payload.new_password)?;

    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users
        SET password = $1, must_change_password = FALSE
        WHERE id = $2
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(&hashed)
    .bind(user.id)
    .fetch_one(&pool)
    .await?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Update, "User", user.id).describe("Changed password"),
    )
    .await;

    let token = sign_jwt(&user, &config.jwt_secret, config.jwt_expiration)?;

    Ok(Json(json!({
        "token": token,
        "type": "Bearer",
        "must_change_password": false,
    })))
}

/// Records the logout. Tokens are stateless; the client drops its copy.
pub async fn logout(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
) -> Result<impl IntoResponse, AppError> {
    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Logout, "User", claims.user_id()).describe("Logged out"),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Returns the caller's own account.
pub async fn me(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user = fetch_user(&pool, claims.user_id()).await?;
    let display_name = user.display_name();
    let lifecycle = user.lifecycle();

    Ok(Json(json!({
        "user": user,
        "display_name": display_name,
        "lifecycle": lifecycle,
        "has_creator_access": claims.has_creator_access(),
    })))
}
