// src/utils/jwt.rs

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::{
    config::Config,
    error::AppError,
    models::user::{Role, User, has_creator_access},
};

/// JWT Claims structure.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Claims {
    /// Subject - Stores the User ID (as string).
    pub sub: String,
    pub username: String,
    /// 'examiner', 'coordinator' or 'admin'.
    pub role: String,
    #[serde(default)]
    pub superuser: bool,
    /// The holder must change their password before using anything else.
    #[serde(default)]
    pub pwd_change: bool,
    /// Expiration time as Unix timestamp.
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> i64 {
        self.sub.parse::<i64>().unwrap_or(0)
    }

    pub fn has_creator_access(&self) -> bool {
        has_creator_access(&self.role, self.superuser)
    }

    pub fn is_admin(&self) -> bool {
        self.superuser || self.role == Role::Admin.as_str()
    }

    pub fn is_examiner(&self) -> bool {
        !self.superuser && self.role == Role::Examiner.as_str()
    }

    /// Claims for a freshly authenticated user.
    ///
    /// The expiry doubles as the session timeout: once it passes the client must log in again.
    pub fn for_user(user: &User, expiration_seconds: u64) -> Result<Self, AppError> {
        // Calculate expiration: current time + expiration_seconds
        let expiration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AppError::InternalServerError(e.to_string()))?
            .as_secs() as usize
            + expiration_seconds as usize;

        Ok(Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            role: user.role.clone(),
            superuser: user.is_superuser,
            pwd_change: user.must_change_password,
            exp: expiration,
        })
    }
}

/// Signs a new JWT for the user.
pub fn sign_jwt(user: &User, secret: &str, expiration_seconds: u64) -> Result<String, AppError> {
    let claims = Claims::for_user(user, expiration_seconds)?;

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Verifies and decodes a JWT string.
///
/// Returns the `Claims` if valid, otherwise returns an `AppError`.
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::AuthError("Invalid token".to_string()))?;

    Ok(token_data.claims)
}

/// Axum Middleware: Authentication.
///
/// Intercepts requests, validates the 'Authorization: Bearer <token>' header.
/// If valid, injects `Claims` into the request extensions for handlers to use.
/// If invalid, returns 401 Unauthorized.
pub async fn auth_middleware(
    State(config): State<Config>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let token = match auth_header {
        Some(header) if header.starts_with("Bearer ") => &header[7..],
        _ => return Err(StatusCode::UNAUTHORIZED),
    };

    match verify_jwt(token, &config.jwt_secret) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(next.run(req).await)
        }
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}

#[derive(Debug, FromRow)]
struct AccountState {
    is_active: bool,
    is_deleted: bool,
    must_change_password: bool,
}

/// Reasons a validly signed token no longer grants access.
fn account_refusal(account: Option<&AccountState>, enforce_password_change: bool) -> Option<AppError> {
    match account {
        None => Some(AppError::AuthError("Account not found".to_string())),
        Some(a) if a.is_deleted || !a.is_active => {
            Some(AppError::AuthError("Account is disabled".to_string()))
        }
        Some(a) if enforce_password_change && a.must_change_password => Some(AppError::Forbidden(
            "Password change required before continuing".to_string(),
        )),
        Some(_) => None,
    }
}

async fn check_account(
    pool: &PgPool,
    claims: &Claims,
    enforce_password_change: bool,
) -> Result<(), AppError> {
    // The token flag alone is enough to refuse; the account row decides the rest.
    if enforce_password_change && claims.pwd_change {
        return Err(AppError::Forbidden(
            "Password change required before continuing".to_string(),
        ));
    }

    let account = sqlx::query_as::<_, AccountState>(
        "SELECT is_active, is_deleted, must_change_password FROM users WHERE id = $1",
    )
    .bind(claims.user_id())
    .fetch_optional(pool)
    .await?;

    match account_refusal(account.as_ref(), enforce_password_change) {
        Some(err) => {
            tracing::warn!("Refused token of {}: {:?}", claims.username, err);
            Err(err)
        }
        None => Ok(()),
    }
}

/// Axum Middleware: Account state.
///
/// Must be used AFTER `auth_middleware` and the role check. Tokens of disabled or
/// deleted accounts get 401; accounts still on a provisioned or reset password are
/// refused everywhere except the routes mounted outside this layer.
pub async fn account_middleware(
    State(pool): State<PgPool>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .cloned()
        .ok_or(AppError::AuthError("Missing credentials".to_string()))?;

    check_account(&pool, &claims, true).await?;
    Ok(next.run(req).await)
}

/// Axum Middleware: Active account only.
///
/// For the account routes that stay reachable while a password change is pending.
pub async fn active_account_middleware(
    State(pool): State<PgPool>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .cloned()
        .ok_or(AppError::AuthError("Missing credentials".to_string()))?;

    check_account(&pool, &claims, false).await?;
    Ok(next.run(req).await)
}

/// Axum Middleware: Creator (staff) Authorization.
///
/// Must be used AFTER `auth_middleware`. Admins, coordinators and superusers only.
pub async fn creator_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !claims.has_creator_access() {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(req).await)
}

/// Axum Middleware: Examiner Authorization.
///
/// Must be used AFTER `auth_middleware`. Staff roles use the creator interface instead.
pub async fn examiner_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !claims.is_examiner() {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(req).await)
}

/// Axum Middleware: Admin Authorization.
///
/// Must be used AFTER `auth_middleware`. Checks if the injected `Claims` has 'admin' role.
/// If not, returns 403 Forbidden.
pub async fn admin_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !claims.is_admin() {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: &str, superuser: bool, must_change: bool) -> User {
        User {
            id: 42,
            username: "dr_who".into(),
            email: "who@example.org".into(),
            full_name: "John Smith".into(),
            title: "Dr.".into(),
            department: String::new(),
            password: String::new(),
            role: role.into(),
            is_superuser: superuser,
            is_active: true,
            must_change_password: must_change,
            is_deleted: false,
            deleted_at: None,
            created_at: None,
        }
    }

    #[test]
    fn sign_then_verify_keeps_claims() {
        let token = sign_jwt(&user("coordinator", false, true), "secret", 60).unwrap();
        let claims = verify_jwt(&token, "secret").unwrap();
        assert_eq!(claims.user_id(), 42);
        assert_eq!(claims.username, "dr_who");
        assert!(claims.pwd_change);
        assert!(claims.has_creator_access());
        assert!(!claims.is_admin());
        assert!(!claims.is_examiner());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = sign_jwt(&user("examiner", false, false), "secret", 60).unwrap();
        assert!(matches!(
            verify_jwt(&token, "other"),
            Err(AppError::AuthError(_))
        ));
    }

    fn account(is_active: bool, is_deleted: bool, must_change: bool) -> AccountState {
        AccountState {
            is_active,
            is_deleted,
            must_change_password: must_change,
        }
    }

    #[test]
    fn disabled_accounts_lose_access() {
        assert!(matches!(
            account_refusal(Some(&account(false, true, false)), true),
            Some(AppError::AuthError(_))
        ));
        assert!(matches!(
            account_refusal(Some(&account(false, false, false)), false),
            Some(AppError::AuthError(_))
        ));
        assert!(matches!(account_refusal(None, false), Some(AppError::AuthError(_))));
        assert!(account_refusal(Some(&account(true, false, false)), true).is_none());
    }

    #[test]
    fn reset_password_is_enforced_from_the_account_row() {
        let pending = account(true, false, true);
        assert!(matches!(
            account_refusal(Some(&pending), true),
            Some(AppError::Forbidden(_))
        ));
        assert!(account_refusal(Some(&pending), false).is_none());
    }

    #[test]
    fn superuser_is_not_an_examiner() {
        let token = sign_jwt(&user("examiner", true, false), "secret", 60).unwrap();
        let claims = verify_jwt(&token, "secret").unwrap();
        assert!(claims.is_admin());
        assert!(!claims.is_examiner());
    }
}
