// src/config.rs

use dotenvy::dotenv;
use std::env;

/// Seconds after submission during which an examiner may reopen their own score.
pub const UNDO_WINDOW_SECONDS: i64 = 300;

/// Percentage at or above which a student passes the session.
pub const PASS_THRESHOLD_PERCENTAGE: f64 = 60.0;

/// Paths created automatically for every new session.
pub const DEFAULT_PATH_COUNT: usize = 3;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    /// Token lifetime in seconds. Also acts as the idle session timeout.
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    /// Temporary password given to users created without one.
    pub default_user_password: String,
    /// Obfuscated prefix under which the admin API is mounted.
    pub secret_admin_url: String,
    /// Peers whose `X-Forwarded-For` header is trusted. Empty trusts any peer.
    pub trusted_proxies: Vec<String>,
    pub login_failure_limit: u32,
    pub login_cooloff_minutes: i64,
    /// Seconds to replenish one login attempt per IP. Zero disables the throttle.
    pub login_replenish_seconds: u64,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8 * 60 * 60);

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let admin_username = env::var("ADMIN_USERNAME").ok();
        let admin_password = env::var("ADMIN_PASSWORD").ok();

        let default_user_password =
            env::var("DEFAULT_USER_PASSWORD").unwrap_or_else(|_| "ChangeMe123!".to_string());

        let secret_admin_url = env::var("SECRET_ADMIN_URL")
            .map(|v| v.trim_matches('/').to_string())
            .unwrap_or_else(|_| "control-panel".to_string());

        let trusted_proxies = env::var("TRUSTED_PROXIES")
            .map(|v| parse_list(&v))
            .unwrap_or_default();

        let login_failure_limit = env::var("LOGIN_FAILURE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let login_cooloff_minutes = env::var("LOGIN_COOLOFF_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(15);

        let login_replenish_seconds = env::var("LOGIN_REPLENISH_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            admin_username,
            admin_password,
            default_user_password,
            secret_admin_url,
            trusted_proxies,
            login_failure_limit,
            login_cooloff_minutes,
            login_replenish_seconds,
            bind_addr,
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
