// src/models/audit.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kinds of action written to the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Logout,
    View,
    Export,
    Submit,
    Sync,
    Unlock,
    Revert,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::View => "VIEW",
            AuditAction::Export => "EXPORT",
            AuditAction::Submit => "SUBMIT",
            AuditAction::Sync => "SYNC",
            AuditAction::Unlock => "UNLOCK",
            AuditAction::Revert => "REVERT",
        }
    }
}

/// Represents the 'audit_logs' table. Append-only.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditLog {
    pub id: i64,
    pub user_id: Option<i64>,
    pub username: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub description: String,
    pub ip_address: Option<String>,
    pub user_agent: String,
    pub extra_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Represents the 'login_audit_logs' table. Append-only.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LoginAuditLog {
    pub id: i64,
    pub user_id: Option<i64>,
    pub username_attempted: String,
    pub ip_address: Option<String>,
    pub user_agent: String,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

/// Filters for the read-only audit listings.
#[derive(Debug, Deserialize)]
pub struct AuditListParams {
    pub action: Option<String>,
    pub username: Option<String>,
    /// Return rows older than this timestamp (cursor pagination).
    pub cursor: Option<DateTime<Utc>>,
    /// Number of rows to return (default: 50, max: 200).
    pub limit: Option<i64>,
}

/// A recent login attempt, newest first, used for the lockout check.
#[derive(Debug, Clone, FromRow)]
pub struct LoginAttempt {
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

/// Whether a username is locked out after repeated failures.
///
/// Counts consecutive failures (newest first) inside the cooloff window,
/// stopping at the most recent success.
pub fn is_locked_out(
    attempts: &[LoginAttempt],
    now: DateTime<Utc>,
    failure_limit: u32,
    cooloff: chrono::Duration,
) -> bool {
    if failure_limit == 0 {
        return false;
    }
    let window_start = now - cooloff;
    let failures = attempts
        .iter()
        .take_while(|a| !a.success && a.created_at >= window_start)
        .count();
    failures >= failure_limit as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn attempt(success: bool, minutes_ago: i64, now: DateTime<Utc>) -> LoginAttempt {
        LoginAttempt {
            success,
            created_at: now - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn five_recent_failures_lock() {
        let now = Utc::now();
        let attempts: Vec<_> = (0..5).map(|m| attempt(false, m, now)).collect();
        assert!(is_locked_out(&attempts, now, 5, Duration::minutes(15)));
        assert!(!is_locked_out(&attempts[..4], now, 5, Duration::minutes(15)));
    }

    #[test]
    fn success_resets_count() {
        let now = Utc::now();
        let mut attempts: Vec<_> = (0..3).map(|m| attempt(false, m, now)).collect();
        attempts.push(attempt(true, 4, now));
        attempts.extend((5..8).map(|m| attempt(false, m, now)));
        assert!(!is_locked_out(&attempts, now, 5, Duration::minutes(15)));
    }

    #[test]
    fn failures_outside_cooloff_expire() {
        let now = Utc::now();
        let attempts: Vec<_> = (20..25).map(|m| attempt(false, m, now)).collect();
        assert!(!is_locked_out(&attempts, now, 5, Duration::minutes(15)));
    }

    #[test]
    fn zero_limit_disables_lockout() {
        let now = Utc::now();
        let attempts: Vec<_> = (0..10).map(|m| attempt(false, m, now)).collect();
        assert!(!is_locked_out(&attempts, now, 0, Duration::minutes(15)));
    }

    #[test]
    fn action_names() {
        assert_eq!(AuditAction::Unlock.as_str(), "UNLOCK");
        assert_eq!(AuditAction::Sync.as_str(), "SYNC");
    }
}
