// src/models/user.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::Lifecycle;

/// Staff roles. Superusers sit above all of them and are flagged separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Examiner,
    Coordinator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Examiner => "examiner",
            Role::Coordinator => "coordinator",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "examiner" => Some(Role::Examiner),
            "coordinator" => Some(Role::Coordinator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Whether a role may use the creator (staff) interface.
pub fn has_creator_access(role: &str, is_superuser: bool) -> bool {
    is_superuser || matches!(Role::parse(role), Some(Role::Admin | Role::Coordinator))
}

/// Column list matching `User`, for `SELECT`/`RETURNING` clauses.
pub const USER_COLUMNS: &str = "id, username, email, full_name, title, department, password, role, \
     is_superuser, is_active, must_change_password, is_deleted, deleted_at, created_at";

/// Represents the 'users' table in the database.
/// Every user is an examiner account; the role decides which interface it may use.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,

    /// Unique username.
    pub username: String,

    pub email: String,

    pub full_name: String,

    /// Honorific shown on the marking screen (Dr., Prof.).
    pub title: String,

    pub department: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    /// 'examiner', 'coordinator' or 'admin'.
    pub role: String,

    pub is_superuser: bool,

    pub is_active: bool,

    /// Set for provisioned accounts until the user picks their own password.
    pub must_change_password: bool,

    pub is_deleted: bool,

    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl User {
    pub fn display_name(&self) -> String {
        display_name(&self.title, &self.full_name)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_flags(self.is_deleted, self.deleted_at, None)
    }
}

pub fn display_name(title: &str, full_name: &str) -> String {
    if title.is_empty() {
        full_name.to_string()
    } else {
        format!("{} {}", title, full_name)
    }
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 80))]
    pub username: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

/// DTO for changing the caller's own password.
#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, max = 128))]
    pub current_password: String,
    #[validate(length(
        min = 8,
        max = 128,
        message = "Password length must be between 8 and 128 characters."
    ))]
    pub new_password: String,
}

/// DTO for creating an examiner (or staff) account.
/// Without a password the configured default is assigned and must be changed on first login.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(
        min = 3,
        max = 80,
        message = "Username length must be between 3 and 80 characters."
    ))]
    pub username: String,
    #[validate(email, length(max = 120))]
    pub email: String,
    #[validate(length(min = 1, max = 150))]
    pub full_name: String,
    #[validate(length(max = 20))]
    pub title: Option<String>,
    #[validate(length(max = 100))]
    pub department: Option<String>,
    pub role: Option<Role>,
    #[validate(length(min = 8, max = 128))]
    pub password: Option<String>,
}
