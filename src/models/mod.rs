// src/models/mod.rs

pub mod assignment;
pub mod audit;
pub mod course;
pub mod exam;
pub mod report;
pub mod scoring;
pub mod session;
pub mod sync;
pub mod user;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Soft-delete state shared by exams, stations, paths and examiners.
/// Stored as an `is_deleted` flag plus timestamps; rows are never physically removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Deleted {
        at: Option<DateTime<Utc>>,
        by: Option<i64>,
    },
}

impl Lifecycle {
    pub fn from_flags(is_deleted: bool, at: Option<DateTime<Utc>>, by: Option<i64>) -> Self {
        if is_deleted {
            Lifecycle::Deleted { at, by }
        } else {
            Lifecycle::Active
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Lifecycle::Deleted { .. })
    }
}
