// src/models/course.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'courses' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    /// Unique course code (e.g. "MED301").
    pub code: String,
    pub short_code: String,
    pub name: String,
    pub description: String,
    pub year_level: i32,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Course listing row with aggregated ILO figures.
#[derive(Debug, Serialize, FromRow)]
pub struct CourseSummary {
    pub id: i64,
    pub code: String,
    pub short_code: String,
    pub name: String,
    pub year_level: i32,
    pub ilo_count: i64,
    pub total_osce_marks: i64,
}

/// Intended Learning Outcome with its OSCE mark allocation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Ilo {
    pub id: i64,
    pub course_id: i64,
    /// Unique within the course.
    pub number: i32,
    pub description: String,
    pub theme: String,
    pub osce_marks: i32,
}

/// ILO with the marks already consumed by checklist items.
#[derive(Debug, Serialize, FromRow)]
pub struct IloUsage {
    pub id: i64,
    pub number: i32,
    pub description: String,
    pub theme: String,
    pub osce_marks: i32,
    pub used_marks: i64,
}

impl IloUsage {
    pub fn remaining_marks(&self) -> i64 {
        i64::from(self.osce_marks) - self.used_marks
    }
}

/// Reusable checklist item template.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: i64,
    pub ilo_id: Option<i64>,
    pub description: String,
    pub points: i32,
    pub is_critical: bool,
    pub rubric_type: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCourseRequest {
    #[validate(length(min = 1, max = 20))]
    pub code: String,
    #[validate(length(max = 20))]
    pub short_code: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(range(min = 1, max = 10))]
    pub year_level: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateIloRequest {
    #[validate(range(min = 1))]
    pub number: i32,
    #[validate(length(min = 1, max = 5000))]
    pub description: String,
    #[validate(length(max = 100))]
    pub theme: Option<String>,
    #[validate(range(min = 0))]
    pub osce_marks: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLibraryItemRequest {
    pub ilo_id: Option<i64>,
    #[validate(length(min = 1, max = 2000))]
    pub description: String,
    #[validate(range(min = 0, max = 100))]
    pub points: Option<i32>,
    pub is_critical: Option<bool>,
    #[validate(custom(function = super::exam::validate_rubric_type))]
    pub rubric_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_marks_can_go_negative() {
        let usage = IloUsage {
            id: 1,
            number: 1,
            description: "History taking".into(),
            theme: "Communication".into(),
            osce_marks: 10,
            used_marks: 12,
        };
        assert_eq!(usage.remaining_marks(), -2);
    }
}
