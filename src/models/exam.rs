// src/models/exam.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;
use validator::Validate;

use super::Lifecycle;

/// Represents the 'exams' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Exam {
    pub id: Uuid,
    pub course_id: i64,
    pub name: String,
    pub description: String,
    pub exam_date: Option<chrono::NaiveDate>,
    pub department: String,
    pub number_of_stations: i32,
    pub station_duration_minutes: i32,
    /// Final grade weight: the exam is marked out of this value regardless of station totals.
    pub exam_weight: Option<f64>,
    /// 'draft', 'ready', 'in_progress', 'completed' or 'archived'.
    pub status: String,
    pub is_deleted: bool,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
    pub deleted_by: Option<i64>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Exam {
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_flags(self.is_deleted, self.deleted_at, self.deleted_by)
    }
}

pub const EXAM_STATUSES: [&str; 5] = ["draft", "ready", "in_progress", "completed", "archived"];

/// Represents the 'stations' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Station {
    pub id: Uuid,
    pub path_id: Option<Uuid>,
    /// Legacy direct link to the exam, only set on rows that predate paths.
    pub exam_id: Option<Uuid>,
    /// Unique within the path.
    pub station_number: i32,
    pub name: String,
    pub scenario: String,
    pub instructions: String,
    pub duration_minutes: i32,
    pub active: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Station {
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_flags(self.is_deleted, self.deleted_at, None)
    }
}

/// Station row with its checklist totals.
#[derive(Debug, Serialize, FromRow)]
pub struct StationSummary {
    pub id: Uuid,
    pub path_id: Option<Uuid>,
    pub station_number: i32,
    pub name: String,
    pub duration_minutes: i32,
    pub active: bool,
    pub is_deleted: bool,
    pub item_count: i64,
    pub max_score: i64,
}

/// Represents the 'checklist_items' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: i64,
    pub station_id: Uuid,
    pub library_item_id: Option<i64>,
    pub ilo_id: Option<i64>,
    /// Unique within the station.
    pub item_number: i32,
    pub description: String,
    pub points: i32,
    pub category: String,
    /// Failing a critical item can fail the station regardless of the total.
    pub is_critical: bool,
    /// 'binary', 'partial' or 'scale'.
    pub rubric_type: String,
    pub rubric_levels: Option<Json<Vec<RubricLevel>>>,
    pub interaction_type: String,
    pub expected_response: String,
}

impl ChecklistItem {
    /// Explicit rubric levels when configured, otherwise the defaults for the rubric type.
    pub fn effective_rubric(&self) -> Vec<RubricLevel> {
        match &self.rubric_levels {
            Some(Json(levels)) if !levels.is_empty() => levels.clone(),
            _ => default_rubric_levels(&self.rubric_type, self.points),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricLevel {
    pub score: f64,
    pub label: String,
    #[serde(default)]
    pub color: String,
}

impl RubricLevel {
    fn new(score: f64, label: &str, color: &str) -> Self {
        Self {
            score,
            label: label.to_string(),
            color: color.to_string(),
        }
    }
}

pub const RUBRIC_TYPES: [&str; 3] = ["binary", "partial", "scale"];

pub fn validate_rubric_type(value: &str) -> Result<(), validator::ValidationError> {
    if RUBRIC_TYPES.contains(&value) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_rubric_type"))
    }
}

/// Scoring choices offered to the examiner when a checklist item has no explicit levels.
pub fn default_rubric_levels(rubric_type: &str, points: i32) -> Vec<RubricLevel> {
    let max = f64::from(points);
    match rubric_type {
        "partial" => vec![
            RubricLevel::new(0.0, "Not Done", "danger"),
            RubricLevel::new(max * 0.5, "Partial", "warning"),
            RubricLevel::new(max, "Complete", "success"),
        ],
        "scale" => (0..=points.max(0))
            .map(|i| RubricLevel::new(f64::from(i), &i.to_string(), "secondary"))
            .collect(),
        _ => vec![
            RubricLevel::new(0.0, "Not Done", "danger"),
            RubricLevel::new(max, "Done", "success"),
        ],
    }
}

/// Points contributed to an ILO by one checklist item.
#[derive(Debug, Clone, FromRow)]
pub struct IloPoints {
    pub ilo_id: Option<i64>,
    pub points: i32,
}

/// ILO allocation used when validating an exam's marks.
#[derive(Debug, Clone, FromRow)]
pub struct IloAllocation {
    pub id: i64,
    pub number: i32,
    pub osce_marks: i32,
}

/// Sums checklist points per ILO. Items without an ILO are grouped under `None`.
pub fn ilo_distribution(items: &[IloPoints]) -> BTreeMap<Option<i64>, i64> {
    let mut distribution = BTreeMap::new();
    for item in items {
        *distribution.entry(item.ilo_id).or_insert(0) += i64::from(item.points);
    }
    distribution
}

/// Lists every ILO whose used marks exceed its allocation.
/// ILOs without an allocation are not checked.
pub fn validate_marks(
    distribution: &BTreeMap<Option<i64>, i64>,
    allocations: &[IloAllocation],
) -> Vec<String> {
    allocations
        .iter()
        .filter(|ilo| ilo.osce_marks > 0)
        .filter_map(|ilo| {
            let used = distribution.get(&Some(ilo.id)).copied().unwrap_or(0);
            (used > i64::from(ilo.osce_marks)).then(|| {
                format!(
                    "ILO #{}: Uses {} marks but only {} allocated",
                    ilo.number, used, ilo.osce_marks
                )
            })
        })
        .collect()
}

/// DTO for creating an exam.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateExamRequest {
    pub course_id: i64,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub exam_date: Option<chrono::NaiveDate>,
    #[validate(length(max = 100))]
    pub department: Option<String>,
    #[validate(range(min = 1, max = 50))]
    pub number_of_stations: Option<i32>,
    #[validate(range(min = 1, max = 120))]
    pub station_duration_minutes: Option<i32>,
    #[validate(range(min = 0.0))]
    pub exam_weight: Option<f64>,
}

/// DTO for updating an exam. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateExamRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub exam_date: Option<chrono::NaiveDate>,
    #[validate(length(max = 100))]
    pub department: Option<String>,
    #[validate(range(min = 1, max = 120))]
    pub station_duration_minutes: Option<i32>,
    #[validate(range(min = 0.0))]
    pub exam_weight: Option<f64>,
    #[validate(custom(function = validate_exam_status))]
    pub status: Option<String>,
}

fn validate_exam_status(value: &str) -> Result<(), validator::ValidationError> {
    if EXAM_STATUSES.contains(&value) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_exam_status"))
    }
}

/// DTO for creating a station inside a path.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateStationRequest {
    /// Defaults to the next free number in the path.
    #[validate(range(min = 1))]
    pub station_number: Option<i32>,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 20000))]
    pub scenario: Option<String>,
    #[validate(length(max = 20000))]
    pub instructions: Option<String>,
    #[validate(range(min = 1, max = 120))]
    pub duration_minutes: Option<i32>,
}

/// DTO for updating a station. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStationRequest {
    #[validate(range(min = 1))]
    pub station_number: Option<i32>,
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 20000))]
    pub scenario: Option<String>,
    #[validate(length(max = 20000))]
    pub instructions: Option<String>,
    #[validate(range(min = 1, max = 120))]
    pub duration_minutes: Option<i32>,
    pub active: Option<bool>,
}

/// DTO for creating or replacing a checklist item.
#[derive(Debug, Deserialize, Validate)]
pub struct ChecklistItemRequest {
    #[validate(range(min = 1))]
    pub item_number: i32,
    #[validate(length(min = 1, max = 2000))]
    pub description: String,
    #[validate(range(min = 0, max = 100))]
    pub points: Option<i32>,
    #[validate(length(max = 50))]
    pub category: Option<String>,
    pub is_critical: Option<bool>,
    #[validate(custom(function = validate_rubric_type))]
    pub rubric_type: Option<String>,
    pub rubric_levels: Option<Vec<RubricLevel>>,
    #[validate(length(max = 20))]
    pub interaction_type: Option<String>,
    #[validate(length(max = 2000))]
    pub expected_response: Option<String>,
    pub ilo_id: Option<i64>,
    pub library_item_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_rubric_defaults() {
        let levels = default_rubric_levels("binary", 2);
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].score, 0.0);
        assert_eq!(levels[1].score, 2.0);
        assert_eq!(levels[1].label, "Done");
    }

    #[test]
    fn partial_rubric_has_half_marks() {
        let levels = default_rubric_levels("partial", 3);
        let scores: Vec<f64> = levels.iter().map(|l| l.score).collect();
        assert_eq!(scores, vec![0.0, 1.5, 3.0]);
    }

    #[test]
    fn scale_rubric_enumerates_every_point() {
        let levels = default_rubric_levels("scale", 4);
        assert_eq!(levels.len(), 5);
        assert_eq!(levels[4].label, "4");
    }

    #[test]
    fn explicit_levels_win_over_defaults() {
        let item = ChecklistItem {
            id: 1,
            station_id: Uuid::new_v4(),
            library_item_id: None,
            ilo_id: None,
            item_number: 1,
            description: "Washes hands".into(),
            points: 2,
            category: String::new(),
            is_critical: true,
            rubric_type: "binary".into(),
            rubric_levels: Some(Json(vec![RubricLevel::new(1.0, "Attempted", "info")])),
            interaction_type: "passive".into(),
            expected_response: String::new(),
        };
        assert_eq!(item.effective_rubric().len(), 1);
    }

    #[test]
    fn distribution_groups_by_ilo() {
        let items = vec![
            IloPoints { ilo_id: Some(1), points: 2 },
            IloPoints { ilo_id: Some(1), points: 3 },
            IloPoints { ilo_id: Some(2), points: 1 },
            IloPoints { ilo_id: None, points: 4 },
        ];
        let dist = ilo_distribution(&items);
        assert_eq!(dist.get(&Some(1)), Some(&5));
        assert_eq!(dist.get(&Some(2)), Some(&1));
        assert_eq!(dist.get(&None), Some(&4));
    }

    #[test]
    fn validate_marks_flags_over_allocation_only() {
        let items = vec![
            IloPoints { ilo_id: Some(1), points: 6 },
            IloPoints { ilo_id: Some(2), points: 2 },
            IloPoints { ilo_id: Some(3), points: 9 },
        ];
        let allocations = vec![
            IloAllocation { id: 1, number: 1, osce_marks: 5 },
            IloAllocation { id: 2, number: 2, osce_marks: 5 },
            // No allocation means unchecked.
            IloAllocation { id: 3, number: 3, osce_marks: 0 },
        ];
        let errors = validate_marks(&ilo_distribution(&items), &allocations);
        assert_eq!(errors, vec!["ILO #1: Uses 6 marks but only 5 allocated".to_string()]);
    }

    #[test]
    fn exam_lifecycle_reflects_soft_delete() {
        let now = chrono::Utc::now();
        let exam = Exam {
            id: Uuid::new_v4(),
            course_id: 1,
            name: "Year 3 OSCE".into(),
            description: String::new(),
            exam_date: None,
            department: String::new(),
            number_of_stations: 4,
            station_duration_minutes: 8,
            exam_weight: None,
            status: "archived".into(),
            is_deleted: true,
            deleted_at: Some(now),
            deleted_by: Some(3),
            created_at: None,
            updated_at: None,
        };
        assert_eq!(
            exam.lifecycle(),
            Lifecycle::Deleted {
                at: Some(now),
                by: Some(3)
            }
        );
    }
}
