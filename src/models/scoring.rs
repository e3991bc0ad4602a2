// src/models/scoring.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::config::UNDO_WINDOW_SECONDS;

/// Represents the 'station_scores' table in the database.
/// One row per (student, station, examiner).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StationScore {
    pub id: Uuid,
    pub session_student_id: Uuid,
    pub station_id: Uuid,
    pub examiner_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_score: f64,
    pub max_score: Option<f64>,
    pub percentage: Option<f64>,
    pub passed_critical: bool,
    /// Comma separated checklist item ids that were failed.
    pub critical_items_failed: String,
    pub global_rating: Option<i32>,
    pub comments: String,
    /// 'in_progress' or 'submitted'.
    pub status: String,
    /// Set by a coordinator to let the examiner correct a submitted score.
    pub unlocked_for_correction: bool,

    // Offline sync metadata
    pub local_uuid: Uuid,
    pub client_id: String,
    /// Client clock at the time of the last local edit.
    pub local_timestamp: Option<i64>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: String,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StationScore {
    pub fn is_submitted(&self) -> bool {
        self.status == ScoreStatus::Submitted.as_str()
    }

    /// Items can be marked while in progress, or after a coordinator unlock.
    pub fn is_editable(&self) -> bool {
        !self.is_submitted() || self.unlocked_for_correction
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStatus {
    InProgress,
    Submitted,
}

impl ScoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreStatus::InProgress => "in_progress",
            ScoreStatus::Submitted => "submitted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(ScoreStatus::InProgress),
            "submitted" => Some(ScoreStatus::Submitted),
            _ => None,
        }
    }
}

/// Represents the 'item_scores' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ItemScore {
    pub id: i64,
    pub station_score_id: Uuid,
    pub checklist_item_id: i64,
    pub score: f64,
    pub max_points: f64,
    pub marked_at: Option<DateTime<Utc>>,
    pub notes: String,
}

/// Item score joined with the checklist item's critical flag.
#[derive(Debug, Clone, FromRow)]
pub struct MarkedItem {
    pub checklist_item_id: i64,
    pub score: f64,
    pub max_points: f64,
    pub is_critical: bool,
}

/// Total of all marked items and its percentage of `max_score`.
pub fn compute_total(items: &[MarkedItem], max_score: Option<f64>) -> (f64, Option<f64>) {
    let total: f64 = items.iter().map(|i| i.score).sum();
    let percentage = max_score
        .filter(|max| *max > 0.0)
        .map(|max| total / max * 100.0);
    (total, percentage)
}

/// Critical items scored below their max points.
/// Returns whether the station passed on critical items and the failed ids.
pub fn evaluate_critical(items: &[MarkedItem]) -> (bool, Vec<i64>) {
    let failed: Vec<i64> = items
        .iter()
        .filter(|i| i.is_critical && i.score < i.max_points)
        .map(|i| i.checklist_item_id)
        .collect();
    (failed.is_empty(), failed)
}

/// Whether a submission stamped at `completed_at` may still be undone at `now`.
/// Exactly at the boundary is still allowed; a score without a stamp is always undoable.
pub fn within_undo_window(completed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match completed_at {
        Some(done) => (now - done).num_seconds() <= UNDO_WINDOW_SECONDS,
        None => true,
    }
}

/// Whether an offline copy may replace the stored row.
/// A submitted score is locked once its undo window has passed, unless unlocked.
pub fn accepts_offline_edit(
    status: &str,
    unlocked_for_correction: bool,
    completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    status != ScoreStatus::Submitted.as_str()
        || unlocked_for_correction
        || within_undo_window(completed_at, now)
}

/// One examiner's submitted total for a (student, station) pair.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExaminerScore {
    pub examiner_id: Option<i64>,
    pub examiner_name: Option<String>,
    pub score: f64,
    pub max_score: Option<f64>,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Reconciled result for a (student, station), computed on read.
#[derive(Debug, Clone, Serialize)]
pub struct FinalScore {
    pub examiner_scores: Vec<ExaminerScore>,
    /// Mean of submitted totals. `None` until every assigned examiner has submitted.
    pub final_score: Option<f64>,
    pub max_score: Option<f64>,
    pub percentage: Option<f64>,
    pub both_submitted: bool,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Averages the submitted scores for a student at a station.
///
/// `expected_examiners` is the number of examiners assigned to the station;
/// when it exceeds the number of submissions the final score is withheld.
/// Returns `None` when nothing has been submitted.
pub fn reconcile(submitted: Vec<ExaminerScore>, expected_examiners: usize) -> Option<FinalScore> {
    if submitted.is_empty() {
        return None;
    }

    let count = submitted.len();
    let max_score = submitted[0].max_score;
    let both_submitted = count >= 2;

    let (final_score, percentage) = if count >= expected_examiners.max(1) {
        let mean = round_to(submitted.iter().map(|s| s.score).sum::<f64>() / count as f64, 2);
        let percentage = max_score
            .filter(|max| *max > 0.0)
            .map(|max| round_to(mean / max * 100.0, 1));
        (Some(mean), percentage)
    } else {
        (None, None)
    };

    Some(FinalScore {
        examiner_scores: submitted,
        final_score,
        max_score,
        percentage,
        both_submitted,
    })
}

/// DTO for opening (or resuming) a marking session.
#[derive(Debug, Deserialize, Validate)]
pub struct StartMarkingRequest {
    pub session_student_id: Uuid,
    pub station_id: Uuid,
    #[validate(length(max = 50))]
    pub client_id: Option<String>,
    pub local_timestamp: Option<i64>,
}

/// DTO for marking a single checklist item.
#[derive(Debug, Deserialize, Validate)]
pub struct MarkItemRequest {
    pub checklist_item_id: i64,
    #[validate(range(min = 0.0))]
    pub score: f64,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitScoreRequest {
    #[validate(range(min = 0, max = 10))]
    pub global_rating: Option<i32>,
    #[validate(length(max = 5000))]
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FinalScoreQuery {
    pub session_student_id: Uuid,
    pub station_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn examiner_score(id: i64, score: f64) -> ExaminerScore {
        ExaminerScore {
            examiner_id: Some(id),
            examiner_name: Some(format!("Examiner {}", id)),
            score,
            max_score: Some(10.0),
            submitted_at: Some(Utc::now()),
        }
    }

    fn marked(id: i64, score: f64, max: f64, critical: bool) -> MarkedItem {
        MarkedItem {
            checklist_item_id: id,
            score,
            max_points: max,
            is_critical: critical,
        }
    }

    #[test]
    fn two_submissions_average() {
        let result = reconcile(vec![examiner_score(1, 8.0), examiner_score(2, 6.0)], 2).unwrap();
        assert_eq!(result.final_score, Some(7.0));
        assert!(result.both_submitted);
        assert_eq!(result.percentage, Some(70.0));
        assert_eq!(result.examiner_scores.len(), 2);
    }

    #[test]
    fn single_submission_of_two_withholds_final() {
        let result = reconcile(vec![examiner_score(1, 8.0)], 2).unwrap();
        assert_eq!(result.final_score, None);
        assert!(!result.both_submitted);
    }

    #[test]
    fn single_examiner_station_reports_final() {
        let result = reconcile(vec![examiner_score(1, 9.0)], 1).unwrap();
        assert_eq!(result.final_score, Some(9.0));
        // Unassigned stations still reconcile what was submitted.
        assert!(reconcile(vec![examiner_score(1, 9.0)], 0).unwrap().final_score.is_some());
    }

    #[test]
    fn nothing_submitted_is_absent() {
        assert!(reconcile(Vec::new(), 2).is_none());
    }

    #[test]
    fn mean_is_rounded_to_two_places() {
        let scores = vec![
            examiner_score(1, 7.0),
            examiner_score(2, 8.0),
            examiner_score(3, 8.0),
        ];
        let result = reconcile(scores, 3).unwrap();
        assert_eq!(result.final_score, Some(7.67));
    }

    #[test]
    fn undo_window_boundary() {
        let now = Utc::now();
        assert!(within_undo_window(Some(now - Duration::seconds(10)), now));
        assert!(within_undo_window(Some(now - Duration::seconds(300)), now));
        assert!(!within_undo_window(Some(now - Duration::seconds(301)), now));
        assert!(within_undo_window(None, now));
    }

    #[test]
    fn locked_submissions_refuse_offline_edits() {
        let now = Utc::now();
        let long_ago = Some(now - Duration::seconds(3600));
        assert!(accepts_offline_edit("in_progress", false, None, now));
        assert!(accepts_offline_edit("submitted", false, Some(now - Duration::seconds(60)), now));
        assert!(accepts_offline_edit("submitted", true, long_ago, now));
        assert!(!accepts_offline_edit("submitted", false, long_ago, now));
    }

    #[test]
    fn totals_and_percentage() {
        let items = vec![marked(1, 1.0, 1.0, false), marked(2, 1.5, 3.0, false)];
        let (total, pct) = compute_total(&items, Some(4.0));
        assert_eq!(total, 2.5);
        assert_eq!(pct, Some(62.5));
        assert_eq!(compute_total(&items, Some(0.0)).1, None);
        assert_eq!(compute_total(&items, None).1, None);
    }

    #[test]
    fn critical_item_below_max_fails() {
        let items = vec![
            marked(1, 1.0, 1.0, true),
            marked(2, 0.5, 1.0, true),
            marked(3, 0.0, 2.0, false),
        ];
        assert_eq!(evaluate_critical(&items), (false, vec![2]));
        assert_eq!(evaluate_critical(&items[..1]), (true, vec![]));
    }

    #[test]
    fn editable_after_unlock() {
        let mut score = StationScore {
            id: Uuid::new_v4(),
            session_student_id: Uuid::new_v4(),
            station_id: Uuid::new_v4(),
            examiner_id: Some(1),
            started_at: None,
            completed_at: Some(Utc::now()),
            total_score: 5.0,
            max_score: Some(10.0),
            percentage: Some(50.0),
            passed_critical: true,
            critical_items_failed: String::new(),
            global_rating: None,
            comments: String::new(),
            status: "submitted".into(),
            unlocked_for_correction: false,
            local_uuid: Uuid::new_v4(),
            client_id: String::new(),
            local_timestamp: None,
            synced_at: None,
            sync_status: "synced".into(),
            created_at: None,
            updated_at: None,
        };
        assert!(!score.is_editable());
        score.unlocked_for_correction = true;
        assert!(score.is_editable());
    }
}
