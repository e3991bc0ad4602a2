// src/models/session.rs

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::sync::LazyLock;
use uuid::Uuid;
use validator::Validate;

use super::Lifecycle;

/// Represents the 'exam_sessions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamSession {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub name: String,
    pub session_date: chrono::NaiveDate,
    pub session_type: String,
    pub start_time: chrono::NaiveTime,
    pub number_of_stations: i32,
    pub number_of_paths: i32,
    pub status: String,
    pub actual_start: Option<chrono::DateTime<chrono::Utc>>,
    pub actual_end: Option<chrono::DateTime<chrono::Utc>>,
    pub notes: String,
    pub created_by: Option<i64>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ExamSession {
    pub fn parsed_status(&self) -> Result<SessionStatus, LifecycleError> {
        SessionStatus::parse(&self.status)
            .ok_or_else(|| LifecycleError(format!("Unknown session status '{}'", self.status)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Archived,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(SessionStatus::Scheduled),
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            "archived" => Some(SessionStatus::Archived),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refused session transition, with the message shown to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleError(pub String);

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<LifecycleError> for crate::error::AppError {
    fn from(err: LifecycleError) -> Self {
        crate::error::AppError::BadRequest(err.0)
    }
}

/// Counts gathered before activating a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivationFacts {
    pub active_station_count: i64,
    pub student_count: i64,
    pub assignment_count: i64,
    pub path_count: i64,
}

/// Checks that a session may start. Returns non-blocking warnings on success.
///
/// Only a scheduled session can be activated, and only when at least one
/// active station exists across its paths. Missing students or examiners
/// are reported but do not block.
pub fn check_activation(
    current: SessionStatus,
    facts: &ActivationFacts,
) -> Result<Vec<String>, LifecycleError> {
    if current != SessionStatus::Scheduled {
        return Err(LifecycleError(format!(
            "Cannot activate a session that is {}",
            current
        )));
    }

    if facts.active_station_count == 0 {
        return Err(LifecycleError(
            "Cannot activate: No stations defined in any path for this session".to_string(),
        ));
    }

    let mut warnings = Vec::new();
    if facts.student_count == 0 {
        warnings.push("No students registered for this session".to_string());
    }
    if facts.assignment_count == 0 {
        warnings.push("No examiners assigned to stations".to_string());
    }
    if facts.path_count == 0 {
        warnings.push("No paths defined - create paths first".to_string());
    }
    Ok(warnings)
}

pub fn check_deactivation(current: SessionStatus) -> Result<SessionStatus, LifecycleError> {
    match current {
        SessionStatus::InProgress => Ok(SessionStatus::Scheduled),
        SessionStatus::Completed => Err(LifecycleError(
            "Cannot deactivate completed session".to_string(),
        )),
        other => Err(LifecycleError(format!(
            "Cannot deactivate a session that is {}",
            other
        ))),
    }
}

pub fn check_completion(current: SessionStatus) -> Result<SessionStatus, LifecycleError> {
    match current {
        SessionStatus::InProgress => Ok(SessionStatus::Completed),
        other => Err(LifecycleError(format!(
            "Only a session in progress can be completed (currently {})",
            other
        ))),
    }
}

pub fn check_cancellation(current: SessionStatus) -> Result<SessionStatus, LifecycleError> {
    match current {
        SessionStatus::Scheduled | SessionStatus::InProgress => Ok(SessionStatus::Cancelled),
        other => Err(LifecycleError(format!(
            "Cannot cancel a session that is {}",
            other
        ))),
    }
}

/// A session holding recorded scores can only be archived once completed.
pub fn check_archive(current: SessionStatus, score_count: i64) -> Result<SessionStatus, LifecycleError> {
    if current == SessionStatus::Archived {
        return Err(LifecycleError("Session is already archived".to_string()));
    }
    if score_count > 0 && current != SessionStatus::Completed {
        return Err(LifecycleError(format!(
            "Cannot delete: {} scores recorded. Complete the session first.",
            score_count
        )));
    }
    Ok(SessionStatus::Archived)
}

pub fn check_restore(current: SessionStatus) -> Result<SessionStatus, LifecycleError> {
    match current {
        SessionStatus::Archived => Ok(SessionStatus::Completed),
        _ => Err(LifecycleError("Session is not archived".to_string())),
    }
}

/// Moves an accidentally completed session back to scheduled.
pub fn check_revert(current: SessionStatus) -> Result<SessionStatus, LifecycleError> {
    match current {
        SessionStatus::Completed => Ok(SessionStatus::Scheduled),
        other => Err(LifecycleError(format!(
            "Only completed sessions can be reverted (currently {})",
            other
        ))),
    }
}

/// Rotation track name for the zero-based path index: "1", "2", "3", ...
pub fn path_name(index: usize) -> String {
    (index + 1).to_string()
}

/// Represents the 'paths' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Path {
    pub id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    pub rotation_minutes: i32,
    pub is_active: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Path {
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_flags(self.is_deleted, self.deleted_at, None)
    }
}

/// Path row with station/student figures for the path overview.
#[derive(Debug, Serialize, FromRow)]
pub struct PathSummary {
    pub id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    pub rotation_minutes: i32,
    pub is_active: bool,
    pub is_deleted: bool,
    pub station_count: i64,
    pub student_count: i64,
    pub total_marks: i64,
    pub total_duration: i64,
}

/// Represents the 'session_students' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SessionStudent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub path_id: Option<Uuid>,
    pub student_number: String,
    pub full_name: String,
    pub photo_url: String,
    /// 'registered', 'checked_in', 'in_progress', 'completed' or 'absent'.
    pub status: String,
    pub checked_in_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Student progress after a score submission.
///
/// Completed once every active station on the student's path has a submitted
/// score; in progress as soon as one has. Students without a path never complete.
pub fn student_progress(
    submitted_count: i64,
    path_station_count: Option<i64>,
    current: &str,
) -> String {
    match path_station_count {
        Some(total) if total > 0 && submitted_count >= total => "completed".to_string(),
        _ if submitted_count > 0 => "in_progress".to_string(),
        _ => current.to_string(),
    }
}

/// Round-robin distribution of students across paths, in the given order.
pub fn distribute_round_robin(student_ids: &[Uuid], path_ids: &[Uuid]) -> Vec<(Uuid, Uuid)> {
    if path_ids.is_empty() {
        return Vec::new();
    }
    student_ids
        .iter()
        .enumerate()
        .map(|(i, student)| (*student, path_ids[i % path_ids.len()]))
        .collect()
}

static STUDENT_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]+$").unwrap_or_else(|e| panic!("invalid student number pattern: {e}"))
});

/// Registration numbers contain digits only.
pub fn validate_student_number(value: &str) -> Result<(), validator::ValidationError> {
    if STUDENT_NUMBER.is_match(value) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("student_number_digits_only")
            .with_message("Registration number must contain numbers only.".into()))
    }
}

fn validate_photo_url(value: &str) -> Result<(), validator::ValidationError> {
    if value.is_empty() || url::Url::parse(value).is_ok() {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_url"))
    }
}

/// DTO for creating a session under an exam.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, max = 100, message = "Session name is required"))]
    pub name: String,
    #[validate(length(max = 20))]
    pub session_type: Option<String>,
    pub start_time: Option<chrono::NaiveTime>,
    #[validate(length(max = 5000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePathRequest {
    #[validate(length(min = 1, max = 50))]
    pub name: String,
    #[validate(range(min = 1, max = 120))]
    pub rotation_minutes: Option<i32>,
}

/// DTO for updating a path. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePathRequest {
    #[validate(length(min = 1, max = 50))]
    pub name: Option<String>,
    #[validate(range(min = 1, max = 120))]
    pub rotation_minutes: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStudentRequest {
    #[validate(length(min = 1, max = 50), custom(function = validate_student_number))]
    pub student_number: String,
    #[validate(length(min = 1, max = 150))]
    pub full_name: String,
    #[validate(length(max = 500), custom(function = validate_photo_url))]
    pub photo_url: Option<String>,
    pub path_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AssignPathRequest {
    /// `null` removes the student from any path.
    pub path_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(stations: i64, students: i64, assignments: i64, paths: i64) -> ActivationFacts {
        ActivationFacts {
            active_station_count: stations,
            student_count: students,
            assignment_count: assignments,
            path_count: paths,
        }
    }

    #[test]
    fn activation_blocked_without_stations_regardless_of_counts() {
        for f in [facts(0, 0, 0, 0), facts(0, 40, 12, 3)] {
            let err = check_activation(SessionStatus::Scheduled, &f).unwrap_err();
            assert!(err.0.contains("No stations"));
        }
    }

    #[test]
    fn activation_warns_but_proceeds() {
        let warnings = check_activation(SessionStatus::Scheduled, &facts(4, 0, 0, 1)).unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(check_activation(SessionStatus::Scheduled, &facts(4, 10, 8, 3))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn activation_only_from_scheduled() {
        assert!(check_activation(SessionStatus::Completed, &facts(4, 1, 1, 1)).is_err());
        assert!(check_activation(SessionStatus::InProgress, &facts(4, 1, 1, 1)).is_err());
    }

    #[test]
    fn archive_with_scores_requires_completion() {
        assert!(check_archive(SessionStatus::InProgress, 3).is_err());
        assert!(check_archive(SessionStatus::Scheduled, 1).is_err());
        assert_eq!(
            check_archive(SessionStatus::Completed, 3),
            Ok(SessionStatus::Archived)
        );
        assert_eq!(
            check_archive(SessionStatus::Scheduled, 0),
            Ok(SessionStatus::Archived)
        );
        assert!(check_archive(SessionStatus::Archived, 0).is_err());
    }

    #[test]
    fn revert_only_from_completed() {
        assert_eq!(
            check_revert(SessionStatus::Completed),
            Ok(SessionStatus::Scheduled)
        );
        assert!(check_revert(SessionStatus::InProgress).is_err());
        assert!(check_revert(SessionStatus::Archived).is_err());
    }

    #[test]
    fn remaining_transitions() {
        assert_eq!(
            check_deactivation(SessionStatus::InProgress),
            Ok(SessionStatus::Scheduled)
        );
        assert!(check_deactivation(SessionStatus::Completed).is_err());
        assert_eq!(
            check_completion(SessionStatus::InProgress),
            Ok(SessionStatus::Completed)
        );
        assert!(check_completion(SessionStatus::Scheduled).is_err());
        assert_eq!(
            check_cancellation(SessionStatus::Scheduled),
            Ok(SessionStatus::Cancelled)
        );
        assert!(check_cancellation(SessionStatus::Completed).is_err());
        assert_eq!(
            check_restore(SessionStatus::Archived),
            Ok(SessionStatus::Completed)
        );
        assert!(check_restore(SessionStatus::Completed).is_err());
    }

    #[test]
    fn status_names_round_trip() {
        for status in [
            SessionStatus::Scheduled,
            SessionStatus::InProgress,
            SessionStatus::Completed,
            SessionStatus::Cancelled,
            SessionStatus::Archived,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("paused"), None);
    }

    #[test]
    fn progress_follows_submitted_count() {
        assert_eq!(student_progress(4, Some(4), "in_progress"), "completed");
        assert_eq!(student_progress(2, Some(4), "registered"), "in_progress");
        assert_eq!(student_progress(0, Some(4), "checked_in"), "checked_in");
        assert_eq!(student_progress(3, None, "registered"), "in_progress");
        assert_eq!(student_progress(1, Some(0), "registered"), "in_progress");
    }

    #[test]
    fn round_robin_cycles_paths() {
        let students: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let paths: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let plan = distribute_round_robin(&students, &paths);
        assert_eq!(plan.len(), 5);
        assert_eq!(plan[0].1, paths[0]);
        assert_eq!(plan[1].1, paths[1]);
        assert_eq!(plan[4].1, paths[0]);
        assert!(distribute_round_robin(&students, &[]).is_empty());
    }

    #[test]
    fn student_numbers_are_digits() {
        assert!(validate_student_number("20231234").is_ok());
        assert!(validate_student_number("2023-12").is_err());
        assert!(validate_student_number("").is_err());
    }

    #[test]
    fn path_names_are_one_based() {
        assert_eq!(path_name(0), "1");
        assert_eq!(path_name(2), "3");
    }
}
