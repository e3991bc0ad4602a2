// src/models/assignment.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Represents the 'examiner_assignments' table in the database.
/// Unique per (session, station, examiner).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExaminerAssignment {
    pub id: Uuid,
    pub session_id: Uuid,
    pub station_id: Uuid,
    pub examiner_id: i64,
    pub is_primary: bool,
}

/// Assignment joined with station, session and examiner names.
#[derive(Debug, Serialize, FromRow)]
pub struct AssignmentDetail {
    pub id: Uuid,
    pub session_id: Uuid,
    pub session_name: String,
    pub session_date: chrono::NaiveDate,
    pub session_status: String,
    pub station_id: Uuid,
    pub station_number: i32,
    pub station_name: String,
    pub path_name: Option<String>,
    pub examiner_id: i64,
    pub examiner_name: String,
    pub is_primary: bool,
}

/// Examiner slots for one station in a bulk path assignment.
#[derive(Debug, Deserialize)]
pub struct StationSlots {
    pub station_id: Uuid,
    /// Required.
    pub examiner_1: Option<i64>,
    pub examiner_2: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BulkAssignRequest {
    pub path_id: Uuid,
    pub stations: Vec<StationSlots>,
}

#[derive(Debug, Default, Serialize)]
pub struct BulkAssignOutcome {
    pub created: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Stations of a bulk assignment that lack the required first examiner.
pub fn missing_primary(slots: &[StationSlots]) -> Vec<Uuid> {
    slots
        .iter()
        .filter(|s| s.examiner_1.is_none())
        .map(|s| s.station_id)
        .collect()
}

/// Examiner ids to assign for one station, primary first.
/// The same examiner in both slots is an error.
pub fn slot_examiners(slot: &StationSlots) -> Result<Vec<(i64, bool)>, String> {
    match (slot.examiner_1, slot.examiner_2) {
        (Some(a), Some(b)) if a == b => {
            Err("Examiner 1 and 2 cannot be the same.".to_string())
        }
        (Some(a), Some(b)) => Ok(vec![(a, true), (b, false)]),
        (Some(a), None) => Ok(vec![(a, true)]),
        (None, Some(b)) => Ok(vec![(b, false)]),
        (None, None) => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(e1: Option<i64>, e2: Option<i64>) -> StationSlots {
        StationSlots {
            station_id: Uuid::new_v4(),
            examiner_1: e1,
            examiner_2: e2,
        }
    }

    #[test]
    fn same_examiner_twice_is_rejected() {
        assert!(slot_examiners(&slot(Some(4), Some(4))).is_err());
    }

    #[test]
    fn primary_comes_first() {
        assert_eq!(
            slot_examiners(&slot(Some(4), Some(9))).unwrap(),
            vec![(4, true), (9, false)]
        );
        assert_eq!(slot_examiners(&slot(Some(4), None)).unwrap(), vec![(4, true)]);
    }

    #[test]
    fn missing_primary_lists_stations() {
        let slots = vec![slot(Some(1), None), slot(None, Some(2))];
        assert_eq!(missing_primary(&slots), vec![slots[1].station_id]);
    }
}
