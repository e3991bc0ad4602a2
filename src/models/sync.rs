// src/models/sync.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::scoring::ScoreStatus;

/// One score record queued on a tablet while offline.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncRecord {
    pub local_uuid: Uuid,
    pub session_student_id: Option<Uuid>,
    pub station_id: Option<Uuid>,
    #[serde(default)]
    pub total_score: f64,
    #[serde(default)]
    pub comments: String,
    pub status: Option<ScoreStatus>,
    #[serde(default)]
    pub client_id: String,
    pub local_timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub scores: Vec<SyncRecord>,
}

/// A record left untouched because the server copy is at least as recent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncConflict {
    pub local_uuid: Uuid,
    pub server_timestamp: Option<i64>,
    pub client_timestamp: Option<i64>,
}

/// A record the caller is not allowed to write.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRejection {
    pub local_uuid: Uuid,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct SyncResponse {
    pub synced_count: usize,
    pub synced_uuids: Vec<Uuid>,
    pub conflicts: Vec<SyncConflict>,
    pub rejected: Vec<SyncRejection>,
    pub server_time: i64,
}

/// What to do with an incoming record that matches an existing row.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncDecision {
    Overwrite,
    Conflict(SyncConflict),
}

/// Last-writer-wins on the client clock, with ties kept as conflicts.
///
/// The stored row is only replaced when the incoming timestamp is strictly
/// newer. Missing timestamps count as zero.
pub fn decide(local_uuid: Uuid, server_timestamp: Option<i64>, client_timestamp: Option<i64>) -> SyncDecision {
    if client_timestamp.unwrap_or(0) > server_timestamp.unwrap_or(0) {
        SyncDecision::Overwrite
    } else {
        SyncDecision::Conflict(SyncConflict {
            local_uuid,
            server_timestamp,
            client_timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_client_overwrites() {
        let id = Uuid::new_v4();
        assert_eq!(decide(id, Some(100), Some(101)), SyncDecision::Overwrite);
        assert_eq!(decide(id, None, Some(1)), SyncDecision::Overwrite);
    }

    #[test]
    fn older_or_equal_is_conflict() {
        let id = Uuid::new_v4();
        for client in [Some(99), Some(100)] {
            match decide(id, Some(100), client) {
                SyncDecision::Conflict(c) => {
                    assert_eq!(c.local_uuid, id);
                    assert_eq!(c.server_timestamp, Some(100));
                    assert_eq!(c.client_timestamp, client);
                }
                SyncDecision::Overwrite => panic!("stale record must not overwrite"),
            }
        }
    }

    #[test]
    fn missing_client_timestamp_never_overwrites() {
        assert!(matches!(
            decide(Uuid::new_v4(), Some(5), None),
            SyncDecision::Conflict(_)
        ));
        assert!(matches!(
            decide(Uuid::new_v4(), None, None),
            SyncDecision::Conflict(_)
        ));
    }

    #[test]
    fn request_defaults_missing_fields() {
        let req: SyncRequest = serde_json::from_value(serde_json::json!({
            "scores": [{
                "local_uuid": "6f1c1b6e-2a55-4c3c-9c3e-1c8f5a2d9b10",
                "local_timestamp": 1700000000
            }]
        }))
        .unwrap();
        let record = &req.scores[0];
        assert_eq!(record.total_score, 0.0);
        assert!(record.status.is_none());
        assert!(record.comments.is_empty());
    }
}
