// src/handlers/sync.rs

use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::AppError,
    handlers::marking::{fetch_student, is_assigned},
    models::{
        audit::AuditAction,
        scoring::{ScoreStatus, accepts_offline_edit},
        sync::{
            SyncConflict, SyncDecision, SyncRecord, SyncRejection, SyncRequest, SyncResponse, decide,
        },
    },
    utils::{
        audit::{AuditEntry, log_action},
        client::ClientContext,
        html::clean_html,
        jwt::Claims,
    },
};

/// Server-side view of a row matched by `local_uuid`.
#[derive(Debug, sqlx::FromRow)]
struct StoredScore {
    id: Uuid,
    examiner_id: Option<i64>,
    status: String,
    unlocked_for_correction: bool,
    completed_at: Option<DateTime<Utc>>,
    local_timestamp: Option<i64>,
}

enum Outcome {
    Synced,
    Conflict(SyncConflict),
    Rejected(String),
}

async fn overwrite(
    pool: &PgPool,
    stored: &StoredScore,
    record: &SyncRecord,
) -> Result<(), AppError> {
    let status = record
        .status
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|| stored.status.clone());

    sqlx::query(
        r#"
        UPDATE station_scores SET
            total_score = $2, comments = $3, status = $4,
            completed_at = CASE WHEN $4 = 'submitted' THEN COALESCE(completed_at, NOW()) ELSE NULL END,
            unlocked_for_correction = CASE WHEN $4 = 'submitted' THEN FALSE ELSE unlocked_for_correction END,
            local_timestamp = $5, synced_at = NOW(), sync_status = 'synced', updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(stored.id)
    .bind(record.total_score)
    .bind(clean_html(&record.comments))
    .bind(&status)
    .bind(record.local_timestamp)
    .execute(pool)
    .await?;

    Ok(())
}

async fn insert(pool: &PgPool, examiner_id: i64, record: &SyncRecord) -> Result<Outcome, AppError> {
    let (Some(student_id), Some(station_id)) = (record.session_student_id, record.station_id) else {
        return Ok(Outcome::Rejected(
            "New records need session_student_id and station_id".to_string(),
        ));
    };

    let student = match fetch_student(pool, student_id).await {
        Ok(student) => student,
        Err(AppError::NotFound(message)) => return Ok(Outcome::Rejected(message)),
        Err(e) => return Err(e),
    };

    if !is_assigned(pool, examiner_id, student.session_id, station_id).await? {
        return Ok(Outcome::Rejected(
            "Not assigned to this station for this session".to_string(),
        ));
    }

    let max_score: f64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(points), 0)::FLOAT8 FROM checklist_items WHERE station_id = $1",
    )
    .bind(station_id)
    .fetch_one(pool)
    .await?;

    let status = record.status.unwrap_or(ScoreStatus::InProgress);

    let result = sqlx::query(
        r#"
        INSERT INTO station_scores
            (session_student_id, station_id, examiner_id, started_at, completed_at,
             total_score, max_score, comments, status, local_uuid, client_id,
             local_timestamp, synced_at, sync_status)
        VALUES ($1, $2, $3, NOW(), CASE WHEN $8 = 'submitted' THEN NOW() END,
                $4, $5, $6, $8, $7, $9, $10, NOW(), 'synced')
        "#,
    )
    .bind(student.id)
    .bind(station_id)
    .bind(examiner_id)
    .bind(record.total_score)
    .bind(max_score)
    .bind(clean_html(&record.comments))
    .bind(record.local_uuid)
    .bind(status.as_str())
    .bind(&record.client_id)
    .bind(record.local_timestamp)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(Outcome::Synced),
        Err(e) => {
            match AppError::unique_violation(e, "A score already exists for this student and station") {
                AppError::Conflict(message) => Ok(Outcome::Rejected(message)),
                other => Err(other),
            }
        }
    }
}

async fn apply(pool: &PgPool, examiner_id: i64, record: &SyncRecord) -> Result<Outcome, AppError> {
    let stored = sqlx::query_as::<_, StoredScore>(
        r#"
        SELECT id, examiner_id, status, unlocked_for_correction, completed_at, local_timestamp
        FROM station_scores WHERE local_uuid = $1
        "#,
    )
    .bind(record.local_uuid)
    .fetch_optional(pool)
    .await?;

    let Some(stored) = stored else {
        return insert(pool, examiner_id, record).await;
    };

    if stored.examiner_id != Some(examiner_id) {
        return Ok(Outcome::Rejected("Score belongs to another examiner".to_string()));
    }

    match decide(record.local_uuid, stored.local_timestamp, record.local_timestamp) {
        SyncDecision::Overwrite => {
            if !accepts_offline_edit(
                &stored.status,
                stored.unlocked_for_correction,
                stored.completed_at,
                Utc::now(),
            ) {
                return Ok(Outcome::Rejected(
                    "Score is submitted and locked; ask a coordinator to unlock it".to_string(),
                ));
            }
            overwrite(pool, &stored, record).await?;
            Ok(Outcome::Synced)
        }
        SyncDecision::Conflict(conflict) => Ok(Outcome::Conflict(conflict)),
    }
}

/// Merges score records queued offline on a tablet.
///
/// Records are applied one by one; a conflict or rejection never aborts the
/// rest of the batch.
pub async fn sync_scores(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Json(payload): Json<SyncRequest>,
) -> Result<impl IntoResponse, AppError> {
    let examiner_id = claims.user_id();
    let mut response = SyncResponse::default();

    for record in &payload.scores {
        match apply(&pool, examiner_id, record).await? {
            Outcome::Synced => response.synced_uuids.push(record.local_uuid),
            Outcome::Conflict(conflict) => response.conflicts.push(conflict),
            Outcome::Rejected(reason) => {
                tracing::warn!(
                    "Rejected sync record {} from {}: {}",
                    record.local_uuid,
                    claims.username,
                    reason
                );
                response.rejected.push(SyncRejection {
                    local_uuid: record.local_uuid,
                    reason,
                });
            }
        }
    }

    response.synced_count = response.synced_uuids.len();
    response.server_time = Utc::now().timestamp();

    tracing::info!(
        "Sync from {}: {} synced, {} conflicts, {} rejected",
        claims.username,
        response.synced_count,
        response.conflicts.len(),
        response.rejected.len()
    );

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Sync, "StationScore", examiner_id)
            .describe(format!("Offline sync of {} records", payload.scores.len()))
            .extra(json!({
                "synced": response.synced_count,
                "conflicts": response.conflicts.len(),
                "rejected": response.rejected.len(),
            })),
    )
    .await;

    Ok(Json(response))
}

/// Lets a tablet check connectivity and how many of its scores are unsynced.
pub async fn sync_status(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM station_scores WHERE examiner_id = $1 AND sync_status = 'local'",
    )
    .bind(claims.user_id())
    .fetch_one(&pool)
    .await?;

    Ok(Json(json!({
        "online": true,
        "pending": pending,
        "server_time": Utc::now().timestamp(),
    })))
}
