// src/handlers/scores.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{FromRow, PgExecutor, PgPool};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        audit::AuditAction,
        scoring::{ExaminerScore, FinalScore, FinalScoreQuery, StationScore, reconcile},
    },
    utils::{
        audit::{AuditEntry, log_action},
        client::ClientContext,
        jwt::Claims,
    },
};

pub(crate) const SCORE_COLUMNS: &str = "id, session_student_id, station_id, examiner_id, \
     started_at, completed_at, total_score, max_score, percentage, passed_critical, \
     critical_items_failed, global_rating, comments, status, unlocked_for_correction, \
     local_uuid, client_id, local_timestamp, synced_at, sync_status, created_at, updated_at";

const SUBMITTED_SCORES: &str = r#"
    SELECT
        sc.session_student_id, sc.station_id, sc.examiner_id,
        u.full_name AS examiner_name, sc.total_score AS score, sc.max_score,
        sc.completed_at AS submitted_at
    FROM station_scores sc
    JOIN session_students ss ON ss.id = sc.session_student_id
    LEFT JOIN users u ON u.id = sc.examiner_id
"#;

#[derive(Debug, FromRow)]
struct SubmittedRow {
    session_student_id: Uuid,
    station_id: Uuid,
    #[sqlx(flatten)]
    score: ExaminerScore,
}

pub(crate) async fn fetch_score<'e, E>(executor: E, id: Uuid) -> Result<StationScore, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, StationScore>(&format!(
        "SELECT {} FROM station_scores WHERE id = $1",
        SCORE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(AppError::NotFound("Score not found".to_string()))
}

/// Reconciled score for one student at one station, computed from the
/// submitted rows and the number of examiners assigned to the station.
pub(crate) async fn final_score_for(
    pool: &PgPool,
    session_student_id: Uuid,
    station_id: Uuid,
) -> Result<Option<FinalScore>, AppError> {
    let rows = sqlx::query_as::<_, SubmittedRow>(&format!(
        r#"{}
        WHERE sc.session_student_id = $1 AND sc.station_id = $2 AND sc.status = 'submitted'
        ORDER BY sc.completed_at
        "#,
        SUBMITTED_SCORES
    ))
    .bind(session_student_id)
    .bind(station_id)
    .fetch_all(pool)
    .await?;

    let expected: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM examiner_assignments a
        JOIN session_students ss ON ss.session_id = a.session_id
        WHERE ss.id = $1 AND a.station_id = $2
        "#,
    )
    .bind(session_student_id)
    .bind(station_id)
    .fetch_one(pool)
    .await?;

    Ok(reconcile(
        rows.into_iter().map(|r| r.score).collect(),
        expected as usize,
    ))
}

/// Final scores of every (student, station) pair in a session that can be reconciled.
pub(crate) async fn session_final_scores(
    pool: &PgPool,
    session_id: Uuid,
) -> Result<HashMap<(Uuid, Uuid), f64>, AppError> {
    let rows = sqlx::query_as::<_, SubmittedRow>(&format!(
        r#"{}
        WHERE ss.session_id = $1 AND sc.status = 'submitted'
        ORDER BY sc.completed_at
        "#,
        SUBMITTED_SCORES
    ))
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    let expected: HashMap<Uuid, i64> = sqlx::query_as::<_, (Uuid, i64)>(
        "SELECT station_id, COUNT(*) FROM examiner_assignments WHERE session_id = $1 GROUP BY station_id",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .collect();

    let mut grouped: HashMap<(Uuid, Uuid), Vec<ExaminerScore>> = HashMap::new();
    for row in rows {
        grouped
            .entry((row.session_student_id, row.station_id))
            .or_default()
            .push(row.score);
    }

    Ok(grouped
        .into_iter()
        .filter_map(|((student, station), scores)| {
            let expected = expected.get(&station).copied().unwrap_or(0) as usize;
            reconcile(scores, expected)
                .and_then(|result| result.final_score)
                .map(|score| ((student, station), score))
        })
        .collect())
}

/// Reconciled final score for a (student, station) pair.
pub async fn get_final_score(
    State(pool): State<PgPool>,
    Query(query): Query<FinalScoreQuery>,
) -> Result<impl IntoResponse, AppError> {
    let result = final_score_for(&pool, query.session_student_id, query.station_id)
        .await?
        .ok_or(AppError::NotFound("No submitted scores yet".to_string()))?;

    Ok(Json(result))
}

/// Lets the owning examiner correct a submitted score outside the undo window.
pub async fn unlock_score(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let before = fetch_score(&pool, id).await?;
    if !before.is_submitted() {
        return Err(AppError::BadRequest(
            "Only submitted scores can be unlocked".to_string(),
        ));
    }
    if before.unlocked_for_correction {
        return Err(AppError::BadRequest(
            "Score is already unlocked for correction".to_string(),
        ));
    }

    let score = sqlx::query_as::<_, StationScore>(&format!(
        r#"
        UPDATE station_scores SET unlocked_for_correction = TRUE, updated_at = NOW()
        WHERE id = $1 AND status = 'submitted'
        RETURNING {}
        "#,
        SCORE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::Conflict(
        "Score changed meanwhile, reload and try again".to_string(),
    ))?;

    tracing::info!("Score {} unlocked for correction by {}", score.id, claims.username);

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Unlock, "StationScore", score.id)
            .describe("Unlocked submitted score for correction")
            .extra(json!({
                "examiner_id": before.examiner_id,
                "session_student_id": before.session_student_id,
                "station_id": before.station_id,
                "total_score": before.total_score,
                "completed_at": before.completed_at,
            })),
    )
    .await;

    Ok(Json(score))
}
