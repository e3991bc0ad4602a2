// src/handlers/stations.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgExecutor, PgPool, types::Json as SqlJson};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        audit::AuditAction,
        exam::{ChecklistItem, ChecklistItemRequest, Station, UpdateStationRequest},
    },
    utils::{
        audit::{AuditEntry, log_action},
        client::ClientContext,
        html::clean_html,
        jwt::Claims,
    },
};

pub(crate) const STATION_COLUMNS: &str = "id, path_id, exam_id, station_number, name, scenario, \
     instructions, duration_minutes, active, is_deleted, deleted_at";

/// Station rows with item count and max score; callers add WHERE / GROUP BY.
pub(crate) const STATION_SUMMARY: &str = r#"
    SELECT
        s.id, s.path_id, s.station_number, s.name, s.duration_minutes, s.active, s.is_deleted,
        COUNT(ci.id) AS item_count,
        COALESCE(SUM(ci.points), 0)::BIGINT AS max_score
    FROM stations s
    LEFT JOIN checklist_items ci ON ci.station_id = s.id
"#;

pub(crate) const ITEM_COLUMNS: &str = "id, station_id, library_item_id, ilo_id, item_number, \
     description, points, category, is_critical, rubric_type, rubric_levels, \
     interaction_type, expected_response";

pub(crate) async fn fetch_station<'e, E>(executor: E, id: Uuid) -> Result<Station, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Station>(&format!(
        "SELECT {} FROM stations WHERE id = $1",
        STATION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(AppError::NotFound("Station not found".to_string()))
}

pub(crate) async fn fetch_items<'e, E>(
    executor: E,
    station_id: Uuid,
) -> Result<Vec<ChecklistItem>, AppError>
where
    E: PgExecutor<'e>,
{
    let items = sqlx::query_as::<_, ChecklistItem>(&format!(
        "SELECT {} FROM checklist_items WHERE station_id = $1 ORDER BY item_number",
        ITEM_COLUMNS
    ))
    .bind(station_id)
    .fetch_all(executor)
    .await?;

    Ok(items)
}

/// Checklist item as shown to staff and examiners, rubric filled in.
pub(crate) fn item_view(item: &ChecklistItem) -> serde_json::Value {
    json!({
        "id": item.id,
        "item_number": item.item_number,
        "description": item.description,
        "points": item.points,
        "category": if item.category.is_empty() { "General" } else { item.category.as_str() },
        "is_critical": item.is_critical,
        "interaction_type": item.interaction_type,
        "expected_response": item.expected_response,
        "rubric_type": item.rubric_type,
        "rubric_levels": item.effective_rubric(),
        "ilo_id": item.ilo_id,
        "library_item_id": item.library_item_id,
    })
}

pub async fn get_station(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let station = fetch_station(&pool, id).await?;
    let items = fetch_items(&pool, id).await?;
    let max_score: i64 = items.iter().map(|i| i64::from(i.points)).sum();
    let lifecycle = station.lifecycle();

    Ok(Json(json!({
        "station": station,
        "lifecycle": lifecycle,
        "max_score": max_score,
        "items": items.iter().map(item_view).collect::<Vec<_>>(),
    })))
}

pub async fn update_station(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStationRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let station = sqlx::query_as::<_, Station>(&format!(
        r#"
        UPDATE stations SET
            station_number = COALESCE($2, station_number),
            name = COALESCE($3, name),
            scenario = COALESCE($4, scenario),
            instructions = COALESCE($5, instructions),
            duration_minutes = COALESCE($6, duration_minutes),
            active = COALESCE($7, active)
        WHERE id = $1 AND is_deleted = FALSE
        RETURNING {}
        "#,
        STATION_COLUMNS
    ))
    .bind(id)
    .bind(payload.station_number)
    .bind(payload.name)
    .bind(payload.scenario.as_deref().map(clean_html))
    .bind(payload.instructions.as_deref().map(clean_html))
    .bind(payload.duration_minutes)
    .bind(payload.active)
    .fetch_optional(&pool)
    .await
    .map_err(|e| AppError::unique_violation(e, "Station number already used in this path"))?
    .ok_or(AppError::NotFound("Station not found".to_string()))?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Update, "Station", station.id)
            .describe(format!("Updated station {}", station.name)),
    )
    .await;

    Ok(Json(station))
}

/// Soft-deletes a station and deactivates it.
pub async fn delete_station(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let station = sqlx::query_as::<_, Station>(&format!(
        r#"
        UPDATE stations SET is_deleted = TRUE, active = FALSE, deleted_at = NOW()
        WHERE id = $1 AND is_deleted = FALSE
        RETURNING {}
        "#,
        STATION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Station not found".to_string()))?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Delete, "Station", station.id)
            .describe(format!("Soft-deleted station {}", station.name)),
    )
    .await;

    Ok(Json(station))
}

pub async fn restore_station(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let station = sqlx::query_as::<_, Station>(&format!(
        r#"
        UPDATE stations SET is_deleted = FALSE, active = TRUE, deleted_at = NULL
        WHERE id = $1 AND is_deleted = TRUE
        RETURNING {}
        "#,
        STATION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Deleted station not found".to_string()))?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Update, "Station", station.id)
            .describe(format!("Restored station {}", station.name)),
    )
    .await;

    Ok(Json(station))
}

pub async fn list_items(
    State(pool): State<PgPool>,
    Path(station_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let items = fetch_items(&pool, station_id).await?;
    Ok(Json(items.iter().map(item_view).collect::<Vec<_>>()))
}

pub async fn create_item(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(station_id): Path<Uuid>,
    Json(payload): Json<ChecklistItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let station = fetch_station(&pool, station_id).await?;
    let item_number = payload.item_number;

    let item = sqlx::query_as::<_, ChecklistItem>(&format!(
        r#"
        INSERT INTO checklist_items
            (station_id, library_item_id, ilo_id, item_number, description, points,
             category, is_critical, rubric_type, rubric_levels, interaction_type,
             expected_response)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {}
        "#,
        ITEM_COLUMNS
    ))
    .bind(station.id)
    .bind(payload.library_item_id)
    .bind(payload.ilo_id)
    .bind(payload.item_number)
    .bind(clean_html(&payload.description))
    .bind(payload.points.unwrap_or(1))
    .bind(payload.category.unwrap_or_default())
    .bind(payload.is_critical.unwrap_or(false))
    .bind(payload.rubric_type.as_deref().unwrap_or("binary"))
    .bind(payload.rubric_levels.map(SqlJson))
    .bind(payload.interaction_type.as_deref().unwrap_or("passive"))
    .bind(payload.expected_response.unwrap_or_default())
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        AppError::unique_violation(
            e,
            format!("Item number {} already exists in this station", item_number),
        )
    })?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Create, "ChecklistItem", item.id)
            .describe(format!("Added item {} to station {}", item.item_number, station.name)),
    )
    .await;

    Ok((StatusCode::CREATED, Json(item_view(&item))))
}

pub async fn update_item(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<i64>,
    Json(payload): Json<ChecklistItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let item_number = payload.item_number;

    let item = sqlx::query_as::<_, ChecklistItem>(&format!(
        r#"
        UPDATE checklist_items SET
            library_item_id = $2, ilo_id = $3, item_number = $4, description = $5,
            points = $6, category = $7, is_critical = $8, rubric_type = $9,
            rubric_levels = $10, interaction_type = $11, expected_response = $12
        WHERE id = $1
        RETURNING {}
        "#,
        ITEM_COLUMNS
    ))
    .bind(id)
    .bind(payload.library_item_id)
    .bind(payload.ilo_id)
    .bind(payload.item_number)
    .bind(clean_html(&payload.description))
    .bind(payload.points.unwrap_or(1))
    .bind(payload.category.unwrap_or_default())
    .bind(payload.is_critical.unwrap_or(false))
    .bind(payload.rubric_type.as_deref().unwrap_or("binary"))
    .bind(payload.rubric_levels.map(SqlJson))
    .bind(payload.interaction_type.as_deref().unwrap_or("passive"))
    .bind(payload.expected_response.unwrap_or_default())
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        AppError::unique_violation(
            e,
            format!("Item number {} already exists in this station", item_number),
        )
    })?
    .ok_or(AppError::NotFound("Checklist item not found".to_string()))?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Update, "ChecklistItem", item.id),
    )
    .await;

    Ok(Json(item_view(&item)))
}

pub async fn delete_item(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM checklist_items WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Checklist item not found".to_string()));
    }

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Delete, "ChecklistItem", id),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
