// src/handlers/paths.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    handlers::{
        sessions::fetch_session,
        stations::{STATION_COLUMNS, STATION_SUMMARY},
    },
    models::{
        audit::AuditAction,
        exam::{CreateStationRequest, Station, StationSummary},
        session::{CreatePathRequest, Path as ExamPath, PathSummary, UpdatePathRequest},
    },
    utils::{
        audit::{AuditEntry, log_action},
        client::ClientContext,
        html::clean_html,
        jwt::Claims,
    },
};

const PATH_COLUMNS: &str = "id, session_id, name, rotation_minutes, is_active, is_deleted, deleted_at";

pub(crate) async fn fetch_path<'e, E>(executor: E, id: Uuid) -> Result<ExamPath, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, ExamPath>(&format!("SELECT {} FROM paths WHERE id = $1", PATH_COLUMNS))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound("Path not found".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct DeletedParams {
    /// Include soft-deleted rows.
    #[serde(default)]
    pub include_deleted: bool,
}

/// Lists a session's paths with station, student, mark and duration totals.
pub async fn list_paths(
    State(pool): State<PgPool>,
    Path(session_id): Path<Uuid>,
    Query(params): Query<DeletedParams>,
) -> Result<impl IntoResponse, AppError> {
    let paths = sqlx::query_as::<_, PathSummary>(
        r#"
        SELECT
            p.id, p.session_id, p.name, p.rotation_minutes, p.is_active, p.is_deleted,
            (SELECT COUNT(*) FROM stations s
              WHERE s.path_id = p.id AND s.active = TRUE AND s.is_deleted = FALSE) AS station_count,
            (SELECT COUNT(*) FROM session_students st WHERE st.path_id = p.id) AS student_count,
            (SELECT COALESCE(SUM(ci.points), 0)::BIGINT
               FROM checklist_items ci JOIN stations s ON s.id = ci.station_id
              WHERE s.path_id = p.id AND s.active = TRUE AND s.is_deleted = FALSE) AS total_marks,
            (SELECT COALESCE(SUM(s.duration_minutes), 0)::BIGINT FROM stations s
              WHERE s.path_id = p.id AND s.active = TRUE AND s.is_deleted = FALSE) AS total_duration
        FROM paths p
        WHERE p.session_id = $1 AND ($2 OR p.is_deleted = FALSE)
        ORDER BY LENGTH(p.name), p.name
        "#,
    )
    .bind(session_id)
    .bind(params.include_deleted)
    .fetch_all(&pool)
    .await?;

    Ok(Json(paths))
}

pub async fn create_path(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<CreatePathRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let session = fetch_session(&pool, session_id).await?;

    let path = sqlx::query_as::<_, ExamPath>(&format!(
        r#"
        INSERT INTO paths (session_id, name, rotation_minutes)
        VALUES ($1, $2, $3)
        RETURNING {}
        "#,
        PATH_COLUMNS
    ))
    .bind(session.id)
    .bind(payload.name.trim())
    .bind(payload.rotation_minutes.unwrap_or(8))
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        AppError::unique_violation(
            e,
            format!("Path '{}' already exists in this session", payload.name.trim()),
        )
    })?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Create, "Path", path.id)
            .describe(format!("Created path {} in session {}", path.name, session.name)),
    )
    .await;

    Ok((StatusCode::CREATED, Json(path)))
}

pub async fn get_path(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(fetch_path(&pool, id).await?))
}

pub async fn update_path(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePathRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let path = sqlx::query_as::<_, ExamPath>(&format!(
        r#"
        UPDATE paths SET
            name = COALESCE($2, name),
            rotation_minutes = COALESCE($3, rotation_minutes),
            is_active = COALESCE($4, is_active)
        WHERE id = $1 AND is_deleted = FALSE
        RETURNING {}
        "#,
        PATH_COLUMNS
    ))
    .bind(id)
    .bind(payload.name.as_deref().map(str::trim))
    .bind(payload.rotation_minutes)
    .bind(payload.is_active)
    .fetch_optional(&pool)
    .await
    .map_err(|e| AppError::unique_violation(e, "Another path in this session has that name"))?
    .ok_or(AppError::NotFound("Path not found".to_string()))?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Update, "Path", path.id),
    )
    .await;

    Ok(Json(path))
}

/// Soft-deletes a path and takes it out of rotation.
pub async fn delete_path(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let path = sqlx::query_as::<_, ExamPath>(&format!(
        r#"
        UPDATE paths SET is_deleted = TRUE, is_active = FALSE, deleted_at = NOW()
        WHERE id = $1 AND is_deleted = FALSE
        RETURNING {}
        "#,
        PATH_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Path not found".to_string()))?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Delete, "Path", path.id)
            .describe(format!("Soft-deleted path {}", path.name)),
    )
    .await;

    Ok(Json(path))
}

pub async fn restore_path(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let path = sqlx::query_as::<_, ExamPath>(&format!(
        r#"
        UPDATE paths SET is_deleted = FALSE, is_active = TRUE, deleted_at = NULL
        WHERE id = $1 AND is_deleted = TRUE
        RETURNING {}
        "#,
        PATH_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Deleted path not found".to_string()))?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Update, "Path", path.id)
            .describe(format!("Restored path {}", path.name)),
    )
    .await;

    Ok(Json(path))
}

/// Stations of a path ordered by station number.
pub async fn list_path_stations(
    State(pool): State<PgPool>,
    Path(path_id): Path<Uuid>,
    Query(params): Query<DeletedParams>,
) -> Result<impl IntoResponse, AppError> {
    let stations = sqlx::query_as::<_, StationSummary>(&format!(
        "{} WHERE s.path_id = $1 AND ($2 OR s.is_deleted = FALSE) GROUP BY s.id ORDER BY s.station_number",
        STATION_SUMMARY
    ))
    .bind(path_id)
    .bind(params.include_deleted)
    .fetch_all(&pool)
    .await?;

    Ok(Json(stations))
}

/// Adds a station to a path. Without a number the next free one is used.
pub async fn create_station(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(path_id): Path<Uuid>,
    Json(payload): Json<CreateStationRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let path = fetch_path(&pool, path_id).await?;
    if path.lifecycle().is_deleted() {
        return Err(AppError::BadRequest(
            "Cannot add stations to a deleted path".to_string(),
        ));
    }

    let station_number = match payload.station_number {
        Some(number) => number,
        None => {
            sqlx::query_scalar::<_, i32>(
                "SELECT COALESCE(MAX(station_number), 0) + 1 FROM stations WHERE path_id = $1",
            )
            .bind(path.id)
            .fetch_one(&pool)
            .await?
        }
    };

    let station = sqlx::query_as::<_, Station>(&format!(
        r#"
        INSERT INTO stations
            (path_id, station_number, name, scenario, instructions, duration_minutes)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {}
        "#,
        STATION_COLUMNS
    ))
    .bind(path.id)
    .bind(station_number)
    .bind(&payload.name)
    .bind(clean_html(payload.scenario.as_deref().unwrap_or_default()))
    .bind(clean_html(payload.instructions.as_deref().unwrap_or_default()))
    .bind(payload.duration_minutes.unwrap_or(path.rotation_minutes))
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        AppError::unique_violation(
            e,
            format!("Station number {} already exists in this path", station_number),
        )
    })?;

    log_action(
        &pool,
        Some(&claims),
        &client,
        AuditEntry::new(AuditAction::Create, "Station", station.id).describe(format!(
            "Created station {} ({}) in path {}",
            station.station_number, station.name, path.name
        )),
    )
    .await;

    Ok((StatusCode::CREATED, Json(station)))
}
