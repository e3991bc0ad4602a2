// src/handlers/reports.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{
    error::AppError,
    handlers::{scores::session_final_scores, sessions::fetch_session},
    models::{
        audit::AuditAction,
        report::{
            ReportStation, ReportStudent, StationTotals, station_headers, student_results, summarize,
        },
        session::ExamSession,
    },
    utils::{
        audit::{AuditEntry, log_action},
        client::ClientContext,
        export::{format_score, push_csv_row, safe_filename},
        jwt::Claims,
    },
};

struct ReportData {
    session: ExamSession,
    stations: Vec<ReportStation>,
    students: Vec<ReportStudent>,
    finals: HashMap<(Uuid, Uuid), f64>,
}

async fn load_report(pool: &PgPool, session_id: Uuid) -> Result<ReportData, AppError> {
    let session = fetch_session(pool, session_id).await?;

    let stations = sqlx::query_as::<_, ReportStation>(
        r#"
        SELECT
            s.id, s.path_id, p.name AS path_name, s.station_number, s.name,
            COALESCE(SUM(ci.points), 0)::FLOAT8 AS max_score
        FROM stations s
        JOIN paths p ON p.id = s.path_id
        LEFT JOIN checklist_items ci ON ci.station_id = s.id
        WHERE p.session_id = $1 AND p.is_deleted = FALSE
          AND s.active = TRUE AND s.is_deleted = FALSE
        GROUP BY s.id, p.name
        ORDER BY s.station_number
        "#,
    )
    .bind(session.id)
    .fetch_all(pool)
    .await?;

    let students = sqlx::query_as::<_, ReportStudent>(
        r#"
        SELECT ss.id, ss.student_number, ss.full_name, ss.path_id, p.name AS path_name
        FROM session_students ss
        LEFT JOIN paths p ON p.id = ss.path_id
        WHERE ss.session_id = $1
        "#,
    )
    .bind(session.id)
    .fetch_all(pool)
    .await?;

    let finals = session_final_scores(pool, session.id).await?;

    Ok(ReportData {
        session,
        stations,
        students,
        finals,
    })
}

fn csv_response(filename: String, body: String) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", safe_filename(&filename)),
            ),
        ],
        body,
    )
}

async fn audit_export(
    pool: &PgPool,
    claims: &Claims,
    client: &ClientContext,
    session: &ExamSession,
    what: &str,
) {
    log_action(
        pool,
        Some(claims),
        client,
        AuditEntry::new(AuditAction::Export, "ExamSession", session.id)
            .describe(format!("Exported {} for session {}", what, session.name)),
    )
    .await;
}

/// Per-student results of a session with averages and pass rate.
pub async fn session_summary(
    State(pool): State<PgPool>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let data = load_report(&pool, session_id).await?;

    Ok(Json(summarize(
        data.session.id,
        &data.session.name,
        &data.stations,
        &data.students,
        &data.finals,
    )))
}

pub async fn export_students_csv(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let data = load_report(&pool, session_id).await?;
    let headers = station_headers(&data.stations);

    let mut out = String::new();
    let mut columns = vec![
        "Student Number".to_string(),
        "Full Name".to_string(),
        "Path".to_string(),
    ];
    columns.extend(headers.iter().map(|h| format!("St.{}: {}", h.number, h.name)));
    columns.extend(["Total Score", "Max Score", "Percentage", "Pass/Fail"].map(String::from));
    push_csv_row(&mut out, &columns);

    for result in student_results(&data.stations, &data.students, &data.finals) {
        let mut row = vec![
            result.student_number.clone(),
            result.full_name.clone(),
            result.path_name.clone().unwrap_or_default(),
        ];
        row.extend(
            headers
                .iter()
                .map(|h| format_score(result.station_scores.get(&h.number).copied().flatten())),
        );
        row.push(result.total_score.to_string());
        row.push(result.max_score.to_string());
        row.push(result.percentage.to_string());
        row.push(if result.passed { "PASS" } else { "FAIL" }.to_string());
        push_csv_row(&mut out, &row);
    }

    audit_export(&pool, &claims, &client, &data.session, "student results CSV").await;

    Ok(csv_response(
        format!("{}_students_{}.csv", data.session.name, data.session.id),
        out,
    ))
}

pub async fn export_stations_csv(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = fetch_session(&pool, session_id).await?;

    let totals = sqlx::query_as::<_, StationTotals>(
        r#"
        SELECT
            s.name AS station_name, p.name AS path_name,
            AVG(COALESCE(sc.max_score, 0))::FLOAT8 AS avg_max,
            AVG(sc.total_score)::FLOAT8 AS avg_score,
            MIN(sc.total_score)::FLOAT8 AS min_score,
            MAX(sc.total_score)::FLOAT8 AS max_achieved,
            COUNT(sc.id) AS marked
        FROM stations s
        JOIN paths p ON p.id = s.path_id
        JOIN station_scores sc ON sc.station_id = s.id
        WHERE p.session_id = $1 AND s.active = TRUE
        GROUP BY s.id, s.name, s.station_number, p.name
        ORDER BY p.name, s.station_number
        "#,
    )
    .bind(session.id)
    .fetch_all(&pool)
    .await?;

    let round1 = |v: f64| ((v * 10.0).round() / 10.0).to_string();

    let mut out = String::new();
    push_csv_row(
        &mut out,
        [
            "Station Name",
            "Path",
            "Max Score",
            "Avg Score",
            "Avg %",
            "Min Score",
            "Max Achieved",
            "Students Marked",
        ],
    );
    for t in &totals {
        push_csv_row(
            &mut out,
            [
                t.station_name.clone(),
                t.path_name.clone(),
                round1(t.avg_max),
                round1(t.avg_score),
                t.average_percentage().to_string(),
                round1(t.min_score),
                round1(t.max_achieved),
                t.marked.to_string(),
            ],
        );
    }

    audit_export(&pool, &claims, &client, &session, "station statistics CSV").await;

    Ok(csv_response(
        format!("{}_stations_{}.csv", session.name, session.id),
        out,
    ))
}

#[derive(Debug, FromRow)]
struct RawItemRow {
    student_number: String,
    student_name: String,
    path_name: String,
    station_name: String,
    description: String,
    score: f64,
    max_points: f64,
    examiner_name: String,
    marked_at: Option<DateTime<Utc>>,
}

/// Every marked checklist item of a session, one line per item and examiner.
pub async fn export_raw_csv(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(client): Extension<ClientContext>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = fetch_session(&pool, session_id).await?;

    let rows = sqlx::query_as::<_, RawItemRow>(
        r#"
        SELECT
            ss.student_number, ss.full_name AS student_name,
            COALESCE(p.name, '') AS path_name, s.name AS station_name,
            ci.description, i.score, i.max_points,
            COALESCE(u.full_name, '') AS examiner_name, i.marked_at
        FROM item_scores i
        JOIN station_scores sc ON sc.id = i.station_score_id
        JOIN session_students ss ON ss.id = sc.session_student_id
        LEFT JOIN paths p ON p.id = ss.path_id
        JOIN stations s ON s.id = sc.station_id
        JOIN checklist_items ci ON ci.id = i.checklist_item_id
        LEFT JOIN users u ON u.id = sc.examiner_id
        WHERE ss.session_id = $1
        ORDER BY ss.student_number, s.station_number, u.full_name, ci.item_number
        "#,
    )
    .bind(session.id)
    .fetch_all(&pool)
    .await?;

    let mut out = String::new();
    push_csv_row(
        &mut out,
        [
            "Student Number",
            "Student Name",
            "Path",
            "Station",
            "Item",
            "Score",
            "Max Score",
            "Examiner",
            "Timestamp",
        ],
    );
    for row in &rows {
        push_csv_row(
            &mut out,
            [
                row.student_number.clone(),
                row.student_name.clone(),
                row.path_name.clone(),
                row.station_name.clone(),
                row.description.clone(),
                row.score.to_string(),
                row.max_points.to_string(),
                row.examiner_name.clone(),
                row.marked_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            ],
        );
    }

    audit_export(&pool, &claims, &client, &session, "raw item scores CSV").await;

    Ok(csv_response(
        format!("{}_raw_{}.csv", session.name, session.id),
        out,
    ))
}
