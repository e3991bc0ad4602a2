// src/routes.rs

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{any, delete, get, post, put},
};
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::{
    cors::CorsLayer, services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};

use crate::{
    error::AppError,
    handlers::{
        admin, auth, courses, examiners, exams, marking, paths, reports, scores, sessions,
        stations, students, sync,
    },
    state::AppState,
    utils::{
        client::client_context_middleware,
        jwt::{
            account_middleware, active_account_middleware, admin_middleware, auth_middleware,
            creator_middleware, examiner_middleware,
        },
    },
};

const CONTENT_SECURITY_POLICY: &str =
    "default-src 'self'; img-src 'self' data:; style-src 'self' 'unsafe-inline'; frame-ancestors 'none'";

/// The legacy admin prefix answers 404 regardless of method or credentials.
async fn hidden_admin() -> AppError {
    AppError::NotFound("Not found".to_string())
}

fn auth_routes(state: &AppState) -> Router<AppState> {
    let mut login = Router::new().route("/login", post(auth::login));

    let replenish = state.config.login_replenish_seconds;
    if replenish > 0 {
        let governor_conf = GovernorConfigBuilder::default()
            .per_second(replenish)
            .burst_size(state.config.login_failure_limit.max(1))
            .key_extractor(SmartIpKeyExtractor)
            .finish();

        match governor_conf {
            Some(conf) => login = login.layer(GovernorLayer::new(Arc::new(conf))),
            None => tracing::warn!("Invalid login rate limit settings, rate limiting disabled"),
        }
    }

    // Reachable while a password change is pending.
    let session = Router::new()
        .route("/change-password", post(auth::change_password))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            active_account_middleware,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    login.merge(session)
}

fn creator_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        // Courses, ILOs and the item library
        .route("/courses", get(courses::list_courses).post(courses::create_course))
        .route(
            "/courses/{id}",
            get(courses::get_course).delete(courses::delete_course),
        )
        .route(
            "/courses/{id}/ilos",
            get(courses::list_ilos).post(courses::create_ilo),
        )
        .route("/ilos/{id}", delete(courses::delete_ilo))
        .route(
            "/library",
            get(courses::list_library).post(courses::create_library_item),
        )
        .route("/library/{id}", delete(courses::delete_library_item))
        // Exams
        .route("/exams", get(exams::list_exams).post(exams::create_exam))
        .route(
            "/exams/{id}",
            get(exams::get_exam)
                .put(exams::update_exam)
                .delete(exams::delete_exam),
        )
        .route("/exams/{id}/restore", post(exams::restore_exam))
        .route("/exams/{id}/summary", get(exams::exam_summary))
        .route(
            "/exams/{id}/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        // Sessions and their lifecycle
        .route("/sessions/{id}", get(sessions::get_session))
        .route("/sessions/{id}/status", get(sessions::session_status))
        .route("/sessions/{id}/activate", post(sessions::activate_session))
        .route("/sessions/{id}/deactivate", post(sessions::deactivate_session))
        .route("/sessions/{id}/complete", post(sessions::complete_session))
        .route("/sessions/{id}/cancel", post(sessions::cancel_session))
        .route("/sessions/{id}/archive", post(sessions::archive_session))
        .route("/sessions/{id}/restore", post(sessions::restore_session))
        .route("/sessions/{id}/revert", post(sessions::revert_session))
        // Paths and stations
        .route(
            "/sessions/{id}/paths",
            get(paths::list_paths).post(paths::create_path),
        )
        .route(
            "/paths/{id}",
            get(paths::get_path)
                .put(paths::update_path)
                .delete(paths::delete_path),
        )
        .route("/paths/{id}/restore", post(paths::restore_path))
        .route(
            "/paths/{id}/stations",
            get(paths::list_path_stations).post(paths::create_station),
        )
        .route(
            "/stations/{id}",
            get(stations::get_station)
                .put(stations::update_station)
                .delete(stations::delete_station),
        )
        .route("/stations/{id}/restore", post(stations::restore_station))
        .route(
            "/stations/{id}/items",
            get(stations::list_items).post(stations::create_item),
        )
        .route(
            "/items/{id}",
            put(stations::update_item).delete(stations::delete_item),
        )
        // Students
        .route(
            "/sessions/{id}/students",
            get(students::list_students)
                .post(students::add_student)
                .delete(students::delete_all_students),
        )
        .route(
            "/sessions/{id}/students/auto-assign",
            post(students::auto_assign_paths),
        )
        .route(
            "/sessions/{id}/students/redistribute",
            post(students::redistribute_students),
        )
        .route("/students/{id}", delete(students::delete_student))
        .route("/students/{id}/path", put(students::assign_student_path))
        // Examiners and assignments
        .route(
            "/examiners",
            get(examiners::list_examiners).post(examiners::create_examiner),
        )
        .route(
            "/sessions/{id}/assignments",
            get(examiners::list_assignments).post(examiners::bulk_assign),
        )
        .route("/assignments/{id}", delete(examiners::delete_assignment))
        // Scores and reports
        .route("/scores/final", get(scores::get_final_score))
        .route("/scores/{id}/unlock", post(scores::unlock_score))
        .route("/reports/sessions/{id}/summary", get(reports::session_summary))
        .route(
            "/reports/sessions/{id}/students.csv",
            get(reports::export_students_csv),
        )
        .route(
            "/reports/sessions/{id}/stations.csv",
            get(reports::export_stations_csv),
        )
        .route("/reports/sessions/{id}/raw.csv", get(reports::export_raw_csv))
        // Auth first, then role, then account state
        .layer(middleware::from_fn_with_state(state.clone(), account_middleware))
        .layer(middleware::from_fn(creator_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
}

fn examiner_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/assignments", get(marking::my_assignments))
        .route("/sessions/{id}/students", get(marking::session_students))
        .route("/stations/{id}/checklist", get(marking::station_checklist))
        .route("/scores/start", post(marking::start_marking))
        .route("/scores/{id}/items", post(marking::mark_item))
        .route("/scores/{id}/submit", post(marking::submit_score))
        .route("/scores/{id}/undo", post(marking::undo_submit))
        .route("/sync", post(sync::sync_scores))
        .route("/sync/status", get(sync::sync_status))
        .layer(middleware::from_fn_with_state(state.clone(), account_middleware))
        .layer(middleware::from_fn(examiner_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
}

fn admin_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/users", get(admin::list_users))
        .route("/users/{id}", delete(admin::deactivate_examiner))
        .route("/users/{id}/reset-password", post(admin::reset_password))
        .route("/sessions/bulk-revert", post(admin::bulk_revert_sessions))
        .route("/audit-logs", get(admin::list_audit_logs))
        .route("/login-audit-logs", get(admin::list_login_audit_logs))
        .route("/stats", get(admin::stats_overview))
        .layer(middleware::from_fn_with_state(state.clone(), account_middleware))
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
}

/// Assembles the main application router.
///
/// * `/api/auth` login and account routes.
/// * `/api/creator` staff routes, `/api/examiner` marking routes.
/// * Admin API under the configured secret prefix; `/admin` is a dead end.
/// * Uploaded student photos under `/media`.
/// * Global middleware: client context, tracing, CORS and security headers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let admin_prefix = format!(
        "/{}/api",
        state.config.secret_admin_url.trim_matches('/')
    );

    Router::new()
        .nest("/api/auth", auth_routes(&state))
        .nest("/api/creator", creator_routes(&state))
        .nest("/api/examiner", examiner_routes(&state))
        .nest(&admin_prefix, admin_routes(&state))
        .route("/admin", any(hidden_admin))
        .route("/admin/{*rest}", any(hidden_admin))
        // Student photos
        .nest_service("/media", ServeDir::new("media"))
        // Global Middleware (applied from outside in)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            client_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("same-origin"),
        ))
        .with_state(state)
}
