// tests/api_tests.rs
//
// End-to-end flows against a real Postgres. Skipped when DATABASE_URL is unset.

use osce_backend::{config::Config, routes, state::AppState, utils::hash::hash_password};
use serde_json::{Value, json};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::net::SocketAddr;
use uuid::Uuid;

struct TestApp {
    address: String,
    pool: PgPool,
    client: reqwest::Client,
}

/// Spawns the app on a random port. Returns `None` without a database.
async fn spawn_app() -> Option<TestApp> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };

    // 1. Create a pool
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing. Make sure DATABASE_URL is set.");

    // 2. Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    // 3. Create test configuration and state
    let config = Config {
        database_url: database_url.clone(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600, // 10 minutes for tests
        rust_log: "error".to_string(),
        admin_username: None,
        admin_password: None,
        default_user_password: "ChangeMe123!".to_string(),
        secret_admin_url: "hidden-panel".to_string(),
        trusted_proxies: Vec::new(),
        login_failure_limit: 5,
        login_cooloff_minutes: 15,
        login_replenish_seconds: 0,
        bind_addr: "127.0.0.1:0".to_string(),
    };

    let state = AppState {
        pool: pool.clone(),
        config,
    };

    // 4. Create the router with the app state
    let app = routes::create_router(state);

    // 5. Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    // 6. Spawn the server in the background
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Some(TestApp {
        address,
        pool,
        client: reqwest::Client::new(),
    })
}

fn unique(prefix: &str) -> String {
    format!("{}{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

impl TestApp {
    async fn seed_admin(&self) -> String {
        let username = unique("admin_");
        let hashed = hash_password("AdminPass123").unwrap();
        sqlx::query(
            r#"
            INSERT INTO users
                (username, email, full_name, password, role, is_superuser, must_change_password)
            VALUES ($1, $2, 'Test Admin', $3, 'admin', TRUE, FALSE)
            "#,
        )
        .bind(&username)
        .bind(format!("{}@example.org", username))
        .bind(&hashed)
        .execute(&self.pool)
        .await
        .unwrap();

        self.login(&username, "AdminPass123").await
    }

    async fn login(&self, username: &str, password: &str) -> String {
        let response = self
            .client
            .post(format!("{}/api/auth/login", self.address))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 200, "login {}", username);
        let body: Value = response.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    async fn get(&self, token: &str, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request")
    }

    async fn put(&self, token: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .put(format!("{}{}", self.address, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    async fn delete(&self, token: &str, path: &str) -> reqwest::Response {
        self.client
            .delete(format!("{}{}", self.address, path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request")
    }

    async fn post_ok(&self, token: &str, path: &str, body: Value) -> Value {
        let response = self.post(token, path, body).await;
        let status = response.status().as_u16();
        let body: Value = response.json().await.unwrap();
        assert!(status == 200 || status == 201, "{} -> {}: {}", path, status, body);
        body
    }

    /// Course, exam and session; returns (exam id, session id).
    async fn scheduled_session(&self, admin: &str) -> (String, String) {
        let course = self
            .post_ok(
                admin,
                "/api/creator/courses",
                json!({ "code": unique("C"), "name": "Clinical Skills" }),
            )
            .await;
        let exam = self
            .post_ok(
                admin,
                "/api/creator/exams",
                json!({
                    "course_id": course["id"],
                    "name": unique("OSCE "),
                    "exam_date": "2026-11-02",
                    "station_duration_minutes": 8,
                }),
            )
            .await;
        let exam_id = exam["id"].as_str().unwrap().to_string();
        let session = self
            .post_ok(
                admin,
                &format!("/api/creator/exams/{}/sessions", exam_id),
                json!({ "name": "Morning" }),
            )
            .await;
        (exam_id, session["id"].as_str().unwrap().to_string())
    }

    async fn first_path(&self, admin: &str, session_id: &str) -> String {
        let paths: Value = self
            .get(admin, &format!("/api/creator/sessions/{}/paths", session_id))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(paths.as_array().unwrap().len(), 3);
        assert_eq!(paths[0]["name"], "1");
        paths[0]["id"].as_str().unwrap().to_string()
    }

    async fn create_examiner(&self, admin: &str) -> (i64, String) {
        let username = unique("ex_");
        let examiner = self
            .post_ok(
                admin,
                "/api/creator/examiners",
                json!({
                    "username": username,
                    "email": format!("{}@example.org", username),
                    "full_name": "Test Examiner",
                    "password": "ExamPass123",
                }),
            )
            .await;
        let token = self.login(&username, "ExamPass123").await;
        (examiner["id"].as_i64().unwrap(), token)
    }

    /// An activated session with one station (one 10 point item), one student
    /// on path 1 and one assigned examiner.
    async fn running_station(&self, admin: &str) -> RunningStation {
        let (_, session_id) = self.scheduled_session(admin).await;
        let path_id = self.first_path(admin, &session_id).await;

        let station = self
            .post_ok(
                admin,
                &format!("/api/creator/paths/{}/stations", path_id),
                json!({ "name": "Abdominal examination" }),
            )
            .await;
        let station_id = station["id"].as_str().unwrap().to_string();
        let item = self
            .post_ok(
                admin,
                &format!("/api/creator/stations/{}/items", station_id),
                json!({ "item_number": 1, "description": "Palpates all quadrants", "points": 10 }),
            )
            .await;
        let student = self
            .post_ok(
                admin,
                &format!("/api/creator/sessions/{}/students", session_id),
                json!({ "student_number": "3001", "full_name": "Ada Lovelace", "path_id": path_id }),
            )
            .await;

        let (examiner_id, examiner) = self.create_examiner(admin).await;
        self.post_ok(
            admin,
            &format!("/api/creator/sessions/{}/assignments", session_id),
            json!({
                "path_id": path_id,
                "stations": [{ "station_id": station_id, "examiner_1": examiner_id }],
            }),
        )
        .await;
        self.post_ok(
            admin,
            &format!("/api/creator/sessions/{}/activate", session_id),
            json!({}),
        )
        .await;

        RunningStation {
            session_id,
            station_id,
            item_id: item["id"].as_i64().unwrap(),
            student_id: student["id"].as_str().unwrap().to_string(),
            examiner_id,
            examiner,
        }
    }

    /// Starts, marks and submits; returns the score's (id, local_uuid).
    async fn submit_score(&self, run: &RunningStation, mark: f64) -> (String, Value) {
        let started = self
            .post_ok(
                &run.examiner,
                "/api/examiner/scores/start",
                json!({ "session_student_id": run.student_id, "station_id": run.station_id }),
            )
            .await;
        let score_id = started["score"]["id"].as_str().unwrap().to_string();
        self.post_ok(
            &run.examiner,
            &format!("/api/examiner/scores/{}/items", score_id),
            json!({ "checklist_item_id": run.item_id, "score": mark }),
        )
        .await;
        self.post_ok(
            &run.examiner,
            &format!("/api/examiner/scores/{}/submit", score_id),
            json!({}),
        )
        .await;
        (score_id, started["score"]["local_uuid"].clone())
    }
}

struct RunningStation {
    session_id: String,
    station_id: String,
    item_id: i64,
    student_id: String,
    examiner_id: i64,
    examiner: String,
}

#[tokio::test]
async fn unknown_route_is_404() {
    let Some(app) = spawn_app().await else { return };

    let response = app
        .client
        .get(format!("{}/random_path_that_does_not_exist", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let Some(app) = spawn_app().await else { return };

    let response = app
        .client
        .post(format!("{}/api/auth/login", app.address))
        .json(&json!({ "username": unique("nobody_"), "password": "whatever" }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn activation_requires_active_stations() {
    let Some(app) = spawn_app().await else { return };
    let admin = app.seed_admin().await;
    let (_, session_id) = app.scheduled_session(&admin).await;

    // Students and paths exist, but no station does.
    app.post_ok(
        &admin,
        &format!("/api/creator/sessions/{}/students", session_id),
        json!({ "student_number": "2001", "full_name": "Jane Roe" }),
    )
    .await;

    let response = app
        .post(
            &admin,
            &format!("/api/creator/sessions/{}/activate", session_id),
            json!({}),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let session: Value = app
        .get(&admin, &format!("/api/creator/sessions/{}", session_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(session["status"], "scheduled");
}

#[tokio::test]
async fn exam_soft_delete_and_restore() {
    let Some(app) = spawn_app().await else { return };
    let admin = app.seed_admin().await;
    let (exam_id, _) = app.scheduled_session(&admin).await;

    let response = app
        .client
        .delete(format!("{}/api/creator/exams/{}", app.address, exam_id))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let deleted: Value = response.json().await.unwrap();
    assert_eq!(deleted["is_deleted"], true);
    assert_eq!(deleted["status"], "archived");
    assert!(!deleted["deleted_at"].is_null());

    let restored = app
        .post_ok(&admin, &format!("/api/creator/exams/{}/restore", exam_id), json!({}))
        .await;
    assert_eq!(restored["is_deleted"], false);
    assert_eq!(restored["status"], "draft");
    assert!(restored["deleted_at"].is_null());
}

#[tokio::test]
async fn two_examiners_marking_and_offline_sync() {
    let Some(app) = spawn_app().await else { return };
    let admin = app.seed_admin().await;
    let (_, session_id) = app.scheduled_session(&admin).await;
    let path_id = app.first_path(&admin, &session_id).await;

    let station = app
        .post_ok(
            &admin,
            &format!("/api/creator/paths/{}/stations", path_id),
            json!({ "name": "History taking" }),
        )
        .await;
    let station_id = station["id"].as_str().unwrap().to_string();
    let item = app
        .post_ok(
            &admin,
            &format!("/api/creator/stations/{}/items", station_id),
            json!({ "item_number": 1, "description": "Takes a focused history", "points": 10 }),
        )
        .await;

    let student = app
        .post_ok(
            &admin,
            &format!("/api/creator/sessions/{}/students", session_id),
            json!({ "student_number": "1001", "full_name": "John Smith", "path_id": path_id }),
        )
        .await;
    let student_id = student["id"].as_str().unwrap().to_string();

    let (examiner_1, token_1) = app.create_examiner(&admin).await;
    let (examiner_2, token_2) = app.create_examiner(&admin).await;

    let outcome = app
        .post_ok(
            &admin,
            &format!("/api/creator/sessions/{}/assignments", session_id),
            json!({
                "path_id": path_id,
                "stations": [{
                    "station_id": station_id,
                    "examiner_1": examiner_1,
                    "examiner_2": examiner_2,
                }],
            }),
        )
        .await;
    assert_eq!(outcome["created"], 2);

    app.post_ok(
        &admin,
        &format!("/api/creator/sessions/{}/activate", session_id),
        json!({}),
    )
    .await;

    // Each examiner marks and submits independently.
    let mut score_ids = Vec::new();
    for (token, mark) in [(&token_1, 8.0), (&token_2, 6.0)] {
        let started = app
            .post_ok(
                token,
                "/api/examiner/scores/start",
                json!({ "session_student_id": student_id, "station_id": station_id }),
            )
            .await;
        assert_eq!(started["resumed"], false);
        let score_id = started["score"]["id"].as_str().unwrap().to_string();

        let marked = app
            .post_ok(
                token,
                &format!("/api/examiner/scores/{}/items", score_id),
                json!({ "checklist_item_id": item["id"], "score": mark }),
            )
            .await;
        assert_eq!(marked["total_score"], mark);

        let submitted = app
            .post_ok(
                token,
                &format!("/api/examiner/scores/{}/submit", score_id),
                json!({ "comments": "<b>ok</b><script>x</script>" }),
            )
            .await;
        assert_eq!(submitted["total_score"], mark);
        score_ids.push((score_id, started["score"]["local_uuid"].clone()));
    }

    // Another examiner's score cannot be marked.
    let response = app
        .post(
            &token_2,
            &format!("/api/examiner/scores/{}/items", score_ids[0].0),
            json!({ "checklist_item_id": item["id"], "score": 1.0 }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 403);

    let final_score: Value = app
        .get(
            &admin,
            &format!(
                "/api/creator/scores/final?session_student_id={}&station_id={}",
                student_id, station_id
            ),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(final_score["final_score"], 7.0);
    assert_eq!(final_score["both_submitted"], true);
    assert_eq!(final_score["examiner_scores"].as_array().unwrap().len(), 2);

    // A stale offline copy is reported, never applied.
    let sync = app
        .post_ok(
            &token_1,
            "/api/examiner/sync",
            json!({
                "scores": [{
                    "local_uuid": score_ids[0].1,
                    "total_score": 1.0,
                    "status": "in_progress",
                    "local_timestamp": 1,
                }],
            }),
        )
        .await;
    assert_eq!(sync["synced_count"], 0);
    assert_eq!(sync["conflicts"][0]["local_uuid"], score_ids[0].1);

    let stored: f64 = sqlx::query_scalar("SELECT total_score FROM station_scores WHERE id = $1")
        .bind(Uuid::parse_str(&score_ids[0].0).unwrap())
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(stored, 8.0);

    // Someone else's record is rejected.
    let sync = app
        .post_ok(
            &token_2,
            "/api/examiner/sync",
            json!({
                "scores": [{
                    "local_uuid": score_ids[0].1,
                    "total_score": 2.0,
                    "local_timestamp": i64::MAX,
                }],
            }),
        )
        .await;
    assert_eq!(sync["rejected"].as_array().unwrap().len(), 1);

    // Undo within the window reopens the score.
    let undone = app
        .post_ok(
            &token_2,
            &format!("/api/examiner/scores/{}/undo", score_ids[1].0),
            json!({}),
        )
        .await;
    assert_eq!(undone["success"], true);

    let summary: Value = app
        .get(
            &admin,
            &format!("/api/creator/reports/sessions/{}/summary", session_id),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(summary["total_students"], 1);
}

#[tokio::test]
async fn students_stay_registered_once_session_started() {
    let Some(app) = spawn_app().await else { return };
    let admin = app.seed_admin().await;
    let run = app.running_station(&admin).await;
    app.submit_score(&run, 9.0).await;

    let response = app
        .delete(&admin, &format!("/api/creator/students/{}", run.student_id))
        .await;
    assert_eq!(response.status().as_u16(), 403);

    let response = app
        .delete(
            &admin,
            &format!("/api/creator/sessions/{}/students", run.session_id),
        )
        .await;
    assert_eq!(response.status().as_u16(), 403);

    let submitted: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM station_scores WHERE session_student_id = $1 AND status = 'submitted'",
    )
    .bind(Uuid::parse_str(&run.student_id).unwrap())
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(submitted, 1);
}

#[tokio::test]
async fn students_can_be_removed_before_activation() {
    let Some(app) = spawn_app().await else { return };
    let admin = app.seed_admin().await;
    let (_, session_id) = app.scheduled_session(&admin).await;

    let student = app
        .post_ok(
            &admin,
            &format!("/api/creator/sessions/{}/students", session_id),
            json!({ "student_number": "4001", "full_name": "Grace Hopper" }),
        )
        .await;

    let response = app
        .delete(
            &admin,
            &format!("/api/creator/students/{}", student["id"].as_str().unwrap()),
        )
        .await;
    assert_eq!(response.status().as_u16(), 204);
}

#[tokio::test]
async fn deactivated_examiner_loses_access_immediately() {
    let Some(app) = spawn_app().await else { return };
    let admin = app.seed_admin().await;
    let run = app.running_station(&admin).await;

    let response = app
        .delete(&admin, &format!("/hidden-panel/api/users/{}", run.examiner_id))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let response = app
        .post(
            &run.examiner,
            "/api/examiner/scores/start",
            json!({ "session_student_id": run.student_id, "station_id": run.station_id }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 401);

    let response = app.get(&run.examiner, "/api/auth/me").await;
    assert_eq!(response.status().as_u16(), 401);

    let scores: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM station_scores WHERE examiner_id = $1")
        .bind(run.examiner_id)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(scores, 0);
}

#[tokio::test]
async fn password_reset_forces_change_on_existing_token() {
    let Some(app) = spawn_app().await else { return };
    let admin = app.seed_admin().await;
    let (examiner_id, token) = app.create_examiner(&admin).await;

    let response = app.get(&token, "/api/examiner/assignments").await;
    assert_eq!(response.status().as_u16(), 200);

    app.post_ok(
        &admin,
        &format!("/hidden-panel/api/users/{}/reset-password", examiner_id),
        json!({}),
    )
    .await;

    let response = app.get(&token, "/api/examiner/assignments").await;
    assert_eq!(response.status().as_u16(), 403);

    // The account routes stay open so the change can be made.
    let response = app.get(&token, "/api/auth/me").await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn checklist_item_numbers_are_unique_per_station() {
    let Some(app) = spawn_app().await else { return };
    let admin = app.seed_admin().await;
    let (_, session_id) = app.scheduled_session(&admin).await;
    let path_id = app.first_path(&admin, &session_id).await;

    let station = app
        .post_ok(
            &admin,
            &format!("/api/creator/paths/{}/stations", path_id),
            json!({ "name": "Hand washing" }),
        )
        .await;
    let items = format!("/api/creator/stations/{}/items", station["id"].as_str().unwrap());

    app.post_ok(&admin, &items, json!({ "item_number": 1, "description": "Wets hands" }))
        .await;
    let response = app
        .post(&admin, &items, json!({ "item_number": 1, "description": "Applies soap" }))
        .await;
    assert_eq!(response.status().as_u16(), 409);

    let second = app
        .post_ok(&admin, &items, json!({ "item_number": 2, "description": "Applies soap" }))
        .await;
    let response = app
        .put(
            &admin,
            &format!("/api/creator/items/{}", second["id"]),
            json!({ "item_number": 1, "description": "Applies soap" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 409);

    // The same number is fine on another station.
    let other = app
        .post_ok(
            &admin,
            &format!("/api/creator/paths/{}/stations", path_id),
            json!({ "name": "Gowning" }),
        )
        .await;
    app.post_ok(
        &admin,
        &format!("/api/creator/stations/{}/items", other["id"].as_str().unwrap()),
        json!({ "item_number": 1, "description": "Ties gown" }),
    )
    .await;
}

#[tokio::test]
async fn offline_sync_cannot_reopen_a_locked_score() {
    let Some(app) = spawn_app().await else { return };
    let admin = app.seed_admin().await;
    let run = app.running_station(&admin).await;
    let (score_id, local_uuid) = app.submit_score(&run, 9.0).await;
    let score_uuid = Uuid::parse_str(&score_id).unwrap();

    // Well past the undo window.
    sqlx::query("UPDATE station_scores SET completed_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(score_uuid)
        .execute(&app.pool)
        .await
        .unwrap();

    let newer = json!({
        "scores": [{
            "local_uuid": local_uuid,
            "total_score": 2.0,
            "status": "in_progress",
            "local_timestamp": 4_000_000_000_000_i64,
        }],
    });

    let sync = app.post_ok(&run.examiner, "/api/examiner/sync", newer.clone()).await;
    assert_eq!(sync["synced_count"], 0);
    assert_eq!(sync["rejected"][0]["local_uuid"], local_uuid);

    let (status, total): (String, f64) =
        sqlx::query_as("SELECT status, total_score FROM station_scores WHERE id = $1")
            .bind(score_uuid)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(status, "submitted");
    assert_eq!(total, 9.0);

    // After a coordinator unlock the newer copy applies.
    app.post_ok(
        &admin,
        &format!("/api/creator/scores/{}/unlock", score_id),
        json!({}),
    )
    .await;
    let sync = app.post_ok(&run.examiner, "/api/examiner/sync", newer).await;
    assert_eq!(sync["synced_count"], 1);
}

#[tokio::test]
async fn staff_accounts_cannot_be_assigned_to_stations() {
    let Some(app) = spawn_app().await else { return };
    let admin = app.seed_admin().await;
    let (_, session_id) = app.scheduled_session(&admin).await;
    let path_id = app.first_path(&admin, &session_id).await;

    let station = app
        .post_ok(
            &admin,
            &format!("/api/creator/paths/{}/stations", path_id),
            json!({ "name": "Suturing" }),
        )
        .await;

    let username = unique("coord_");
    let coordinator = app
        .post_ok(
            &admin,
            "/api/creator/examiners",
            json!({
                "username": username,
                "email": format!("{}@example.org", username),
                "full_name": "Test Coordinator",
                "password": "CoordPass123",
                "role": "coordinator",
            }),
        )
        .await;

    let response = app
        .post(
            &admin,
            &format!("/api/creator/sessions/{}/assignments", session_id),
            json!({
                "path_id": path_id,
                "stations": [{ "station_id": station["id"], "examiner_1": coordinator["id"] }],
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let assignments: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM examiner_assignments WHERE examiner_id = $1")
            .bind(coordinator["id"].as_i64().unwrap())
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(assignments, 0);
}
