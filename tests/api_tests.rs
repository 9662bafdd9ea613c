// tests/api_tests.rs

use std::sync::Arc;

use examhub::config::Config;
use examhub::grader::HttpGrader;
use examhub::routes;
use examhub::state::AppState;
use examhub::store::MemoryStore;
use examhub::utils::jwt::{roles, sign_jwt};
use serde_json::{Value, json};

const JWT_SECRET: &str = "test_secret_for_integration_tests";

/// Helper function to spawn the app on a random port for testing.
/// Returns the base URL (e.g., "http://127.0.0.1:12345").
///
/// The app runs against the in-memory store, and the grader points at a
/// dead endpoint so subjective grading exercises the degraded path.
async fn spawn_app() -> String {
    let config = Config {
        database_url: "postgres://unused-in-tests".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        jwt_expiration: 600, // 10 minutes for tests
        rust_log: "error".to_string(),
        grader_url: "http://127.0.0.1:1/grade".to_string(),
        grader_api_key: None,
        grader_timeout_secs: 1,
    };

    let store = Arc::new(MemoryStore::new());
    let grader = Arc::new(HttpGrader::new(config.grader_url.clone(), None, 1));
    let state = AppState::new(config, store, grader);

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    address
}

fn teacher_token() -> String {
    sign_jwt(10, 1, roles::TEACHER, JWT_SECRET, 600).expect("sign teacher token")
}

fn student_token(id: i64) -> String {
    sign_jwt(id, 1, roles::STUDENT, JWT_SECRET, 600).expect("sign student token")
}

fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, &uuid::Uuid::new_v4().to_string()[..8])
}

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    // Act
    let response = client
        .get(&format!("{}/api/subjects", address))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn students_cannot_use_teacher_routes() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    // Act
    let response = client
        .post(&format!("{}/api/subjects", address))
        .bearer_auth(student_token(100))
        .json(&json!({ "name": unique_name("subject") }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn malformed_exam_upload_returns_error_list() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = teacher_token();

    let subject: Value = client
        .post(&format!("{}/api/subjects", address))
        .bearer_auth(&token)
        .json(&json!({ "name": unique_name("history") }))
        .send()
        .await
        .expect("create subject")
        .json()
        .await
        .expect("subject json");

    // Act: one unsupported question type poisons the whole upload
    let response = client
        .post(&format!("{}/api/subjects/{}/exams", address, subject["id"]))
        .bearer_auth(&token)
        .json(&json!({
            "title": "Broken",
            "questions": [
                { "type": "short", "prompt": "ok" },
                { "type": "matching", "prompt": "bad" }
            ]
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.expect("error body");
    let errors = body["errors"].as_array().expect("errors array");
    assert!(
        errors
            .iter()
            .any(|e| e.as_str().unwrap_or_default().contains("question 2"))
    );
}

#[tokio::test]
async fn duplicate_subject_name_conflicts() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = teacher_token();
    let name = unique_name("latin");

    let first = client
        .post(&format!("{}/api/subjects", address))
        .bearer_auth(&token)
        .json(&json!({ "name": name }))
        .send()
        .await
        .expect("create subject");
    assert_eq!(first.status().as_u16(), 201);

    // Act: same name, different case
    let second = client
        .post(&format!("{}/api/subjects", address))
        .bearer_auth(&token)
        .json(&json!({ "name": name.to_uppercase() }))
        .send()
        .await
        .expect("create duplicate");

    // Assert
    assert_eq!(second.status().as_u16(), 409);
}

#[tokio::test]
async fn full_exam_flow_from_upload_to_graded_attempt() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let teacher = teacher_token();
    let student = student_token(100);

    let subject: Value = client
        .post(&format!("{}/api/subjects", address))
        .bearer_auth(&teacher)
        .json(&json!({ "name": unique_name("geometry") }))
        .send()
        .await
        .expect("create subject")
        .json()
        .await
        .expect("subject json");
    let subject_id = subject["id"].as_i64().expect("subject id");

    let enroll = client
        .post(&format!("{}/api/subjects/{}/enrollments", address, subject_id))
        .bearer_auth(&teacher)
        .json(&json!({ "student_id": 100 }))
        .send()
        .await
        .expect("enroll student");
    assert_eq!(enroll.status().as_u16(), 201);

    let upload: Value = client
        .post(&format!("{}/api/subjects/{}/exams", address, subject_id))
        .bearer_auth(&teacher)
        .json(&json!({
            "examMetadata": { "title": "Angles", "subject": "Geometry" },
            "questions": [
                { "id": "q1", "type": "mcq", "prompt": "Pick a", "options": ["a", "b"], "correctAnswer": "a" },
                { "id": "q2", "type": "true_false", "prompt": "Yes?", "correctAnswer": true }
            ]
        }))
        .send()
        .await
        .expect("upload exam")
        .json()
        .await
        .expect("upload json");
    assert_eq!(upload["assignments_created"].as_u64(), Some(1));

    // Student sees exactly one auto-created assignment.
    let assignments: Value = client
        .get(&format!("{}/api/assignments", address))
        .bearer_auth(&student)
        .send()
        .await
        .expect("list assignments")
        .json()
        .await
        .expect("assignments json");
    let assignments = assignments.as_array().expect("array").clone();
    assert_eq!(assignments.len(), 1);
    let assignment_id = assignments[0]["id"].as_i64().expect("assignment id");
    assert_eq!(assignments[0]["assignment_source"], "subject_auto");

    // Start, autosave, submit.
    let attempt: Value = client
        .post(&format!(
            "{}/api/assignments/{}/attempts",
            address, assignment_id
        ))
        .bearer_auth(&student)
        .send()
        .await
        .expect("start attempt")
        .json()
        .await
        .expect("attempt json");
    let attempt_id = attempt["id"].as_i64().expect("attempt id");
    assert_eq!(attempt["status"], "in_progress");

    let autosave = client
        .put(&format!("{}/api/attempts/{}/responses", address, attempt_id))
        .bearer_auth(&student)
        .json(&json!({
            "responses": [
                { "question_id": "q1", "answer": "a" },
                { "question_id": "q2", "answer": "false" }
            ]
        }))
        .send()
        .await
        .expect("autosave");
    assert_eq!(autosave.status().as_u16(), 200);

    let submitted: Value = client
        .post(&format!("{}/api/attempts/{}/submit", address, attempt_id))
        .bearer_auth(&student)
        .send()
        .await
        .expect("submit")
        .json()
        .await
        .expect("submit json");
    assert_eq!(submitted["score_percent"].as_i64(), Some(50));
    assert_eq!(submitted["status"], "graded");
    assert_eq!(submitted["summary"]["objectiveCount"].as_u64(), Some(2));

    // Double submit conflicts instead of re-grading.
    let again = client
        .post(&format!("{}/api/attempts/{}/submit", address, attempt_id))
        .bearer_auth(&student)
        .send()
        .await
        .expect("second submit");
    assert_eq!(again.status().as_u16(), 409);

    // Detail view carries the per-question grading annotations.
    let detail: Value = client
        .get(&format!("{}/api/attempts/{}", address, attempt_id))
        .bearer_auth(&student)
        .send()
        .await
        .expect("detail")
        .json()
        .await
        .expect("detail json");
    let responses = detail["responses"].as_array().expect("responses");
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| !r["grading"].is_null()));
}

#[tokio::test]
async fn dead_grader_marks_subjective_attempt_for_review() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let teacher = teacher_token();
    let student = student_token(200);

    let subject: Value = client
        .post(&format!("{}/api/subjects", address))
        .bearer_auth(&teacher)
        .json(&json!({ "name": unique_name("essays") }))
        .send()
        .await
        .expect("create subject")
        .json()
        .await
        .expect("subject json");
    let subject_id = subject["id"].as_i64().expect("subject id");

    client
        .post(&format!("{}/api/subjects/{}/enrollments", address, subject_id))
        .bearer_auth(&teacher)
        .json(&json!({ "student_id": 200 }))
        .send()
        .await
        .expect("enroll");

    client
        .post(&format!("{}/api/subjects/{}/exams", address, subject_id))
        .bearer_auth(&teacher)
        .json(&json!({
            "title": "Essay",
            "questions": [
                { "id": "q1", "type": "long-answer", "prompt": "Discuss.", "rubric": "Depth" }
            ]
        }))
        .send()
        .await
        .expect("upload exam");

    let assignments: Value = client
        .get(&format!("{}/api/assignments", address))
        .bearer_auth(&student)
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("json");
    let assignment_id = assignments[0]["id"].as_i64().expect("assignment id");

    let attempt: Value = client
        .post(&format!(
            "{}/api/assignments/{}/attempts",
            address, assignment_id
        ))
        .bearer_auth(&student)
        .send()
        .await
        .expect("start")
        .json()
        .await
        .expect("json");
    let attempt_id = attempt["id"].as_i64().expect("attempt id");

    client
        .put(&format!("{}/api/attempts/{}/responses", address, attempt_id))
        .bearer_auth(&student)
        .json(&json!({
            "responses": [{ "question_id": "q1", "answer": "long reflection" }]
        }))
        .send()
        .await
        .expect("autosave");

    // Act: the configured grader endpoint is unreachable on purpose.
    let submitted: Value = client
        .post(&format!("{}/api/attempts/{}/submit", address, attempt_id))
        .bearer_auth(&student)
        .send()
        .await
        .expect("submit")
        .json()
        .await
        .expect("json");

    // Assert: degraded, never failed.
    assert_eq!(submitted["score_percent"].as_i64(), Some(0));
    assert_eq!(submitted["status"], "needs_review");
    assert_eq!(submitted["questions"][0]["needsReview"], true);
    assert_eq!(
        submitted["questions"][0]["feedback"],
        "grading unavailable; marked for manual review"
    );
}
