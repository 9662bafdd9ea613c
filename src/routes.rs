// src/routes.rs

use axum::{
    Router, http::Method, middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{assignment, attempt, exam, subject},
    state::AppState,
    utils::jwt::{auth_middleware, student_middleware, teacher_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (subjects, assignments, attempts).
/// * Applies global middleware (Trace, CORS, Auth).
/// * Injects global state.
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    // Teacher-facing content management.
    let subject_routes = Router::new()
        .route(
            "/",
            post(subject::create_subject).get(subject::list_subjects),
        )
        .route("/{id}/enrollments", post(subject::enroll_student))
        .route(
            "/{id}/enrollments/{student_id}",
            put(subject::update_enrollment),
        )
        .route("/{id}/lessons", post(subject::create_lesson))
        .route("/{id}/exams", post(exam::upload_exam))
        .layer(middleware::from_fn(teacher_middleware));

    // Mixed roles on "/": manual assignment (teacher) vs. own list
    // (student); both handlers gate the role themselves.
    let assignment_routes = Router::new()
        .route(
            "/",
            post(assignment::manual_assign).get(assignment::list_my_assignments),
        )
        .merge(
            Router::new()
                .route("/{id}/attempts", post(attempt::start_attempt))
                .layer(middleware::from_fn(student_middleware)),
        );

    let attempt_routes = Router::new()
        .route("/{id}/responses", put(attempt::autosave))
        .route("/{id}/submit", post(attempt::submit_attempt))
        .layer(middleware::from_fn(student_middleware))
        .merge(Router::new().route("/{id}", get(attempt::get_attempt)));

    Router::new()
        .nest("/api/subjects", subject_routes)
        .nest("/api/assignments", assignment_routes)
        .nest("/api/attempts", attempt_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
