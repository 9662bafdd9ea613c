// src/handlers/attempt.rs

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::attempt::AutosaveRequest,
    state::AppState,
    utils::jwt::Claims,
};

/// Starts a new attempt against an assignment's exam.
///
/// Rejected with a conflict when another attempt is still in progress or
/// the attempt quota is exhausted.
pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(assignment_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let identity = claims.identity()?;
    let attempt = state.attempts.start(&identity, assignment_id).await?;

    Ok((StatusCode::CREATED, Json(attempt)))
}

/// Autosaves a batch of responses into an in-progress attempt.
pub async fn autosave(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
    Json(payload): Json<AutosaveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let identity = claims.identity()?;
    let saved = state
        .attempts
        .autosave(&identity, attempt_id, &payload.responses)
        .await?;

    Ok(Json(serde_json::json!({ "saved": saved })))
}

/// Submits an attempt and grades it synchronously.
pub async fn submit_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let identity = claims.identity()?;
    let result = state.attempts.submit(&identity, attempt_id).await?;

    Ok(Json(result))
}

/// Returns an attempt with its responses, for the owning student or the
/// assigning teacher.
pub async fn get_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let identity = claims.identity()?;
    let detail = state.attempts.detail(&identity, attempt_id).await?;

    Ok(Json(detail))
}
