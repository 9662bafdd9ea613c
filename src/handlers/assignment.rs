// src/handlers/assignment.rs

use axum::{
    Json,
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    error::AppError,
    models::assignment::{ContentRef, ManualAssignRequest, assignment_type},
    state::AppState,
    store::Store,
    utils::jwt::{Claims, require_role, roles},
};

use super::subject::owned_subject;

/// A teacher explicitly assigning one lesson or exam to specific students.
///
/// Bypasses the auto-assignment product, but still guarantees a subject
/// enrollment exists for every target student. Duplicate assignments are
/// skipped, not errors.
pub async fn manual_assign(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ManualAssignRequest>,
) -> Result<impl IntoResponse, AppError> {
    let identity = claims.identity()?;
    require_role(&identity, roles::TEACHER)?;

    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    if payload.assignment_type != assignment_type::PRACTICE
        && payload.assignment_type != assignment_type::ASSESSMENT
    {
        return Err(AppError::BadRequest(format!(
            "Unknown assignment type '{}'",
            payload.assignment_type
        )));
    }

    let (content, subject_id) = match (payload.lesson_id, payload.exam_id) {
        (Some(lesson_id), None) => {
            let lesson = state
                .store
                .lesson_by_id(identity.tenant_id, lesson_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Lesson not found".to_string()))?;
            (ContentRef::Lesson(lesson.id), lesson.subject_id)
        }
        (None, Some(exam_id)) => {
            let exam = state
                .store
                .exam_by_id(identity.tenant_id, exam_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))?;
            (ContentRef::Exam(exam.id), exam.subject_id)
        }
        _ => {
            return Err(AppError::BadRequest(
                "Exactly one of lesson_id or exam_id is required".to_string(),
            ));
        }
    };

    let subject = owned_subject(&state, &identity, subject_id).await?;

    let created = state
        .materializer
        .assign_manual(
            &subject,
            identity.user_id,
            content,
            &payload.student_ids,
            &payload.assignment_type,
            payload.max_attempts,
            payload.due_at,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "candidates": payload.student_ids.len(),
            "created": created,
        })),
    ))
}

/// Lists the calling student's assignments.
pub async fn list_my_assignments(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let identity = claims.identity()?;
    require_role(&identity, roles::STUDENT)?;

    let assignments = state
        .store
        .assignments_for_student(identity.tenant_id, identity.user_id)
        .await?;

    Ok(Json(assignments))
}
