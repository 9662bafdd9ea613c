// src/handlers/subject.rs

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    error::AppError,
    models::subject::{
        CreateLessonRequest, CreateSubjectRequest, EnrollStudentRequest, NewLesson, NewSubject,
        Subject, UpdateEnrollmentRequest, enrollment_status, normalize_subject_name,
    },
    models::assignment::ContentRef,
    state::AppState,
    store::Store,
    utils::jwt::{Claims, Identity},
};

/// Creates a new subject owned by the calling teacher.
///
/// The subject name is unique per (tenant, owner) after normalization.
pub async fn create_subject(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateSubjectRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let identity = claims.identity()?;

    let subject = state
        .store
        .insert_subject(NewSubject {
            tenant_id: identity.tenant_id,
            teacher_owner_id: identity.user_id,
            name: payload.name.trim().to_string(),
            name_normalized: normalize_subject_name(&payload.name),
        })
        .await?
        .ok_or_else(|| {
            AppError::Conflict(format!("Subject '{}' already exists", payload.name.trim()))
        })?;

    Ok((StatusCode::CREATED, Json(subject)))
}

/// Lists the calling teacher's subjects.
pub async fn list_subjects(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let identity = claims.identity()?;
    let subjects = state
        .store
        .subjects_for_teacher(identity.tenant_id, identity.user_id)
        .await?;

    Ok(Json(subjects))
}

/// Enrolls a student into a subject (or reactivates a completed
/// enrollment) and backfills auto-assignments for existing content.
pub async fn enroll_student(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(subject_id): Path<i64>,
    Json(payload): Json<EnrollStudentRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let identity = claims.identity()?;
    let subject = owned_subject(&state, &identity, subject_id).await?;

    let (enrollment, outcome) = state
        .materializer
        .on_enrollment_activated(&subject, payload.student_id, payload.auto_assign_future)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "enrollment": enrollment,
            "outcome": outcome,
        })),
    ))
}

/// Changes an enrollment's status. Reactivating a completed enrollment
/// re-runs materialization for content published in the meantime.
pub async fn update_enrollment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((subject_id, student_id)): Path<(i64, i64)>,
    Json(payload): Json<UpdateEnrollmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.status != enrollment_status::ACTIVE
        && payload.status != enrollment_status::COMPLETED
    {
        return Err(AppError::BadRequest(format!(
            "Unknown enrollment status '{}'",
            payload.status
        )));
    }

    let identity = claims.identity()?;
    let subject = owned_subject(&state, &identity, subject_id).await?;

    let (enrollment, outcome) = state
        .materializer
        .update_enrollment_status(&subject, student_id, &payload.status)
        .await?;

    Ok(Json(serde_json::json!({
        "enrollment": enrollment,
        "outcome": outcome,
    })))
}

/// Publishes a lesson under a subject and fans it out to every active
/// auto-assign enrollment.
pub async fn create_lesson(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(subject_id): Path<i64>,
    Json(payload): Json<CreateLessonRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let identity = claims.identity()?;
    let subject = owned_subject(&state, &identity, subject_id).await?;

    let lesson = state
        .store
        .insert_lesson(NewLesson {
            tenant_id: identity.tenant_id,
            subject_id: subject.id,
            title: payload.title,
            content: payload.content,
        })
        .await?;

    let outcome = state
        .materializer
        .on_content_published(&subject, ContentRef::Lesson(lesson.id))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "lesson": lesson,
            "outcome": outcome,
        })),
    ))
}

/// Fetches a subject and verifies the caller owns it.
pub async fn owned_subject(
    state: &AppState,
    identity: &Identity,
    subject_id: i64,
) -> Result<Subject, AppError> {
    let subject = state
        .store
        .subject_by_id(identity.tenant_id, subject_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Subject not found".to_string()))?;

    if subject.teacher_owner_id != identity.user_id {
        return Err(AppError::Forbidden(
            "Subject belongs to another teacher".to_string(),
        ));
    }

    Ok(subject)
}
