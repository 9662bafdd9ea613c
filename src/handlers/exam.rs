// src/handlers/exam.rs

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::Value;

use crate::{
    audit::{AuditEvent, AuditSink},
    core::normalizer::normalize_exam,
    error::AppError,
    models::assignment::ContentRef,
    models::exam::{ExamUploadResponse, NewExam},
    state::AppState,
    store::Store,
    utils::jwt::Claims,
};

use super::subject::owned_subject;

/// Uploads an exam payload under a subject.
///
/// The raw JSON body is normalized into the canonical schema; any
/// normalization error rejects the upload with the collected error list.
/// On success the exam is stored and fanned out to every active
/// auto-assign enrollment.
pub async fn upload_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(subject_id): Path<i64>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let identity = claims.identity()?;
    let subject = owned_subject(&state, &identity, subject_id).await?;

    let outcome = normalize_exam(&payload);
    let Some(normalized) = outcome.normalized else {
        return Err(AppError::Validation {
            errors: outcome.errors,
            warnings: outcome.warnings,
        });
    };

    let exam = state
        .store
        .insert_exam(NewExam {
            tenant_id: identity.tenant_id,
            subject_id: subject.id,
            title: normalized.title.clone(),
            normalized,
            created_by: identity.user_id,
        })
        .await?;

    state.audit.record(AuditEvent::ExamUploaded {
        tenant_id: identity.tenant_id,
        subject_id: subject.id,
        exam_id: exam.id,
        uploaded_by: identity.user_id,
    });

    let materialized = state
        .materializer
        .on_content_published(&subject, ContentRef::Exam(exam.id))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ExamUploadResponse {
            exam_id: exam.id,
            warnings: outcome.warnings,
            assignments_created: materialized.exam_created,
        }),
    ))
}
