// src/core/attempt.rs

//! Attempt state machine: `in_progress -> submitted -> graded |
//! needs_review`. Creation is guarded by the single-in-flight and
//! max-attempts rules inside a serializable transaction; submit is a
//! conditional single-row transition only one caller can win.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::audit::{AuditEvent, AuditSink};
use crate::core::grading::GradingPipeline;
use crate::error::AppError;
use crate::models::{
    assignment::Assignment,
    attempt::{
        Attempt, AttemptDetail, AttemptStatus, NewAttempt, ResponseUpsert, SubmitResponse,
    },
    exam::Exam,
};
use crate::observe::Metrics;
use crate::store::{Isolation, Store, StoreError, StoreTx};
use crate::utils::jwt::Identity;

/// How often a serializable creation transaction is retried after losing a
/// race before giving up with a conflict.
const SERIALIZATION_RETRIES: u32 = 3;

/// Outcome of one guarded creation try, separating "retry the transaction"
/// from a definitive answer.
enum TryStart {
    Retry,
    Reject(AppError),
}

impl From<StoreError> for TryStart {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SerializationConflict => TryStart::Retry,
            other => TryStart::Reject(other.into()),
        }
    }
}

pub struct AttemptService {
    store: Arc<dyn Store>,
    pipeline: GradingPipeline,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<Metrics>,
}

impl AttemptService {
    pub fn new(
        store: Arc<dyn Store>,
        pipeline: GradingPipeline,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            pipeline,
            audit,
            metrics,
        }
    }

    /// Starts a new attempt for the calling student.
    pub async fn start(&self, identity: &Identity, assignment_id: i64) -> Result<Attempt, AppError> {
        for _ in 0..SERIALIZATION_RETRIES {
            match self.try_start(identity, assignment_id).await {
                Ok(attempt) => {
                    self.metrics.record_attempt_started();
                    self.audit.record(AuditEvent::AttemptStarted {
                        tenant_id: identity.tenant_id,
                        assignment_id,
                        attempt_id: attempt.id,
                        student_id: identity.user_id,
                    });
                    return Ok(attempt);
                }
                Err(TryStart::Retry) => continue,
                Err(TryStart::Reject(e)) => return Err(e),
            }
        }

        Err(AppError::Conflict(
            "Could not start attempt; please retry".to_string(),
        ))
    }

    /// One serializable creation transaction: ownership, single-in-flight
    /// and quota guards in order, then the insert.
    async fn try_start(
        &self,
        identity: &Identity,
        assignment_id: i64,
    ) -> Result<Attempt, TryStart> {
        let mut tx = self.store.begin(Isolation::Serializable).await?;

        let assignment = tx
            .assignment_by_id(identity.tenant_id, assignment_id)
            .await?
            .ok_or_else(|| {
                TryStart::Reject(AppError::NotFound("Assignment not found".to_string()))
            })?;

        if assignment.assignee_student_id != identity.user_id {
            return Err(TryStart::Reject(AppError::Forbidden(
                "Assignment belongs to another student".to_string(),
            )));
        }

        if assignment.exam_id.is_none() {
            return Err(TryStart::Reject(AppError::BadRequest(
                "Assignment has no exam to attempt".to_string(),
            )));
        }

        if tx
            .has_attempt_in_progress(assignment_id, identity.user_id)
            .await?
        {
            return Err(TryStart::Reject(AppError::Conflict(
                "An attempt is already in progress".to_string(),
            )));
        }

        let used = tx.count_attempts(assignment_id, identity.user_id).await?;
        if used >= assignment.max_attempts as i64 {
            return Err(TryStart::Reject(AppError::Conflict(
                "Attempt limit reached".to_string(),
            )));
        }

        let attempt = tx
            .insert_attempt(NewAttempt {
                tenant_id: identity.tenant_id,
                assignment_id,
                student_id: identity.user_id,
            })
            .await?;

        tx.commit().await?;
        Ok(attempt)
    }

    /// Autosaves a batch of responses. Permitted only while the attempt is
    /// in progress; the whole batch is validated against the exam's question
    /// set and upserted atomically.
    pub async fn autosave(
        &self,
        identity: &Identity,
        attempt_id: i64,
        responses: &[ResponseUpsert],
    ) -> Result<usize, AppError> {
        if responses.is_empty() {
            return Err(AppError::BadRequest("No responses submitted".to_string()));
        }

        let attempt = self.owned_attempt(identity, attempt_id).await?;
        let (_, exam) = self.exam_for_attempt(identity, &attempt).await?;

        let mut errors = Vec::new();
        for response in responses {
            if exam.normalized.question(&response.question_id).is_none() {
                errors.push(format!("unknown question id '{}'", response.question_id));
            }
            if response.answer.is_null() {
                errors.push(format!(
                    "missing answer for question '{}'",
                    response.question_id
                ));
            }
        }
        if !errors.is_empty() {
            return Err(AppError::Validation {
                errors,
                warnings: Vec::new(),
            });
        }

        let mut tx = self.store.begin(Isolation::ReadCommitted).await?;

        // Re-check under the transaction: a concurrent submit may have won
        // since the read above.
        let current = tx
            .attempt_by_id(attempt_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;
        if current.status != AttemptStatus::InProgress.as_str() {
            return Err(AppError::Conflict(
                "Attempt is no longer in progress".to_string(),
            ));
        }

        for response in responses {
            tx.upsert_response(attempt_id, &response.question_id, &response.answer)
                .await?;
        }
        tx.commit().await?;

        Ok(responses.len())
    }

    /// Submits the attempt and grades it.
    ///
    /// The `in_progress -> submitted` transition is a conditional update
    /// only one caller can win; grading then runs to completion and its
    /// results are persisted in one transaction. There is no cancellation
    /// path once the transition is won.
    pub async fn submit(
        &self,
        identity: &Identity,
        attempt_id: i64,
    ) -> Result<SubmitResponse, AppError> {
        let attempt = self.owned_attempt(identity, attempt_id).await?;
        let (_, exam) = self.exam_for_attempt(identity, &attempt).await?;

        // A submitted attempt with an unusable exam schema cannot be graded
        // even partially.
        if exam.normalized.questions.is_empty() {
            return Err(AppError::validation(
                "exam schema is missing or malformed; submit aborted",
            ));
        }

        let mut tx = self.store.begin(Isolation::ReadCommitted).await?;
        let transitioned = tx.mark_attempt_submitted(attempt_id, Utc::now()).await?;
        tx.commit().await?;

        if transitioned == 0 {
            // Ownership was already established, so zero rows can only mean
            // the attempt left 'in_progress' first.
            return Err(AppError::Conflict(
                "Attempt already submitted".to_string(),
            ));
        }

        let answers: HashMap<String, Value> = self
            .store
            .responses_for_attempt(attempt_id)
            .await?
            .into_iter()
            .map(|r| (r.question_id, r.answer.0))
            .collect();

        let outcome = self.pipeline.grade(&exam.normalized, &answers).await;

        let mut tx = self.store.begin(Isolation::ReadCommitted).await?;
        for graded in &outcome.questions {
            tx.annotate_response(attempt_id, graded).await?;
        }
        tx.finalize_attempt(
            attempt_id,
            outcome.status.as_str(),
            outcome.score_percent,
            &outcome.summary,
        )
        .await?;
        tx.commit().await?;

        self.metrics.record_attempt_submitted();
        self.audit.record(AuditEvent::AttemptSubmitted {
            tenant_id: identity.tenant_id,
            attempt_id,
            student_id: identity.user_id,
            score_percent: outcome.score_percent,
            status: outcome.status.as_str().to_string(),
        });

        Ok(SubmitResponse {
            attempt_id,
            status: outcome.status,
            score_percent: outcome.score_percent,
            summary: outcome.summary,
            questions: outcome.questions,
        })
    }

    /// Attempt detail for the owning student or the assigning teacher.
    pub async fn detail(
        &self,
        identity: &Identity,
        attempt_id: i64,
    ) -> Result<AttemptDetail, AppError> {
        let attempt = self
            .store
            .attempt_by_id(attempt_id)
            .await?
            .filter(|a| a.tenant_id == identity.tenant_id)
            .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;

        if attempt.student_id != identity.user_id {
            let assignment = self
                .store
                .assignment_by_id(identity.tenant_id, attempt.assignment_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Assignment not found".to_string()))?;
            if assignment.assigned_by_teacher_id != identity.user_id {
                return Err(AppError::Forbidden(
                    "Attempt belongs to another student".to_string(),
                ));
            }
        }

        let responses = self.store.responses_for_attempt(attempt_id).await?;
        Ok(AttemptDetail { attempt, responses })
    }

    /// Fetches the attempt and enforces tenant scoping and ownership.
    /// Cross-tenant attempts look absent rather than forbidden.
    async fn owned_attempt(
        &self,
        identity: &Identity,
        attempt_id: i64,
    ) -> Result<Attempt, AppError> {
        let attempt = self
            .store
            .attempt_by_id(attempt_id)
            .await?
            .filter(|a| a.tenant_id == identity.tenant_id)
            .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;

        if attempt.student_id != identity.user_id {
            return Err(AppError::Forbidden(
                "Attempt belongs to another student".to_string(),
            ));
        }

        Ok(attempt)
    }

    async fn exam_for_attempt(
        &self,
        identity: &Identity,
        attempt: &Attempt,
    ) -> Result<(Assignment, Exam), AppError> {
        let assignment = self
            .store
            .assignment_by_id(identity.tenant_id, attempt.assignment_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Assignment not found".to_string()))?;

        let exam_id = assignment.exam_id.ok_or_else(|| {
            AppError::validation("exam schema is missing or malformed; submit aborted")
        })?;

        let exam = self
            .store
            .exam_by_id(identity.tenant_id, exam_id)
            .await?
            .ok_or_else(|| {
                AppError::validation("exam schema is missing or malformed; submit aborted")
            })?;

        Ok((assignment, exam))
    }
}
