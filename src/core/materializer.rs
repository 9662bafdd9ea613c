// src/core/materializer.rs

//! Keeps `Assignment` rows synchronized with the cross product of active,
//! auto-assign-enabled enrollments and published subject content.
//!
//! Both entry points run inside one storage transaction and insert with
//! duplicate-skipping semantics, so upstream retries and duplicated triggers
//! are no-ops. Assignments are never retracted here.

use std::sync::Arc;

use crate::audit::{AuditEvent, AuditSink};
use crate::error::AppError;
use crate::models::{
    assignment::{ContentRef, MaterializeOutcome, NewAssignment, assignment_source, assignment_type},
    subject::{NewEnrollment, Subject, SubjectEnrollment, enrollment_status},
};
use crate::observe::Metrics;
use crate::store::{Isolation, Store, StoreError, StoreTx};

/// Default shape of an auto-created assignment.
const AUTO_MAX_ATTEMPTS: i32 = 3;

pub struct Materializer {
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
    audit: Arc<dyn AuditSink>,
}

impl Materializer {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<Metrics>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            metrics,
            audit,
        }
    }

    /// Enrollment-activation entry point.
    ///
    /// Creates the enrollment if it does not exist (reactivating a
    /// 'completed' one otherwise) and backfills assignments for every
    /// published lesson and exam in the subject. Re-running for the same
    /// enrollment creates nothing new.
    pub async fn on_enrollment_activated(
        &self,
        subject: &Subject,
        student_id: i64,
        auto_assign_future: bool,
    ) -> Result<(SubjectEnrollment, MaterializeOutcome), AppError> {
        let mut tx = self.store.begin(Isolation::ReadCommitted).await?;

        let mut enrollment = tx
            .insert_enrollment_if_absent(NewEnrollment {
                tenant_id: subject.tenant_id,
                subject_id: subject.id,
                student_id,
                status: enrollment_status::ACTIVE.to_string(),
                auto_assign_future,
            })
            .await?;

        if enrollment.status != enrollment_status::ACTIVE {
            tx.set_enrollment_status(enrollment.id, enrollment_status::ACTIVE)
                .await?;
            enrollment.status = enrollment_status::ACTIVE.to_string();
        }

        let outcome = self.backfill(tx.as_mut(), subject, &enrollment).await?;
        tx.commit().await?;

        self.report(subject, &outcome);
        Ok((enrollment, outcome))
    }

    /// Enrollment status change. A `completed -> active` transition re-runs
    /// the backfill; any other change only updates the row.
    pub async fn update_enrollment_status(
        &self,
        subject: &Subject,
        student_id: i64,
        status: &str,
    ) -> Result<(SubjectEnrollment, Option<MaterializeOutcome>), AppError> {
        let mut tx = self.store.begin(Isolation::ReadCommitted).await?;

        let Some(mut enrollment) = tx.enrollment_for(subject.id, student_id).await? else {
            return Err(AppError::NotFound("Enrollment not found".to_string()));
        };

        let reactivated = status == enrollment_status::ACTIVE
            && enrollment.status == enrollment_status::COMPLETED;

        if enrollment.status != status {
            tx.set_enrollment_status(enrollment.id, status).await?;
            enrollment.status = status.to_string();
        }

        let outcome = if reactivated {
            Some(self.backfill(tx.as_mut(), subject, &enrollment).await?)
        } else {
            None
        };

        tx.commit().await?;

        if let Some(outcome) = &outcome {
            self.report(subject, outcome);
        }
        Ok((enrollment, outcome))
    }

    /// New-content entry point: fans one published lesson or exam out to
    /// every active enrollment that opted into future content.
    pub async fn on_content_published(
        &self,
        subject: &Subject,
        content: ContentRef,
    ) -> Result<MaterializeOutcome, AppError> {
        let mut tx = self.store.begin(Isolation::ReadCommitted).await?;

        let enrollments = tx.active_auto_enrollments(subject.id).await?;
        let rows: Vec<NewAssignment> = enrollments
            .iter()
            .map(|enrollment| self.auto_candidate(subject, enrollment, content))
            .collect();

        let candidates = rows.len() as u64;
        let created = tx.insert_assignments_skip_existing(&rows).await?;
        tx.commit().await?;

        let outcome = match content {
            ContentRef::Lesson(_) => MaterializeOutcome {
                lesson_candidates: candidates,
                lesson_created: created,
                ..Default::default()
            },
            ContentRef::Exam(_) => MaterializeOutcome {
                exam_candidates: candidates,
                exam_created: created,
                ..Default::default()
            },
        };

        self.report(subject, &outcome);
        Ok(outcome)
    }

    /// Manual-assignment path. Bypasses the enrollment-content product but
    /// still guarantees an enrollment row per target student (created with
    /// `auto_assign_future = false` when absent), then inserts with the same
    /// duplicate-skipping semantics.
    pub async fn assign_manual(
        &self,
        subject: &Subject,
        assigned_by: i64,
        content: ContentRef,
        student_ids: &[i64],
        kind: &str,
        max_attempts: i32,
        due_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<u64, AppError> {
        let mut tx = self.store.begin(Isolation::ReadCommitted).await?;

        let mut rows = Vec::with_capacity(student_ids.len());
        for student_id in student_ids {
            let enrollment = tx
                .insert_enrollment_if_absent(NewEnrollment {
                    tenant_id: subject.tenant_id,
                    subject_id: subject.id,
                    student_id: *student_id,
                    status: enrollment_status::ACTIVE.to_string(),
                    auto_assign_future: false,
                })
                .await?;

            let (lesson_id, exam_id) = content_columns(content);
            rows.push(NewAssignment {
                tenant_id: subject.tenant_id,
                assignee_student_id: *student_id,
                assigned_by_teacher_id: assigned_by,
                lesson_id,
                exam_id,
                assignment_source: assignment_source::MANUAL.to_string(),
                assignment_type: kind.to_string(),
                max_attempts,
                due_at,
                subject_enrollment_id: Some(enrollment.id),
            });
        }

        let created = tx.insert_assignments_skip_existing(&rows).await?;
        tx.commit().await?;

        self.metrics
            .record_assignments(created, rows.len() as u64 - created);
        self.audit.record(AuditEvent::ManualAssignment {
            tenant_id: subject.tenant_id,
            assigned_by,
            students: student_ids.len(),
            created,
        });

        Ok(created)
    }

    /// Builds and inserts the candidate rows for one enrollment against all
    /// published content of the subject.
    async fn backfill(
        &self,
        tx: &mut dyn StoreTx,
        subject: &Subject,
        enrollment: &SubjectEnrollment,
    ) -> Result<MaterializeOutcome, StoreError> {
        let lesson_rows: Vec<NewAssignment> = tx
            .published_lesson_ids(subject.id)
            .await?
            .into_iter()
            .map(|id| self.auto_candidate(subject, enrollment, ContentRef::Lesson(id)))
            .collect();

        let exam_rows: Vec<NewAssignment> = tx
            .published_exam_ids(subject.id)
            .await?
            .into_iter()
            .map(|id| self.auto_candidate(subject, enrollment, ContentRef::Exam(id)))
            .collect();

        let lesson_candidates = lesson_rows.len() as u64;
        let exam_candidates = exam_rows.len() as u64;
        let lesson_created = tx.insert_assignments_skip_existing(&lesson_rows).await?;
        let exam_created = tx.insert_assignments_skip_existing(&exam_rows).await?;

        Ok(MaterializeOutcome {
            lesson_candidates,
            lesson_created,
            exam_candidates,
            exam_created,
        })
    }

    fn auto_candidate(
        &self,
        subject: &Subject,
        enrollment: &SubjectEnrollment,
        content: ContentRef,
    ) -> NewAssignment {
        let (lesson_id, exam_id) = content_columns(content);
        NewAssignment {
            tenant_id: subject.tenant_id,
            assignee_student_id: enrollment.student_id,
            assigned_by_teacher_id: subject.teacher_owner_id,
            lesson_id,
            exam_id,
            assignment_source: assignment_source::SUBJECT_AUTO.to_string(),
            assignment_type: assignment_type::PRACTICE.to_string(),
            max_attempts: AUTO_MAX_ATTEMPTS,
            due_at: None,
            subject_enrollment_id: Some(enrollment.id),
        }
    }

    /// Duplicate skips are steady-state behavior, not failures; they are
    /// only counted.
    fn report(&self, subject: &Subject, outcome: &MaterializeOutcome) {
        self.metrics
            .record_assignments(outcome.created(), outcome.skipped());
        self.audit.record(AuditEvent::AssignmentsMaterialized {
            tenant_id: subject.tenant_id,
            subject_id: subject.id,
            created: outcome.created(),
            skipped: outcome.skipped(),
        });
        tracing::debug!(
            subject_id = subject.id,
            created = outcome.created(),
            skipped = outcome.skipped(),
            "materializer run finished"
        );
    }
}

fn content_columns(content: ContentRef) -> (Option<i64>, Option<i64>) {
    match content {
        ContentRef::Lesson(id) => (Some(id), None),
        ContentRef::Exam(id) => (None, Some(id)),
    }
}
