// src/store/mod.rs

pub mod memory;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{
    assignment::{Assignment, NewAssignment},
    attempt::{Attempt, GradedQuestion, GradingSummary, NewAttempt, Response},
    exam::{Exam, NewExam},
    subject::{Lesson, NewEnrollment, NewLesson, NewSubject, Subject, SubjectEnrollment},
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Transaction isolation requested from `Store::begin`.
///
/// Attempt creation needs `Serializable` so that two racing creations cannot
/// both pass the quota check; everything else runs at the default level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    ReadCommitted,
    Serializable,
}

/// Storage-layer error.
#[derive(Debug)]
pub enum StoreError {
    /// A serializable transaction lost a race and should be retried.
    SerializationConflict,

    /// Any other backend failure.
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::SerializationConflict => write!(f, "serialization conflict"),
            StoreError::Backend(msg) => write!(f, "storage backend error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        // SQLSTATE 40001 is Postgres' serialization_failure.
        if let Some(db_err) = err.as_database_error() {
            if db_err.code().as_deref() == Some("40001") {
                return StoreError::SerializationConflict;
            }
        }
        StoreError::Backend(err.to_string())
    }
}

/// Durable storage over the core entities.
///
/// Single-statement reads and inserts live here; multi-statement work goes
/// through `begin` and the returned `StoreTx`.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self, isolation: Isolation) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn subject_by_id(
        &self,
        tenant_id: i64,
        subject_id: i64,
    ) -> Result<Option<Subject>, StoreError>;

    async fn subjects_for_teacher(
        &self,
        tenant_id: i64,
        teacher_id: i64,
    ) -> Result<Vec<Subject>, StoreError>;

    /// Inserts a subject; returns `None` when the `(tenant, owner, name)`
    /// uniqueness key is already taken.
    async fn insert_subject(&self, subject: NewSubject) -> Result<Option<Subject>, StoreError>;

    async fn lesson_by_id(
        &self,
        tenant_id: i64,
        lesson_id: i64,
    ) -> Result<Option<Lesson>, StoreError>;

    async fn insert_lesson(&self, lesson: NewLesson) -> Result<Lesson, StoreError>;

    async fn exam_by_id(&self, tenant_id: i64, exam_id: i64) -> Result<Option<Exam>, StoreError>;

    async fn insert_exam(&self, exam: NewExam) -> Result<Exam, StoreError>;

    async fn assignment_by_id(
        &self,
        tenant_id: i64,
        assignment_id: i64,
    ) -> Result<Option<Assignment>, StoreError>;

    async fn assignments_for_student(
        &self,
        tenant_id: i64,
        student_id: i64,
    ) -> Result<Vec<Assignment>, StoreError>;

    async fn attempt_by_id(&self, attempt_id: i64) -> Result<Option<Attempt>, StoreError>;

    async fn responses_for_attempt(&self, attempt_id: i64)
    -> Result<Vec<Response>, StoreError>;
}

/// One open transaction. Dropping without `commit` rolls back.
#[async_trait]
pub trait StoreTx: Send {
    // Enrollments

    async fn enrollment_for(
        &mut self,
        subject_id: i64,
        student_id: i64,
    ) -> Result<Option<SubjectEnrollment>, StoreError>;

    /// Idempotent insert on the `(subject, student)` key; returns the
    /// already-existing row when present.
    async fn insert_enrollment_if_absent(
        &mut self,
        enrollment: NewEnrollment,
    ) -> Result<SubjectEnrollment, StoreError>;

    async fn set_enrollment_status(
        &mut self,
        enrollment_id: i64,
        status: &str,
    ) -> Result<(), StoreError>;

    async fn active_auto_enrollments(
        &mut self,
        subject_id: i64,
    ) -> Result<Vec<SubjectEnrollment>, StoreError>;

    // Subject content

    async fn published_lesson_ids(&mut self, subject_id: i64) -> Result<Vec<i64>, StoreError>;

    async fn published_exam_ids(&mut self, subject_id: i64) -> Result<Vec<i64>, StoreError>;

    // Assignments

    /// Bulk insert with duplicate-skipping semantics on the natural
    /// uniqueness key. Returns the number of rows actually created.
    async fn insert_assignments_skip_existing(
        &mut self,
        rows: &[NewAssignment],
    ) -> Result<u64, StoreError>;

    async fn assignment_by_id(
        &mut self,
        tenant_id: i64,
        assignment_id: i64,
    ) -> Result<Option<Assignment>, StoreError>;

    // Attempts

    async fn has_attempt_in_progress(
        &mut self,
        assignment_id: i64,
        student_id: i64,
    ) -> Result<bool, StoreError>;

    async fn count_attempts(
        &mut self,
        assignment_id: i64,
        student_id: i64,
    ) -> Result<i64, StoreError>;

    async fn insert_attempt(&mut self, attempt: NewAttempt) -> Result<Attempt, StoreError>;

    async fn attempt_by_id(&mut self, attempt_id: i64) -> Result<Option<Attempt>, StoreError>;

    /// Conditional `in_progress -> submitted` transition. Returns the number
    /// of rows updated: zero means the attempt was not in progress anymore.
    async fn mark_attempt_submitted(
        &mut self,
        attempt_id: i64,
        submitted_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, StoreError>;

    // Responses

    async fn upsert_response(
        &mut self,
        attempt_id: i64,
        question_id: &str,
        answer: &Value,
    ) -> Result<(), StoreError>;

    /// Writes grading output onto the response row, creating the row (with a
    /// null answer) when nothing was ever autosaved for the question.
    async fn annotate_response(
        &mut self,
        attempt_id: i64,
        grading: &GradedQuestion,
    ) -> Result<(), StoreError>;

    /// Records the terminal grading result on the attempt row.
    async fn finalize_attempt(
        &mut self,
        attempt_id: i64,
        status: &str,
        score_percent: i64,
        summary: &GradingSummary,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
