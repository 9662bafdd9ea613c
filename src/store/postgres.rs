// src/store/postgres.rs

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction, types::Json};

use crate::models::{
    assignment::{Assignment, NewAssignment},
    attempt::{Attempt, AttemptStatus, GradedQuestion, GradingSummary, NewAttempt, Response},
    exam::{Exam, NewExam},
    subject::{
        Lesson, NewEnrollment, NewLesson, NewSubject, Subject, SubjectEnrollment,
        enrollment_status,
    },
};

use super::{Isolation, Store, StoreError, StoreTx};

const ASSIGNMENT_COLUMNS: &str = "id, tenant_id, assignee_student_id, assigned_by_teacher_id, \
     lesson_id, exam_id, assignment_source, assignment_type, max_attempts, due_at, \
     subject_enrollment_id, created_at";

const ATTEMPT_COLUMNS: &str =
    "id, tenant_id, assignment_id, student_id, status, score_percent, started_at, \
     submitted_at, grading_summary";

const ENROLLMENT_COLUMNS: &str = "id, tenant_id, subject_id, student_id, status, \
     auto_assign_future, created_at, updated_at";

/// Postgres-backed `Store`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self, isolation: Isolation) -> Result<Box<dyn StoreTx>, StoreError> {
        let mut tx = self.pool.begin().await?;
        if isolation == Isolation::Serializable {
            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut *tx)
                .await?;
        }
        Ok(Box::new(PgTx { tx }))
    }

    async fn subject_by_id(
        &self,
        tenant_id: i64,
        subject_id: i64,
    ) -> Result<Option<Subject>, StoreError> {
        let subject = sqlx::query_as::<_, Subject>(
            "SELECT id, tenant_id, teacher_owner_id, name, name_normalized, created_at
             FROM subjects WHERE id = $1 AND tenant_id = $2",
        )
        .bind(subject_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subject)
    }

    async fn subjects_for_teacher(
        &self,
        tenant_id: i64,
        teacher_id: i64,
    ) -> Result<Vec<Subject>, StoreError> {
        let subjects = sqlx::query_as::<_, Subject>(
            "SELECT id, tenant_id, teacher_owner_id, name, name_normalized, created_at
             FROM subjects WHERE tenant_id = $1 AND teacher_owner_id = $2 ORDER BY id",
        )
        .bind(tenant_id)
        .bind(teacher_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(subjects)
    }

    async fn insert_subject(&self, subject: NewSubject) -> Result<Option<Subject>, StoreError> {
        let inserted = sqlx::query_as::<_, Subject>(
            "INSERT INTO subjects (tenant_id, teacher_owner_id, name, name_normalized)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT DO NOTHING
             RETURNING id, tenant_id, teacher_owner_id, name, name_normalized, created_at",
        )
        .bind(subject.tenant_id)
        .bind(subject.teacher_owner_id)
        .bind(subject.name)
        .bind(subject.name_normalized)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted)
    }

    async fn lesson_by_id(
        &self,
        tenant_id: i64,
        lesson_id: i64,
    ) -> Result<Option<Lesson>, StoreError> {
        let lesson = sqlx::query_as::<_, Lesson>(
            "SELECT id, tenant_id, subject_id, title, content, created_at, deleted_at
             FROM lessons WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL",
        )
        .bind(lesson_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(lesson)
    }

    async fn insert_lesson(&self, lesson: NewLesson) -> Result<Lesson, StoreError> {
        let lesson = sqlx::query_as::<_, Lesson>(
            "INSERT INTO lessons (tenant_id, subject_id, title, content)
             VALUES ($1, $2, $3, $4)
             RETURNING id, tenant_id, subject_id, title, content, created_at, deleted_at",
        )
        .bind(lesson.tenant_id)
        .bind(lesson.subject_id)
        .bind(lesson.title)
        .bind(lesson.content)
        .fetch_one(&self.pool)
        .await?;

        Ok(lesson)
    }

    async fn exam_by_id(&self, tenant_id: i64, exam_id: i64) -> Result<Option<Exam>, StoreError> {
        let exam = sqlx::query_as::<_, Exam>(
            "SELECT id, tenant_id, subject_id, title, normalized, created_by, created_at, deleted_at
             FROM exams WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL",
        )
        .bind(exam_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(exam)
    }

    async fn insert_exam(&self, exam: NewExam) -> Result<Exam, StoreError> {
        let exam = sqlx::query_as::<_, Exam>(
            "INSERT INTO exams (tenant_id, subject_id, title, normalized, created_by)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, tenant_id, subject_id, title, normalized, created_by, created_at, deleted_at",
        )
        .bind(exam.tenant_id)
        .bind(exam.subject_id)
        .bind(exam.title)
        .bind(Json(exam.normalized))
        .bind(exam.created_by)
        .fetch_one(&self.pool)
        .await?;

        Ok(exam)
    }

    async fn assignment_by_id(
        &self,
        tenant_id: i64,
        assignment_id: i64,
    ) -> Result<Option<Assignment>, StoreError> {
        let assignment = sqlx::query_as::<_, Assignment>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(assignment_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(assignment)
    }

    async fn assignments_for_student(
        &self,
        tenant_id: i64,
        student_id: i64,
    ) -> Result<Vec<Assignment>, StoreError> {
        let assignments = sqlx::query_as::<_, Assignment>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
             WHERE tenant_id = $1 AND assignee_student_id = $2 ORDER BY id DESC"
        ))
        .bind(tenant_id)
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(assignments)
    }

    async fn attempt_by_id(&self, attempt_id: i64) -> Result<Option<Attempt>, StoreError> {
        let attempt = sqlx::query_as::<_, Attempt>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE id = $1"
        ))
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempt)
    }

    async fn responses_for_attempt(
        &self,
        attempt_id: i64,
    ) -> Result<Vec<Response>, StoreError> {
        let responses = sqlx::query_as::<_, Response>(
            "SELECT id, attempt_id, question_id, answer, grading, updated_at
             FROM responses WHERE attempt_id = $1 ORDER BY question_id",
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(responses)
    }
}

/// One open Postgres transaction.
struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn enrollment_for(
        &mut self,
        subject_id: i64,
        student_id: i64,
    ) -> Result<Option<SubjectEnrollment>, StoreError> {
        let enrollment = sqlx::query_as::<_, SubjectEnrollment>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM subject_enrollments
             WHERE subject_id = $1 AND student_id = $2"
        ))
        .bind(subject_id)
        .bind(student_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(enrollment)
    }

    async fn insert_enrollment_if_absent(
        &mut self,
        enrollment: NewEnrollment,
    ) -> Result<SubjectEnrollment, StoreError> {
        let inserted = sqlx::query_as::<_, SubjectEnrollment>(&format!(
            "INSERT INTO subject_enrollments
                 (tenant_id, subject_id, student_id, status, auto_assign_future)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (subject_id, student_id) DO NOTHING
             RETURNING {ENROLLMENT_COLUMNS}"
        ))
        .bind(enrollment.tenant_id)
        .bind(enrollment.subject_id)
        .bind(enrollment.student_id)
        .bind(enrollment.status.clone())
        .bind(enrollment.auto_assign_future)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(row) = inserted {
            return Ok(row);
        }

        // Lost the insert to an existing row; read it back.
        let existing = self
            .enrollment_for(enrollment.subject_id, enrollment.student_id)
            .await?;
        existing.ok_or_else(|| {
            StoreError::Backend("enrollment vanished between insert and read".to_string())
        })
    }

    async fn set_enrollment_status(
        &mut self,
        enrollment_id: i64,
        status: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE subject_enrollments SET status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(enrollment_id)
        .bind(status)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn active_auto_enrollments(
        &mut self,
        subject_id: i64,
    ) -> Result<Vec<SubjectEnrollment>, StoreError> {
        let enrollments = sqlx::query_as::<_, SubjectEnrollment>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM subject_enrollments
             WHERE subject_id = $1 AND status = $2 AND auto_assign_future = TRUE"
        ))
        .bind(subject_id)
        .bind(enrollment_status::ACTIVE)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(enrollments)
    }

    async fn published_lesson_ids(&mut self, subject_id: i64) -> Result<Vec<i64>, StoreError> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            "SELECT id FROM lessons WHERE subject_id = $1 AND deleted_at IS NULL ORDER BY id",
        )
        .bind(subject_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn published_exam_ids(&mut self, subject_id: i64) -> Result<Vec<i64>, StoreError> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            "SELECT id FROM exams WHERE subject_id = $1 AND deleted_at IS NULL ORDER BY id",
        )
        .bind(subject_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn insert_assignments_skip_existing(
        &mut self,
        rows: &[NewAssignment],
    ) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO assignments
                 (tenant_id, assignee_student_id, assigned_by_teacher_id, lesson_id, exam_id,
                  assignment_source, assignment_type, max_attempts, due_at, subject_enrollment_id) ",
        );

        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.tenant_id)
                .push_bind(row.assignee_student_id)
                .push_bind(row.assigned_by_teacher_id)
                .push_bind(row.lesson_id)
                .push_bind(row.exam_id)
                .push_bind(row.assignment_source.clone())
                .push_bind(row.assignment_type.clone())
                .push_bind(row.max_attempts)
                .push_bind(row.due_at)
                .push_bind(row.subject_enrollment_id);
        });
        builder.push(" ON CONFLICT DO NOTHING");

        let result = builder.build().execute(&mut *self.tx).await?;

        Ok(result.rows_affected())
    }

    async fn assignment_by_id(
        &mut self,
        tenant_id: i64,
        assignment_id: i64,
    ) -> Result<Option<Assignment>, StoreError> {
        let assignment = sqlx::query_as::<_, Assignment>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(assignment_id)
        .bind(tenant_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(assignment)
    }

    async fn has_attempt_in_progress(
        &mut self,
        assignment_id: i64,
        student_id: i64,
    ) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM attempts
             WHERE assignment_id = $1 AND student_id = $2 AND status = $3 LIMIT 1",
        )
        .bind(assignment_id)
        .bind(student_id)
        .bind(AttemptStatus::InProgress.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.is_some())
    }

    async fn count_attempts(
        &mut self,
        assignment_id: i64,
        student_id: i64,
    ) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM attempts WHERE assignment_id = $1 AND student_id = $2",
        )
        .bind(assignment_id)
        .bind(student_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(count)
    }

    async fn insert_attempt(&mut self, attempt: NewAttempt) -> Result<Attempt, StoreError> {
        let attempt = sqlx::query_as::<_, Attempt>(&format!(
            "INSERT INTO attempts (tenant_id, assignment_id, student_id, status)
             VALUES ($1, $2, $3, $4)
             RETURNING {ATTEMPT_COLUMNS}"
        ))
        .bind(attempt.tenant_id)
        .bind(attempt.assignment_id)
        .bind(attempt.student_id)
        .bind(AttemptStatus::InProgress.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(attempt)
    }

    async fn attempt_by_id(&mut self, attempt_id: i64) -> Result<Option<Attempt>, StoreError> {
        let attempt = sqlx::query_as::<_, Attempt>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE id = $1"
        ))
        .bind(attempt_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(attempt)
    }

    async fn mark_attempt_submitted(
        &mut self,
        attempt_id: i64,
        submitted_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE attempts SET status = $2, submitted_at = $3
             WHERE id = $1 AND status = $4",
        )
        .bind(attempt_id)
        .bind(AttemptStatus::Submitted.as_str())
        .bind(submitted_at)
        .bind(AttemptStatus::InProgress.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn upsert_response(
        &mut self,
        attempt_id: i64,
        question_id: &str,
        answer: &Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO responses (attempt_id, question_id, answer)
             VALUES ($1, $2, $3)
             ON CONFLICT (attempt_id, question_id)
             DO UPDATE SET answer = EXCLUDED.answer, updated_at = now()",
        )
        .bind(attempt_id)
        .bind(question_id)
        .bind(answer.clone())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn annotate_response(
        &mut self,
        attempt_id: i64,
        grading: &GradedQuestion,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO responses (attempt_id, question_id, answer, grading)
             VALUES ($1, $2, 'null'::jsonb, $3)
             ON CONFLICT (attempt_id, question_id)
             DO UPDATE SET grading = EXCLUDED.grading, updated_at = now()",
        )
        .bind(attempt_id)
        .bind(grading.question_id.clone())
        .bind(Json(grading))
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn finalize_attempt(
        &mut self,
        attempt_id: i64,
        status: &str,
        score_percent: i64,
        summary: &GradingSummary,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE attempts SET status = $2, score_percent = $3, grading_summary = $4
             WHERE id = $1",
        )
        .bind(attempt_id)
        .bind(status)
        .bind(score_percent)
        .bind(Json(summary))
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
