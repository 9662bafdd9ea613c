// src/store/memory.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::types::Json;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{
    assignment::{Assignment, NewAssignment},
    attempt::{Attempt, AttemptStatus, GradedQuestion, GradingSummary, NewAttempt, Response},
    exam::{Exam, NewExam},
    subject::{Lesson, NewEnrollment, NewLesson, NewSubject, Subject, SubjectEnrollment},
};

use super::{Isolation, Store, StoreError, StoreTx};

/// All tables of the in-memory store.
#[derive(Debug, Default, Clone)]
struct MemData {
    next_id: i64,
    subjects: BTreeMap<i64, Subject>,
    enrollments: BTreeMap<i64, SubjectEnrollment>,
    lessons: BTreeMap<i64, Lesson>,
    exams: BTreeMap<i64, Exam>,
    assignments: BTreeMap<i64, Assignment>,
    attempts: BTreeMap<i64, Attempt>,
    responses: BTreeMap<i64, Response>,
}

impl MemData {
    fn alloc_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory `Store` used by the test suite and for local development
/// without a database.
///
/// Every transaction holds the one global lock for its whole lifetime, so
/// transactions are fully serialized; this trivially satisfies the
/// serializable-isolation contract the attempt lifecycle relies on. A
/// transaction mutates a staged clone of the data and `commit` writes it
/// back, so dropping without commit rolls back.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<MemData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self, _isolation: Isolation) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.data.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemTx { guard, staged }))
    }

    async fn subject_by_id(
        &self,
        tenant_id: i64,
        subject_id: i64,
    ) -> Result<Option<Subject>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .subjects
            .get(&subject_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn subjects_for_teacher(
        &self,
        tenant_id: i64,
        teacher_id: i64,
    ) -> Result<Vec<Subject>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .subjects
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.teacher_owner_id == teacher_id)
            .cloned()
            .collect())
    }

    async fn insert_subject(&self, subject: NewSubject) -> Result<Option<Subject>, StoreError> {
        let mut data = self.data.lock().await;
        let taken = data.subjects.values().any(|s| {
            s.tenant_id == subject.tenant_id
                && s.teacher_owner_id == subject.teacher_owner_id
                && s.name_normalized == subject.name_normalized
        });
        if taken {
            return Ok(None);
        }

        let id = data.alloc_id();
        let row = Subject {
            id,
            tenant_id: subject.tenant_id,
            teacher_owner_id: subject.teacher_owner_id,
            name: subject.name,
            name_normalized: subject.name_normalized,
            created_at: Utc::now(),
        };
        data.subjects.insert(id, row.clone());
        Ok(Some(row))
    }

    async fn lesson_by_id(
        &self,
        tenant_id: i64,
        lesson_id: i64,
    ) -> Result<Option<Lesson>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .lessons
            .get(&lesson_id)
            .filter(|l| l.tenant_id == tenant_id && l.deleted_at.is_none())
            .cloned())
    }

    async fn insert_lesson(&self, lesson: NewLesson) -> Result<Lesson, StoreError> {
        let mut data = self.data.lock().await;
        let id = data.alloc_id();
        let row = Lesson {
            id,
            tenant_id: lesson.tenant_id,
            subject_id: lesson.subject_id,
            title: lesson.title,
            content: lesson.content,
            created_at: Utc::now(),
            deleted_at: None,
        };
        data.lessons.insert(id, row.clone());
        Ok(row)
    }

    async fn exam_by_id(&self, tenant_id: i64, exam_id: i64) -> Result<Option<Exam>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .exams
            .get(&exam_id)
            .filter(|e| e.tenant_id == tenant_id && e.deleted_at.is_none())
            .cloned())
    }

    async fn insert_exam(&self, exam: NewExam) -> Result<Exam, StoreError> {
        let mut data = self.data.lock().await;
        let id = data.alloc_id();
        let row = Exam {
            id,
            tenant_id: exam.tenant_id,
            subject_id: exam.subject_id,
            title: exam.title,
            normalized: Json(exam.normalized),
            created_by: exam.created_by,
            created_at: Utc::now(),
            deleted_at: None,
        };
        data.exams.insert(id, row.clone());
        Ok(row)
    }

    async fn assignment_by_id(
        &self,
        tenant_id: i64,
        assignment_id: i64,
    ) -> Result<Option<Assignment>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .assignments
            .get(&assignment_id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned())
    }

    async fn assignments_for_student(
        &self,
        tenant_id: i64,
        student_id: i64,
    ) -> Result<Vec<Assignment>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .assignments
            .values()
            .filter(|a| a.tenant_id == tenant_id && a.assignee_student_id == student_id)
            .cloned()
            .collect())
    }

    async fn attempt_by_id(&self, attempt_id: i64) -> Result<Option<Attempt>, StoreError> {
        let data = self.data.lock().await;
        Ok(data.attempts.get(&attempt_id).cloned())
    }

    async fn responses_for_attempt(
        &self,
        attempt_id: i64,
    ) -> Result<Vec<Response>, StoreError> {
        let data = self.data.lock().await;
        let mut responses: Vec<Response> = data
            .responses
            .values()
            .filter(|r| r.attempt_id == attempt_id)
            .cloned()
            .collect();
        responses.sort_by(|a, b| a.question_id.cmp(&b.question_id));
        Ok(responses)
    }
}

/// One open in-memory transaction.
struct MemTx {
    guard: OwnedMutexGuard<MemData>,
    staged: MemData,
}

#[async_trait]
impl StoreTx for MemTx {
    async fn enrollment_for(
        &mut self,
        subject_id: i64,
        student_id: i64,
    ) -> Result<Option<SubjectEnrollment>, StoreError> {
        Ok(self
            .staged
            .enrollments
            .values()
            .find(|e| e.subject_id == subject_id && e.student_id == student_id)
            .cloned())
    }

    async fn insert_enrollment_if_absent(
        &mut self,
        enrollment: NewEnrollment,
    ) -> Result<SubjectEnrollment, StoreError> {
        if let Some(existing) = self
            .enrollment_for(enrollment.subject_id, enrollment.student_id)
            .await?
        {
            return Ok(existing);
        }

        let id = self.staged.alloc_id();
        let now = Utc::now();
        let row = SubjectEnrollment {
            id,
            tenant_id: enrollment.tenant_id,
            subject_id: enrollment.subject_id,
            student_id: enrollment.student_id,
            status: enrollment.status,
            auto_assign_future: enrollment.auto_assign_future,
            created_at: now,
            updated_at: now,
        };
        self.staged.enrollments.insert(id, row.clone());
        Ok(row)
    }

    async fn set_enrollment_status(
        &mut self,
        enrollment_id: i64,
        status: &str,
    ) -> Result<(), StoreError> {
        if let Some(row) = self.staged.enrollments.get_mut(&enrollment_id) {
            row.status = status.to_string();
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn active_auto_enrollments(
        &mut self,
        subject_id: i64,
    ) -> Result<Vec<SubjectEnrollment>, StoreError> {
        Ok(self
            .staged
            .enrollments
            .values()
            .filter(|e| {
                e.subject_id == subject_id
                    && e.status == crate::models::subject::enrollment_status::ACTIVE
                    && e.auto_assign_future
            })
            .cloned()
            .collect())
    }

    async fn published_lesson_ids(&mut self, subject_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .staged
            .lessons
            .values()
            .filter(|l| l.subject_id == subject_id && l.deleted_at.is_none())
            .map(|l| l.id)
            .collect())
    }

    async fn published_exam_ids(&mut self, subject_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .staged
            .exams
            .values()
            .filter(|e| e.subject_id == subject_id && e.deleted_at.is_none())
            .map(|e| e.id)
            .collect())
    }

    async fn insert_assignments_skip_existing(
        &mut self,
        rows: &[NewAssignment],
    ) -> Result<u64, StoreError> {
        let mut created = 0u64;
        for row in rows {
            let duplicate = self.staged.assignments.values().any(|a| {
                a.assignee_student_id == row.assignee_student_id
                    && a.lesson_id == row.lesson_id
                    && a.exam_id == row.exam_id
                    && a.subject_enrollment_id == row.subject_enrollment_id
            });
            if duplicate {
                continue;
            }

            let id = self.staged.alloc_id();
            self.staged.assignments.insert(
                id,
                Assignment {
                    id,
                    tenant_id: row.tenant_id,
                    assignee_student_id: row.assignee_student_id,
                    assigned_by_teacher_id: row.assigned_by_teacher_id,
                    lesson_id: row.lesson_id,
                    exam_id: row.exam_id,
                    assignment_source: row.assignment_source.clone(),
                    assignment_type: row.assignment_type.clone(),
                    max_attempts: row.max_attempts,
                    due_at: row.due_at,
                    subject_enrollment_id: row.subject_enrollment_id,
                    created_at: Utc::now(),
                },
            );
            created += 1;
        }
        Ok(created)
    }

    async fn assignment_by_id(
        &mut self,
        tenant_id: i64,
        assignment_id: i64,
    ) -> Result<Option<Assignment>, StoreError> {
        Ok(self
            .staged
            .assignments
            .get(&assignment_id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned())
    }

    async fn has_attempt_in_progress(
        &mut self,
        assignment_id: i64,
        student_id: i64,
    ) -> Result<bool, StoreError> {
        Ok(self.staged.attempts.values().any(|a| {
            a.assignment_id == assignment_id
                && a.student_id == student_id
                && a.status == AttemptStatus::InProgress.as_str()
        }))
    }

    async fn count_attempts(
        &mut self,
        assignment_id: i64,
        student_id: i64,
    ) -> Result<i64, StoreError> {
        Ok(self
            .staged
            .attempts
            .values()
            .filter(|a| a.assignment_id == assignment_id && a.student_id == student_id)
            .count() as i64)
    }

    async fn insert_attempt(&mut self, attempt: NewAttempt) -> Result<Attempt, StoreError> {
        let id = self.staged.alloc_id();
        let row = Attempt {
            id,
            tenant_id: attempt.tenant_id,
            assignment_id: attempt.assignment_id,
            student_id: attempt.student_id,
            status: AttemptStatus::InProgress.as_str().to_string(),
            score_percent: None,
            started_at: Utc::now(),
            submitted_at: None,
            grading_summary: None,
        };
        self.staged.attempts.insert(id, row.clone());
        Ok(row)
    }

    async fn attempt_by_id(&mut self, attempt_id: i64) -> Result<Option<Attempt>, StoreError> {
        Ok(self.staged.attempts.get(&attempt_id).cloned())
    }

    async fn mark_attempt_submitted(
        &mut self,
        attempt_id: i64,
        submitted_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, StoreError> {
        match self.staged.attempts.get_mut(&attempt_id) {
            Some(row) if row.status == AttemptStatus::InProgress.as_str() => {
                row.status = AttemptStatus::Submitted.as_str().to_string();
                row.submitted_at = Some(submitted_at);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn upsert_response(
        &mut self,
        attempt_id: i64,
        question_id: &str,
        answer: &Value,
    ) -> Result<(), StoreError> {
        let existing = self
            .staged
            .responses
            .values_mut()
            .find(|r| r.attempt_id == attempt_id && r.question_id == question_id);

        if let Some(row) = existing {
            row.answer = Json(answer.clone());
            row.updated_at = Utc::now();
            return Ok(());
        }

        let id = self.staged.alloc_id();
        self.staged.responses.insert(
            id,
            Response {
                id,
                attempt_id,
                question_id: question_id.to_string(),
                answer: Json(answer.clone()),
                grading: None,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn annotate_response(
        &mut self,
        attempt_id: i64,
        grading: &GradedQuestion,
    ) -> Result<(), StoreError> {
        let existing = self
            .staged
            .responses
            .values_mut()
            .find(|r| r.attempt_id == attempt_id && r.question_id == grading.question_id);

        if let Some(row) = existing {
            row.grading = Some(Json(grading.clone()));
            row.updated_at = Utc::now();
            return Ok(());
        }

        let id = self.staged.alloc_id();
        self.staged.responses.insert(
            id,
            Response {
                id,
                attempt_id,
                question_id: grading.question_id.clone(),
                answer: Json(Value::Null),
                grading: Some(Json(grading.clone())),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn finalize_attempt(
        &mut self,
        attempt_id: i64,
        status: &str,
        score_percent: i64,
        summary: &GradingSummary,
    ) -> Result<(), StoreError> {
        if let Some(row) = self.staged.attempts.get_mut(&attempt_id) {
            row.status = status.to_string();
            row.score_percent = Some(score_percent);
            row.grading_summary = Some(Json(*summary));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
