// src/models/assignment.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// Values stored in `assignments.assignment_source`.
pub mod assignment_source {
    pub const MANUAL: &str = "manual";
    pub const SUBJECT_AUTO: &str = "subject_auto";
}

/// Values stored in `assignments.assignment_type`.
pub mod assignment_type {
    pub const PRACTICE: &str = "practice";
    pub const ASSESSMENT: &str = "assessment";
}

/// Represents the 'assignments' table in the database.
///
/// One unit of assigned work. Exactly one of `lesson_id` / `exam_id` is set.
/// The natural uniqueness key is `(assignee_student_id, lesson_id|exam_id,
/// subject_enrollment_id)`; inserts skip duplicates instead of failing.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Assignment {
    pub id: i64,
    pub tenant_id: i64,
    pub assignee_student_id: i64,
    pub assigned_by_teacher_id: i64,
    pub lesson_id: Option<i64>,
    pub exam_id: Option<i64>,

    /// 'manual' or 'subject_auto'.
    pub assignment_source: String,

    /// 'practice' or 'assessment'.
    pub assignment_type: String,

    pub max_attempts: i32,
    pub due_at: Option<chrono::DateTime<chrono::Utc>>,
    pub subject_enrollment_id: Option<i64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Candidate row handed to the store's duplicate-skipping bulk insert.
#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub tenant_id: i64,
    pub assignee_student_id: i64,
    pub assigned_by_teacher_id: i64,
    pub lesson_id: Option<i64>,
    pub exam_id: Option<i64>,
    pub assignment_source: String,
    pub assignment_type: String,
    pub max_attempts: i32,
    pub due_at: Option<chrono::DateTime<chrono::Utc>>,
    pub subject_enrollment_id: Option<i64>,
}

/// A piece of subject content an assignment can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRef {
    Lesson(i64),
    Exam(i64),
}

/// Counts reported by one materializer run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaterializeOutcome {
    pub lesson_candidates: u64,
    pub lesson_created: u64,
    pub exam_candidates: u64,
    pub exam_created: u64,
}

impl MaterializeOutcome {
    pub fn created(&self) -> u64 {
        self.lesson_created + self.exam_created
    }

    pub fn skipped(&self) -> u64 {
        (self.lesson_candidates - self.lesson_created) + (self.exam_candidates - self.exam_created)
    }
}

/// DTO for a teacher manually assigning content to specific students.
#[derive(Debug, Deserialize, Validate)]
pub struct ManualAssignRequest {
    pub lesson_id: Option<i64>,
    pub exam_id: Option<i64>,

    #[validate(length(min = 1, message = "At least one student is required."))]
    pub student_ids: Vec<i64>,

    /// 'practice' or 'assessment'. Defaults to 'assessment'.
    #[serde(default = "default_assignment_type")]
    pub assignment_type: String,

    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: i32,

    pub due_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn default_assignment_type() -> String {
    assignment_type::ASSESSMENT.to_string()
}

fn default_max_attempts() -> i32 {
    3
}
