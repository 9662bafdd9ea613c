// src/models/subject.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// Represents the 'subjects' table in the database.
///
/// A subject is a teacher-owned grouping of lessons, exams and enrollments.
/// Identity within a tenant is `(teacher_owner_id, name_normalized)`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Subject {
    pub id: i64,
    pub tenant_id: i64,
    pub teacher_owner_id: i64,
    pub name: String,

    /// Trimmed, lower-cased name used for the uniqueness key.
    pub name_normalized: String,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Normalizes a subject name for the uniqueness key.
pub fn normalize_subject_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Enrollment status values stored in `subject_enrollments.status`.
pub mod enrollment_status {
    pub const ACTIVE: &str = "active";
    pub const COMPLETED: &str = "completed";
}

/// Represents the 'subject_enrollments' table in the database.
///
/// Links one student to one subject. Rows are never hard-deleted; a finished
/// enrollment moves to status 'completed'.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SubjectEnrollment {
    pub id: i64,
    pub tenant_id: i64,
    pub subject_id: i64,
    pub student_id: i64,

    /// 'active' or 'completed'.
    pub status: String,

    /// Whether content published after enrollment auto-propagates to this
    /// student.
    pub auto_assign_future: bool,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Represents the 'lessons' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Lesson {
    pub id: i64,
    pub tenant_id: i64,
    pub subject_id: i64,
    pub title: String,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Insert record for the 'subjects' table.
#[derive(Debug, Clone)]
pub struct NewSubject {
    pub tenant_id: i64,
    pub teacher_owner_id: i64,
    pub name: String,
    pub name_normalized: String,
}

/// Insert record for the 'subject_enrollments' table.
#[derive(Debug, Clone)]
pub struct NewEnrollment {
    pub tenant_id: i64,
    pub subject_id: i64,
    pub student_id: i64,
    pub status: String,
    pub auto_assign_future: bool,
}

/// Insert record for the 'lessons' table.
#[derive(Debug, Clone)]
pub struct NewLesson {
    pub tenant_id: i64,
    pub subject_id: i64,
    pub title: String,
    pub content: String,
}

/// DTO for creating a new subject.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubjectRequest {
    #[validate(length(min = 1, max = 100, message = "Subject name must be between 1 and 100 characters."))]
    pub name: String,
}

/// DTO for enrolling a student into a subject.
#[derive(Debug, Deserialize, Validate)]
pub struct EnrollStudentRequest {
    #[validate(range(min = 1))]
    pub student_id: i64,

    /// Defaults to true: future content is auto-assigned.
    #[serde(default = "default_auto_assign")]
    pub auto_assign_future: bool,
}

fn default_auto_assign() -> bool {
    true
}

/// DTO for changing an enrollment's status.
#[derive(Debug, Deserialize)]
pub struct UpdateEnrollmentRequest {
    /// 'active' or 'completed'.
    pub status: String,
}

/// DTO for publishing a lesson under a subject.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateLessonRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1))]
    pub content: String,
}
