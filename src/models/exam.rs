// src/models/exam.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};

/// The closed set of question types the platform understands.
///
/// Uploaded payloads may use legacy aliases (see `from_alias`); everything
/// else is rejected during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
    LongAnswer,
}

impl QuestionKind {
    /// Maps a raw `type` string (including legacy aliases) onto the enum.
    pub fn from_alias(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "multiple-choice" | "multiple_choice" | "mcq" => Some(Self::MultipleChoice),
            "true-false" | "true_false" | "tf" => Some(Self::TrueFalse),
            "short-answer" | "short_answer" | "short" => Some(Self::ShortAnswer),
            "long-answer" | "long_answer" | "long" | "essay" => Some(Self::LongAnswer),
            _ => None,
        }
    }

    /// Objective questions are graded deterministically; the rest go through
    /// the external grader.
    pub fn is_objective(&self) -> bool {
        matches!(self, Self::MultipleChoice | Self::TrueFalse)
    }
}

/// Answer key for an objective question.
///
/// Multiple-choice keys are one of the question's choices; true/false keys
/// are booleans. Serialized untagged so the canonical JSON stays a plain
/// string or bool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerKey {
    Choice(String),
    Bool(bool),
}

/// Exam-level settings with platform defaults applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSettings {
    pub time_limit_minutes: u32,
    pub passing_score_percent: u32,
}

impl Default for ExamSettings {
    fn default() -> Self {
        Self {
            time_limit_minutes: 30,
            passing_score_percent: 70,
        }
    }
}

/// One question in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedQuestion {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: QuestionKind,

    pub prompt: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<AnswerKey>,

    /// Free-text grading guidance passed to the external grader.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rubric: Option<String>,

    pub points: u32,
}

/// The canonical exam schema every uploaded payload is normalized into.
///
/// Invariants: `questions` is non-empty and question ids are unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedExam {
    pub title: String,
    pub subject: String,
    pub settings: ExamSettings,
    pub questions: Vec<NormalizedQuestion>,
}

impl NormalizedExam {
    pub fn question(&self, id: &str) -> Option<&NormalizedQuestion> {
        self.questions.iter().find(|q| q.id == id)
    }
}

/// Result of running the normalizer over an uploaded payload.
///
/// `normalized` is `None` whenever `errors` is non-empty; warnings never
/// block acceptance.
#[derive(Debug, Serialize)]
pub struct NormalizedOutcome {
    pub normalized: Option<NormalizedExam>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Represents the 'exams' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Exam {
    pub id: i64,
    pub tenant_id: i64,
    pub subject_id: i64,
    pub title: String,

    /// Canonical exam content, stored as JSON.
    pub normalized: Json<NormalizedExam>,

    pub created_by: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Soft-delete marker; deleted exams stay out of materialization and
    /// attempt lookups.
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Insert record for the 'exams' table.
#[derive(Debug, Clone)]
pub struct NewExam {
    pub tenant_id: i64,
    pub subject_id: i64,
    pub title: String,
    pub normalized: NormalizedExam,
    pub created_by: i64,
}

/// Response body for a successful exam upload.
#[derive(Debug, Serialize)]
pub struct ExamUploadResponse {
    pub exam_id: i64,
    pub warnings: Vec<String>,
    pub assignments_created: u64,
}
