// src/models/attempt.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{prelude::FromRow, types::Json};

/// Attempt states. `in_progress` is the only non-terminal state; the single
/// legal transition chain is `in_progress -> submitted -> graded |
/// needs_review`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    Graded,
    NeedsReview,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::Graded => "graded",
            Self::NeedsReview => "needs_review",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in_progress" => Some(Self::InProgress),
            "submitted" => Some(Self::Submitted),
            "graded" => Some(Self::Graded),
            "needs_review" => Some(Self::NeedsReview),
            _ => None,
        }
    }
}

/// Per-attempt grading totals, persisted on the attempt row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingSummary {
    /// Questions graded deterministically.
    pub objective_count: u32,
    /// External grader calls made.
    pub llm_count: u32,
    /// Questions flagged for manual review.
    pub review_count: u32,
}

/// Grading output for one question. Persisted onto the matching response
/// row's `grading` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedQuestion {
    pub question_id: String,

    /// Always within [0, 100].
    pub score_percent: i64,

    pub feedback: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_review: bool,
}

/// Represents the 'attempts' table in the database.
///
/// Owned exclusively by the student who created it; immutable once terminal
/// except for the one submit transition.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Attempt {
    pub id: i64,
    pub tenant_id: i64,
    pub assignment_id: i64,
    pub student_id: i64,

    /// One of the `AttemptStatus` strings.
    pub status: String,

    pub score_percent: Option<i64>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub submitted_at: Option<chrono::DateTime<chrono::Utc>>,
    pub grading_summary: Option<Json<GradingSummary>>,
}

/// Represents the 'responses' table in the database.
///
/// One answer to one question within one attempt, keyed by
/// `(attempt_id, question_id)`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Response {
    pub id: i64,
    pub attempt_id: i64,
    pub question_id: String,
    pub answer: Json<Value>,
    pub grading: Option<Json<GradedQuestion>>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Insert record for the 'attempts' table.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub tenant_id: i64,
    pub assignment_id: i64,
    pub student_id: i64,
}

/// One autosaved answer in an autosave batch.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseUpsert {
    pub question_id: String,
    pub answer: Value,
}

/// DTO for the autosave endpoint.
#[derive(Debug, Deserialize)]
pub struct AutosaveRequest {
    pub responses: Vec<ResponseUpsert>,
}

/// Response body returned by the submit endpoint.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub attempt_id: i64,
    pub status: AttemptStatus,
    pub score_percent: i64,
    pub summary: GradingSummary,
    pub questions: Vec<GradedQuestion>,
}

/// Attempt detail with its responses, as returned to clients.
#[derive(Debug, Serialize)]
pub struct AttemptDetail {
    #[serde(flatten)]
    pub attempt: Attempt,
    pub responses: Vec<Response>,
}
