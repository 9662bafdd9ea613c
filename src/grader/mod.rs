// src/grader/mod.rs

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One free-text grading request sent to the external grader.
#[derive(Debug, Clone, Serialize)]
pub struct GradeRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rubric: Option<String>,
    pub answer: String,
}

/// The external grader's verdict. The score is clamped and rounded by the
/// grading pipeline, not trusted as-is.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeReply {
    pub score_percent: f64,
    pub feedback: String,
}

/// Opaque failure of the external grading call. The grading pipeline never
/// propagates this; it degrades to a needs-review result instead.
#[derive(Debug)]
pub struct GraderError(pub String);

impl fmt::Display for GraderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grader call failed: {}", self.0)
    }
}

impl std::error::Error for GraderError {}

/// The external grading collaborator for non-objective questions.
#[async_trait]
pub trait TextGrader: Send + Sync {
    async fn grade_text_answer(&self, request: &GradeRequest) -> Result<GradeReply, GraderError>;
}

/// HTTP implementation of `TextGrader`.
///
/// Posts `{prompt, rubric?, answer}` to the configured endpoint and expects
/// `{scorePercent, feedback}` back. Any transport error, non-success status
/// or undecodable body is a `GraderError`.
pub struct HttpGrader {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpGrader {
    pub fn new(url: String, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url,
            api_key,
        }
    }
}

#[async_trait]
impl TextGrader for HttpGrader {
    async fn grade_text_answer(&self, request: &GradeRequest) -> Result<GradeReply, GraderError> {
        let mut req = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| GraderError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GraderError(format!("unexpected status {}", status)));
        }

        let reply: GradeReply = response
            .json()
            .await
            .map_err(|e| GraderError(format!("undecodable reply: {}", e)))?;

        if !reply.score_percent.is_finite() {
            return Err(GraderError("non-finite score in reply".to_string()));
        }

        Ok(reply)
    }
}
