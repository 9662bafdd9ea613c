// src/core/grading.rs

//! Combines deterministic objective grading with the fallible external
//! grader. External failures never escape this module: they degrade the
//! affected question to a needs-review result and the submit operation
//! always completes.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::grader::{GradeRequest, TextGrader};
use crate::models::attempt::{AttemptStatus, GradedQuestion, GradingSummary};
use crate::models::exam::{AnswerKey, NormalizedExam, NormalizedQuestion};
use crate::observe::Metrics;

const FEEDBACK_CORRECT: &str = "Correct";
const FEEDBACK_INCORRECT: &str = "Incorrect";
const FEEDBACK_NO_ANSWER: &str = "No answer submitted";
const FEEDBACK_DEGRADED: &str = "grading unavailable; marked for manual review";
const FEEDBACK_NO_KEY: &str = "answer key missing; marked for manual review";

/// Everything the submit transition needs to persist.
#[derive(Debug)]
pub struct GradingOutcome {
    pub questions: Vec<GradedQuestion>,
    pub score_percent: i64,
    pub status: AttemptStatus,
    pub summary: GradingSummary,
}

/// Grades one objective question. Pure: the same `(question, answer)` pair
/// always yields the same result.
pub fn grade_objective_question(
    question: &NormalizedQuestion,
    answer: Option<&Value>,
) -> GradedQuestion {
    let Some(key) = &question.correct_answer else {
        // Normalization admits objective questions without an answer key;
        // they can only be resolved by a human.
        return GradedQuestion {
            question_id: question.id.clone(),
            score_percent: 0,
            feedback: FEEDBACK_NO_KEY.to_string(),
            needs_review: true,
        };
    };

    let correct = match key {
        AnswerKey::Choice(expected) => {
            matches!(answer, Some(Value::String(submitted)) if submitted == expected)
        }
        AnswerKey::Bool(expected) => coerce_bool(answer) == Some(*expected),
    };

    GradedQuestion {
        question_id: question.id.clone(),
        score_percent: if correct { 100 } else { 0 },
        feedback: if correct {
            FEEDBACK_CORRECT.to_string()
        } else {
            FEEDBACK_INCORRECT.to_string()
        },
        needs_review: false,
    }
}

/// Submitted true/false answers coerce from a boolean or the literal
/// strings "true"/"false", mirroring the normalizer's key coercion.
fn coerce_bool(answer: Option<&Value>) -> Option<bool> {
    match answer {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Grading pipeline over one submitted attempt.
pub struct GradingPipeline {
    grader: Arc<dyn TextGrader>,
    metrics: Arc<Metrics>,
}

impl GradingPipeline {
    pub fn new(grader: Arc<dyn TextGrader>, metrics: Arc<Metrics>) -> Self {
        Self { grader, metrics }
    }

    /// Grades every question of the exam against the submitted answers.
    ///
    /// Subjective questions are awaited one at a time; the external calls
    /// are independent, so a failure only degrades its own question.
    pub async fn grade(
        &self,
        exam: &NormalizedExam,
        answers: &HashMap<String, Value>,
    ) -> GradingOutcome {
        let mut questions = Vec::with_capacity(exam.questions.len());
        let mut summary = GradingSummary::default();

        for question in &exam.questions {
            let answer = answers.get(&question.id);

            let graded = if question.kind.is_objective() {
                summary.objective_count += 1;
                grade_objective_question(question, answer)
            } else {
                self.grade_subjective(question, answer, &mut summary).await
            };

            if graded.needs_review {
                summary.review_count += 1;
            }
            questions.push(graded);
        }

        let score_percent = aggregate_score(&questions);
        let status = if summary.review_count > 0 {
            AttemptStatus::NeedsReview
        } else {
            AttemptStatus::Graded
        };

        GradingOutcome {
            questions,
            score_percent,
            status,
            summary,
        }
    }

    async fn grade_subjective(
        &self,
        question: &NormalizedQuestion,
        answer: Option<&Value>,
        summary: &mut GradingSummary,
    ) -> GradedQuestion {
        let submitted = answer
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let Some(submitted) = submitted else {
            // Nothing to grade; skip the external call entirely.
            return GradedQuestion {
                question_id: question.id.clone(),
                score_percent: 0,
                feedback: FEEDBACK_NO_ANSWER.to_string(),
                needs_review: true,
            };
        };

        summary.llm_count += 1;

        let request = GradeRequest {
            prompt: question.prompt.clone(),
            rubric: question.rubric.clone(),
            answer: submitted.to_string(),
        };

        match self.grader.grade_text_answer(&request).await {
            Ok(reply) => {
                self.metrics.record_grader_call(true);
                GradedQuestion {
                    question_id: question.id.clone(),
                    score_percent: reply.score_percent.clamp(0.0, 100.0).round() as i64,
                    feedback: reply.feedback,
                    needs_review: false,
                }
            }
            Err(e) => {
                self.metrics.record_grader_call(false);
                tracing::warn!(
                    question_id = %question.id,
                    "external grading failed, degrading to manual review: {}",
                    e
                );
                GradedQuestion {
                    question_id: question.id.clone(),
                    score_percent: 0,
                    feedback: FEEDBACK_DEGRADED.to_string(),
                    needs_review: true,
                }
            }
        }
    }
}

/// Mean of all per-question scores, rounded; the denominator is floored at
/// one so an exam with zero questions cannot divide by zero.
fn aggregate_score(questions: &[GradedQuestion]) -> i64 {
    let total: i64 = questions.iter().map(|q| q.score_percent).sum();
    let denominator = questions.len().max(1) as f64;
    (total as f64 / denominator).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::grader::{GradeReply, GraderError};
    use crate::models::exam::{ExamSettings, QuestionKind};

    fn mc_question(id: &str, key: Option<&str>) -> NormalizedQuestion {
        NormalizedQuestion {
            id: id.to_string(),
            kind: QuestionKind::MultipleChoice,
            prompt: "pick".to_string(),
            choices: Some(vec!["a".to_string(), "b".to_string()]),
            correct_answer: key.map(|k| AnswerKey::Choice(k.to_string())),
            rubric: None,
            points: 1,
        }
    }

    fn tf_question(id: &str, key: bool) -> NormalizedQuestion {
        NormalizedQuestion {
            id: id.to_string(),
            kind: QuestionKind::TrueFalse,
            prompt: "yes?".to_string(),
            choices: None,
            correct_answer: Some(AnswerKey::Bool(key)),
            rubric: None,
            points: 1,
        }
    }

    fn short_question(id: &str) -> NormalizedQuestion {
        NormalizedQuestion {
            id: id.to_string(),
            kind: QuestionKind::ShortAnswer,
            prompt: "explain".to_string(),
            choices: None,
            correct_answer: None,
            rubric: Some("detail".to_string()),
            points: 1,
        }
    }

    fn exam(questions: Vec<NormalizedQuestion>) -> NormalizedExam {
        NormalizedExam {
            title: "t".to_string(),
            subject: "s".to_string(),
            settings: ExamSettings::default(),
            questions,
        }
    }

    /// Grader stub with a fixed behavior.
    struct StubGrader {
        reply: Result<GradeReply, String>,
    }

    #[async_trait]
    impl TextGrader for StubGrader {
        async fn grade_text_answer(
            &self,
            _request: &GradeRequest,
        ) -> Result<GradeReply, GraderError> {
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(msg) => Err(GraderError(msg.clone())),
            }
        }
    }

    /// Grader that must never be reached.
    struct UnreachableGrader;

    #[async_trait]
    impl TextGrader for UnreachableGrader {
        async fn grade_text_answer(
            &self,
            _request: &GradeRequest,
        ) -> Result<GradeReply, GraderError> {
            panic!("external grader must not be called");
        }
    }

    fn pipeline(grader: impl TextGrader + 'static) -> GradingPipeline {
        GradingPipeline::new(Arc::new(grader), Arc::new(Metrics::new()))
    }

    #[test]
    fn objective_grading_is_pure() {
        let question = mc_question("q1", Some("a"));
        let answer = json!("a");

        let first = grade_objective_question(&question, Some(&answer));
        let second = grade_objective_question(&question, Some(&answer));
        assert_eq!(first, second);
        assert_eq!(first.score_percent, 100);
        assert_eq!(first.feedback, "Correct");
    }

    #[test]
    fn multiple_choice_requires_exact_match() {
        let question = mc_question("q1", Some("a"));
        assert_eq!(
            grade_objective_question(&question, Some(&json!("b"))).score_percent,
            0
        );
        assert_eq!(
            grade_objective_question(&question, Some(&json!("A"))).score_percent,
            0
        );
        assert_eq!(grade_objective_question(&question, None).score_percent, 0);
    }

    #[test]
    fn true_false_coerces_strings_and_bools() {
        let question = tf_question("q1", true);
        assert_eq!(
            grade_objective_question(&question, Some(&json!(true))).score_percent,
            100
        );
        assert_eq!(
            grade_objective_question(&question, Some(&json!("true"))).score_percent,
            100
        );
        assert_eq!(
            grade_objective_question(&question, Some(&json!("yes"))).score_percent,
            0
        );
    }

    #[test]
    fn objective_without_key_needs_review() {
        let question = mc_question("q1", None);
        let graded = grade_objective_question(&question, Some(&json!("a")));
        assert!(graded.needs_review);
        assert_eq!(graded.score_percent, 0);
    }

    #[tokio::test]
    async fn two_choice_exam_half_right_scores_fifty() {
        let exam = exam(vec![mc_question("q1", Some("a")), mc_question("q2", Some("a"))]);
        let answers =
            HashMap::from([("q1".to_string(), json!("a")), ("q2".to_string(), json!("b"))]);

        let outcome = pipeline(UnreachableGrader).grade(&exam, &answers).await;
        assert_eq!(outcome.score_percent, 50);
        assert_eq!(outcome.status, AttemptStatus::Graded);
        assert_eq!(outcome.summary.objective_count, 2);
        assert_eq!(outcome.summary.llm_count, 0);
        assert_eq!(outcome.summary.review_count, 0);
    }

    #[tokio::test]
    async fn failing_grader_degrades_to_needs_review() {
        let exam = exam(vec![short_question("q1")]);
        let answers = HashMap::from([("q1".to_string(), json!("my essay"))]);

        let pipeline = pipeline(StubGrader {
            reply: Err("connection refused".to_string()),
        });
        let outcome = pipeline.grade(&exam, &answers).await;

        assert_eq!(outcome.score_percent, 0);
        assert_eq!(outcome.status, AttemptStatus::NeedsReview);
        assert!(outcome.questions[0].needs_review);
        assert_eq!(
            outcome.questions[0].feedback,
            "grading unavailable; marked for manual review"
        );
        assert_eq!(outcome.summary.llm_count, 1);
        assert_eq!(outcome.summary.review_count, 1);
    }

    #[tokio::test]
    async fn empty_subjective_answer_skips_external_call() {
        let exam = exam(vec![short_question("q1"), short_question("q2")]);
        let answers = HashMap::from([("q1".to_string(), json!("   "))]);

        let outcome = pipeline(UnreachableGrader).grade(&exam, &answers).await;
        assert_eq!(outcome.summary.llm_count, 0);
        assert!(outcome.questions.iter().all(|q| q.needs_review));
        assert!(
            outcome
                .questions
                .iter()
                .all(|q| q.feedback == "No answer submitted")
        );
    }

    #[tokio::test]
    async fn external_scores_are_clamped_and_rounded() {
        let exam = exam(vec![short_question("q1")]);
        let answers = HashMap::from([("q1".to_string(), json!("answer"))]);

        let pipeline = pipeline(StubGrader {
            reply: Ok(GradeReply {
                score_percent: 182.4,
                feedback: "generous".to_string(),
            }),
        });
        let outcome = pipeline.grade(&exam, &answers).await;

        assert_eq!(outcome.questions[0].score_percent, 100);
        assert_eq!(outcome.status, AttemptStatus::Graded);
        assert_eq!(outcome.score_percent, 100);
    }
}
