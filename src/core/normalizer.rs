// src/core/normalizer.rs

//! Turns an arbitrary uploaded JSON document into the canonical exam schema.
//!
//! Pure transform: no I/O, no side effects. Question entries are validated
//! independently and errors are collected per index, but any error anywhere
//! gates the whole exam to `normalized = None`.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::models::exam::{
    AnswerKey, ExamSettings, NormalizedExam, NormalizedOutcome, NormalizedQuestion, QuestionKind,
};

static ID_SCRUB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]+").expect("id scrub regex"));

/// Normalizes an uploaded exam payload.
pub fn normalize_exam(payload: &Value) -> NormalizedOutcome {
    let mut errors = Vec::new();
    let warnings = Vec::new();

    let metadata = payload.get("examMetadata").filter(|m| m.is_object());

    let title = resolve_string(metadata, payload, "title");
    let subject = resolve_string(metadata, payload, "subject").unwrap_or_default();

    let raw_questions = payload.get("questions").and_then(Value::as_array);
    let question_count = raw_questions.map(|q| q.len()).unwrap_or(0);

    if title.is_none() || question_count == 0 {
        errors.push("missing title or question set".to_string());
    }

    let settings = resolve_settings(metadata, payload);

    let mut questions = Vec::with_capacity(question_count);
    let mut seen_ids: HashSet<String> = HashSet::new();

    if let Some(raw_questions) = raw_questions {
        for (index, raw) in raw_questions.iter().enumerate() {
            match normalize_question(raw, index + 1, &mut seen_ids) {
                Ok(question) => questions.push(question),
                Err(mut question_errors) => errors.append(&mut question_errors),
            }
        }
    }

    let normalized = if errors.is_empty() {
        Some(NormalizedExam {
            title: title.unwrap_or_default(),
            subject,
            settings,
            questions,
        })
    } else {
        None
    };

    NormalizedOutcome {
        normalized,
        errors,
        warnings,
    }
}

/// Resolves a string field from the `examMetadata` object first, then the
/// payload root. Blank values count as absent.
fn resolve_string(metadata: Option<&Value>, root: &Value, key: &str) -> Option<String> {
    metadata
        .and_then(|m| m.get(key))
        .or_else(|| root.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn resolve_settings(metadata: Option<&Value>, root: &Value) -> ExamSettings {
    let raw = metadata
        .and_then(|m| m.get("settings"))
        .or_else(|| root.get("settings"));

    let defaults = ExamSettings::default();
    let positive = |key: &str, fallback: u32| {
        raw.and_then(|s| s.get(key))
            .and_then(Value::as_i64)
            .filter(|v| *v > 0)
            .map(|v| v as u32)
            .unwrap_or(fallback)
    };

    ExamSettings {
        time_limit_minutes: positive("timeLimitMinutes", defaults.time_limit_minutes),
        passing_score_percent: positive("passingScorePercent", defaults.passing_score_percent),
    }
}

/// Validates one question entry. `index` is 1-based, used both for error
/// messages and the synthesized fallback id.
fn normalize_question(
    raw: &Value,
    index: usize,
    seen_ids: &mut HashSet<String>,
) -> Result<NormalizedQuestion, Vec<String>> {
    let Some(entry) = raw.as_object() else {
        return Err(vec![format!("question {}: malformed question entry", index)]);
    };

    let mut errors = Vec::new();

    let kind = match entry.get("type").and_then(Value::as_str) {
        Some(raw_type) => match QuestionKind::from_alias(raw_type) {
            Some(kind) => Some(kind),
            None => {
                errors.push(format!(
                    "question {}: unsupported question type '{}'",
                    index, raw_type
                ));
                None
            }
        },
        None => {
            errors.push(format!("question {}: missing question type", index));
            None
        }
    };

    let prompt = entry
        .get("prompt")
        .or_else(|| entry.get("questionText"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|p| !p.is_empty());
    if prompt.is_none() {
        errors.push(format!("question {}: missing prompt", index));
    }

    let id = match derive_question_id(entry.get("id"), index, seen_ids) {
        Ok(id) => Some(id),
        Err(e) => {
            errors.push(e);
            None
        }
    };

    let mut choices = None;
    let mut correct_answer = None;
    let mut rubric = None;

    match kind {
        Some(QuestionKind::MultipleChoice) => {
            let raw_choices = entry.get("choices").or_else(|| entry.get("options"));
            match parse_choices(raw_choices) {
                Some(parsed) => {
                    match parse_choice_answer(entry.get("correctAnswer"), &parsed) {
                        Ok(answer) => correct_answer = answer,
                        Err(()) => {
                            errors.push(format!("question {}: malformed answer schema", index))
                        }
                    }
                    choices = Some(parsed);
                }
                None => errors.push(format!("question {}: malformed answer schema", index)),
            }
        }
        Some(QuestionKind::TrueFalse) => {
            correct_answer = parse_bool_answer(entry.get("correctAnswer"));
        }
        Some(QuestionKind::ShortAnswer) | Some(QuestionKind::LongAnswer) => {
            rubric = entry
                .get("rubric")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string);
        }
        None => {}
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    // Both unwraps are guarded by the error check above.
    Ok(NormalizedQuestion {
        id: id.unwrap(),
        kind: kind.unwrap(),
        prompt: prompt.unwrap().to_string(),
        choices,
        correct_answer,
        rubric,
        points: parse_points(entry.get("points")),
    })
}

/// Derives a unique, slug-safe question id.
///
/// The provided id (or `q{index}` when absent) is lower-cased, runs of
/// characters outside `[a-z0-9-]` become a single `-`, and leading/trailing
/// dashes are trimmed. An empty or colliding slug falls back to `q{index}`;
/// if the fallback collides too the question is rejected.
fn derive_question_id(
    raw: Option<&Value>,
    index: usize,
    seen_ids: &mut HashSet<String>,
) -> Result<String, String> {
    let provided = match raw {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => format!("q{}", index),
    };

    let lowered = provided.to_lowercase();
    let slug = ID_SCRUB
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string();

    let id = if slug.is_empty() || seen_ids.contains(&slug) {
        let fallback = format!("q{}", index);
        if seen_ids.contains(&fallback) {
            return Err(format!(
                "question {}: duplicate question id after normalization",
                index
            ));
        }
        fallback
    } else {
        slug
    };

    seen_ids.insert(id.clone());
    Ok(id)
}

/// Multiple-choice `choices` must be a non-empty array of strings.
fn parse_choices(raw: Option<&Value>) -> Option<Vec<String>> {
    let entries = raw?.as_array()?;
    if entries.is_empty() {
        return None;
    }

    let mut choices = Vec::with_capacity(entries.len());
    for entry in entries {
        choices.push(entry.as_str()?.to_string());
    }
    Some(choices)
}

/// A multiple-choice answer key, when present, must be one of the choices.
/// Absence is fine; the question just cannot be auto-graded.
fn parse_choice_answer(
    raw: Option<&Value>,
    choices: &[String],
) -> Result<Option<AnswerKey>, ()> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if choices.iter().any(|c| c == s) => {
            Ok(Some(AnswerKey::Choice(s.clone())))
        }
        Some(_) => Err(()),
    }
}

/// True/false keys coerce from a boolean or the literal strings
/// "true"/"false"; anything else leaves the key undefined.
fn parse_bool_answer(raw: Option<&Value>) -> Option<AnswerKey> {
    match raw {
        Some(Value::Bool(b)) => Some(AnswerKey::Bool(*b)),
        Some(Value::String(s)) => match s.as_str() {
            "true" => Some(AnswerKey::Bool(true)),
            "false" => Some(AnswerKey::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn parse_points(raw: Option<&Value>) -> u32 {
    raw.and_then(Value::as_f64)
        .filter(|p| *p > 0.0)
        .map(|p| p.round() as u32)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_aliases_and_metadata() {
        let payload = json!({
            "examMetadata": { "title": "Midterm", "subject": "History" },
            "settings": { "timeLimitMinutes": 45, "passingScorePercent": 60 },
            "questions": [
                {
                    "id": "Q 1",
                    "type": "mcq",
                    "questionText": "Pick one",
                    "options": ["a", "b"],
                    "correctAnswer": "a"
                },
                { "type": "true_false", "prompt": "Yes?", "correctAnswer": "true" },
                { "type": "short", "prompt": "Explain", "rubric": "Look for detail" }
            ]
        });

        let outcome = normalize_exam(&payload);
        assert!(outcome.errors.is_empty(), "errors: {:?}", outcome.errors);

        let exam = outcome.normalized.expect("normalized exam");
        assert_eq!(exam.title, "Midterm");
        assert_eq!(exam.subject, "History");
        assert_eq!(exam.settings.time_limit_minutes, 45);
        assert_eq!(exam.settings.passing_score_percent, 60);

        assert_eq!(exam.questions[0].id, "q-1");
        assert_eq!(exam.questions[0].kind, QuestionKind::MultipleChoice);
        assert_eq!(exam.questions[0].prompt, "Pick one");
        assert_eq!(
            exam.questions[0].choices.as_deref(),
            Some(&["a".to_string(), "b".to_string()][..])
        );
        assert_eq!(
            exam.questions[0].correct_answer,
            Some(AnswerKey::Choice("a".to_string()))
        );

        assert_eq!(exam.questions[1].kind, QuestionKind::TrueFalse);
        assert_eq!(
            exam.questions[1].correct_answer,
            Some(AnswerKey::Bool(true))
        );
        assert_eq!(exam.questions[1].id, "q2");

        assert_eq!(exam.questions[2].kind, QuestionKind::ShortAnswer);
        assert_eq!(exam.questions[2].rubric.as_deref(), Some("Look for detail"));
    }

    #[test]
    fn question_ids_are_unique_and_non_empty() {
        let payload = json!({
            "title": "Dups",
            "questions": [
                { "id": "same", "type": "short", "prompt": "one" },
                { "id": "SAME!", "type": "short", "prompt": "two" },
                { "id": "###", "type": "short", "prompt": "three" }
            ]
        });

        let exam = normalize_exam(&payload).normalized.expect("normalized");
        let ids: Vec<&str> = exam.questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["same", "q2", "q3"]);
    }

    #[test]
    fn exhausted_id_fallback_is_an_error() {
        // Question 2's slug collides with question 1's explicit "q2", and so
        // does its 1-based fallback.
        let payload = json!({
            "title": "Dups",
            "questions": [
                { "id": "q2", "type": "short", "prompt": "one" },
                { "id": "Q2", "type": "short", "prompt": "two" }
            ]
        });

        let outcome = normalize_exam(&payload);
        assert!(outcome.normalized.is_none());
        assert!(
            outcome
                .errors
                .iter()
                .any(|e| e.contains("question 2") && e.contains("duplicate question id")),
            "errors: {:?}",
            outcome.errors
        );
    }

    #[test]
    fn unsupported_type_gates_whole_exam() {
        let payload = json!({
            "title": "Bad type",
            "questions": [
                { "type": "short", "prompt": "fine" },
                { "type": "matching", "prompt": "nope" }
            ]
        });

        let outcome = normalize_exam(&payload);
        assert!(outcome.normalized.is_none());
        assert!(
            outcome.errors.iter().any(|e| e.contains("question 2")),
            "errors: {:?}",
            outcome.errors
        );
    }

    #[test]
    fn missing_title_or_questions_is_hard_error() {
        let no_title = json!({ "questions": [{ "type": "short", "prompt": "p" }] });
        let outcome = normalize_exam(&no_title);
        assert!(outcome.normalized.is_none());
        assert_eq!(outcome.errors, vec!["missing title or question set"]);

        let no_questions = json!({ "title": "Empty", "questions": [] });
        let outcome = normalize_exam(&no_questions);
        assert!(outcome.normalized.is_none());
        assert_eq!(outcome.errors, vec!["missing title or question set"]);
    }

    #[test]
    fn multiple_choice_without_answer_key_is_accepted() {
        let payload = json!({
            "title": "No key",
            "questions": [
                { "type": "multiple-choice", "prompt": "p", "choices": ["x", "y"] }
            ]
        });

        let exam = normalize_exam(&payload).normalized.expect("normalized");
        assert_eq!(exam.questions[0].correct_answer, None);
    }

    #[test]
    fn malformed_choices_is_an_error() {
        let missing = json!({
            "title": "Bad",
            "questions": [{ "type": "mcq", "prompt": "p" }]
        });
        let outcome = normalize_exam(&missing);
        assert!(outcome.normalized.is_none());
        assert!(
            outcome
                .errors
                .iter()
                .any(|e| e.contains("malformed answer schema"))
        );

        let non_string = json!({
            "title": "Bad",
            "questions": [{ "type": "mcq", "prompt": "p", "choices": ["a", 2] }]
        });
        assert!(normalize_exam(&non_string).normalized.is_none());

        let key_not_in_choices = json!({
            "title": "Bad",
            "questions": [
                { "type": "mcq", "prompt": "p", "choices": ["a", "b"], "correctAnswer": "c" }
            ]
        });
        assert!(normalize_exam(&key_not_in_choices).normalized.is_none());
    }

    #[test]
    fn true_false_coercion_leaves_garbage_undefined() {
        let payload = json!({
            "title": "TF",
            "questions": [
                { "type": "tf", "prompt": "a", "correctAnswer": false },
                { "type": "tf", "prompt": "b", "correctAnswer": "false" },
                { "type": "tf", "prompt": "c", "correctAnswer": "maybe" }
            ]
        });

        let exam = normalize_exam(&payload).normalized.expect("normalized");
        assert_eq!(
            exam.questions[0].correct_answer,
            Some(AnswerKey::Bool(false))
        );
        assert_eq!(
            exam.questions[1].correct_answer,
            Some(AnswerKey::Bool(false))
        );
        assert_eq!(exam.questions[2].correct_answer, None);
    }

    #[test]
    fn settings_default_on_non_positive_values() {
        let payload = json!({
            "title": "Defaults",
            "settings": { "timeLimitMinutes": 0, "passingScorePercent": -5 },
            "questions": [{ "type": "short", "prompt": "p" }]
        });

        let exam = normalize_exam(&payload).normalized.expect("normalized");
        assert_eq!(exam.settings.time_limit_minutes, 30);
        assert_eq!(exam.settings.passing_score_percent, 70);
    }

    #[test]
    fn sibling_questions_still_validated_after_one_fails() {
        let payload = json!({
            "title": "Partial",
            "questions": [
                { "type": "mystery", "prompt": "bad" },
                { "type": "mcq", "prompt": "also bad" }
            ]
        });

        let outcome = normalize_exam(&payload);
        assert!(outcome.normalized.is_none());
        // Both questions report independently.
        assert!(outcome.errors.iter().any(|e| e.starts_with("question 1")));
        assert!(outcome.errors.iter().any(|e| e.starts_with("question 2")));
    }
}
