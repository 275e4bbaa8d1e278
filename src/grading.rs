//! Grading client: sends a rendered prompt to the model and turns the reply into a
//! typed verdict.
//!
//! Failure classes (never retried, never defaulted to a score):
//!   - transport / endpoint / empty reply  -> `GradingError::Upstream`
//!   - reply is not JSON                   -> `GradingError::Parse`
//!   - JSON with wrong shape or range      -> `GradingError::Shape`

use serde_json::{Map, Value};
use tracing::{debug, error, instrument};

use crate::config::GradingSettings;
use crate::domain::{StudentEvaluation, TeacherReview, MAX_SCORE};
use crate::openai::{ChatBackend, ChatCall};
use crate::util::trunc_for_log;

#[derive(Debug, thiserror::Error)]
pub enum GradingError {
  #[error("grading service call failed: {0}")]
  Upstream(String),
  #[error("grading reply is not valid JSON: {0}")]
  Parse(String),
  #[error("grading reply has an unexpected shape: {0}")]
  Shape(#[from] ShapeError),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ShapeError {
  #[error("reply is not a JSON object")]
  NotAnObject,
  #[error("missing field `{0}`")]
  MissingField(&'static str),
  #[error("field `{field}` must be a {expected}")]
  WrongType { field: &'static str, expected: &'static str },
  #[error("field `{0}` must not be empty")]
  EmptyField(&'static str),
  #[error("field `{field}` = {value} is outside [0, 5]")]
  ScoreOutOfRange { field: &'static str, value: f64 },
}

/// A verdict that can be read out of a parsed model reply.
pub trait FromReply: Sized {
  fn from_reply(reply: &Value) -> Result<Self, ShapeError>;
}

impl FromReply for StudentEvaluation {
  fn from_reply(reply: &Value) -> Result<Self, ShapeError> {
    let obj = as_object(reply)?;
    Ok(Self {
      score: score_field(obj, "score")?,
      correction: non_empty_str_field(obj, "correction")?,
      suggested_answer: non_empty_str_field(obj, "suggestedAnswer")?,
    })
  }
}

impl FromReply for TeacherReview {
  fn from_reply(reply: &Value) -> Result<Self, ShapeError> {
    let obj = as_object(reply)?;
    Ok(Self {
      is_score_accurate: bool_field(obj, "isScoreAccurate")?,
      final_score: score_field(obj, "finalScore")?,
      final_correction: non_empty_str_field(obj, "finalCorrection")?,
      review_comments: str_field(obj, "reviewComments")?,
    })
  }
}

fn as_object(v: &Value) -> Result<&Map<String, Value>, ShapeError> {
  v.as_object().ok_or(ShapeError::NotAnObject)
}

fn field<'a>(obj: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, ShapeError> {
  match obj.get(name) {
    None | Some(Value::Null) => Err(ShapeError::MissingField(name)),
    Some(v) => Ok(v),
  }
}

fn score_field(obj: &Map<String, Value>, name: &'static str) -> Result<f64, ShapeError> {
  let value = field(obj, name)?
    .as_f64()
    .ok_or(ShapeError::WrongType { field: name, expected: "number" })?;
  if !(0.0..=MAX_SCORE).contains(&value) {
    return Err(ShapeError::ScoreOutOfRange { field: name, value });
  }
  Ok(value)
}

fn str_field(obj: &Map<String, Value>, name: &'static str) -> Result<String, ShapeError> {
  field(obj, name)?
    .as_str()
    .map(str::to_string)
    .ok_or(ShapeError::WrongType { field: name, expected: "string" })
}

fn non_empty_str_field(obj: &Map<String, Value>, name: &'static str) -> Result<String, ShapeError> {
  let s = str_field(obj, name)?;
  if s.trim().is_empty() {
    return Err(ShapeError::EmptyField(name));
  }
  Ok(s)
}

fn bool_field(obj: &Map<String, Value>, name: &'static str) -> Result<bool, ShapeError> {
  field(obj, name)?
    .as_bool()
    .ok_or(ShapeError::WrongType { field: name, expected: "boolean" })
}

/// Parse a reply into JSON. Whitespace around the object is tolerated; nothing else is repaired.
pub fn parse_reply(text: &str) -> Result<Value, GradingError> {
  serde_json::from_str::<Value>(text.trim()).map_err(|e| GradingError::Parse(e.to_string()))
}

/// Wraps a chat backend with the grading call settings.
pub struct GradingClient<'a, C> {
  backend: &'a C,
  settings: &'a GradingSettings,
}

impl<'a, C: ChatBackend> GradingClient<'a, C> {
  pub fn new(backend: &'a C, settings: &'a GradingSettings) -> Self {
    Self { backend, settings }
  }

  /// Send `prompt` as the single system instruction and parse the reply as JSON.
  #[instrument(level = "info", target = "grading", skip(self, prompt), fields(model = %self.settings.model, prompt_len = prompt.len()))]
  pub async fn evaluate(&self, prompt: &str) -> Result<Value, GradingError> {
    let call = ChatCall {
      model: &self.settings.model,
      system: prompt,
      user: None,
      temperature: self.settings.temperature,
      max_tokens: Some(self.settings.max_tokens),
      json_object: true,
    };

    let text = self.backend.chat(&call).await.map_err(|e| {
      error!(target: "grading", error = %e, "Grading call failed");
      GradingError::Upstream(e)
    })?;

    if text.trim().is_empty() {
      error!(target: "grading", "Grading call returned no content");
      return Err(GradingError::Upstream("empty reply".into()));
    }

    debug!(target: "grading", reply = %trunc_for_log(&text, 120), "Grading reply received");
    parse_reply(&text)
  }

  /// `evaluate` followed by the strict shape check for `T`.
  pub async fn evaluate_as<T: FromReply>(&self, prompt: &str) -> Result<T, GradingError> {
    let reply = self.evaluate(prompt).await?;
    T::from_reply(&reply).map_err(|e| {
      error!(target: "grading", error = %e, "Grading reply rejected");
      GradingError::Shape(e)
    })
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::openai::testing::ScriptedBackend;

  #[test]
  fn student_evaluation_accepts_fractional_scores() {
    let v = json!({"score": 4.5, "correction": "Très bien.", "suggestedAnswer": "Les chats dorment."});
    let e = StudentEvaluation::from_reply(&v).unwrap();
    assert_eq!(e.score, 4.5);
    assert_eq!(e.suggested_answer, "Les chats dorment.");
  }

  #[test]
  fn out_of_range_scores_are_rejected_not_clamped() {
    let v = json!({"score": 7, "correction": "c", "suggestedAnswer": "s"});
    assert_eq!(
      StudentEvaluation::from_reply(&v).unwrap_err(),
      ShapeError::ScoreOutOfRange { field: "score", value: 7.0 }
    );
    let v = json!({"score": -0.5, "correction": "c", "suggestedAnswer": "s"});
    assert!(matches!(StudentEvaluation::from_reply(&v), Err(ShapeError::ScoreOutOfRange { .. })));
  }

  #[test]
  fn score_must_be_a_json_number() {
    let v = json!({"score": "4", "correction": "c", "suggestedAnswer": "s"});
    assert_eq!(
      StudentEvaluation::from_reply(&v).unwrap_err(),
      ShapeError::WrongType { field: "score", expected: "number" }
    );
  }

  #[test]
  fn missing_and_empty_fields() {
    let v = json!({"score": 3, "suggestedAnswer": "s"});
    assert_eq!(StudentEvaluation::from_reply(&v).unwrap_err(), ShapeError::MissingField("correction"));
    let v = json!({"score": 3, "correction": "c", "suggestedAnswer": "  "});
    assert_eq!(StudentEvaluation::from_reply(&v).unwrap_err(), ShapeError::EmptyField("suggestedAnswer"));
    assert_eq!(StudentEvaluation::from_reply(&json!([1, 2])).unwrap_err(), ShapeError::NotAnObject);
  }

  #[test]
  fn teacher_review_shape() {
    let v = json!({
      "isScoreAccurate": false,
      "finalScore": 4,
      "finalCorrection": "Il manque seulement le point final.",
      "reviewComments": ""
    });
    let r = TeacherReview::from_reply(&v).unwrap();
    assert!(!r.is_score_accurate);
    assert_eq!(r.final_score, 4.0);
    assert_eq!(r.review_comments, "");

    let v = json!({"isScoreAccurate": "yes", "finalScore": 4, "finalCorrection": "c", "reviewComments": "r"});
    assert_eq!(
      TeacherReview::from_reply(&v).unwrap_err(),
      ShapeError::WrongType { field: "isScoreAccurate", expected: "boolean" }
    );
    let v = json!({"isScoreAccurate": true, "finalScore": 5.5, "finalCorrection": "c", "reviewComments": "r"});
    assert!(matches!(TeacherReview::from_reply(&v), Err(ShapeError::ScoreOutOfRange { field: "finalScore", .. })));
  }

  #[tokio::test]
  async fn evaluate_sends_single_system_prompt_with_settings() {
    let backend = ScriptedBackend::new([Ok(r#"{"score": 3, "correction": "c", "suggestedAnswer": "s"}"#)]);
    let settings = GradingSettings::default();
    let client = GradingClient::new(&backend, &settings);
    let e: StudentEvaluation = client.evaluate_as("PROMPT").await.unwrap();
    assert_eq!(e.score, 3.0);

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].system, "PROMPT");
    assert_eq!(calls[0].user, None);
    assert_eq!(calls[0].model, "gpt-4o-mini");
    assert_eq!(calls[0].max_tokens, Some(250));
    assert!((calls[0].temperature - 0.3).abs() < f32::EPSILON);
  }

  #[tokio::test]
  async fn failure_classes() {
    let settings = GradingSettings::default();

    let backend = ScriptedBackend::new([Ok("not json")]);
    let err = GradingClient::new(&backend, &settings).evaluate("p").await.unwrap_err();
    assert!(matches!(err, GradingError::Parse(_)));

    let backend = ScriptedBackend::new([Err("OpenAI HTTP 500: boom")]);
    let err = GradingClient::new(&backend, &settings).evaluate("p").await.unwrap_err();
    assert!(matches!(err, GradingError::Upstream(ref m) if m.contains("boom")));

    let backend = ScriptedBackend::new([Ok("   ")]);
    let err = GradingClient::new(&backend, &settings).evaluate("p").await.unwrap_err();
    assert!(matches!(err, GradingError::Upstream(_)));

    let backend = ScriptedBackend::new([Ok(r#"{"score": 9, "correction": "c", "suggestedAnswer": "s"}"#)]);
    let err = GradingClient::new(&backend, &settings)
      .evaluate_as::<StudentEvaluation>("p")
      .await
      .unwrap_err();
    assert!(matches!(err, GradingError::Shape(ShapeError::ScoreOutOfRange { .. })));
  }
}
