//! Question and story generation through the same chat backend as grading.

use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::config::{Prompts, QuestionSettings};
use crate::error::{ApiError, ErrorCode};
use crate::openai::{ChatBackend, ChatCall};

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
  #[error("{0}")]
  InvalidInput(&'static str),
  #[error("model returned nothing usable")]
  Empty,
  #[error("reply could not be parsed: {0}")]
  Parse(String),
  #[error("generation call failed: {0}")]
  Upstream(String),
}

impl GenerationError {
  /// `subject` is what was being generated ("questions", "story").
  pub fn to_api_error(&self, subject: &str) -> ApiError {
    match self {
      GenerationError::InvalidInput(msg) => ApiError::invalid_input(*msg),
      GenerationError::Empty => {
        ApiError::new(ErrorCode::GenerationFailed, format!("Failed to generate {subject}"))
      }
      GenerationError::Parse(_) => {
        ApiError::new(ErrorCode::ParseError, format!("Failed to parse generated {subject}"))
      }
      GenerationError::Upstream(_) => {
        ApiError::new(ErrorCode::OpenaiError, format!("Failed to generate {subject}"))
      }
    }
  }
}

/// Pull `questions: [string]` out of a reply, drop blanks, cap at `max`.
pub fn parse_questions(text: &str, max: usize) -> Result<Vec<String>, GenerationError> {
  let reply: Value =
    serde_json::from_str(text.trim()).map_err(|e| GenerationError::Parse(e.to_string()))?;
  let items = reply
    .get("questions")
    .and_then(Value::as_array)
    .ok_or_else(|| GenerationError::Parse("`questions` is not an array".into()))?;

  let mut questions = Vec::with_capacity(items.len());
  for item in items {
    let q = item
      .as_str()
      .ok_or_else(|| GenerationError::Parse("`questions` must contain only strings".into()))?;
    let q = q.trim();
    if !q.is_empty() {
      questions.push(q.to_string());
    }
  }

  if questions.is_empty() {
    return Err(GenerationError::Empty);
  }
  let max = max.max(1);
  if questions.len() > max {
    warn!(target: "questions", got = questions.len(), max, "Truncating generated questions");
    questions.truncate(max);
  }
  Ok(questions)
}

/// Between 1 and `settings.max_questions` French questions about `story`.
#[instrument(level = "info", target = "questions", skip_all, fields(model = %settings.model, story_len = story.len()))]
pub async fn generate_questions<C: ChatBackend>(
  backend: &C,
  settings: &QuestionSettings,
  prompts: &Prompts,
  story: &str,
) -> Result<Vec<String>, GenerationError> {
  if story.trim().is_empty() {
    return Err(GenerationError::InvalidInput("Story field is required and must be a string"));
  }

  let call = ChatCall {
    model: &settings.model,
    system: &prompts.question_generation,
    user: Some(story),
    temperature: settings.temperature,
    max_tokens: Some(settings.max_tokens),
    json_object: true,
  };
  let text = backend.chat(&call).await.map_err(|e| {
    error!(target: "questions", error = %e, "Question generation call failed");
    GenerationError::Upstream(e)
  })?;
  if text.trim().is_empty() {
    return Err(GenerationError::Empty);
  }

  let questions = parse_questions(&text, settings.max_questions)?;
  info!(target: "questions", count = questions.len(), "Questions generated");
  Ok(questions)
}

/// Free-text story built from the user's source text.
#[instrument(level = "info", target = "questions", skip_all, fields(model = %settings.model, text_len = text.len()))]
pub async fn generate_story<C: ChatBackend>(
  backend: &C,
  settings: &QuestionSettings,
  prompts: &Prompts,
  text: &str,
) -> Result<String, GenerationError> {
  if text.trim().is_empty() {
    return Err(GenerationError::InvalidInput("Text field is required and must be a string"));
  }

  let call = ChatCall {
    model: &settings.model,
    system: &prompts.story_generation,
    user: Some(text),
    temperature: settings.temperature,
    max_tokens: Some(settings.max_tokens),
    json_object: false,
  };
  let story = backend.chat(&call).await.map_err(|e| {
    error!(target: "questions", error = %e, "Story generation call failed");
    GenerationError::Upstream(e)
  })?;
  let story = story.trim();
  if story.is_empty() {
    return Err(GenerationError::Empty);
  }
  Ok(story.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::openai::testing::ScriptedBackend;

  #[test]
  fn parses_and_caps_questions() {
    let text = r#"{"questions": ["Q1?", " ", "Q2?", "Q3?", "Q4?", "Q5?", "Q6?"]}"#;
    let qs = parse_questions(text, 5).unwrap();
    assert_eq!(qs, vec!["Q1?", "Q2?", "Q3?", "Q4?", "Q5?"]);
  }

  #[test]
  fn rejects_bad_shapes() {
    assert!(matches!(parse_questions("pas du json", 5), Err(GenerationError::Parse(_))));
    assert!(matches!(parse_questions(r#"{"questions": "Q1?"}"#, 5), Err(GenerationError::Parse(_))));
    assert!(matches!(parse_questions(r#"{"questions": ["Q1?", 2]}"#, 5), Err(GenerationError::Parse(_))));
    assert!(matches!(parse_questions(r#"{"questions": []}"#, 5), Err(GenerationError::Empty)));
  }

  #[test]
  fn api_error_codes() {
    assert_eq!(GenerationError::Empty.to_api_error("questions").code, ErrorCode::GenerationFailed);
    assert_eq!(GenerationError::Parse("x".into()).to_api_error("questions").code, ErrorCode::ParseError);
    assert_eq!(GenerationError::Upstream("x".into()).to_api_error("story").code, ErrorCode::OpenaiError);
    let e = GenerationError::InvalidInput("Story field is required and must be a string").to_api_error("questions");
    assert_eq!(e.code, ErrorCode::InvalidInput);
    assert_eq!(e.message, "Story field is required and must be a string");
  }

  #[tokio::test]
  async fn sends_story_as_user_turn() {
    let backend = ScriptedBackend::new([Ok(r#"{"questions": ["Que font les chats?"]}"#)]);
    let settings = QuestionSettings::default();
    let prompts = Prompts::default();
    let qs = generate_questions(&backend, &settings, &prompts, "Les chats dorment beaucoup.").await.unwrap();
    assert_eq!(qs, vec!["Que font les chats?"]);

    let calls = backend.calls();
    assert_eq!(calls[0].user.as_deref(), Some("Les chats dorment beaucoup."));
    assert!(calls[0].system.contains("generate 3-5 questions"));
    assert_eq!(calls[0].model, "gpt-4o");
  }

  #[tokio::test]
  async fn blank_story_makes_no_call() {
    let backend = ScriptedBackend::new(Vec::<Result<&str, &str>>::new());
    let err = generate_questions(&backend, &QuestionSettings::default(), &Prompts::default(), "  ")
      .await
      .unwrap_err();
    assert!(matches!(err, GenerationError::InvalidInput(_)));
    assert_eq!(backend.call_count(), 0);
  }

  #[tokio::test]
  async fn story_generation_paths() {
    let settings = QuestionSettings::default();
    let prompts = Prompts::default();

    let backend = ScriptedBackend::new([Ok("  Il était une fois un chat.  ")]);
    let story = generate_story(&backend, &settings, &prompts, "un chat").await.unwrap();
    assert_eq!(story, "Il était une fois un chat.");

    let backend = ScriptedBackend::new([Ok("")]);
    let err = generate_story(&backend, &settings, &prompts, "un chat").await.unwrap_err();
    assert!(matches!(err, GenerationError::Empty));

    let backend = ScriptedBackend::new([Err("timeout")]);
    let err = generate_story(&backend, &settings, &prompts, "un chat").await.unwrap_err();
    assert!(matches!(err, GenerationError::Upstream(_)));
  }
}
