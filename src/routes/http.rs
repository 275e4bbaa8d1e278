//! HTTP endpoint handlers. These are thin wrappers that forward to the pipeline,
//! the generators, the store and quiz sessions.
//! Each handler is instrumented and logs ids/lengths and basic result info.

use std::sync::Arc;
use axum::{
  body::Bytes,
  extract::{Path, Query, State},
  response::IntoResponse,
  Json,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

use crate::domain::{Answer, Story, StoryCompletion};
use crate::error::ApiError;
use crate::pipeline::{ValidationPipeline, ValidationSuccess};
use crate::protocol::*;
use crate::questions::{generate_questions, generate_story};
use crate::quiz::{GradedAnswer, QuizSession};
use crate::state::AppState;

/// Bodies that aren't JSON are treated like an empty body.
fn body_value(body: &Bytes) -> Value {
  serde_json::from_slice(body).unwrap_or(Value::Null)
}

/// Deserialize a body into a DTO; any failure is a 400 with `message`.
fn read_json<T: DeserializeOwned>(body: &Bytes, message: &'static str) -> Result<T, ApiError> {
  serde_json::from_value(body_value(body)).map_err(|_| ApiError::invalid_input(message))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
  value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required<'a>(value: &'a Option<String>, message: &'static str) -> Result<&'a str, ApiError> {
  non_blank(value).ok_or_else(|| ApiError::invalid_input(message))
}

pub async fn method_not_allowed() -> ApiError {
  ApiError::method_not_allowed()
}

pub async fn route_not_found() -> ApiError {
  ApiError::not_found("Route not found")
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state, body), fields(body_len = body.len()))]
pub async fn http_post_validate_response(
  State(state): State<Arc<AppState>>,
  body: Bytes,
) -> Result<Json<ValidationSuccess>, ApiError> {
  let body = body_value(&body);
  let pipeline = ValidationPipeline::new(&state.openai, &state.config.grading, &state.config.prompts, &state.store);
  match pipeline.run_body(&body).await {
    Ok(success) => {
      info!(target: "grading", score = success.score, answer_id = %success.saved_answer.id, "HTTP validate_response graded");
      Ok(Json(success))
    }
    Err(e) => {
      let api = ApiError::from(&e);
      warn!(target: "grading", code = api.code.as_str(), error = %e, "HTTP validate_response failed");
      Err(api)
    }
  }
}

#[instrument(level = "info", skip(state, body), fields(body_len = body.len()))]
pub async fn http_post_generate_questions(
  State(state): State<Arc<AppState>>,
  body: Bytes,
) -> Result<Json<GenerateQuestionsOut>, ApiError> {
  let body: GenerateQuestionsIn = read_json(&body, "Story field is required and must be a string")?;
  let questions = generate_questions(&state.openai, &state.config.questions, &state.config.prompts, &body.story)
    .await
    .map_err(|e| {
      let api = e.to_api_error("questions");
      warn!(target: "questions", code = api.code.as_str(), error = %e, "HTTP generate_questions failed");
      api
    })?;
  Ok(Json(GenerateQuestionsOut { questions }))
}

#[instrument(level = "info", skip(state, body), fields(body_len = body.len()))]
pub async fn http_post_generate_story(
  State(state): State<Arc<AppState>>,
  body: Bytes,
) -> Result<Json<GenerateStoryOut>, ApiError> {
  let body: GenerateStoryIn = read_json(&body, "Text field is required and must be a string")?;
  let story = generate_story(&state.openai, &state.config.questions, &state.config.prompts, &body.text)
    .await
    .map_err(|e| {
      let api = e.to_api_error("story");
      warn!(target: "questions", code = api.code.as_str(), error = %e, "HTTP generate_story failed");
      api
    })?;
  Ok(Json(GenerateStoryOut { story }))
}

// --- Stories ---

#[instrument(level = "info", skip(state, body), fields(body_len = body.len()))]
pub async fn http_post_story(
  State(state): State<Arc<AppState>>,
  body: Bytes,
) -> Result<Json<Story>, ApiError> {
  let body: CreateStoryIn = read_json(&body, "User email is required and must be a string")?;
  if body.user_email.trim().is_empty() {
    return Err(ApiError::invalid_input("User email is required and must be a string"));
  }
  if body.title.trim().is_empty() {
    return Err(ApiError::invalid_input("Title is required and must be a string"));
  }
  if body.article.trim().is_empty() {
    return Err(ApiError::invalid_input("Article is required and must be a string"));
  }
  let story = state
    .store
    .create_story(&body.user_email, &body.title, &body.source_text, &body.article)
    .await
    .map_err(|e| {
      error!(target: "french_idol", error = %e, "Story could not be created");
      ApiError::from(e)
    })?;
  info!(target: "french_idol", id = %story.id, "HTTP story created");
  Ok(Json(story))
}

#[instrument(level = "info", skip(state, q), fields(read = ?q.read))]
pub async fn http_get_stories(
  State(state): State<Arc<AppState>>,
  Query(q): Query<StoriesQuery>,
) -> Result<Json<StoriesOut>, ApiError> {
  let email = required(&q.email, "Email is required")?;
  let read = match q.read.as_deref() {
    None => false,
    Some("true") => true,
    Some("false") => false,
    Some(_) => return Err(ApiError::invalid_input("Invalid read status value")),
  };
  let stories = state.store.stories_for_user(email, read).await.map_err(|e| {
    error!(target: "french_idol", error = %e, "Stories could not be listed");
    ApiError::from(e)
  })?;
  Ok(Json(StoriesOut { stories }))
}

#[instrument(level = "info", skip(state, body), fields(body_len = body.len()))]
pub async fn http_post_mark_read(
  State(state): State<Arc<AppState>>,
  body: Bytes,
) -> Result<Json<Story>, ApiError> {
  let completion: StoryCompletion = read_json(&body, "Missing required fields")?;
  if completion.user_email.trim().is_empty() || completion.story_id.trim().is_empty() {
    return Err(ApiError::invalid_input("Missing required fields"));
  }
  let story = state.store.mark_story_read(&completion).await.map_err(|e| {
    warn!(target: "french_idol", story_id = %completion.story_id, error = %e, "Story could not be marked read");
    ApiError::from(e)
  })?;
  info!(target: "french_idol", id = %story.id, quiz_score = completion.quiz_score, "HTTP story marked read");
  Ok(Json(story))
}

#[instrument(level = "info", skip(state, q), fields(story_id = ?q.story_id))]
pub async fn http_get_story_answers(
  State(state): State<Arc<AppState>>,
  Query(q): Query<StoryAnswersQuery>,
) -> Result<Json<AnswersOut<StoryAnswer>>, ApiError> {
  let story_id = required(&q.story_id, "Story ID is required")?;
  let email = required(&q.email, "Email is required")?;
  let answers = state.store.answers_for_user_and_story(email, story_id).await.map_err(|e| {
    error!(target: "french_idol", error = %e, "Story answers could not be fetched");
    ApiError::from(e)
  })?;
  if answers.is_empty() {
    return Err(ApiError::not_found("No answers found for this story"));
  }
  Ok(Json(AnswersOut { answers: answers.into_iter().map(StoryAnswer::from).collect() }))
}

#[instrument(level = "info", skip(state, q), fields(story_id = ?q.story_id))]
pub async fn http_get_answers(
  State(state): State<Arc<AppState>>,
  Query(q): Query<AnswersQuery>,
) -> Result<Json<AnswersOut<Answer>>, ApiError> {
  let result = match (non_blank(&q.email), non_blank(&q.story_id)) {
    (Some(email), Some(story_id)) => state.store.answers_for_user_and_story(email, story_id).await,
    (Some(email), None) => state.store.answers_for_user(email).await,
    (None, Some(story_id)) => state.store.answers_for_story(story_id).await,
    (None, None) => return Err(ApiError::invalid_input("Email or story ID is required")),
  };
  let answers = result.map_err(|e| {
    error!(target: "french_idol", error = %e, "Answers could not be fetched");
    ApiError::from(e)
  })?;
  Ok(Json(AnswersOut { answers }))
}

// --- Quiz sessions ---

#[instrument(level = "info", skip(state, body), fields(body_len = body.len()))]
pub async fn http_post_quiz(
  State(state): State<Arc<AppState>>,
  body: Bytes,
) -> Result<Json<QuizView>, ApiError> {
  let body: QuizStartIn = read_json(&body, "Story field is required and must be a string")?;
  if body.user_email.trim().is_empty() {
    return Err(ApiError::invalid_input("User email is required and must be a string"));
  }
  if body.story_id.trim().is_empty() {
    return Err(ApiError::invalid_input("Story ID is required and must be a string"));
  }

  let mut session = QuizSession::new(body.user_email.trim(), body.story_id.trim());
  session
    .set_story(&state.openai, &state.config.questions, &state.config.prompts, &body.story)
    .await
    .map_err(|e| {
      let api = e.to_api_error("questions");
      warn!(target: "quiz", code = api.code.as_str(), error = %e, "Quiz could not be started");
      api
    })?;

  let view = session.view();
  state.insert_session(session).await;
  info!(target: "quiz", id = %view.id, questions = view.questions.len(), "HTTP quiz started");
  Ok(Json(view))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_quiz(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<QuizView>, ApiError> {
  let shared = state.get_session(&id).await.ok_or_else(|| ApiError::not_found("Quiz session not found"))?;
  let session = shared.lock().await;
  Ok(Json(session.view()))
}

/// Grade one quiz answer. An index that was already graded returns the view
/// untouched and makes no model call.
#[instrument(level = "info", skip(state, body), fields(body_len = body.len()))]
pub async fn http_post_quiz_answer(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  body: Bytes,
) -> Result<Json<QuizAnswerOut>, ApiError> {
  let body: QuizAnswerIn = read_json(&body, "Index field is required and must be a non-negative integer")?;
  let shared = state.get_session(&id).await.ok_or_else(|| ApiError::not_found("Quiz session not found"))?;
  let mut session = shared.lock().await;

  let Some(question) = session.state().questions().get(body.index).cloned() else {
    return Err(ApiError::invalid_input("Question index is out of range"));
  };
  if session.state().is_answered(body.index) {
    info!(target: "quiz", id = %id, index = body.index, "Question already answered; not grading again");
    return Ok(Json(QuizAnswerOut { grade: None, quiz: session.view() }));
  }

  let input = json!({
    "story": session.story(),
    "question": question,
    "response": &body.response,
    "userEmail": session.user_email(),
    "storyId": session.story_id(),
  });
  let pipeline = ValidationPipeline::new(&state.openai, &state.config.grading, &state.config.prompts, &state.store);
  let grade = pipeline.run_body(&input).await.map_err(|e| {
    let api = ApiError::from(&e);
    warn!(target: "quiz", code = api.code.as_str(), error = %e, "Quiz answer could not be graded");
    api
  })?;

  let outcome = session
    .mark_answered(
      &state.store,
      GradedAnswer {
        index: body.index,
        grade: grade.score,
        response: body.response,
        correction: grade.correction.clone(),
        suggested_answer: grade.suggested_answer.clone(),
      },
    )
    .await;
  info!(target: "quiz", id = %id, index = body.index, ?outcome, "HTTP quiz answer recorded");
  Ok(Json(QuizAnswerOut { grade: Some(grade), quiz: session.view() }))
}
