//! Answer validation pipeline.
//!
//! One pass per submission, strictly sequential:
//!   input check -> student evaluation -> teacher review -> persist -> success body.
//!
//! Each stage consumes the previous stage's output type (`ValidationInput` ->
//! `Evaluated` -> `Reviewed`), so a review can't be requested without an evaluation.
//! The first failure aborts the pass; nothing is defaulted.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::config::{GradingSettings, Prompts};
use crate::domain::{Answer, NewAnswer, StudentEvaluation, TeacherReview};
use crate::error::{ApiError, ErrorCode};
use crate::grading::{GradingClient, GradingError};
use crate::openai::ChatBackend;
use crate::prompts::{render_evaluation, render_review};
use crate::store::{Store, StoreError};

/// Validated request: every field present and non-empty.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationInput {
  pub story: String,
  pub question: String,
  pub response: String,
  pub user_email: String,
  pub story_id: String,
}

/// Which request field failed. Checked in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
  #[error("Story field is required and must be a string")]
  Story,
  #[error("Question field is required and must be a string")]
  Question,
  #[error("Response field is required and must be a string")]
  Response,
  #[error("User email is required and must be a string")]
  UserEmail,
  #[error("Story ID is required and must be a string")]
  StoryId,
}

fn required_string(body: &Value, key: &str, err: InputError) -> Result<String, InputError> {
  body
    .get(key)
    .and_then(Value::as_str)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .ok_or(err)
}

impl ValidationInput {
  /// Anything that isn't a JSON object behaves like an empty body.
  pub fn from_body(body: &Value) -> Result<Self, InputError> {
    Ok(Self {
      story: required_string(body, "story", InputError::Story)?,
      question: required_string(body, "question", InputError::Question)?,
      response: required_string(body, "response", InputError::Response)?,
      user_email: required_string(body, "userEmail", InputError::UserEmail)?,
      story_id: required_string(body, "storyId", InputError::StoryId)?,
    })
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GradingStage {
  Evaluation,
  Review,
}

impl fmt::Display for GradingStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GradingStage::Evaluation => f.write_str("student evaluation"),
      GradingStage::Review => f.write_str("teacher review"),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
  #[error(transparent)]
  InvalidInput(#[from] InputError),
  #[error("{stage} failed: {source}")]
  Grading {
    stage: GradingStage,
    #[source]
    source: GradingError,
  },
  #[error("grading succeeded but saving failed: {0}")]
  Database(#[source] StoreError),
}

impl From<&PipelineError> for ApiError {
  fn from(err: &PipelineError) -> Self {
    match err {
      PipelineError::InvalidInput(e) => ApiError::invalid_input(e.to_string()),
      PipelineError::Grading { stage, source } => {
        let (code, message) = match (source, stage) {
          (GradingError::Parse(_), GradingStage::Evaluation) => {
            (ErrorCode::ParseError, "Failed to parse validation response")
          }
          (GradingError::Parse(_), GradingStage::Review) => {
            (ErrorCode::ParseError, "Failed to parse review response")
          }
          (GradingError::Shape(_), GradingStage::Evaluation) => {
            (ErrorCode::InvalidResponseFormat, "Invalid response format from validation")
          }
          (GradingError::Shape(_), GradingStage::Review) => {
            (ErrorCode::InvalidResponseFormat, "Invalid response format from review")
          }
          (GradingError::Upstream(_), GradingStage::Evaluation) => {
            (ErrorCode::OpenaiError, "Failed to validate response")
          }
          (GradingError::Upstream(_), GradingStage::Review) => {
            (ErrorCode::OpenaiError, "Failed to review evaluation")
          }
        };
        ApiError::new(code, message)
      }
      PipelineError::Database(_) => {
        ApiError::new(ErrorCode::DatabaseError, "Failed to save answer to database")
      }
    }
  }
}

impl From<PipelineError> for ApiError {
  fn from(err: PipelineError) -> Self {
    ApiError::from(&err)
  }
}

/// Output of stage 1. Only the pipeline can build one.
#[derive(Debug)]
pub struct Evaluated {
  input: ValidationInput,
  evaluation: StudentEvaluation,
}

impl Evaluated {
  pub fn evaluation(&self) -> &StudentEvaluation {
    &self.evaluation
  }
}

/// Output of stage 2.
#[derive(Debug)]
pub struct Reviewed {
  evaluated: Evaluated,
  review: TeacherReview,
}

impl Reviewed {
  pub fn evaluation(&self) -> &StudentEvaluation {
    &self.evaluated.evaluation
  }

  pub fn review(&self) -> &TeacherReview {
    &self.review
  }
}

/// 200 body of the validation endpoint.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSuccess {
  pub score: f64,
  pub correction: String,
  pub suggested_answer: String,
  pub review_comments: String,
  pub saved_answer: Answer,
}

pub struct ValidationPipeline<'a, C> {
  client: GradingClient<'a, C>,
  prompts: &'a Prompts,
  store: &'a Store,
}

impl<'a, C: ChatBackend> ValidationPipeline<'a, C> {
  pub fn new(backend: &'a C, settings: &'a GradingSettings, prompts: &'a Prompts, store: &'a Store) -> Self {
    Self { client: GradingClient::new(backend, settings), prompts, store }
  }

  /// Full pass from an unchecked request body.
  pub async fn run_body(&self, body: &Value) -> Result<ValidationSuccess, PipelineError> {
    let input = ValidationInput::from_body(body)?;
    self.run(input).await
  }

  #[instrument(level = "info", target = "grading", skip(self, input), fields(story_id = %input.story_id, question_len = input.question.len(), response_len = input.response.len()))]
  pub async fn run(&self, input: ValidationInput) -> Result<ValidationSuccess, PipelineError> {
    let evaluated = self.evaluate(input).await?;
    let reviewed = self.review(evaluated).await?;
    self.persist(reviewed).await
  }

  /// Stage 1: first-pass grade against the rubric.
  pub async fn evaluate(&self, input: ValidationInput) -> Result<Evaluated, PipelineError> {
    let prompt = render_evaluation(&self.prompts.evaluation, &input.story, &input.question, &input.response);
    let evaluation: StudentEvaluation = self
      .client
      .evaluate_as(&prompt)
      .await
      .map_err(|source| PipelineError::Grading { stage: GradingStage::Evaluation, source })?;
    info!(target: "grading", score = evaluation.score, "Student evaluation done");
    Ok(Evaluated { input, evaluation })
  }

  /// Stage 2: re-grade with the first verdict as evidence.
  pub async fn review(&self, evaluated: Evaluated) -> Result<Reviewed, PipelineError> {
    let input = &evaluated.input;
    let prompt = render_review(
      &self.prompts.review,
      &input.story,
      &input.question,
      &input.response,
      &evaluated.evaluation,
    );
    let review: TeacherReview = self
      .client
      .evaluate_as(&prompt)
      .await
      .map_err(|source| PipelineError::Grading { stage: GradingStage::Review, source })?;

    if review.is_score_accurate {
      info!(target: "grading", final_score = review.final_score, "Teacher review confirmed score");
    } else {
      warn!(target: "grading", initial = evaluated.evaluation.score, final_score = review.final_score, "Teacher review changed score");
    }
    Ok(Reviewed { evaluated, review })
  }

  /// Stage 3: store the reconciled grade and build the success body.
  pub async fn persist(&self, reviewed: Reviewed) -> Result<ValidationSuccess, PipelineError> {
    let Reviewed { evaluated: Evaluated { input, evaluation }, review } = reviewed;
    let new = NewAnswer {
      user_email: &input.user_email,
      story_id: &input.story_id,
      question: &input.question,
      response: &input.response,
      score: review.final_score,
      correction: &review.final_correction,
      suggested_answer: &evaluation.suggested_answer,
    };
    let saved_answer = self.store.save_answer(&new).await.map_err(|e| {
      error!(target: "grading", error = %e, "Graded answer could not be saved");
      PipelineError::Database(e)
    })?;

    Ok(ValidationSuccess {
      score: review.final_score,
      correction: review.final_correction,
      suggested_answer: evaluation.suggested_answer,
      review_comments: review.review_comments,
      saved_answer,
    })
  }
}
