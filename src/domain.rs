//! Domain models: stories, graded answers, and the two grading verdicts.

use serde::{Deserialize, Serialize};

/// Highest score a single answer can receive (1.5 accuracy + 1.5 sentence + 2 grammar).
pub const MAX_SCORE: f64 = 5.0;

/// A story owned by a user. Quiz fields stay empty until the quiz is finished.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Story {
  pub id: String,
  pub user_email: String,
  pub source_text: String,
  pub title: String,
  pub article: String,
  pub read: bool,
  pub quiz_score: Option<f64>,
  pub total_questions: Option<u32>,
  pub questions: Option<Vec<String>>,
  pub question_responses: Option<Vec<String>>,
  pub question_corrections: Option<Vec<String>>,
  pub suggested_answers: Option<Vec<String>>,
  pub created_at: String,
  pub updated_at: String,
}

/// One graded response to one question.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
  pub id: String,
  pub user_email: String,
  pub story_id: String,
  pub question: String,
  pub answer: String,
  pub score: f64,
  pub correction: String,
  pub suggested_answer: String,
  pub created_at: String,
  pub updated_at: String,
}

/// Fields needed to persist a graded answer.
#[derive(Clone, Debug)]
pub struct NewAnswer<'a> {
  pub user_email: &'a str,
  pub story_id: &'a str,
  pub question: &'a str,
  pub response: &'a str,
  pub score: f64,
  pub correction: &'a str,
  pub suggested_answer: &'a str,
}

/// First-pass grading verdict.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentEvaluation {
  pub score: f64,
  pub correction: String,
  pub suggested_answer: String,
}

/// Second-pass verdict: confirms or overrides the student evaluation.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeacherReview {
  pub is_score_accurate: bool,
  pub final_score: f64,
  pub final_correction: String,
  pub review_comments: String,
}

/// Aggregate written to the story when its quiz is finished (mark-story-read).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryCompletion {
  #[serde(alias = "userId", alias = "email")]
  pub user_email: String,
  pub story_id: String,
  pub quiz_score: f64,
  pub total_questions: u32,
  #[serde(default)]
  pub questions: Vec<String>,
  #[serde(default)]
  pub question_responses: Vec<String>,
  #[serde(default)]
  pub question_corrections: Vec<String>,
  #[serde(default)]
  pub suggested_answers: Option<Vec<String>>,
}

impl StoryCompletion {
  /// `0 <= quiz_score <= total_questions * 5`.
  pub fn score_in_range(&self) -> bool {
    self.quiz_score.is_finite()
      && self.quiz_score >= 0.0
      && self.quiz_score <= f64::from(self.total_questions) * MAX_SCORE
  }
}
