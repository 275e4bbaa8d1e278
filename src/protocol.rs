//! Public HTTP request/response structs (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{Answer, Story};
use crate::pipeline::ValidationSuccess;
use crate::quiz::QuizPhase;

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

//
// Generation
//

#[derive(Debug, Deserialize)]
pub struct GenerateQuestionsIn {
    #[serde(default)]
    pub story: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateQuestionsOut {
    pub questions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateStoryIn {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateStoryOut {
    pub story: String,
}

//
// Stories
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStoryIn {
    #[serde(default)]
    pub user_email: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source_text: String,
    #[serde(default)]
    pub article: String,
}

#[derive(Debug, Serialize)]
pub struct StoriesOut {
    pub stories: Vec<Story>,
}

/// `read` stays a string so a bad value gets our own 400, not a rejection.
#[derive(Debug, Deserialize)]
pub struct StoriesQuery {
    pub email: Option<String>,
    pub read: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryAnswersQuery {
    pub story_id: Option<String>,
    pub email: Option<String>,
}

/// Per-question summary returned by the story answers endpoint.
#[derive(Debug, Serialize, PartialEq)]
pub struct StoryAnswer {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub score: f64,
    pub correction: String,
}

impl From<Answer> for StoryAnswer {
    fn from(a: Answer) -> Self {
        Self {
            id: a.id,
            question: a.question,
            answer: a.answer,
            score: a.score,
            correction: a.correction,
        }
    }
}

//
// Answers
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswersQuery {
    pub email: Option<String>,
    pub story_id: Option<String>,
}

/// Shared by both answer listings: full rows or `StoryAnswer` projections.
#[derive(Debug, Serialize)]
pub struct AnswersOut<T> {
    pub answers: Vec<T>,
}

//
// Quiz sessions
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizStartIn {
    #[serde(default)]
    pub user_email: String,
    #[serde(default)]
    pub story_id: String,
    #[serde(default)]
    pub story: String,
}

#[derive(Debug, Deserialize)]
pub struct QuizAnswerIn {
    pub index: usize,
    #[serde(default)]
    pub response: String,
}

/// Snapshot of a quiz session.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizView {
    pub id: String,
    pub story_id: String,
    pub phase: QuizPhase,
    pub questions: Vec<String>,
    pub current_question_index: usize,
    /// None once every question is answered.
    pub current_question: Option<String>,
    pub answered_questions: Vec<usize>,
    pub scores: Vec<Option<f64>>,
    pub responses: Vec<Option<String>>,
    pub corrections: Vec<Option<String>>,
    pub suggested_answers: Vec<Option<String>>,
    pub total_score: f64,
    pub is_completed: bool,
    pub has_more_questions: bool,
}

/// `grade` is null when the answer was not graded (already answered).
#[derive(Debug, Serialize)]
pub struct QuizAnswerOut {
    pub grade: Option<ValidationSuccess>,
    pub quiz: QuizView,
}
