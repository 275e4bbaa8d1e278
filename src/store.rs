//! SQLite-backed persistence for stories and graded answers.
//!
//! `Store` is built once at bootstrap and handed to whoever needs it; every
//! operation checks a connection out of the pool for its own duration.
//! Answers are insert-only (no upsert by question). Listings are newest first.

use std::time::Duration;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{Answer, NewAnswer, Story, StoryCompletion, MAX_SCORE};
use crate::error::{ApiError, ErrorCode};
use crate::util::{normalize_email, now_rfc3339};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
  #[error("Story not found with id: {story_id} for user: {user_email}")]
  StoryNotFound { story_id: String, user_email: String },
  #[error("quiz score {quiz_score} is outside [0, {max}]")]
  InvalidCompletion { quiz_score: f64, max: f64 },
  #[error("failed to encode story field: {0}")]
  Encode(#[from] serde_json::Error),
}

impl From<StoreError> for ApiError {
  fn from(err: StoreError) -> Self {
    match err {
      StoreError::StoryNotFound { .. } => ApiError::not_found(err.to_string()),
      StoreError::InvalidCompletion { .. } => ApiError::invalid_input(err.to_string()),
      StoreError::Database(_) | StoreError::Encode(_) => {
        ApiError::new(ErrorCode::DatabaseError, "Database operation failed")
      }
    }
  }
}

const SCHEMA: &[&str] = &[
  "CREATE TABLE IF NOT EXISTS story (
     id TEXT PRIMARY KEY,
     user_email TEXT NOT NULL,
     source_text TEXT NOT NULL,
     title TEXT NOT NULL,
     article TEXT NOT NULL,
     is_read INTEGER NOT NULL DEFAULT 0,
     quiz_score REAL,
     total_questions INTEGER,
     questions TEXT,
     question_responses TEXT,
     question_corrections TEXT,
     suggested_answers TEXT,
     created_at TEXT NOT NULL,
     updated_at TEXT NOT NULL
   )",
  "CREATE INDEX IF NOT EXISTS story_user_read ON story (user_email, is_read)",
  "CREATE TABLE IF NOT EXISTS answer (
     id TEXT PRIMARY KEY,
     user_email TEXT NOT NULL,
     story_id TEXT NOT NULL,
     question TEXT NOT NULL,
     answer TEXT NOT NULL,
     score REAL NOT NULL,
     correction TEXT NOT NULL,
     suggested_answer TEXT NOT NULL,
     created_at TEXT NOT NULL,
     updated_at TEXT NOT NULL
   )",
  "CREATE INDEX IF NOT EXISTS answer_user_story ON answer (user_email, story_id)",
  "CREATE INDEX IF NOT EXISTS answer_story ON answer (story_id)",
];

const ANSWER_COLUMNS: &str =
  "id, user_email, story_id, question, answer, score, correction, suggested_answer, created_at, updated_at";

const STORY_COLUMNS: &str = "id, user_email, source_text, title, article, is_read, quiz_score, total_questions, \
   questions, question_responses, question_corrections, suggested_answers, created_at, updated_at";

#[derive(FromRow)]
struct StoryRow {
  id: String,
  user_email: String,
  source_text: String,
  title: String,
  article: String,
  is_read: bool,
  quiz_score: Option<f64>,
  total_questions: Option<i64>,
  questions: Option<String>,
  question_responses: Option<String>,
  question_corrections: Option<String>,
  suggested_answers: Option<String>,
  created_at: String,
  updated_at: String,
}

impl StoryRow {
  fn into_story(self) -> Result<Story, StoreError> {
    Ok(Story {
      id: self.id,
      user_email: self.user_email,
      source_text: self.source_text,
      title: self.title,
      article: self.article,
      read: self.is_read,
      quiz_score: self.quiz_score,
      total_questions: self.total_questions.and_then(|n| u32::try_from(n).ok()),
      questions: decode_list(self.questions)?,
      question_responses: decode_list(self.question_responses)?,
      question_corrections: decode_list(self.question_corrections)?,
      suggested_answers: decode_list(self.suggested_answers)?,
      created_at: self.created_at,
      updated_at: self.updated_at,
    })
  }
}

fn decode_list(raw: Option<String>) -> Result<Option<Vec<String>>, StoreError> {
  raw.map(|s| serde_json::from_str::<Vec<String>>(&s)).transpose().map_err(StoreError::from)
}

#[derive(Clone)]
pub struct Store {
  pool: SqlitePool,
}

impl Store {
  /// Connect and make sure the schema exists.
  #[instrument(level = "info", skip(url))]
  pub async fn open(url: &str, max_connections: u32) -> Result<Self, StoreError> {
    let pool = SqlitePoolOptions::new()
      .max_connections(max_connections.max(1))
      .acquire_timeout(Duration::from_secs(10))
      .connect(url)
      .await?;
    let store = Self { pool };
    store.migrate().await?;
    info!(target: "french_idol", max_connections, "Store opened");
    Ok(store)
  }

  #[cfg(test)]
  /// Private in-memory database. A single pinned connection, since every
  /// SQLite `:memory:` connection is its own database.
  pub async fn open_in_memory() -> Result<Self, StoreError> {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect("sqlite::memory:")
      .await?;
    let store = Self { pool };
    store.migrate().await?;
    Ok(store)
  }

  pub async fn close(&self) {
    self.pool.close().await;
    info!(target: "french_idol", "Store closed");
  }

  async fn migrate(&self) -> Result<(), StoreError> {
    let mut conn = self.pool.acquire().await?;
    for stmt in SCHEMA {
      sqlx::query(stmt).execute(&mut *conn).await?;
    }
    Ok(())
  }

  // --- Answers ---

  /// Always inserts a new row; created/updated are both "now".
  #[instrument(level = "info", skip(self, new), fields(story_id = %new.story_id, score = new.score))]
  pub async fn save_answer(&self, new: &NewAnswer<'_>) -> Result<Answer, StoreError> {
    let now = now_rfc3339();
    let answer = Answer {
      id: Uuid::new_v4().to_string(),
      user_email: normalize_email(new.user_email),
      story_id: new.story_id.to_string(),
      question: new.question.to_string(),
      answer: new.response.to_string(),
      score: new.score,
      correction: new.correction.to_string(),
      suggested_answer: new.suggested_answer.to_string(),
      created_at: now.clone(),
      updated_at: now,
    };

    let mut conn = self.pool.acquire().await?;
    sqlx::query(
      "INSERT INTO answer (id, user_email, story_id, question, answer, score, correction, suggested_answer, created_at, updated_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&answer.id)
    .bind(&answer.user_email)
    .bind(&answer.story_id)
    .bind(&answer.question)
    .bind(&answer.answer)
    .bind(answer.score)
    .bind(&answer.correction)
    .bind(&answer.suggested_answer)
    .bind(&answer.created_at)
    .bind(&answer.updated_at)
    .execute(&mut *conn)
    .await?;

    debug!(target: "french_idol", id = %answer.id, "Answer saved");
    Ok(answer)
  }

  #[instrument(level = "debug", skip(self))]
  pub async fn answers_for_user(&self, user_email: &str) -> Result<Vec<Answer>, StoreError> {
    let mut conn = self.pool.acquire().await?;
    let sql = format!("SELECT {ANSWER_COLUMNS} FROM answer WHERE user_email = ? ORDER BY rowid DESC");
    let rows = sqlx::query_as::<_, Answer>(&sql)
      .bind(normalize_email(user_email))
      .fetch_all(&mut *conn)
      .await?;
    Ok(rows)
  }

  #[instrument(level = "debug", skip(self))]
  pub async fn answers_for_story(&self, story_id: &str) -> Result<Vec<Answer>, StoreError> {
    let mut conn = self.pool.acquire().await?;
    let sql = format!("SELECT {ANSWER_COLUMNS} FROM answer WHERE story_id = ? ORDER BY rowid DESC");
    let rows = sqlx::query_as::<_, Answer>(&sql)
      .bind(story_id)
      .fetch_all(&mut *conn)
      .await?;
    Ok(rows)
  }

  #[instrument(level = "debug", skip(self))]
  pub async fn answers_for_user_and_story(
    &self,
    user_email: &str,
    story_id: &str,
  ) -> Result<Vec<Answer>, StoreError> {
    let mut conn = self.pool.acquire().await?;
    let sql = format!(
      "SELECT {ANSWER_COLUMNS} FROM answer WHERE user_email = ? AND story_id = ? ORDER BY rowid DESC"
    );
    let rows = sqlx::query_as::<_, Answer>(&sql)
      .bind(normalize_email(user_email))
      .bind(story_id)
      .fetch_all(&mut *conn)
      .await?;
    Ok(rows)
  }

  // --- Stories ---

  /// New stories start unread with empty quiz fields.
  #[instrument(level = "info", skip(self, source_text, article), fields(title_len = title.len()))]
  pub async fn create_story(
    &self,
    user_email: &str,
    title: &str,
    source_text: &str,
    article: &str,
  ) -> Result<Story, StoreError> {
    let now = now_rfc3339();
    let story = Story {
      id: Uuid::new_v4().to_string(),
      user_email: normalize_email(user_email),
      source_text: source_text.to_string(),
      title: title.trim().to_string(),
      article: article.to_string(),
      read: false,
      quiz_score: None,
      total_questions: None,
      questions: None,
      question_responses: None,
      question_corrections: None,
      suggested_answers: None,
      created_at: now.clone(),
      updated_at: now,
    };

    let mut conn = self.pool.acquire().await?;
    sqlx::query(
      "INSERT INTO story (id, user_email, source_text, title, article, is_read, created_at, updated_at)
       VALUES (?, ?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(&story.id)
    .bind(&story.user_email)
    .bind(&story.source_text)
    .bind(&story.title)
    .bind(&story.article)
    .bind(&story.created_at)
    .bind(&story.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(story)
  }

  #[instrument(level = "debug", skip(self))]
  pub async fn get_story(&self, id: &str) -> Result<Option<Story>, StoreError> {
    let mut conn = self.pool.acquire().await?;
    let sql = format!("SELECT {STORY_COLUMNS} FROM story WHERE id = ?");
    let row = sqlx::query_as::<_, StoryRow>(&sql)
      .bind(id)
      .fetch_optional(&mut *conn)
      .await?;
    row.map(StoryRow::into_story).transpose()
  }

  #[instrument(level = "debug", skip(self))]
  pub async fn stories_for_user(&self, user_email: &str, read: bool) -> Result<Vec<Story>, StoreError> {
    let mut conn = self.pool.acquire().await?;
    let sql = format!(
      "SELECT {STORY_COLUMNS} FROM story WHERE user_email = ? AND is_read = ? ORDER BY rowid DESC"
    );
    let rows = sqlx::query_as::<_, StoryRow>(&sql)
      .bind(normalize_email(user_email))
      .bind(read)
      .fetch_all(&mut *conn)
      .await?;
    rows.into_iter().map(StoryRow::into_story).collect()
  }

  /// Marks the story read and stores the quiz aggregate. Last writer wins.
  #[instrument(level = "info", skip(self, completion), fields(story_id = %completion.story_id, quiz_score = completion.quiz_score, total = completion.total_questions))]
  pub async fn mark_story_read(&self, completion: &StoryCompletion) -> Result<Story, StoreError> {
    if !completion.score_in_range() {
      return Err(StoreError::InvalidCompletion {
        quiz_score: completion.quiz_score,
        max: f64::from(completion.total_questions) * MAX_SCORE,
      });
    }

    let user_email = normalize_email(&completion.user_email);
    let questions = serde_json::to_string(&completion.questions)?;
    let responses = serde_json::to_string(&completion.question_responses)?;
    let corrections = serde_json::to_string(&completion.question_corrections)?;
    let suggested = completion
      .suggested_answers
      .as_ref()
      .map(serde_json::to_string)
      .transpose()?;

    let mut conn = self.pool.acquire().await?;
    let result = sqlx::query(
      "UPDATE story SET is_read = 1, quiz_score = ?, total_questions = ?, questions = ?,
         question_responses = ?, question_corrections = ?,
         suggested_answers = COALESCE(?, suggested_answers), updated_at = ?
       WHERE id = ? AND user_email = ?",
    )
    .bind(completion.quiz_score)
    .bind(i64::from(completion.total_questions))
    .bind(questions)
    .bind(responses)
    .bind(corrections)
    .bind(suggested)
    .bind(now_rfc3339())
    .bind(&completion.story_id)
    .bind(&user_email)
    .execute(&mut *conn)
    .await?;
    drop(conn);

    if result.rows_affected() == 0 {
      return Err(StoreError::StoryNotFound {
        story_id: completion.story_id.clone(),
        user_email,
      });
    }

    self.get_story(&completion.story_id).await?.ok_or_else(|| StoreError::StoryNotFound {
      story_id: completion.story_id.clone(),
      user_email: normalize_email(&completion.user_email),
    })
  }
}
