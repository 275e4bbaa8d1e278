//! Loading service configuration (prompts + model settings + database) from TOML.
//!
//! The file is optional (`FRENCH_IDOL_CONFIG`). Env variables override a few
//! fields afterwards so deployments don't need a file at all.

use serde::Deserialize;
use tracing::{error, info};

use crate::prompts::{
  GENERATE_QUESTIONS_SYSTEM_PROMPT, GENERATE_STORY_SYSTEM_PROMPT, REVIEW_RESPONSE_SYSTEM_PROMPT,
  VALIDATE_RESPONSE_SYSTEM_PROMPT,
};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub grading: GradingSettings,
  #[serde(default)]
  pub questions: QuestionSettings,
  #[serde(default)]
  pub database: DatabaseSettings,
}

/// Prompt templates. Defaults are the built-in French Idol prompts; override
/// them in TOML to tune tone, but keep the placeholders.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  /// Placeholders: {article} {question} {response}
  pub evaluation: String,
  /// Placeholders: {story} {question} {response} {score} {correction} {suggestedAnswer}
  pub review: String,
  pub question_generation: String,
  pub story_generation: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      evaluation: VALIDATE_RESPONSE_SYSTEM_PROMPT.into(),
      review: REVIEW_RESPONSE_SYSTEM_PROMPT.into(),
      question_generation: GENERATE_QUESTIONS_SYSTEM_PROMPT.into(),
      story_generation: GENERATE_STORY_SYSTEM_PROMPT.into(),
    }
  }
}

/// Settings for both grading calls (student evaluation + teacher review).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GradingSettings {
  pub model: String,
  pub temperature: f32,
  pub max_tokens: u32,
}

impl Default for GradingSettings {
  fn default() -> Self {
    Self { model: "gpt-4o-mini".into(), temperature: 0.3, max_tokens: 250 }
  }
}

/// Settings for question and story generation.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct QuestionSettings {
  pub model: String,
  pub temperature: f32,
  pub max_tokens: u32,
  pub max_questions: usize,
}

impl Default for QuestionSettings {
  fn default() -> Self {
    Self { model: "gpt-4o".into(), temperature: 0.7, max_tokens: 1000, max_questions: 5 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
  pub url: String,
  pub max_connections: u32,
}

impl Default for DatabaseSettings {
  fn default() -> Self {
    Self { url: "sqlite://french_idol.db?mode=rwc".into(), max_connections: 5 }
  }
}

impl AppConfig {
  /// File config (if any) + env overrides.
  pub fn load() -> Self {
    let mut cfg = load_config_from_env().unwrap_or_default();
    cfg.apply_env_overrides(|k| std::env::var(k).ok());
    cfg
  }

  /// `lookup` is injected so tests don't have to touch the process env.
  pub fn apply_env_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
    if let Some(url) = lookup("DATABASE_URL") {
      self.database.url = url;
    }
    if let Some(model) = lookup("OPENAI_FAST_MODEL") {
      self.grading.model = model;
    }
    if let Some(model) = lookup("OPENAI_STRONG_MODEL") {
      self.questions.model = model;
    }
  }
}

pub fn parse_config(s: &str) -> Result<AppConfig, toml::de::Error> {
  toml::from_str::<AppConfig>(s)
}

/// Attempt to load `AppConfig` from FRENCH_IDOL_CONFIG. On any parsing/IO error, returns None.
pub fn load_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("FRENCH_IDOL_CONFIG").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_config(&s) {
      Ok(cfg) => {
        info!(target: "french_idol", %path, "Loaded config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "french_idol", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "french_idol", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
