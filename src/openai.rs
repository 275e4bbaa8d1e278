//! Minimal OpenAI client for our use-cases.
//!
//! We only call chat.completions and request either plain text or a JSON object.
//! Calls are instrumented and log model names, latencies, and token usage (not contents).
//!
//! NOTE: We never log the API key.

use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// One chat-completion call: a system instruction and an optional user turn.
#[derive(Clone, Debug)]
pub struct ChatCall<'a> {
  pub model: &'a str,
  pub system: &'a str,
  pub user: Option<&'a str>,
  pub temperature: f32,
  pub max_tokens: Option<u32>,
  pub json_object: bool,
}

/// Seam over the text-generation service. Returns the raw reply text
/// (empty when the service sent no content) or a transport/endpoint error.
pub trait ChatBackend: Send + Sync {
  fn chat(&self, call: &ChatCall<'_>) -> impl Future<Output = Result<String, String>> + Send;
}

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());

    let client = match reqwest::Client::builder().timeout(Duration::from_secs(30)).build() {
      Ok(c) => c,
      Err(e) => {
        warn!(target: "french_idol", error = %e, "Failed to build HTTP client; OpenAI disabled");
        return None;
      }
    };

    Some(Self { client, api_key, base_url })
  }

  #[instrument(level = "info", skip(self, call), fields(model = %call.model, json = call.json_object))]
  async fn chat_completion(&self, call: &ChatCall<'_>) -> Result<String, String> {
    let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
    let req = build_request(call);

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "french-idol-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| e.to_string())?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(format!("OpenAI HTTP {}: {}", status, msg));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| e.to_string())?;
    let elapsed = start.elapsed();
    if let Some(usage) = &body.usage {
      info!(?elapsed, prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.into_iter().next()
      .and_then(|c| c.message.content)
      .unwrap_or_default();

    Ok(text)
  }
}

impl ChatBackend for OpenAI {
  async fn chat(&self, call: &ChatCall<'_>) -> Result<String, String> {
    self.chat_completion(call).await
  }
}

/// The service runs without a key; every model call then fails as an upstream error.
impl ChatBackend for Option<OpenAI> {
  async fn chat(&self, call: &ChatCall<'_>) -> Result<String, String> {
    match self {
      Some(oa) => oa.chat_completion(call).await,
      None => Err("OpenAI disabled (no OPENAI_API_KEY)".into()),
    }
  }
}

fn build_request(call: &ChatCall<'_>) -> ChatCompletionRequest {
  let mut messages = vec![ChatMessageReq { role: "system".into(), content: call.system.into() }];
  if let Some(user) = call.user {
    messages.push(ChatMessageReq { role: "user".into(), content: user.into() });
  }
  ChatCompletionRequest {
    model: call.model.to_string(),
    messages,
    temperature: call.temperature,
    response_format: call.json_object.then(|| ResponseFormat { r#type: "json_object".into() }),
    max_tokens: call.max_tokens,
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}

#[cfg(test)]
pub mod testing {
  //! Scripted backend for unit tests: replays canned replies in order and
  //! records every call it receives.

  use std::collections::VecDeque;
  use std::sync::Mutex;

  use super::{ChatBackend, ChatCall};

  #[derive(Clone, Debug)]
  pub struct RecordedCall {
    pub model: String,
    pub system: String,
    pub user: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
  }

  #[derive(Default)]
  pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<RecordedCall>>,
  }

  impl ScriptedBackend {
    pub fn new<I, S>(replies: I) -> Self
    where
      I: IntoIterator<Item = Result<S, S>>,
      S: Into<String>,
    {
      let replies = replies.into_iter().map(|r| r.map(Into::into).map_err(Into::into)).collect();
      Self { replies: Mutex::new(replies), calls: Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
      self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
      self.calls.lock().unwrap().len()
    }
  }

  impl ChatBackend for ScriptedBackend {
    async fn chat(&self, call: &ChatCall<'_>) -> Result<String, String> {
      self.calls.lock().unwrap().push(RecordedCall {
        model: call.model.to_string(),
        system: call.system.to_string(),
        user: call.user.map(str::to_string),
        temperature: call.temperature,
        max_tokens: call.max_tokens,
      });
      self
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err("scripted backend exhausted".into()))
    }
  }
}
