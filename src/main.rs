//! French Idol · answer grading backend
//!
//! - Axum HTTP API: answer validation, question/story generation, stories, quiz sessions
//! - Two-pass grading through OpenAI chat completions
//! - SQLite persistence (sqlx)
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   DATABASE_URL        : SQLite url (default "sqlite://french_idol.db?mode=rwc")
//!   OPENAI_API_KEY      : enables OpenAI; without it every model call fails
//!   OPENAI_BASE_URL     : default "https://api.openai.com/v1"
//!   OPENAI_FAST_MODEL   : grading model, default "gpt-4o-mini"
//!   OPENAI_STRONG_MODEL : question/story model, default "gpt-4o"
//!   FRENCH_IDOL_CONFIG  : path to TOML config (prompts + model + database settings)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod prompts;
mod openai;
mod grading;
mod store;
mod pipeline;
mod questions;
mod quiz;
mod state;
mod protocol;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

use crate::config::AppConfig;
use crate::routes::build_router;
use crate::state::{run_session_sweeper, AppState, SESSION_SWEEP_EVERY};
use crate::store::Store;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let config = AppConfig::load();

  // Open the store once; handlers share it through AppState.
  let store = Store::open(&config.database.url, config.database.max_connections).await?;

  let state = Arc::new(AppState::new(config, store.clone()));
  let sweeper = tokio::spawn(run_session_sweeper(state.clone(), SESSION_SWEEP_EVERY));
  let app = build_router(state);

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "french_idol", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

  sweeper.abort();
  store.close().await;
  info!(target: "french_idol", "Shut down cleanly");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "french_idol", error = %e, "Could not listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "french_idol", "Shutdown signal received");
}
