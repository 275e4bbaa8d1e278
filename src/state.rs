//! Application state shared by every handler.
//!
//! This module owns:
//!   - the loaded configuration (prompts + model settings)
//!   - the optional OpenAI client
//!   - the SQLite store
//!   - live quiz sessions, keyed by session id, pruned once finished or abandoned

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::config::AppConfig;
use crate::openai::OpenAI;
use crate::quiz::QuizSession;
use crate::store::Store;

/// Finished quizzes stay readable this long after their last answer.
pub const COMPLETED_SESSION_GRACE: Duration = Duration::from_secs(10 * 60);
/// Quizzes with no activity for this long are dropped.
pub const IDLE_SESSION_TTL: Duration = Duration::from_secs(2 * 60 * 60);
/// How often the background sweeper runs.
pub const SESSION_SWEEP_EVERY: Duration = Duration::from_secs(5 * 60);

pub type SharedSession = Arc<Mutex<QuizSession>>;

pub struct AppState {
    pub config: AppConfig,
    pub openai: Option<OpenAI>,
    pub store: Store,
    pub sessions: RwLock<HashMap<String, SharedSession>>,
}

impl AppState {
    /// Build state for the server: OpenAI from env, store opened by the caller.
    #[instrument(level = "info", skip_all)]
    pub fn new(config: AppConfig, store: Store) -> Self {
        let openai = OpenAI::from_env();
        if let Some(oa) = &openai {
            info!(target: "french_idol", base_url = %oa.base_url, grading_model = %config.grading.model, question_model = %config.questions.model, "OpenAI enabled.");
        } else {
            info!(target: "french_idol", "OpenAI disabled (no OPENAI_API_KEY). Grading and generation will fail.");
        }
        Self::from_parts(config, openai, store)
    }

    pub fn from_parts(config: AppConfig, openai: Option<OpenAI>, store: Store) -> Self {
        Self {
            config,
            openai,
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session and return its shared handle. Expired sessions are
    /// pruned first.
    #[instrument(level = "debug", skip(self, session), fields(id = %session.id()))]
    pub async fn insert_session(&self, session: QuizSession) -> SharedSession {
        self.prune_sessions(COMPLETED_SESSION_GRACE, IDLE_SESSION_TTL).await;
        let id = session.id().to_string();
        let shared = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id, shared.clone());
        debug!(target: "quiz", "Session registered");
        shared
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn get_session(&self, id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Drop expired sessions. A session locked by an in-flight request is kept.
    pub async fn prune_sessions(&self, completed_grace: Duration, idle: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, shared| match shared.try_lock() {
            Ok(session) => !session.is_expired(now, completed_grace, idle),
            Err(_) => true,
        });
        let removed = before - sessions.len();
        if removed > 0 {
            info!(target: "quiz", removed, remaining = sessions.len(), "Pruned quiz sessions");
        }
        removed
    }
}

/// Periodic prune so sessions go away even when no new quiz is started.
pub async fn run_session_sweeper(state: Arc<AppState>, every: Duration) {
    let mut tick = tokio::time::interval(every);
    loop {
        tick.tick().await;
        state.prune_sessions(COMPLETED_SESSION_GRACE, IDLE_SESSION_TTL).await;
    }
}
