//! Router assembly: HTTP endpoints, JSON 405/404 fallbacks, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - REST-ish API under `/api/v1/...`
/// - JSON 405 bodies for wrong verbs on every route, JSON 404 for unknown paths
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    use http::method_not_allowed as not_allowed;

    Router::new()
        .route("/api/v1/health", get(http::http_health).fallback(not_allowed))
        // Grading + generation
        .route(
            "/api/v1/validate-response",
            post(http::http_post_validate_response).fallback(not_allowed),
        )
        .route(
            "/api/v1/generate-questions",
            post(http::http_post_generate_questions).fallback(not_allowed),
        )
        .route(
            "/api/v1/generate-story",
            post(http::http_post_generate_story).fallback(not_allowed),
        )
        // Stories + answers
        .route(
            "/api/v1/stories",
            post(http::http_post_story)
                .get(http::http_get_stories)
                .fallback(not_allowed),
        )
        .route(
            "/api/v1/stories/mark-read",
            post(http::http_post_mark_read).fallback(not_allowed),
        )
        .route(
            "/api/v1/stories/answers",
            get(http::http_get_story_answers).fallback(not_allowed),
        )
        .route("/api/v1/answers", get(http::http_get_answers).fallback(not_allowed))
        // Quiz sessions
        .route("/api/v1/quiz", post(http::http_post_quiz).fallback(not_allowed))
        .route("/api/v1/quiz/:id", get(http::http_get_quiz).fallback(not_allowed))
        .route(
            "/api/v1/quiz/:id/answer",
            post(http::http_post_quiz_answer).fallback(not_allowed),
        )
        .fallback(http::route_not_found)
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
