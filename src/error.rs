//! Error taxonomy shared by every endpoint and the `{error:{message,code}}` body.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde::Serialize;

/// Machine-readable error code sent to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
  InvalidInput,
  MethodNotAllowed,
  NotFound,
  OpenaiError,
  ParseError,
  InvalidResponseFormat,
  InvalidScore,
  DatabaseError,
  GenerationFailed,
}

impl ErrorCode {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorCode::InvalidInput => "INVALID_INPUT",
      ErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
      ErrorCode::NotFound => "NOT_FOUND",
      ErrorCode::OpenaiError => "OPENAI_ERROR",
      ErrorCode::ParseError => "PARSE_ERROR",
      ErrorCode::InvalidResponseFormat => "INVALID_RESPONSE_FORMAT",
      ErrorCode::InvalidScore => "INVALID_SCORE",
      ErrorCode::DatabaseError => "DATABASE_ERROR",
      ErrorCode::GenerationFailed => "GENERATION_FAILED",
    }
  }

  /// HTTP status a code maps to.
  pub fn status(&self) -> StatusCode {
    match self {
      ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
      ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
      ErrorCode::NotFound => StatusCode::NOT_FOUND,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

/// Error returned by HTTP handlers.
#[derive(Debug)]
pub struct ApiError {
  pub code: ErrorCode,
  pub message: String,
}

impl ApiError {
  pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
    Self { code, message: message.into() }
  }

  pub fn invalid_input(message: impl Into<String>) -> Self {
    Self::new(ErrorCode::InvalidInput, message)
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(ErrorCode::NotFound, message)
  }

  pub fn method_not_allowed() -> Self {
    Self::new(ErrorCode::MethodNotAllowed, "Method not allowed")
  }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
  error: ErrorInner<'a>,
}

#[derive(Serialize)]
struct ErrorInner<'a> {
  message: &'a str,
  code: ErrorCode,
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let body = ErrorBody { error: ErrorInner { message: &self.message, code: self.code } };
    (self.code.status(), Json(body)).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn codes_serialize_like_their_wire_names() {
    for code in [
      ErrorCode::InvalidInput,
      ErrorCode::MethodNotAllowed,
      ErrorCode::NotFound,
      ErrorCode::OpenaiError,
      ErrorCode::ParseError,
      ErrorCode::InvalidResponseFormat,
      ErrorCode::InvalidScore,
      ErrorCode::DatabaseError,
      ErrorCode::GenerationFailed,
    ] {
      let json = serde_json::to_value(code).unwrap();
      assert_eq!(json, serde_json::Value::String(code.as_str().to_string()));
    }
  }

  #[test]
  fn statuses() {
    assert_eq!(ErrorCode::InvalidInput.status(), StatusCode::BAD_REQUEST);
    assert_eq!(ErrorCode::InvalidScore.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(ErrorCode::InvalidResponseFormat.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(ErrorCode::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(ErrorCode::DatabaseError.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(ErrorCode::ParseError.status(), StatusCode::INTERNAL_SERVER_ERROR);
  }
}
