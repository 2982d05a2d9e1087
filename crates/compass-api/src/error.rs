//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use compass_core::Error as CoreError;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error(transparent)]
  Core(#[from] CoreError),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  /// Box a backend error. Used as `.map_err(ApiError::store)`.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::Core(e) => match e {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::InvalidInput(_) | CoreError::ConstraintViolation { .. } => {
          StatusCode::BAD_REQUEST
        }
        CoreError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
        CoreError::Destination(_) | CoreError::DeletionFailed(_) => {
          StatusCode::BAD_GATEWAY
        }
        CoreError::Configuration(_)
        | CoreError::Serialization(_)
        | CoreError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
      },
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!(error = %self, "request failed");
    }
    let message = match &self {
      ApiError::NotFound(m) | ApiError::BadRequest(m) => m.clone(),
      other => other.to_string(),
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
