//! Error types and axum `IntoResponse` implementation.

use axum::{
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unauthorized")]
  Unauthorized,

  #[error("password hashing failed: {0}")]
  Hash(String),
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    match self {
      Error::Unauthorized => {
        let mut res =
          (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        res.headers_mut().insert(
          header::WWW_AUTHENTICATE,
          HeaderValue::from_static("Basic realm=\"compass\""),
        );
        res
      }
      Error::Hash(msg) => {
        (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
      }
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
