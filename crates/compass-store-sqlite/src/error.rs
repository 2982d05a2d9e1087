//! Error type for `compass-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unexpected value {value:?} in column {column}")]
  Decode {
    column: &'static str,
    value:  String,
  },

  /// A uniqueness constraint rejected the write.
  #[error("conflict: {0}")]
  Conflict(String),

  #[error("{0} not found")]
  NotFound(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
