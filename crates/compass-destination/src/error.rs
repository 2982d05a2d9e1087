//! Error type for `compass-destination`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("failed to build HTTP client: {0}")]
  Build(#[from] reqwest::Error),

  #[error("invalid destination service configuration: {0}")]
  Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
