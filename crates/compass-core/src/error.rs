//! Error types for `compass-core`.

use thiserror::Error;

use crate::{
  assignment::FormationAssignmentState,
  destination::{DeletionErrors, DestinationError},
  operators::OperatorName,
};

#[derive(Debug, Error)]
pub enum Error {
  #[error("{0} not found")]
  NotFound(String),

  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// A formation constraint or template is misconfigured: unknown operator,
  /// input that cannot be built, or an operator applied to a resource type it
  /// does not support. Never retried.
  #[error("configuration error: {0}")]
  Configuration(String),

  /// A constraint operator returned `false`. This is a business rejection,
  /// not an infrastructure failure.
  #[error(
    "operation is not allowed: formation constraint {constraint:?} ({operator}) is not satisfied"
  )]
  ConstraintViolation {
    constraint: String,
    operator:   OperatorName,
  },

  #[error("formation assignment cannot move from {from} to {to}")]
  InvalidStateTransition {
    from: FormationAssignmentState,
    to:   FormationAssignmentState,
  },

  #[error("destination service: {0}")]
  Destination(#[from] DestinationError),

  #[error(transparent)]
  DeletionFailed(#[from] DeletionErrors),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Box a backend error. Used as `.map_err(Error::store)`.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  pub fn not_found(what: impl std::fmt::Display) -> Self {
    Self::NotFound(what.to_string())
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
