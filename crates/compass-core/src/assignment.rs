//! Formation assignments and their state machine.
//!
//! An assignment is the directed edge `source → target` between two
//! participants of one formation. Its `value` carries the configuration the
//! participants exchange, and under the reserved `provisioned` key the
//! destinations and certificates created on its behalf.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result, resource::ResourceType};

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FormationAssignmentState {
  Initial,
  Ready,
  ConfigPending,
  CreateError,
  Deleting,
  Deleted,
  DeleteError,
}

/// Which way processing drives an assignment.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentOperation {
  Assign,
  Unassign,
}

impl FormationAssignmentState {
  /// The processing step a reconciliation pass runs for this state, or
  /// `None` when there is nothing to do.
  pub fn pending_operation(self) -> Option<AssignmentOperation> {
    match self {
      Self::Initial | Self::CreateError => Some(AssignmentOperation::Assign),
      Self::Deleting | Self::DeleteError => Some(AssignmentOperation::Unassign),
      Self::Ready | Self::ConfigPending | Self::Deleted => None,
    }
  }

  pub fn is_error(self) -> bool {
    matches!(self, Self::CreateError | Self::DeleteError)
  }

  /// Transitions are monotonic, except that error states may be retried and
  /// any live assignment may be reset to `INITIAL` or sent to `DELETING`.
  pub fn can_transition_to(self, next: Self) -> bool {
    use FormationAssignmentState::*;
    match (self, next) {
      (Deleted, _) => false,
      (_, Deleting) => !matches!(self, Deleted),
      (Initial | CreateError | ConfigPending, Ready | ConfigPending | CreateError) => true,
      (Ready | CreateError | ConfigPending, Initial) => true,
      (Deleting | DeleteError, Deleted | DeleteError) => true,
      _ => false,
    }
  }

  /// Return `Ok(next)` or the transition error.
  pub fn transition(self, next: Self) -> Result<Self> {
    if self.can_transition_to(next) {
      Ok(next)
    } else {
      Err(Error::InvalidStateTransition { from: self, to: next })
    }
  }
}

// ─── Error payload ───────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentErrorCode {
  /// Infrastructure failure; the next reconciliation pass retries.
  TechnicalError,
  /// Rejected input or a constraint violation; needs a human.
  ClientError,
}

/// Structured error recorded on an assignment in an error state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentError {
  pub message: String,
  pub code:    AssignmentErrorCode,
}

impl AssignmentError {
  pub fn technical(message: impl Into<String>) -> Self {
    Self { message: message.into(), code: AssignmentErrorCode::TechnicalError }
  }

  pub fn client(message: impl Into<String>) -> Self {
    Self { message: message.into(), code: AssignmentErrorCode::ClientError }
  }

  pub fn is_retryable(&self) -> bool {
    self.code == AssignmentErrorCode::TechnicalError
  }
}

// ─── Assignment ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormationAssignment {
  pub id:           Uuid,
  pub formation_id: Uuid,
  pub tenant_id:    Uuid,
  pub source:       Uuid,
  pub source_type:  ResourceType,
  pub target:       Uuid,
  pub target_type:  ResourceType,
  pub state:        FormationAssignmentState,
  pub value:        Option<Value>,
  pub error:        Option<AssignmentError>,
}

impl FormationAssignment {
  /// A fresh `INITIAL` assignment with no configuration.
  pub fn new(
    formation_id: Uuid,
    tenant_id: Uuid,
    (source, source_type): (Uuid, ResourceType),
    (target, target_type): (Uuid, ResourceType),
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      formation_id,
      tenant_id,
      source,
      source_type,
      target,
      target_type,
      state: FormationAssignmentState::Initial,
      value: None,
      error: None,
    }
  }

  pub fn is_self_loop(&self) -> bool { self.source == self.target }

  pub fn touches(&self, participant: Uuid) -> bool {
    self.source == participant || self.target == participant
  }

  /// Whether reconciliation should pick this assignment up.
  pub fn is_retryable(&self) -> bool {
    self.state.pending_operation().is_some()
      && self.error.as_ref().is_none_or(AssignmentError::is_retryable)
  }
}

/// Body of an asynchronous status report from a participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
  pub state:         FormationAssignmentState,
  #[serde(default)]
  pub configuration: Option<Value>,
  #[serde(default)]
  pub error:         Option<String>,
}
