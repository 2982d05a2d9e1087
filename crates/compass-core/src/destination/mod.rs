//! Destinations and certificates created in the external destination service
//! on behalf of formation assignments.
//!
//! [`DestinationService`] is the transport seam; `compass-destination`
//! implements it over HTTP. [`DestinationCreator`] validates request bodies,
//! resolves where each resource lives, skips work already recorded in the
//! assignment's [`Provisioned`] record, and performs best-effort deletion.

mod creator;
mod model;
mod provisioned;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::{
  creator::{
    AssignmentContext, DEFAULT_CORRELATION_IDS_PATH, DestinationCreator,
    certificate_name,
  },
  model::{
    AssignmentConfig, AuthSection, AuthenticationType,
    BasicAuthenticationCredentials, BasicAuthenticationDestinationRequest,
    CertificateRequest, CertificateResponse, Credentials,
    DesignTimeDestinationRequest, DestinationDetails, DestinationRequest,
    DestinationType, OutboundCommunication, ProxyType,
    SamlAssertionCredentials, SamlAssertionDestinationRequest,
    enrich_assignment_config_with_certificate_data, read_correlation_ids,
  },
  provisioned::{
    PROVISIONED_KEY, Provisioned, ProvisionedCertificate,
    ProvisionedDestination, ProvisionedKind,
  },
};

// ─── Transport ───────────────────────────────────────────────────────────────

/// Where a destination or certificate lives in the destination service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationTarget {
  pub region:        String,
  pub subaccount_id: String,
}

/// Result of a create call. The service reports an existing resource with the
/// same name as a conflict, which counts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
  Created,
  AlreadyExists,
}

/// The destination service API.
#[async_trait]
pub trait DestinationService: Send + Sync {
  async fn create_destination(
    &self,
    target: &DestinationTarget,
    request: &DestinationRequest,
  ) -> Result<CreateOutcome, DestinationError>;

  /// Deleting a destination that does not exist succeeds.
  async fn delete_destination(
    &self,
    target: &DestinationTarget,
    name: &str,
  ) -> Result<(), DestinationError>;

  /// Create a certificate, or return the existing one with the same name.
  async fn create_certificate(
    &self,
    target: &DestinationTarget,
    request: &CertificateRequest,
  ) -> Result<CertificateResponse, DestinationError>;

  /// Deleting a certificate that does not exist succeeds.
  async fn delete_certificate(
    &self,
    target: &DestinationTarget,
    name: &str,
  ) -> Result<(), DestinationError>;
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationErrorKind {
  /// The request was rejected before it was sent.
  Validation,
  /// The service answered 4xx.
  Client { status: u16 },
  /// 5xx, timeout, or a transport failure.
  Transient { status: Option<u16> },
}

impl std::fmt::Display for DestinationErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Validation => f.write_str("invalid request"),
      Self::Client { status } => write!(f, "rejected with status {status}"),
      Self::Transient { status: Some(status) } => {
        write!(f, "failed with status {status}")
      }
      Self::Transient { status: None } => f.write_str("unreachable"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct DestinationError {
  pub kind:    DestinationErrorKind,
  pub message: String,
}

impl DestinationError {
  pub fn validation(message: impl Into<String>) -> Self {
    Self { kind: DestinationErrorKind::Validation, message: message.into() }
  }

  pub fn client(status: u16, message: impl Into<String>) -> Self {
    Self {
      kind:    DestinationErrorKind::Client { status },
      message: message.into(),
    }
  }

  pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
    Self {
      kind:    DestinationErrorKind::Transient { status },
      message: message.into(),
    }
  }

  /// Terminal failures need a human; retrying the same request will fail the
  /// same way.
  pub fn is_terminal(&self) -> bool {
    !matches!(self.kind, DestinationErrorKind::Transient { .. })
  }
}

/// One failed item of a best-effort deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionFailure {
  pub index:    usize,
  pub resource: ProvisionedKind,
  pub name:     String,
  pub error:    DestinationError,
}

/// Every failure of a best-effort deletion. Items not listed were deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{}", describe_failures(&self.failures))]
pub struct DeletionErrors {
  pub failures: Vec<DeletionFailure>,
}

fn describe_failures(failures: &[DeletionFailure]) -> String {
  let items: Vec<String> = failures
    .iter()
    .map(|f| {
      format!("{} {:?} at index {}: {}", f.resource, f.name, f.index, f.error)
    })
    .collect();
  format!("failed to delete {} item(s): {}", failures.len(), items.join("; "))
}

impl DeletionErrors {
  pub fn is_empty(&self) -> bool { self.failures.is_empty() }

  pub fn push(&mut self, failure: DeletionFailure) {
    self.failures.push(failure);
  }

  pub fn indices(&self) -> Vec<usize> {
    self.failures.iter().map(|f| f.index).collect()
  }

  /// Whether every failure is terminal.
  pub fn all_terminal(&self) -> bool {
    self.failures.iter().all(|f| f.error.is_terminal())
  }

  /// `Ok(())` when nothing failed.
  pub fn into_result(self) -> Result<(), Self> {
    if self.is_empty() { Ok(()) } else { Err(self) }
  }
}
