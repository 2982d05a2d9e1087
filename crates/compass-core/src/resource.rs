//! Resource identities: tenants and the participants that join formations.
//!
//! Participants (applications, runtimes, runtime contexts) are owned by other
//! domains; this crate only reads them. A [`Resource`] is the immutable
//! snapshot handed to constraint evaluation.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

// ─── Resource types ──────────────────────────────────────────────────────────

/// The kind of object a constraint, label, or assignment endpoint refers to.
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
pub enum ResourceType {
  Application,
  Runtime,
  RuntimeContext,
  Tenant,
  Formation,
}

impl ResourceType {
  /// Whether objects of this type can be an endpoint of a formation
  /// assignment.
  pub fn is_participant(self) -> bool {
    matches!(self, Self::Application | Self::Runtime | Self::RuntimeContext)
  }
}

/// Immutable snapshot of a resource passed into constraint evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
  /// Internal UUID for participants; the *external* tenant ID for tenants.
  pub resource_id:      String,
  pub resource_type:    ResourceType,
  /// Label-derived classification, e.g. the `applicationType` label value.
  /// Empty when the resource carries no type label.
  pub resource_subtype: String,
  /// Internal ID of the owning tenant.
  pub tenant:           Uuid,
}

// ─── Tenants ─────────────────────────────────────────────────────────────────

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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TenantType {
  Account,
  Subaccount,
  Customer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
  pub id:          Uuid,
  /// Identifier in the external directory; destinations are created in the
  /// subaccount with this ID unless a destination names its own.
  pub external_id: String,
  pub name:        String,
  pub tenant_type: TenantType,
  /// Region of the destination service instance serving this tenant.
  pub region:      Option<String>,
  pub parent:      Option<Uuid>,
}

// ─── Participants ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
  pub id:        Uuid,
  pub tenant_id: Uuid,
  pub name:      String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runtime {
  pub id:        Uuid,
  pub tenant_id: Uuid,
  pub name:      String,
}

/// A tenant-specific view of a runtime. Inherits the runtime's subtype.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeContext {
  pub id:         Uuid,
  pub tenant_id:  Uuid,
  pub runtime_id: Uuid,
  pub key:        String,
  pub value:      String,
}
