//! Formations and the templates they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::resource::ResourceType;

/// A class of formations: which participants may join and which constraints
/// (beyond global ones) apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormationTemplate {
  pub id:                         Uuid,
  pub name:                       String,
  /// Allowed `applicationType` values; empty allows every application.
  #[serde(default)]
  pub application_types:          Vec<String>,
  /// Allowed `runtimeType` values; empty allows every runtime.
  #[serde(default)]
  pub runtime_types:              Vec<String>,
  /// Participant types whose assignments wait in `CONFIG_PENDING` for an
  /// asynchronous status callback before becoming `READY`.
  #[serde(default)]
  pub callback_participant_types: Vec<ResourceType>,
}

impl FormationTemplate {
  /// Whether a participant of `resource_type`/`subtype` may join formations of
  /// this template.
  pub fn allows(&self, resource_type: ResourceType, subtype: &str) -> bool {
    let allowed = match resource_type {
      ResourceType::Application => &self.application_types,
      ResourceType::Runtime | ResourceType::RuntimeContext => {
        &self.runtime_types
      }
      ResourceType::Tenant | ResourceType::Formation => return true,
    };
    allowed.is_empty() || allowed.iter().any(|t| t == subtype)
  }

  pub fn awaits_callback(&self, resource_type: ResourceType) -> bool {
    self.callback_participant_types.contains(&resource_type)
  }
}

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
pub enum FormationState {
  Initial,
  Ready,
  Deleting,
  CreateError,
  DeleteError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formation {
  pub id:                    Uuid,
  pub name:                  String,
  pub formation_template_id: Uuid,
  pub tenant_id:             Uuid,
  pub state:                 FormationState,
  pub error:                 Option<String>,
  pub created_at:            DateTime<Utc>,
}

impl Formation {
  pub fn new(tenant_id: Uuid, name: impl Into<String>, template_id: Uuid) -> Self {
    Self {
      id: Uuid::new_v4(),
      name: name.into(),
      formation_template_id: template_id,
      tenant_id,
      state: FormationState::Initial,
      error: None,
      created_at: Utc::now(),
    }
  }
}
