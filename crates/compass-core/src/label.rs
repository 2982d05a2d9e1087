//! Labels attached to resources, and the scenario membership they encode.
//!
//! The `scenarios` label holds a JSON array of formation names and is the
//! source of truth for which formations a participant belongs to.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, Result, resource::ResourceType};

/// Label key listing the formations a resource participates in.
pub const SCENARIOS_KEY: &str = "scenarios";
/// Label key holding an application's subtype.
pub const APPLICATION_TYPE_KEY: &str = "applicationType";
/// Label key holding a runtime's subtype.
pub const RUNTIME_TYPE_KEY: &str = "runtimeType";
/// Label key holding the correlation IDs a participant expects destinations
/// created on its behalf to carry.
pub const CORRELATION_IDS_KEY: &str = "correlationIds";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
  pub id:          Uuid,
  pub tenant_id:   Uuid,
  pub key:         String,
  pub value:       Value,
  pub object_type: ResourceType,
  pub object_id:   Uuid,
}

impl Label {
  pub fn new(
    tenant_id: Uuid,
    object_type: ResourceType,
    object_id: Uuid,
    key: impl Into<String>,
    value: Value,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      tenant_id,
      key: key.into(),
      value,
      object_type,
      object_id,
    }
  }
}

/// Rules that automatically put every runtime of `target_tenant_id` into the
/// formation named `scenario_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioAssignment {
  pub scenario_name:    String,
  pub tenant_id:        Uuid,
  pub target_tenant_id: Uuid,
}

/// Decode a `scenarios` label value.
pub fn scenarios_from_value(value: &Value) -> Result<Vec<String>> {
  let items = value.as_array().ok_or_else(|| {
    Error::InvalidInput(format!("scenarios label must be an array, got {value}"))
  })?;
  items
    .iter()
    .map(|v| {
      v.as_str().map(str::to_owned).ok_or_else(|| {
        Error::InvalidInput(format!("scenario names must be strings, got {v}"))
      })
    })
    .collect()
}

/// Encode a list of formation names as a `scenarios` label value.
pub fn scenarios_to_value(scenarios: &[String]) -> Value {
  Value::Array(scenarios.iter().cloned().map(Value::String).collect())
}

/// Read a string-valued label (subtype labels); non-strings yield `None`.
pub fn string_value(label: &Label) -> Option<&str> { label.value.as_str() }
