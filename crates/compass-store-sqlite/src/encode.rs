//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, UUIDs hyphenated lowercase strings, enums
//! their wire names, and structured values compact JSON.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use compass_core::{
  assignment::{AssignmentError, FormationAssignment},
  constraint::FormationConstraint,
  formation::{Formation, FormationTemplate},
  label::Label,
  resource::{Application, Runtime, RuntimeContext, Tenant},
};
use rusqlite::Row;
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

/// Enums are stored under their `strum` wire name.
pub fn encode_enum(value: impl AsRef<str>) -> String { value.as_ref().to_owned() }

pub fn decode_enum<T: FromStr>(column: &'static str, s: &str) -> Result<T> {
  s.parse()
    .map_err(|_| Error::Decode { column, value: s.to_owned() })
}

pub fn encode_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
  Ok(serde_json::to_string(value)?)
}

pub fn decode_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T> {
  Ok(serde_json::from_str(s)?)
}

/// Encode a list of UUIDs or names as a JSON array, for `json_each` lookups.
pub fn encode_list<T: ToString>(items: &[T]) -> Result<String> {
  encode_json(&items.iter().map(ToString::to_string).collect::<Vec<_>>())
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const TENANT_COLUMNS: &str = "id, external_id, name, tenant_type, region, parent";

pub struct RawTenant {
  pub id:          String,
  pub external_id: String,
  pub name:        String,
  pub tenant_type: String,
  pub region:      Option<String>,
  pub parent:      Option<String>,
}

impl RawTenant {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:          row.get(0)?,
      external_id: row.get(1)?,
      name:        row.get(2)?,
      tenant_type: row.get(3)?,
      region:      row.get(4)?,
      parent:      row.get(5)?,
    })
  }

  pub fn into_tenant(self) -> Result<Tenant> {
    Ok(Tenant {
      id:          decode_uuid(&self.id)?,
      external_id: self.external_id,
      name:        self.name,
      tenant_type: decode_enum("tenant_type", &self.tenant_type)?,
      region:      self.region,
      parent:      self.parent.as_deref().map(decode_uuid).transpose()?,
    })
  }
}

/// Applications and runtimes share a row shape.
pub struct RawParticipant {
  pub id:        String,
  pub tenant_id: String,
  pub name:      String,
}

impl RawParticipant {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self { id: row.get(0)?, tenant_id: row.get(1)?, name: row.get(2)? })
  }

  pub fn into_application(self) -> Result<Application> {
    Ok(Application {
      id:        decode_uuid(&self.id)?,
      tenant_id: decode_uuid(&self.tenant_id)?,
      name:      self.name,
    })
  }

  pub fn into_runtime(self) -> Result<Runtime> {
    Ok(Runtime {
      id:        decode_uuid(&self.id)?,
      tenant_id: decode_uuid(&self.tenant_id)?,
      name:      self.name,
    })
  }
}

pub struct RawRuntimeContext {
  pub id:         String,
  pub tenant_id:  String,
  pub runtime_id: String,
  pub key:        String,
  pub value:      String,
}

impl RawRuntimeContext {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      tenant_id:  row.get(1)?,
      runtime_id: row.get(2)?,
      key:        row.get(3)?,
      value:      row.get(4)?,
    })
  }

  pub fn into_context(self) -> Result<RuntimeContext> {
    Ok(RuntimeContext {
      id:         decode_uuid(&self.id)?,
      tenant_id:  decode_uuid(&self.tenant_id)?,
      runtime_id: decode_uuid(&self.runtime_id)?,
      key:        self.key,
      value:      self.value,
    })
  }
}

pub const LABEL_COLUMNS: &str = "id, tenant_id, object_type, object_id, key, value";

pub struct RawLabel {
  pub id:          String,
  pub tenant_id:   String,
  pub object_type: String,
  pub object_id:   String,
  pub key:         String,
  pub value:       String,
}

impl RawLabel {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:          row.get(0)?,
      tenant_id:   row.get(1)?,
      object_type: row.get(2)?,
      object_id:   row.get(3)?,
      key:         row.get(4)?,
      value:       row.get(5)?,
    })
  }

  pub fn into_label(self) -> Result<Label> {
    Ok(Label {
      id:          decode_uuid(&self.id)?,
      tenant_id:   decode_uuid(&self.tenant_id)?,
      key:         self.key,
      value:       decode_json(&self.value)?,
      object_type: decode_enum("object_type", &self.object_type)?,
      object_id:   decode_uuid(&self.object_id)?,
    })
  }
}

pub const TEMPLATE_COLUMNS: &str =
  "id, name, application_types, runtime_types, callback_participant_types";

pub struct RawTemplate {
  pub id:                         String,
  pub name:                       String,
  pub application_types:          String,
  pub runtime_types:              String,
  pub callback_participant_types: String,
}

impl RawTemplate {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                         row.get(0)?,
      name:                       row.get(1)?,
      application_types:          row.get(2)?,
      runtime_types:              row.get(3)?,
      callback_participant_types: row.get(4)?,
    })
  }

  pub fn into_template(self) -> Result<FormationTemplate> {
    Ok(FormationTemplate {
      id:                         decode_uuid(&self.id)?,
      name:                       self.name,
      application_types:          decode_json(&self.application_types)?,
      runtime_types:              decode_json(&self.runtime_types)?,
      callback_participant_types: decode_json(&self.callback_participant_types)?,
    })
  }
}

pub const CONSTRAINT_COLUMNS: &str = "id, name, constraint_type, target_operation, \
   operator, resource_type, resource_subtype, input_template, constraint_scope, \
   priority, created_at";

pub struct RawConstraint {
  pub id:               String,
  pub name:             String,
  pub constraint_type:  String,
  pub target_operation: String,
  pub operator:         String,
  pub resource_type:    String,
  pub resource_subtype: String,
  pub input_template:   String,
  pub constraint_scope: String,
  pub priority:         i32,
  pub created_at:       String,
}

impl RawConstraint {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:               row.get(0)?,
      name:             row.get(1)?,
      constraint_type:  row.get(2)?,
      target_operation: row.get(3)?,
      operator:         row.get(4)?,
      resource_type:    row.get(5)?,
      resource_subtype: row.get(6)?,
      input_template:   row.get(7)?,
      constraint_scope: row.get(8)?,
      priority:         row.get(9)?,
      created_at:       row.get(10)?,
    })
  }

  pub fn into_constraint(self) -> Result<FormationConstraint> {
    Ok(FormationConstraint {
      id:               decode_uuid(&self.id)?,
      name:             self.name,
      constraint_type:  decode_enum("constraint_type", &self.constraint_type)?,
      target_operation: decode_enum("target_operation", &self.target_operation)?,
      operator:         decode_enum("operator", &self.operator)?,
      resource_type:    decode_enum("resource_type", &self.resource_type)?,
      resource_subtype: self.resource_subtype,
      input_template:   decode_json(&self.input_template)?,
      constraint_scope: decode_enum("constraint_scope", &self.constraint_scope)?,
      priority:         self.priority,
      created_at:       decode_dt(&self.created_at)?,
    })
  }
}

pub const FORMATION_COLUMNS: &str =
  "id, name, formation_template_id, tenant_id, state, error, created_at";

pub struct RawFormation {
  pub id:                    String,
  pub name:                  String,
  pub formation_template_id: String,
  pub tenant_id:             String,
  pub state:                 String,
  pub error:                 Option<String>,
  pub created_at:            String,
}

impl RawFormation {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                    row.get(0)?,
      name:                  row.get(1)?,
      formation_template_id: row.get(2)?,
      tenant_id:             row.get(3)?,
      state:                 row.get(4)?,
      error:                 row.get(5)?,
      created_at:            row.get(6)?,
    })
  }

  pub fn into_formation(self) -> Result<Formation> {
    Ok(Formation {
      id:                    decode_uuid(&self.id)?,
      name:                  self.name,
      formation_template_id: decode_uuid(&self.formation_template_id)?,
      tenant_id:             decode_uuid(&self.tenant_id)?,
      state:                 decode_enum("state", &self.state)?,
      error:                 self.error,
      created_at:            decode_dt(&self.created_at)?,
    })
  }
}

pub const ASSIGNMENT_COLUMNS: &str = "id, formation_id, tenant_id, source, \
   source_type, target, target_type, state, value, error_message, error_code";

pub struct RawAssignment {
  pub id:            String,
  pub formation_id:  String,
  pub tenant_id:     String,
  pub source:        String,
  pub source_type:   String,
  pub target:        String,
  pub target_type:   String,
  pub state:         String,
  pub value:         Option<String>,
  pub error_message: Option<String>,
  pub error_code:    Option<String>,
}

impl RawAssignment {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:            row.get(0)?,
      formation_id:  row.get(1)?,
      tenant_id:     row.get(2)?,
      source:        row.get(3)?,
      source_type:   row.get(4)?,
      target:        row.get(5)?,
      target_type:   row.get(6)?,
      state:         row.get(7)?,
      value:         row.get(8)?,
      error_message: row.get(9)?,
      error_code:    row.get(10)?,
    })
  }

  pub fn into_assignment(self) -> Result<FormationAssignment> {
    let error = match (self.error_message, self.error_code) {
      (Some(message), Some(code)) => Some(AssignmentError {
        message,
        code: decode_enum("error_code", &code)?,
      }),
      _ => None,
    };
    Ok(FormationAssignment {
      id: decode_uuid(&self.id)?,
      formation_id: decode_uuid(&self.formation_id)?,
      tenant_id: decode_uuid(&self.tenant_id)?,
      source: decode_uuid(&self.source)?,
      source_type: decode_enum("source_type", &self.source_type)?,
      target: decode_uuid(&self.target)?,
      target_type: decode_enum("target_type", &self.target_type)?,
      state: decode_enum("state", &self.state)?,
      value: self
        .value
        .as_deref()
        .map(decode_json::<Value>)
        .transpose()?,
      error,
    })
  }
}
