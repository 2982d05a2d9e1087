//! Formation constraints and the join points they attach to.
//!
//! A constraint names an operator and a join point (target operation plus
//! `PRE`/`POST`). When an operation reaches that join point the engine builds
//! the operator's typed input from the [`JoinPointDetails`] of the call site
//! and the constraint's static `input_template` parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
  Error, Result,
  assignment::AssignmentOperation,
  operators::{OperatorInput, OperatorName, OperatorRegistry},
  resource::ResourceType,
};

/// Subtype wildcard: the constraint applies to every subtype.
pub const ANY_SUBTYPE: &str = "ANY";

// ─── Enumerations ────────────────────────────────────────────────────────────

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
pub enum ConstraintType {
  Pre,
  Post,
}

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
pub enum TargetOperation {
  AssignFormation,
  UnassignFormation,
  CreateFormation,
  DeleteFormation,
  /// Processing of a single formation assignment.
  SendNotification,
  /// A participant reported the status of an assignment asynchronously.
  NotificationStatusReturned,
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
pub enum ConstraintScope {
  /// Applies to every formation regardless of template.
  Global,
  /// Applies only to formations of templates the constraint is attached to.
  FormationType,
}

/// Where in an operation's lifecycle constraints are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinPointLocation {
  pub operation:       TargetOperation,
  pub constraint_type: ConstraintType,
}

impl JoinPointLocation {
  pub const fn new(
    operation: TargetOperation,
    constraint_type: ConstraintType,
  ) -> Self {
    Self { operation, constraint_type }
  }

  pub const fn pre(operation: TargetOperation) -> Self {
    Self::new(operation, ConstraintType::Pre)
  }

  pub const fn post(operation: TargetOperation) -> Self {
    Self::new(operation, ConstraintType::Post)
  }
}

impl std::fmt::Display for JoinPointLocation {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}", self.constraint_type, self.operation)
  }
}

// ─── Constraint ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormationConstraint {
  pub id:               Uuid,
  pub name:             String,
  pub constraint_type:  ConstraintType,
  pub target_operation: TargetOperation,
  pub operator:         OperatorName,
  pub resource_type:    ResourceType,
  /// A concrete subtype, or [`ANY_SUBTYPE`].
  pub resource_subtype: String,
  /// Static operator parameters, a JSON object. The per-call fields come
  /// from the join point.
  pub input_template:   Value,
  pub constraint_scope: ConstraintScope,
  /// Higher priorities are evaluated first.
  pub priority:         i32,
  pub created_at:       DateTime<Utc>,
}

impl FormationConstraint {
  pub fn location(&self) -> JoinPointLocation {
    JoinPointLocation::new(self.target_operation, self.constraint_type)
  }

  /// Whether the constraint applies to a resource of this type and subtype.
  pub fn matches(&self, details: &MatchingDetails) -> bool {
    self.resource_type == details.resource_type
      && (self.resource_subtype == ANY_SUBTYPE
        || self.resource_subtype == details.resource_subtype)
  }
}

/// Input to constraint creation. Validated against the operator registry
/// before anything is stored.
#[derive(Debug, Clone, Deserialize)]
pub struct NewFormationConstraint {
  pub name:             String,
  pub constraint_type:  ConstraintType,
  pub target_operation: TargetOperation,
  pub operator:         String,
  pub resource_type:    ResourceType,
  pub resource_subtype: String,
  #[serde(default = "empty_object")]
  pub input_template:   Value,
  pub constraint_scope: ConstraintScope,
  #[serde(default)]
  pub priority:         i32,
}

fn empty_object() -> Value { Value::Object(Default::default()) }

impl NewFormationConstraint {
  /// Resolve the operator name and prove the template builds into the
  /// operator's typed input at this join point.
  pub fn into_constraint(
    self,
    registry: &OperatorRegistry,
  ) -> Result<FormationConstraint> {
    if self.name.trim().is_empty() {
      return Err(Error::InvalidInput("constraint name is required".into()));
    }
    if self.resource_subtype.trim().is_empty() {
      return Err(Error::InvalidInput(
        "resource_subtype is required (use \"ANY\" to match every subtype)"
          .into(),
      ));
    }

    let operator: OperatorName = self.operator.parse().map_err(|_| {
      Error::Configuration(format!("unknown operator {:?}", self.operator))
    })?;
    if !registry.contains(operator) {
      return Err(Error::Configuration(format!(
        "operator {operator} is not registered"
      )));
    }
    if !operator.supports(self.resource_type) {
      return Err(Error::Configuration(format!(
        "operator {operator} does not support resource type {}",
        self.resource_type
      )));
    }
    if !self.input_template.is_object() {
      return Err(Error::Configuration(
        "input_template must be a JSON object".into(),
      ));
    }

    let sample = JoinPointDetails::sample(
      self.target_operation,
      self.resource_type,
      &self.resource_subtype,
    );
    OperatorInput::build(operator, &sample, &self.input_template)?;

    Ok(FormationConstraint {
      id: Uuid::new_v4(),
      name: self.name,
      constraint_type: self.constraint_type,
      target_operation: self.target_operation,
      operator,
      resource_type: self.resource_type,
      resource_subtype: self.resource_subtype,
      input_template: self.input_template,
      constraint_scope: self.constraint_scope,
      priority: self.priority,
      created_at: Utc::now(),
    })
  }
}

// ─── Join point details ──────────────────────────────────────────────────────

/// The resource type and subtype used to select matching constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchingDetails {
  pub resource_type:    ResourceType,
  pub resource_subtype: String,
}

/// Call-site context for assign and unassign operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignFormationDetails {
  pub resource_type:         ResourceType,
  pub resource_subtype:      String,
  pub resource_id:           String,
  /// Name of the formation template.
  pub formation_type:        String,
  pub formation_template_id: Uuid,
  pub formation_id:          Uuid,
  pub formation_name:        String,
  pub tenant:                Uuid,
}

/// Call-site context for formation create and delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrudFormationDetails {
  pub formation_type:        String,
  pub formation_template_id: Uuid,
  pub formation_name:        String,
  pub tenant:                Uuid,
}

/// Call-site context for processing a single formation assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentNotificationDetails {
  pub operation:             AssignmentOperation,
  pub formation_id:          Uuid,
  pub formation_name:        String,
  pub formation_type:        String,
  pub formation_template_id: Uuid,
  pub assignment_id:         Uuid,
  pub tenant:                Uuid,
  pub source_type:           ResourceType,
  pub source_id:             Uuid,
  pub target_type:           ResourceType,
  pub target_id:             Uuid,
  pub target_subtype:        String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "details", rename_all = "snake_case")]
pub enum JoinPointDetails {
  AssignFormation(AssignFormationDetails),
  UnassignFormation(AssignFormationDetails),
  CrudFormation(CrudFormationDetails),
  SendNotification(AssignmentNotificationDetails),
  NotificationStatusReturned(AssignmentNotificationDetails),
}

impl JoinPointDetails {
  pub fn matching_details(&self) -> MatchingDetails {
    match self {
      Self::AssignFormation(d) | Self::UnassignFormation(d) => MatchingDetails {
        resource_type:    d.resource_type,
        resource_subtype: d.resource_subtype.clone(),
      },
      Self::CrudFormation(d) => MatchingDetails {
        resource_type:    ResourceType::Formation,
        resource_subtype: d.formation_type.clone(),
      },
      Self::SendNotification(d) | Self::NotificationStatusReturned(d) => {
        MatchingDetails {
          resource_type:    d.target_type,
          resource_subtype: d.target_subtype.clone(),
        }
      }
    }
  }

  /// Placeholder details for a join point, used to check at creation time
  /// that a constraint's input can be built there.
  pub fn sample(
    operation: TargetOperation,
    resource_type: ResourceType,
    resource_subtype: &str,
  ) -> Self {
    let assign = || AssignFormationDetails {
      resource_type,
      resource_subtype: resource_subtype.to_owned(),
      resource_id: Uuid::nil().to_string(),
      formation_type: String::new(),
      formation_template_id: Uuid::nil(),
      formation_id: Uuid::nil(),
      formation_name: String::new(),
      tenant: Uuid::nil(),
    };
    let notification = |operation| AssignmentNotificationDetails {
      operation,
      formation_id: Uuid::nil(),
      formation_name: String::new(),
      formation_type: String::new(),
      formation_template_id: Uuid::nil(),
      assignment_id: Uuid::nil(),
      tenant: Uuid::nil(),
      source_type: resource_type,
      source_id: Uuid::nil(),
      target_type: resource_type,
      target_id: Uuid::nil(),
      target_subtype: resource_subtype.to_owned(),
    };
    match operation {
      TargetOperation::AssignFormation => Self::AssignFormation(assign()),
      TargetOperation::UnassignFormation => Self::UnassignFormation(assign()),
      TargetOperation::CreateFormation | TargetOperation::DeleteFormation => {
        Self::CrudFormation(CrudFormationDetails {
          formation_type:        resource_subtype.to_owned(),
          formation_template_id: Uuid::nil(),
          formation_name:        String::new(),
          tenant:                Uuid::nil(),
        })
      }
      TargetOperation::SendNotification => {
        Self::SendNotification(notification(AssignmentOperation::Assign))
      }
      TargetOperation::NotificationStatusReturned => {
        Self::NotificationStatusReturned(notification(
          AssignmentOperation::Assign,
        ))
      }
    }
  }
}
