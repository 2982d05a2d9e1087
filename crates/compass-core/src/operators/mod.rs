//! Constraint operators and the registry that dispatches to them.
//!
//! Operator names form a closed enum; each operator has a typed input built
//! from the join point of the call site plus the constraint's static
//! parameters. Operators are side-effect-free predicates over store state, so
//! they may be evaluated speculatively before an operation runs.

mod does_not_contain;
mod is_not_assigned;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

pub use does_not_contain::DoesNotContainResourceOfSubtype;
pub use is_not_assigned::IsNotAssignedToAnyFormationOfType;

use crate::{
  Error, Result,
  constraint::JoinPointDetails,
  resource::ResourceType,
  store::ControlPlaneStore,
};

// ─── Names ───────────────────────────────────────────────────────────────────

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
  EnumIter,
  AsRefStr,
)]
pub enum OperatorName {
  IsNotAssignedToAnyFormationOfType,
  DoesNotContainResourceOfSubtype,
}

impl OperatorName {
  /// Resource types the operator can evaluate.
  pub fn supports(self, resource_type: ResourceType) -> bool {
    match self {
      Self::IsNotAssignedToAnyFormationOfType => matches!(
        resource_type,
        ResourceType::Application | ResourceType::Runtime | ResourceType::Tenant
      ),
      Self::DoesNotContainResourceOfSubtype => {
        resource_type == ResourceType::Application
      }
    }
  }
}

// ─── Typed inputs ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IsNotAssignedToAnyFormationOfTypeInput {
  pub formation_template_id: Uuid,
  pub resource_type:         ResourceType,
  pub resource_subtype:      String,
  pub resource_id:           String,
  pub tenant:                Uuid,
  /// Subtypes exempt from the check.
  pub except_subtypes:       Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct IsNotAssignedParams {
  #[serde(default, alias = "exceptSystemTypes")]
  except_subtypes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoesNotContainResourceOfSubtypeInput {
  pub formation_name:   String,
  pub resource_type:    ResourceType,
  /// The subtype that must not already be present in the formation.
  pub resource_subtype: String,
  /// The resource being assigned; ignored when scanning the formation.
  pub resource_id:      String,
  pub tenant:           Uuid,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DoesNotContainParams {
  /// Overrides the subtype taken from the join point.
  #[serde(default)]
  resource_subtype: Option<String>,
}

/// The input of one operator invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "operator", content = "input")]
pub enum OperatorInput {
  IsNotAssignedToAnyFormationOfType(IsNotAssignedToAnyFormationOfTypeInput),
  DoesNotContainResourceOfSubtype(DoesNotContainResourceOfSubtypeInput),
}

/// The resource-centric view of a join point that operator inputs draw from.
struct Subject<'a> {
  resource_type:         ResourceType,
  resource_subtype:      &'a str,
  resource_id:           String,
  formation_template_id: Uuid,
  formation_name:        &'a str,
  tenant:                Uuid,
}

fn subject_of<'a>(
  operator: OperatorName,
  details: &'a JoinPointDetails,
) -> Result<Subject<'a>> {
  match details {
    JoinPointDetails::AssignFormation(d)
    | JoinPointDetails::UnassignFormation(d) => Ok(Subject {
      resource_type:         d.resource_type,
      resource_subtype:      &d.resource_subtype,
      resource_id:           d.resource_id.clone(),
      formation_template_id: d.formation_template_id,
      formation_name:        &d.formation_name,
      tenant:                d.tenant,
    }),
    JoinPointDetails::SendNotification(d)
    | JoinPointDetails::NotificationStatusReturned(d) => Ok(Subject {
      resource_type:         d.target_type,
      resource_subtype:      &d.target_subtype,
      resource_id:           d.target_id.to_string(),
      formation_template_id: d.formation_template_id,
      formation_name:        &d.formation_name,
      tenant:                d.tenant,
    }),
    JoinPointDetails::CrudFormation(_) => Err(Error::Configuration(format!(
      "operator {operator} cannot be used on formation create/delete"
    ))),
  }
}

fn params<T: serde::de::DeserializeOwned>(
  operator: OperatorName,
  template: &Value,
) -> Result<T> {
  serde_json::from_value(template.clone()).map_err(|e| {
    Error::Configuration(format!("invalid input template for {operator}: {e}"))
  })
}

impl OperatorInput {
  /// Build the typed input for `operator` from the call site and the
  /// constraint's static parameters.
  pub fn build(
    operator: OperatorName,
    details: &JoinPointDetails,
    template: &Value,
  ) -> Result<Self> {
    let subject = subject_of(operator, details)?;
    match operator {
      OperatorName::IsNotAssignedToAnyFormationOfType => {
        let p: IsNotAssignedParams = params(operator, template)?;
        Ok(Self::IsNotAssignedToAnyFormationOfType(
          IsNotAssignedToAnyFormationOfTypeInput {
            formation_template_id: subject.formation_template_id,
            resource_type:         subject.resource_type,
            resource_subtype:      subject.resource_subtype.to_owned(),
            resource_id:           subject.resource_id,
            tenant:                subject.tenant,
            except_subtypes:       p.except_subtypes,
          },
        ))
      }
      OperatorName::DoesNotContainResourceOfSubtype => {
        let p: DoesNotContainParams = params(operator, template)?;
        Ok(Self::DoesNotContainResourceOfSubtype(
          DoesNotContainResourceOfSubtypeInput {
            formation_name:   subject.formation_name.to_owned(),
            resource_type:    subject.resource_type,
            resource_subtype: p
              .resource_subtype
              .unwrap_or_else(|| subject.resource_subtype.to_owned()),
            resource_id:      subject.resource_id,
            tenant:           subject.tenant,
          },
        ))
      }
    }
  }

  pub fn operator(&self) -> OperatorName {
    match self {
      Self::IsNotAssignedToAnyFormationOfType(_) => {
        OperatorName::IsNotAssignedToAnyFormationOfType
      }
      Self::DoesNotContainResourceOfSubtype(_) => {
        OperatorName::DoesNotContainResourceOfSubtype
      }
    }
  }
}

// ─── Operator trait ──────────────────────────────────────────────────────────

/// A boolean predicate evaluated at a join point. `Ok(true)` lets the
/// operation proceed; `Ok(false)` rejects it; `Err` is an infrastructure or
/// configuration failure.
#[async_trait]
pub trait Operator: Send + Sync {
  fn name(&self) -> OperatorName;

  async fn evaluate(&self, input: &OperatorInput) -> Result<bool>;
}

fn mismatched_input(expected: OperatorName, input: &OperatorInput) -> Error {
  Error::Configuration(format!(
    "operator {expected} received input for {}",
    input.operator()
  ))
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Maps operator names to their implementations.
#[derive(Clone, Default)]
pub struct OperatorRegistry {
  operators: HashMap<OperatorName, Arc<dyn Operator>>,
}

impl OperatorRegistry {
  pub fn new() -> Self { Self::default() }

  /// A registry holding every built-in operator, backed by `store`.
  pub fn with_defaults<S>(store: Arc<S>) -> Self
  where
    S: ControlPlaneStore + 'static,
  {
    let mut registry = Self::new();
    registry.register(Arc::new(IsNotAssignedToAnyFormationOfType::new(
      store.clone(),
    )));
    registry.register(Arc::new(DoesNotContainResourceOfSubtype::new(store)));
    registry
  }

  /// Register `operator` under its name, returning any operator it replaces.
  pub fn register(
    &mut self,
    operator: Arc<dyn Operator>,
  ) -> Option<Arc<dyn Operator>> {
    self.operators.insert(operator.name(), operator)
  }

  pub fn get(&self, name: OperatorName) -> Option<&Arc<dyn Operator>> {
    self.operators.get(&name)
  }

  pub fn contains(&self, name: OperatorName) -> bool {
    self.operators.contains_key(&name)
  }

  pub fn names(&self) -> Vec<OperatorName> {
    let mut names: Vec<_> = self.operators.keys().copied().collect();
    names.sort_by_key(|n| n.as_ref().to_owned());
    names
  }
}

impl std::fmt::Debug for OperatorRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("OperatorRegistry")
      .field("operators", &self.names())
      .finish()
  }
}
