//! The constraint engine: evaluates every constraint registered for a join
//! point and fails fast on the first violation.

use std::sync::Arc;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
  Error, Result,
  constraint::{FormationConstraint, JoinPointDetails, JoinPointLocation},
  operators::{OperatorInput, OperatorName, OperatorRegistry},
  store::ControlPlaneStore,
};

/// Outcome of evaluating a join point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintVerdict {
  Satisfied,
  Violated {
    constraint: String,
    operator:   OperatorName,
  },
}

impl ConstraintVerdict {
  pub fn is_satisfied(&self) -> bool { matches!(self, Self::Satisfied) }

  /// Convert a violation into [`Error::ConstraintViolation`].
  pub fn into_result(self) -> Result<()> {
    match self {
      Self::Satisfied => Ok(()),
      Self::Violated { constraint, operator } => {
        Err(Error::ConstraintViolation { constraint, operator })
      }
    }
  }
}

pub struct ConstraintEngine<S> {
  store:    Arc<S>,
  registry: OperatorRegistry,
}

impl<S: ControlPlaneStore> ConstraintEngine<S> {
  pub fn new(store: Arc<S>, registry: OperatorRegistry) -> Self {
    Self { store, registry }
  }

  pub fn registry(&self) -> &OperatorRegistry { &self.registry }

  /// Constraints that apply at `location` for the resource described by
  /// `details`, in evaluation order: priority descending, then oldest first.
  pub async fn matching_constraints(
    &self,
    location: JoinPointLocation,
    details: &JoinPointDetails,
    formation_template_id: Uuid,
  ) -> Result<Vec<FormationConstraint>> {
    let matching = details.matching_details();
    let mut constraints: Vec<_> = self
      .store
      .list_constraints_for_location(location, Some(formation_template_id))
      .await
      .map_err(Error::store)?
      .into_iter()
      .filter(|c| c.location() == location && c.matches(&matching))
      .collect();
    constraints.sort_by(|a, b| {
      b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
    });
    Ok(constraints)
  }

  /// Evaluate every matching constraint, stopping at the first violation.
  ///
  /// Misconfiguration and operator failures are returned as `Err`; a
  /// violation is a [`ConstraintVerdict::Violated`] value.
  #[instrument(skip(self, details), fields(location = %location))]
  pub async fn evaluate(
    &self,
    location: JoinPointLocation,
    details: &JoinPointDetails,
    formation_template_id: Uuid,
  ) -> Result<ConstraintVerdict> {
    let constraints = self
      .matching_constraints(location, details, formation_template_id)
      .await?;
    debug!(count = constraints.len(), "matched formation constraints");

    for constraint in constraints {
      let input = OperatorInput::build(
        constraint.operator,
        details,
        &constraint.input_template,
      )?;
      let operator = self.registry.get(constraint.operator).ok_or_else(|| {
        Error::Configuration(format!(
          "operator {} is not registered",
          constraint.operator
        ))
      })?;

      let satisfied = operator.evaluate(&input).await?;
      debug!(
        constraint = %constraint.name,
        operator = %constraint.operator,
        satisfied,
        "evaluated formation constraint"
      );
      if !satisfied {
        info!(
          constraint = %constraint.name,
          operator = %constraint.operator,
          "formation constraint violated"
        );
        return Ok(ConstraintVerdict::Violated {
          constraint: constraint.name,
          operator:   constraint.operator,
        });
      }
    }
    Ok(ConstraintVerdict::Satisfied)
  }

  /// Evaluate the join point, turning a violation into
  /// [`Error::ConstraintViolation`].
  pub async fn enforce_constraints(
    &self,
    location: JoinPointLocation,
    details: &JoinPointDetails,
    formation_template_id: Uuid,
  ) -> Result<()> {
    self
      .evaluate(location, details, formation_template_id)
      .await?
      .into_result()
  }
}
