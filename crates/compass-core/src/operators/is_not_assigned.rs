use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{
  IsNotAssignedToAnyFormationOfTypeInput, Operator, OperatorInput,
  OperatorName, mismatched_input,
};
use crate::{
  Error, Result,
  label::{SCENARIOS_KEY, scenarios_from_value},
  resource::ResourceType,
  store::ControlPlaneStore,
};

/// Satisfied unless the resource already participates in a formation built
/// from the same template.
pub struct IsNotAssignedToAnyFormationOfType<S> {
  store: Arc<S>,
}

impl<S> IsNotAssignedToAnyFormationOfType<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }
}

impl<S: ControlPlaneStore> IsNotAssignedToAnyFormationOfType<S> {
  /// Names of the formations the resource currently belongs to.
  async fn assigned_formations(
    &self,
    input: &IsNotAssignedToAnyFormationOfTypeInput,
  ) -> Result<Vec<String>> {
    match input.resource_type {
      ResourceType::Application | ResourceType::Runtime => {
        let object_id: Uuid = input.resource_id.parse().map_err(|_| {
          Error::InvalidInput(format!(
            "resource id {:?} is not a UUID",
            input.resource_id
          ))
        })?;
        let label = self
          .store
          .get_label_by_key(
            input.tenant,
            input.resource_type,
            object_id,
            SCENARIOS_KEY.to_owned(),
          )
          .await
          .map_err(Error::store)?;
        match label {
          Some(label) => scenarios_from_value(&label.value),
          None => Ok(Vec::new()),
        }
      }
      ResourceType::Tenant => {
        let internal = self
          .store
          .get_internal_tenant(input.resource_id.clone())
          .await
          .map_err(Error::store)?
          .ok_or_else(|| {
            Error::not_found(format!(
              "tenant with external id {}",
              input.resource_id
            ))
          })?;
        let assignments = self
          .store
          .list_scenario_assignments_for_target_tenant(internal)
          .await
          .map_err(Error::store)?;
        Ok(assignments.into_iter().map(|a| a.scenario_name).collect())
      }
      other => Err(Error::Configuration(format!(
        "{} does not support resource type {other}",
        OperatorName::IsNotAssignedToAnyFormationOfType
      ))),
    }
  }
}

#[async_trait]
impl<S> Operator for IsNotAssignedToAnyFormationOfType<S>
where
  S: ControlPlaneStore + 'static,
{
  fn name(&self) -> OperatorName {
    OperatorName::IsNotAssignedToAnyFormationOfType
  }

  async fn evaluate(&self, input: &OperatorInput) -> Result<bool> {
    let OperatorInput::IsNotAssignedToAnyFormationOfType(input) = input else {
      return Err(mismatched_input(self.name(), input));
    };

    if !self.name().supports(input.resource_type) {
      return Err(Error::Configuration(format!(
        "{} does not support resource type {}",
        self.name(),
        input.resource_type
      )));
    }

    if input.except_subtypes.contains(&input.resource_subtype) {
      debug!(
        resource_id = %input.resource_id,
        subtype = %input.resource_subtype,
        "subtype is exempt"
      );
      return Ok(true);
    }

    let names = self.assigned_formations(input).await?;
    if names.is_empty() {
      return Ok(true);
    }

    let formations = self
      .store
      .list_formations_by_names(names, input.tenant)
      .await
      .map_err(Error::store)?;

    let conflicting = formations
      .iter()
      .find(|f| f.formation_template_id == input.formation_template_id);
    if let Some(formation) = conflicting {
      debug!(
        resource_id = %input.resource_id,
        formation = %formation.name,
        "resource already in a formation of the same type"
      );
      return Ok(false);
    }
    Ok(true)
  }
}
