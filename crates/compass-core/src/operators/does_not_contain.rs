use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Operator, OperatorInput, OperatorName, mismatched_input};
use crate::{
  Error, Result,
  label::{APPLICATION_TYPE_KEY, string_value},
  resource::ResourceType,
  store::ControlPlaneStore,
};

/// Satisfied unless the formation already holds another application of the
/// given subtype.
pub struct DoesNotContainResourceOfSubtype<S> {
  store: Arc<S>,
}

impl<S> DoesNotContainResourceOfSubtype<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }
}

#[async_trait]
impl<S> Operator for DoesNotContainResourceOfSubtype<S>
where
  S: ControlPlaneStore + 'static,
{
  fn name(&self) -> OperatorName {
    OperatorName::DoesNotContainResourceOfSubtype
  }

  async fn evaluate(&self, input: &OperatorInput) -> Result<bool> {
    let OperatorInput::DoesNotContainResourceOfSubtype(input) = input else {
      return Err(mismatched_input(self.name(), input));
    };

    if !self.name().supports(input.resource_type) {
      return Err(Error::Configuration(format!(
        "{} does not support resource type {}",
        self.name(),
        input.resource_type
      )));
    }

    let applications = self
      .store
      .list_applications_by_scenarios(input.tenant, vec![
        input.formation_name.clone(),
      ])
      .await
      .map_err(Error::store)?;

    for app in applications {
      if app.id.to_string() == input.resource_id {
        continue;
      }
      let label = self
        .store
        .get_label_by_key(
          input.tenant,
          ResourceType::Application,
          app.id,
          APPLICATION_TYPE_KEY.to_owned(),
        )
        .await
        .map_err(Error::store)?;
      // Applications without a type label cannot match any subtype.
      let Some(label) = label else { continue };
      if string_value(&label) == Some(input.resource_subtype.as_str()) {
        debug!(
          formation = %input.formation_name,
          application_id = %app.id,
          subtype = %input.resource_subtype,
          "formation already contains an application of this subtype"
        );
        return Ok(false);
      }
    }
    Ok(true)
  }
}
