//! Formation membership: creating formations and assigning participants to
//! them.
//!
//! Assigning a participant labels it with the formation, creates the
//! `INITIAL` assignments between it and every existing participant, and hands
//! those to the [`AssignmentOrchestrator`]. Unassigning marks the
//! participant's assignments `DELETING` and lets the orchestrator clean up.

use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  assignment::{FormationAssignment, FormationAssignmentState},
  constraint::{
    AssignFormationDetails, CrudFormationDetails, FormationConstraint,
    JoinPointDetails, JoinPointLocation, NewFormationConstraint,
    TargetOperation,
  },
  destination::DestinationService,
  engine::ConstraintEngine,
  formation::{Formation, FormationState, FormationTemplate},
  label::{
    Label, SCENARIOS_KEY, ScenarioAssignment, scenarios_from_value,
    scenarios_to_value,
  },
  orchestrator::AssignmentOrchestrator,
  resource::{Resource, ResourceType},
  store::{ControlPlaneStore, resource_subtype},
};

/// Default number of assignments processed at once.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// A formation and the assignments of the participant an operation touched,
/// as stored once processing finished.
#[derive(Debug, Clone, Serialize)]
pub struct FormationOutcome {
  pub formation:   Formation,
  /// `false` when unassigning removed the last participant.
  pub exists:      bool,
  pub assignments: Vec<FormationAssignment>,
}

/// A participant endpoint: internal ID and type.
type Participant = (Uuid, ResourceType);

/// Writes an operation committed before its `POST` constraints ran, kept so
/// they can be undone when those constraints reject it.
#[derive(Default)]
struct Rollback {
  /// Formation created by the operation.
  created_formation:   Option<Formation>,
  /// Formation deleted by the operation.
  deleted_formation:   Option<Formation>,
  /// Scenario assignment created by the operation.
  created_scenario:    Option<ScenarioAssignment>,
  /// Scenario assignments deleted by the operation.
  deleted_scenarios:   Vec<ScenarioAssignment>,
  /// Labels changed by the operation: owning tenant, participant and the
  /// prior scenarios.
  labels:              Vec<(Uuid, Participant, Vec<String>)>,
  /// Assignments created by the operation.
  created_assignments: Vec<Uuid>,
  /// Assignments updated by the operation, as they were before.
  updated_assignments: Vec<FormationAssignment>,
}

pub struct FormationService<S, D> {
  store:        Arc<S>,
  engine:       Arc<ConstraintEngine<S>>,
  orchestrator: Arc<AssignmentOrchestrator<S, D>>,
  concurrency:  usize,
}

impl<S, D> FormationService<S, D>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  pub fn new(
    store: Arc<S>,
    engine: Arc<ConstraintEngine<S>>,
    orchestrator: Arc<AssignmentOrchestrator<S, D>>,
  ) -> Self {
    Self { store, engine, orchestrator, concurrency: DEFAULT_CONCURRENCY }
  }

  pub fn with_concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency.max(1);
    self
  }

  pub fn orchestrator(&self) -> &AssignmentOrchestrator<S, D> {
    &self.orchestrator
  }

  // ── Templates and constraints ─────────────────────────────────────────

  pub async fn create_formation_template(
    &self,
    template: FormationTemplate,
  ) -> Result<FormationTemplate> {
    if template.name.trim().is_empty() {
      return Err(Error::InvalidInput("template name is required".into()));
    }
    self
      .store
      .create_formation_template(template)
      .await
      .map_err(Error::store)
  }

  async fn template(&self, id: Uuid) -> Result<FormationTemplate> {
    self
      .store
      .get_formation_template(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found(format!("formation template {id}")))
  }

  /// Delete a template no formation is built from.
  pub async fn delete_formation_template(&self, id: Uuid) -> Result<()> {
    let in_use = self
      .store
      .count_formations_by_template(id)
      .await
      .map_err(Error::store)?;
    if in_use > 0 {
      return Err(Error::InvalidInput(format!(
        "formation template {id} is used by {in_use} formation(s)"
      )));
    }
    if !self
      .store
      .delete_formation_template(id)
      .await
      .map_err(Error::store)?
    {
      return Err(Error::not_found(format!("formation template {id}")));
    }
    Ok(())
  }

  /// Validate a constraint against the registered operators and store it.
  pub async fn create_formation_constraint(
    &self,
    constraint: NewFormationConstraint,
  ) -> Result<FormationConstraint> {
    let constraint = constraint.into_constraint(self.engine.registry())?;
    let constraint = self
      .store
      .create_formation_constraint(constraint)
      .await
      .map_err(Error::store)?;
    info!(
      constraint = %constraint.name,
      operator = %constraint.operator,
      location = %constraint.location(),
      "created formation constraint"
    );
    Ok(constraint)
  }

  pub async fn attach_constraint(
    &self,
    template_id: Uuid,
    constraint_id: Uuid,
  ) -> Result<()> {
    self.template(template_id).await?;
    self
      .store
      .get_formation_constraint(constraint_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| {
        Error::not_found(format!("formation constraint {constraint_id}"))
      })?;
    self
      .store
      .attach_constraint(template_id, constraint_id)
      .await
      .map_err(Error::store)
  }

  pub async fn detach_constraint(
    &self,
    template_id: Uuid,
    constraint_id: Uuid,
  ) -> Result<()> {
    if !self
      .store
      .detach_constraint(template_id, constraint_id)
      .await
      .map_err(Error::store)?
    {
      return Err(Error::not_found(format!(
        "constraint {constraint_id} on template {template_id}"
      )));
    }
    Ok(())
  }

  // ── Formations ────────────────────────────────────────────────────────

  fn crud_details(
    formation_name: &str,
    template: &FormationTemplate,
    tenant: Uuid,
  ) -> JoinPointDetails {
    JoinPointDetails::CrudFormation(CrudFormationDetails {
      formation_type:        template.name.clone(),
      formation_template_id: template.id,
      formation_name:        formation_name.to_owned(),
      tenant,
    })
  }

  #[instrument(skip(self))]
  pub async fn create_formation(
    &self,
    tenant: Uuid,
    name: &str,
    template_id: Uuid,
  ) -> Result<Formation> {
    if name.trim().is_empty() {
      return Err(Error::InvalidInput("formation name is required".into()));
    }
    let template = self.template(template_id).await?;
    if self
      .store
      .get_formation_by_name(tenant, name.to_owned())
      .await
      .map_err(Error::store)?
      .is_some()
    {
      return Err(Error::InvalidInput(format!(
        "formation {name:?} already exists"
      )));
    }

    let details = Self::crud_details(name, &template, tenant);
    self
      .engine
      .enforce_constraints(
        JoinPointLocation::pre(TargetOperation::CreateFormation),
        &details,
        template.id,
      )
      .await?;

    let mut formation = Formation::new(tenant, name, template.id);
    formation.state = FormationState::Ready;
    let formation = self
      .store
      .create_formation(formation)
      .await
      .map_err(Error::store)?;
    info!(formation = %formation.name, template = %template.name, "created formation");

    self
      .enforce_post(TargetOperation::CreateFormation, &details, template.id, Rollback {
        created_formation: Some(formation.clone()),
        ..Default::default()
      })
      .await?;
    Ok(formation)
  }

  async fn formation_by_name(&self, tenant: Uuid, name: &str) -> Result<Formation> {
    self
      .store
      .get_formation_by_name(tenant, name.to_owned())
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found(format!("formation {name:?}")))
  }

  /// Delete a formation without participants.
  #[instrument(skip(self))]
  pub async fn delete_formation(&self, tenant: Uuid, name: &str) -> Result<()> {
    let formation = self.formation_by_name(tenant, name).await?;
    let template = self.template(formation.formation_template_id).await?;
    let assignments = self
      .store
      .list_assignments_for_formation(formation.id)
      .await
      .map_err(Error::store)?;
    if !assignments.is_empty() {
      return Err(Error::InvalidInput(format!(
        "formation {name:?} still has participants"
      )));
    }

    let details = Self::crud_details(name, &template, tenant);
    self
      .engine
      .enforce_constraints(
        JoinPointLocation::pre(TargetOperation::DeleteFormation),
        &details,
        template.id,
      )
      .await?;
    self
      .store
      .delete_formation(formation.id)
      .await
      .map_err(Error::store)?;
    info!(formation = %name, "deleted formation");
    self
      .enforce_post(TargetOperation::DeleteFormation, &details, template.id, Rollback {
        deleted_formation: Some(formation),
        ..Default::default()
      })
      .await
  }

  // ── Resources ─────────────────────────────────────────────────────────

  /// Resolve the object being (un)assigned. Participants are addressed by
  /// internal UUID, tenants by external ID.
  async fn resolve(
    &self,
    tenant: Uuid,
    object_type: ResourceType,
    object_id: &str,
  ) -> Result<(Resource, Uuid)> {
    let internal = match object_type {
      ResourceType::Tenant => self
        .store
        .get_internal_tenant(object_id.to_owned())
        .await
        .map_err(Error::store)?
        .ok_or_else(|| {
          Error::not_found(format!("tenant with external id {object_id}"))
        })?,
      ResourceType::Application
      | ResourceType::Runtime
      | ResourceType::RuntimeContext => {
        let id: Uuid = object_id.parse().map_err(|_| {
          Error::InvalidInput(format!("object id {object_id:?} is not a UUID"))
        })?;
        let found = match object_type {
          ResourceType::Application => self
            .store
            .get_application(id)
            .await
            .map_err(Error::store)?
            .is_some(),
          ResourceType::Runtime => self
            .store
            .get_runtime(id)
            .await
            .map_err(Error::store)?
            .is_some(),
          _ => self
            .store
            .get_runtime_context(id)
            .await
            .map_err(Error::store)?
            .is_some(),
        };
        if !found {
          return Err(Error::not_found(format!("{object_type} {id}")));
        }
        id
      }
      ResourceType::Formation => {
        return Err(Error::InvalidInput(
          "formations cannot be assigned to formations".into(),
        ));
      }
    };

    let subtype =
      resource_subtype(self.store.as_ref(), tenant, object_type, internal)
        .await?;
    Ok((
      Resource {
        resource_id: object_id.to_owned(),
        resource_type: object_type,
        resource_subtype: subtype,
        tenant,
      },
      internal,
    ))
  }

  fn assign_details(
    resource: &Resource,
    formation: &Formation,
    template: &FormationTemplate,
  ) -> AssignFormationDetails {
    AssignFormationDetails {
      resource_type:         resource.resource_type,
      resource_subtype:      resource.resource_subtype.clone(),
      resource_id:           resource.resource_id.clone(),
      formation_type:        template.name.clone(),
      formation_template_id: template.id,
      formation_id:          formation.id,
      formation_name:        formation.name.clone(),
      tenant:                resource.tenant,
    }
  }

  // ── Scenario labels ───────────────────────────────────────────────────

  async fn scenarios(
    &self,
    tenant: Uuid,
    (id, object_type): Participant,
  ) -> Result<Vec<String>> {
    let label = self
      .store
      .get_label_by_key(tenant, object_type, id, SCENARIOS_KEY.to_owned())
      .await
      .map_err(Error::store)?;
    match label {
      Some(label) => scenarios_from_value(&label.value),
      None => Ok(Vec::new()),
    }
  }

  /// Add `formation_name` to the participant's scenarios. Returns the prior
  /// scenarios when the label changed.
  async fn add_scenario(
    &self,
    tenant: Uuid,
    participant: Participant,
    formation_name: &str,
  ) -> Result<Option<Vec<String>>> {
    let prior = self.scenarios(tenant, participant).await?;
    if prior.iter().any(|s| s == formation_name) {
      return Ok(None);
    }
    let mut scenarios = prior.clone();
    scenarios.push(formation_name.to_owned());
    self.set_scenarios(tenant, participant, &scenarios).await?;
    Ok(Some(prior))
  }

  /// Remove `formation_name` from the participant's scenarios. Returns the
  /// prior scenarios when the label changed.
  async fn remove_scenario(
    &self,
    tenant: Uuid,
    participant: Participant,
    formation_name: &str,
  ) -> Result<Option<Vec<String>>> {
    let prior = self.scenarios(tenant, participant).await?;
    if !prior.iter().any(|s| s == formation_name) {
      return Ok(None);
    }
    let scenarios: Vec<String> =
      prior.iter().filter(|s| *s != formation_name).cloned().collect();
    self.set_scenarios(tenant, participant, &scenarios).await?;
    Ok(Some(prior))
  }

  /// Write the `scenarios` label, deleting it when `scenarios` is empty.
  async fn set_scenarios(
    &self,
    tenant: Uuid,
    participant: Participant,
    scenarios: &[String],
  ) -> Result<()> {
    let (id, object_type) = participant;
    if scenarios.is_empty() {
      self
        .store
        .delete_label(tenant, object_type, id, SCENARIOS_KEY.to_owned())
        .await
        .map_err(Error::store)?;
    } else {
      self
        .store
        .upsert_label(Label::new(
          tenant,
          object_type,
          id,
          SCENARIOS_KEY,
          scenarios_to_value(scenarios),
        ))
        .await
        .map_err(Error::store)?;
    }
    Ok(())
  }

  /// Runtimes of a target tenant, which join a formation along with it.
  async fn tenant_runtimes(&self, target_tenant: Uuid) -> Result<Vec<Participant>> {
    Ok(
      self
        .store
        .list_runtimes_for_tenant(target_tenant)
        .await
        .map_err(Error::store)?
        .into_iter()
        .map(|r| (r.id, ResourceType::Runtime))
        .collect(),
    )
  }

  // ── Assign ────────────────────────────────────────────────────────────

  /// Assign an object to the formation `formation_name`, creating the
  /// formation from `template_id` if it does not exist yet.
  #[instrument(skip(self))]
  pub async fn assign_formation(
    &self,
    tenant: Uuid,
    object_type: ResourceType,
    object_id: &str,
    formation_name: &str,
    template_id: Option<Uuid>,
  ) -> Result<FormationOutcome> {
    let (resource, internal) = self.resolve(tenant, object_type, object_id).await?;

    let existing = self
      .store
      .get_formation_by_name(tenant, formation_name.to_owned())
      .await
      .map_err(Error::store)?;
    let template_id = match (&existing, template_id) {
      (Some(formation), Some(requested))
        if formation.formation_template_id != requested =>
      {
        return Err(Error::InvalidInput(format!(
          "formation {formation_name:?} is not built from template {requested}"
        )));
      }
      (Some(formation), _) => formation.formation_template_id,
      (None, Some(requested)) => requested,
      (None, None) => {
        return Err(Error::InvalidInput(format!(
          "formation {formation_name:?} does not exist and no template was given"
        )));
      }
    };
    let template = self.template(template_id).await?;
    if !template.allows(resource.resource_type, &resource.resource_subtype) {
      return Err(Error::InvalidInput(format!(
        "{} of type {:?} cannot join formations of template {}",
        resource.resource_type, resource.resource_subtype, template.name
      )));
    }

    // Constraints see the formation the resource would join; it is only
    // created once they pass.
    let pending = existing
      .clone()
      .unwrap_or_else(|| Formation::new(tenant, formation_name, template.id));
    let details = JoinPointDetails::AssignFormation(Self::assign_details(
      &resource, &pending, &template,
    ));
    self
      .engine
      .enforce_constraints(
        JoinPointLocation::pre(TargetOperation::AssignFormation),
        &details,
        template.id,
      )
      .await?;

    let mut rollback = Rollback::default();
    let formation = match existing {
      Some(formation) => formation,
      None => {
        let formation = self
          .create_formation(tenant, formation_name, template.id)
          .await?;
        rollback.created_formation = Some(formation.clone());
        formation
      }
    };

    let participants = match object_type {
      ResourceType::Tenant => {
        let already = self
          .store
          .list_scenario_assignments_for_target_tenant(internal)
          .await
          .map_err(Error::store)?
          .into_iter()
          .any(|a| a.tenant_id == tenant && a.scenario_name == formation.name);
        if !already {
          let created = self
            .store
            .create_scenario_assignment(ScenarioAssignment {
              scenario_name:    formation.name.clone(),
              tenant_id:        tenant,
              target_tenant_id: internal,
            })
            .await
            .map_err(Error::store)?;
          rollback.created_scenario = Some(created);
        }
        self.tenant_runtimes(internal).await?
      }
      _ => vec![(internal, object_type)],
    };

    let mut created = Vec::new();
    for participant in &participants {
      if let Some(prior) =
        self.add_scenario(tenant, *participant, &formation.name).await?
      {
        rollback.labels.push((tenant, *participant, prior));
      }
      let new = self.create_assignments(&formation, *participant).await?;
      rollback.created_assignments.extend(new.iter().map(|fa| fa.id));
      created.extend(new);
    }
    info!(
      formation = %formation.name,
      resource_type = %object_type,
      resource_id = %object_id,
      assignments = created.len(),
      "assigned to formation"
    );

    self
      .enforce_post(TargetOperation::AssignFormation, &details, template.id, rollback)
      .await?;

    self.process(created).await;
    self.outcome(formation, &participants).await
  }

  /// Create the missing `INITIAL` assignments between `participant` and
  /// every participant already in the formation, both ways, plus its
  /// self-assignment.
  async fn create_assignments(
    &self,
    formation: &Formation,
    participant: Participant,
  ) -> Result<Vec<FormationAssignment>> {
    let existing = self
      .store
      .list_assignments_for_formation(formation.id)
      .await
      .map_err(Error::store)?;
    let mut others = BTreeMap::new();
    for fa in &existing {
      others.insert(fa.source, fa.source_type);
      others.insert(fa.target, fa.target_type);
    }
    others.remove(&participant.0);

    let mut pairs = vec![(participant, participant)];
    for other in others {
      pairs.push((participant, other));
      pairs.push((other, participant));
    }

    let mut created = Vec::new();
    for (source, target) in pairs {
      if existing
        .iter()
        .any(|fa| fa.source == source.0 && fa.target == target.0)
      {
        continue;
      }
      let fa = self
        .store
        .create_formation_assignment(FormationAssignment::new(
          formation.id,
          formation.tenant_id,
          source,
          target,
        ))
        .await
        .map_err(Error::store)?;
      created.push(fa);
    }
    Ok(created)
  }

  // ── Unassign ──────────────────────────────────────────────────────────

  /// Remove an object from a formation. Assignments whose external cleanup
  /// fails stay in `DELETE_ERROR` for reconciliation.
  #[instrument(skip(self))]
  pub async fn unassign_formation(
    &self,
    tenant: Uuid,
    object_type: ResourceType,
    object_id: &str,
    formation_name: &str,
  ) -> Result<FormationOutcome> {
    let (resource, internal) = self.resolve(tenant, object_type, object_id).await?;
    let formation = self.formation_by_name(tenant, formation_name).await?;
    let template = self.template(formation.formation_template_id).await?;

    let details = JoinPointDetails::UnassignFormation(Self::assign_details(
      &resource, &formation, &template,
    ));
    self
      .engine
      .enforce_constraints(
        JoinPointLocation::pre(TargetOperation::UnassignFormation),
        &details,
        template.id,
      )
      .await?;

    let mut rollback = Rollback::default();
    let participants = match object_type {
      ResourceType::Tenant => {
        rollback.deleted_scenarios = self
          .store
          .list_scenario_assignments_for_target_tenant(internal)
          .await
          .map_err(Error::store)?
          .into_iter()
          .filter(|a| a.tenant_id == tenant && a.scenario_name == formation.name)
          .collect();
        self
          .store
          .delete_scenario_assignment(tenant, formation.name.clone())
          .await
          .map_err(Error::store)?;
        self.tenant_runtimes(internal).await?
      }
      _ => vec![(internal, object_type)],
    };

    let mut marked = BTreeMap::new();
    for participant in &participants {
      for mut fa in self
        .store
        .list_assignments_for_participant(formation.id, participant.0)
        .await
        .map_err(Error::store)?
      {
        if marked.contains_key(&fa.id) {
          continue;
        }
        rollback.updated_assignments.push(fa.clone());
        fa.state = fa.state.transition(FormationAssignmentState::Deleting)?;
        let fa = self
          .store
          .update_formation_assignment(fa)
          .await
          .map_err(Error::store)?;
        marked.insert(fa.id, fa);
      }
      if let Some(prior) = self
        .remove_scenario(tenant, *participant, &formation.name)
        .await?
      {
        rollback.labels.push((tenant, *participant, prior));
      }
    }
    info!(
      formation = %formation.name,
      resource_type = %object_type,
      resource_id = %object_id,
      assignments = marked.len(),
      "unassigned from formation"
    );

    self
      .enforce_post(TargetOperation::UnassignFormation, &details, template.id, rollback)
      .await?;

    self.process(marked.into_values().collect()).await;

    let remaining = self
      .store
      .list_assignments_for_formation(formation.id)
      .await
      .map_err(Error::store)?;
    if remaining.is_empty() {
      self
        .store
        .delete_formation(formation.id)
        .await
        .map_err(Error::store)?;
    }
    self.outcome(formation, &participants).await
  }

  // ── Post constraints ──────────────────────────────────────────────────

  /// Enforce the `POST` constraints of `operation`. When they fail, the
  /// writes recorded in `rollback` are undone and the failure is returned.
  async fn enforce_post(
    &self,
    operation: TargetOperation,
    details: &JoinPointDetails,
    template_id: Uuid,
    rollback: Rollback,
  ) -> Result<()> {
    let Err(failure) = self
      .engine
      .enforce_constraints(JoinPointLocation::post(operation), details, template_id)
      .await
    else {
      return Ok(());
    };
    warn!(%operation, error = %failure, "post constraints failed, rolling back");
    if let Err(e) = self.roll_back(rollback).await {
      error!(%operation, error = %e, "rolling back failed");
    }
    Err(failure)
  }

  async fn roll_back(&self, rollback: Rollback) -> Result<()> {
    for id in rollback.created_assignments {
      self
        .store
        .delete_formation_assignment(id)
        .await
        .map_err(Error::store)?;
    }
    for fa in rollback.updated_assignments {
      self
        .store
        .update_formation_assignment(fa)
        .await
        .map_err(Error::store)?;
    }
    for (tenant, participant, scenarios) in rollback.labels {
      self.set_scenarios(tenant, participant, &scenarios).await?;
    }
    if let Some(asa) = rollback.created_scenario {
      self
        .store
        .delete_scenario_assignment(asa.tenant_id, asa.scenario_name)
        .await
        .map_err(Error::store)?;
    }
    for asa in rollback.deleted_scenarios {
      self
        .store
        .create_scenario_assignment(asa)
        .await
        .map_err(Error::store)?;
    }
    if let Some(formation) = rollback.created_formation {
      self
        .store
        .delete_formation(formation.id)
        .await
        .map_err(Error::store)?;
    }
    if let Some(formation) = rollback.deleted_formation {
      self
        .store
        .create_formation(formation)
        .await
        .map_err(Error::store)?;
    }
    Ok(())
  }

  // ── Helpers ───────────────────────────────────────────────────────────

  async fn process(&self, assignments: Vec<FormationAssignment>) {
    if assignments.is_empty() {
      return;
    }
    let results = self
      .orchestrator
      .process_formation_assignments(assignments, self.concurrency)
      .await;
    for (id, result) in results {
      if let Err(e) = result {
        warn!(
          formation_assignment_id = %id,
          error = %e,
          "processing formation assignment failed, left for reconciliation"
        );
      }
    }
  }

  async fn outcome(
    &self,
    formation: Formation,
    participants: &[Participant],
  ) -> Result<FormationOutcome> {
    let exists = self
      .store
      .get_formation(formation.id)
      .await
      .map_err(Error::store)?
      .is_some();
    let mut assignments: Vec<FormationAssignment> = Vec::new();
    for (id, _) in participants {
      for fa in self
        .store
        .list_assignments_for_participant(formation.id, *id)
        .await
        .map_err(Error::store)?
      {
        if !assignments.iter().any(|a| a.id == fa.id) {
          assignments.push(fa);
        }
      }
    }
    Ok(FormationOutcome { formation, exists, assignments })
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::{
    constraint::{ConstraintScope, ConstraintType},
    destination::{DestinationCreator, DestinationError},
    operators::OperatorRegistry,
    resource::{Application, Runtime, Tenant},
    testing::{MemoryStore, RecordingDestinationService, design_time_config},
  };

  type Service = FormationService<MemoryStore, RecordingDestinationService>;

  struct Fixture {
    store:    Arc<MemoryStore>,
    dests:    Arc<RecordingDestinationService>,
    service:  Service,
    tenant:   Tenant,
    template: FormationTemplate,
  }

  async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::default());
    let dests = Arc::new(RecordingDestinationService::default());
    let engine = Arc::new(ConstraintEngine::new(
      store.clone(),
      OperatorRegistry::with_defaults(store.clone()),
    ));
    let orchestrator = Arc::new(AssignmentOrchestrator::new(
      store.clone(),
      engine.clone(),
      DestinationCreator::new(dests.clone()),
    ));
    let service = FormationService::new(store.clone(), engine, orchestrator);
    let tenant = store
      .create_tenant(MemoryStore::tenant("ext-1", Some("eu10")))
      .await
      .unwrap();
    let template = service
      .create_formation_template(FormationTemplate {
        id:                         Uuid::new_v4(),
        name:                       "side-by-side".into(),
        application_types:          vec!["erp".into(), "crm".into()],
        runtime_types:              vec![],
        callback_participant_types: vec![],
      })
      .await
      .unwrap();
    Fixture { store, dests, service, tenant, template }
  }

  impl Fixture {
    async fn application(&self, app_type: &str) -> Uuid {
      let app = self
        .store
        .create_application(Application {
          id:        Uuid::new_v4(),
          tenant_id: self.tenant.id,
          name:      app_type.into(),
        })
        .await
        .unwrap();
      self
        .store
        .upsert_label(Label::new(
          self.tenant.id,
          ResourceType::Application,
          app.id,
          "applicationType",
          json!(app_type),
        ))
        .await
        .unwrap();
      app.id
    }

    async fn assign(&self, app: Uuid, formation: &str) -> Result<FormationOutcome> {
      self
        .service
        .assign_formation(
          self.tenant.id,
          ResourceType::Application,
          &app.to_string(),
          formation,
          Some(self.template.id),
        )
        .await
    }

    async fn unassign(&self, app: Uuid, formation: &str) -> Result<FormationOutcome> {
      self
        .service
        .unassign_formation(
          self.tenant.id,
          ResourceType::Application,
          &app.to_string(),
          formation,
        )
        .await
    }

    async fn post_constraint(
      &self,
      name: &str,
      target_operation: TargetOperation,
      operator: &str,
      resource_subtype: &str,
    ) {
      self
        .service
        .create_formation_constraint(NewFormationConstraint {
          name: name.into(),
          constraint_type: ConstraintType::Post,
          target_operation,
          operator: operator.into(),
          resource_type: ResourceType::Application,
          resource_subtype: resource_subtype.into(),
          input_template: json!({}),
          constraint_scope: ConstraintScope::Global,
          priority: 0,
        })
        .await
        .unwrap();
    }

    /// Store a constraint on formation create/delete directly; no operator
    /// can evaluate it, so it always fails with a configuration error.
    async fn failing_crud_constraint(&self, target_operation: TargetOperation) {
      self
        .store
        .create_formation_constraint(FormationConstraint {
          id: Uuid::new_v4(),
          name: "broken-crud".into(),
          constraint_type: ConstraintType::Post,
          target_operation,
          operator: crate::operators::OperatorName::DoesNotContainResourceOfSubtype,
          resource_type: ResourceType::Formation,
          resource_subtype: "ANY".into(),
          input_template: json!({}),
          constraint_scope: ConstraintScope::Global,
          priority: 0,
          created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
    }

    async fn all_assignments(&self) -> Vec<FormationAssignment> {
      self
        .store
        .list_assignments_by_states(vec![
          FormationAssignmentState::Initial,
          FormationAssignmentState::Ready,
          FormationAssignmentState::ConfigPending,
          FormationAssignmentState::CreateError,
          FormationAssignmentState::Deleting,
          FormationAssignmentState::DeleteError,
        ])
        .await
        .unwrap()
    }

    async fn scenarios(&self, app: Uuid) -> Vec<String> {
      self
        .service
        .scenarios(self.tenant.id, (app, ResourceType::Application))
        .await
        .unwrap()
    }
  }

  #[tokio::test]
  async fn first_participant_gets_a_ready_self_assignment() {
    let f = fixture().await;
    let app = f.application("erp").await;

    let outcome = f.assign(app, "alpha").await.unwrap();

    assert!(outcome.exists);
    assert_eq!(outcome.assignments.len(), 1);
    let fa = &outcome.assignments[0];
    assert!(fa.is_self_loop());
    assert_eq!(fa.state, FormationAssignmentState::Ready);
    assert_eq!(f.scenarios(app).await, ["alpha"]);
  }

  #[tokio::test]
  async fn second_participant_is_connected_both_ways() {
    let f = fixture().await;
    let first = f.application("erp").await;
    let second = f.application("crm").await;
    f.assign(first, "alpha").await.unwrap();

    let outcome = f.assign(second, "alpha").await.unwrap();

    assert_eq!(outcome.assignments.len(), 3);
    assert!(outcome.assignments.iter().any(|fa| fa.source == first && fa.target == second));
    assert!(outcome.assignments.iter().any(|fa| fa.source == second && fa.target == first));
    assert!(
      outcome
        .assignments
        .iter()
        .all(|fa| fa.state == FormationAssignmentState::Ready)
    );
    let all = f
      .store
      .list_assignments_for_formation(outcome.formation.id)
      .await
      .unwrap();
    assert_eq!(all.len(), 4);
  }

  #[tokio::test]
  async fn reassigning_creates_nothing_new() {
    let f = fixture().await;
    let app = f.application("erp").await;
    let first = f.assign(app, "alpha").await.unwrap();
    let again = f.assign(app, "alpha").await.unwrap();

    assert_eq!(again.assignments.len(), 1);
    assert_eq!(again.assignments[0].id, first.assignments[0].id);
    assert_eq!(f.scenarios(app).await, ["alpha"]);
  }

  #[tokio::test]
  async fn template_restricts_participant_types() {
    let f = fixture().await;
    let app = f.application("hr").await;

    let err = f.assign(app, "alpha").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "{err}");
    assert!(
      f.store
        .get_formation_by_name(f.tenant.id, "alpha".into())
        .await
        .unwrap()
        .is_none()
    );
  }

  #[tokio::test]
  async fn unknown_formation_without_template_is_rejected() {
    let f = fixture().await;
    let app = f.application("erp").await;
    let err = f
      .service
      .assign_formation(f.tenant.id, ResourceType::Application, &app.to_string(), "alpha", None)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
  }

  #[tokio::test]
  async fn attached_constraint_blocks_second_formation_of_same_type() {
    let f = fixture().await;
    let constraint = f
      .service
      .create_formation_constraint(NewFormationConstraint {
        name:             "one-side-by-side-per-app".into(),
        constraint_type:  ConstraintType::Pre,
        target_operation: TargetOperation::AssignFormation,
        operator:         "IsNotAssignedToAnyFormationOfType".into(),
        resource_type:    ResourceType::Application,
        resource_subtype: "ANY".into(),
        input_template:   json!({}),
        constraint_scope: ConstraintScope::FormationType,
        priority:         0,
      })
      .await
      .unwrap();
    f.service
      .attach_constraint(f.template.id, constraint.id)
      .await
      .unwrap();
    let app = f.application("erp").await;
    f.assign(app, "alpha").await.unwrap();

    let err = f.assign(app, "beta").await.unwrap_err();

    match err {
      Error::ConstraintViolation { constraint, .. } => {
        assert_eq!(constraint, "one-side-by-side-per-app");
      }
      other => panic!("expected a constraint violation, got {other}"),
    }
    assert_eq!(f.scenarios(app).await, ["alpha"]);
    assert!(
      f.store
        .get_formation_by_name(f.tenant.id, "beta".into())
        .await
        .unwrap()
        .is_none()
    );
  }

  #[tokio::test]
  async fn unassign_removes_participant_and_keeps_others() {
    let f = fixture().await;
    let first = f.application("erp").await;
    let second = f.application("crm").await;
    f.assign(first, "alpha").await.unwrap();
    f.assign(second, "alpha").await.unwrap();

    let outcome = f.unassign(second, "alpha").await.unwrap();

    assert!(outcome.exists);
    assert!(outcome.assignments.is_empty());
    assert!(f.scenarios(second).await.is_empty());
    let all = f
      .store
      .list_assignments_for_formation(outcome.formation.id)
      .await
      .unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].is_self_loop() && all[0].source == first);
  }

  #[tokio::test]
  async fn unassigning_last_participant_deletes_formation() {
    let f = fixture().await;
    let app = f.application("erp").await;
    f.assign(app, "alpha").await.unwrap();

    let outcome = f.unassign(app, "alpha").await.unwrap();

    assert!(!outcome.exists);
    assert!(
      f.store
        .get_formation_by_name(f.tenant.id, "alpha".into())
        .await
        .unwrap()
        .is_none()
    );
  }

  #[tokio::test]
  async fn failed_cleanup_leaves_delete_error() {
    let f = fixture().await;
    let app = f.application("erp").await;
    let outcome = f.assign(app, "alpha").await.unwrap();

    // Give the self-assignment a destination and provision it.
    let mut fa = outcome.assignments[0].clone();
    fa.state = FormationAssignmentState::Initial;
    fa.value = Some(design_time_config(&["erp"]));
    f.store.update_formation_assignment(fa.clone()).await.unwrap();
    f.service
      .orchestrator()
      .process_formation_assignment(fa.clone())
      .await
      .unwrap();
    f.dests
      .fail_deletes_of("erp", DestinationError::transient(Some(503), "unavailable"));

    let outcome = f.unassign(app, "alpha").await.unwrap();

    assert!(outcome.exists);
    assert_eq!(outcome.assignments.len(), 1);
    assert_eq!(outcome.assignments[0].state, FormationAssignmentState::DeleteError);
    assert!(outcome.assignments[0].is_retryable());
  }

  #[tokio::test]
  async fn tenant_assignment_brings_its_runtimes() {
    let f = fixture().await;
    let target = f
      .store
      .create_tenant(MemoryStore::tenant("ext-target", Some("eu10")))
      .await
      .unwrap();
    let runtime = f
      .store
      .create_runtime(Runtime {
        id:        Uuid::new_v4(),
        tenant_id: target.id,
        name:      "kyma".into(),
      })
      .await
      .unwrap();

    let outcome = f
      .service
      .assign_formation(
        f.tenant.id,
        ResourceType::Tenant,
        "ext-target",
        "alpha",
        Some(f.template.id),
      )
      .await
      .unwrap();

    assert_eq!(outcome.assignments.len(), 1);
    assert_eq!(outcome.assignments[0].target, runtime.id);
    let asas = f
      .store
      .list_scenario_assignments_for_target_tenant(target.id)
      .await
      .unwrap();
    assert_eq!(asas.len(), 1);
    assert_eq!(asas[0].scenario_name, "alpha");

    f.service
      .unassign_formation(f.tenant.id, ResourceType::Tenant, "ext-target", "alpha")
      .await
      .unwrap();
    assert!(
      f.store
        .list_scenario_assignments_for_target_tenant(target.id)
        .await
        .unwrap()
        .is_empty()
    );
  }

  #[tokio::test]
  async fn formation_with_participants_cannot_be_deleted() {
    let f = fixture().await;
    let app = f.application("erp").await;
    f.assign(app, "alpha").await.unwrap();

    let err = f.service.delete_formation(f.tenant.id, "alpha").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
  }

  #[tokio::test]
  async fn empty_formation_can_be_deleted() {
    let f = fixture().await;
    f.service
      .create_formation(f.tenant.id, "alpha", f.template.id)
      .await
      .unwrap();

    f.service.delete_formation(f.tenant.id, "alpha").await.unwrap();
    let err = f.service.delete_formation(f.tenant.id, "alpha").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
  }

  #[tokio::test]
  async fn referenced_template_cannot_be_deleted() {
    let f = fixture().await;
    f.service
      .create_formation(f.tenant.id, "alpha", f.template.id)
      .await
      .unwrap();

    let err = f
      .service
      .delete_formation_template(f.template.id)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    f.service.delete_formation(f.tenant.id, "alpha").await.unwrap();
    f.service.delete_formation_template(f.template.id).await.unwrap();
  }

  #[tokio::test]
  async fn duplicate_formation_name_is_rejected() {
    let f = fixture().await;
    f.service
      .create_formation(f.tenant.id, "alpha", f.template.id)
      .await
      .unwrap();
    let err = f
      .service
      .create_formation(f.tenant.id, "alpha", f.template.id)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
  }

  #[tokio::test]
  async fn constraint_with_unknown_operator_is_rejected() {
    let f = fixture().await;
    let err = f
      .service
      .create_formation_constraint(NewFormationConstraint {
        name:             "bogus".into(),
        constraint_type:  ConstraintType::Pre,
        target_operation: TargetOperation::AssignFormation,
        operator:         "NoSuchOperator".into(),
        resource_type:    ResourceType::Application,
        resource_subtype: "ANY".into(),
        input_template:   json!({}),
        constraint_scope: ConstraintScope::Global,
        priority:         0,
      })
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
  }

  #[tokio::test]
  async fn post_assign_violation_undoes_the_assignment() {
    let f = fixture().await;
    f.post_constraint(
      "single-erp",
      TargetOperation::AssignFormation,
      "DoesNotContainResourceOfSubtype",
      "erp",
    )
    .await;
    let first = f.application("erp").await;
    let second = f.application("erp").await;
    f.assign(first, "alpha").await.unwrap();

    let err = f.assign(second, "alpha").await.unwrap_err();

    match err {
      Error::ConstraintViolation { constraint, .. } => {
        assert_eq!(constraint, "single-erp");
      }
      other => panic!("expected a constraint violation, got {other}"),
    }
    assert!(f.scenarios(second).await.is_empty());
    assert_eq!(f.scenarios(first).await, ["alpha"]);
    let all = f.all_assignments().await;
    assert_eq!(all.len(), 1);
    assert!(all[0].is_self_loop() && all[0].source == first);

    let summary = f.service.orchestrator().reconcile(4).await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(f.all_assignments().await.len(), 1);
  }

  #[tokio::test]
  async fn post_assign_violation_removes_formation_it_created() {
    let f = fixture().await;
    // After assigning, the application is always in a formation of the
    // template, so this constraint rejects every assignment.
    f.post_constraint(
      "never-assigned",
      TargetOperation::AssignFormation,
      "IsNotAssignedToAnyFormationOfType",
      "ANY",
    )
    .await;
    let app = f.application("erp").await;

    let err = f.assign(app, "alpha").await.unwrap_err();

    assert!(matches!(err, Error::ConstraintViolation { .. }), "{err}");
    assert!(
      f.store
        .get_formation_by_name(f.tenant.id, "alpha".into())
        .await
        .unwrap()
        .is_none()
    );
    assert!(f.scenarios(app).await.is_empty());
    assert!(f.all_assignments().await.is_empty());
  }

  #[tokio::test]
  async fn post_unassign_violation_restores_membership() {
    let f = fixture().await;
    let first = f.application("erp").await;
    let second = f.application("erp").await;
    f.assign(first, "alpha").await.unwrap();
    f.assign(second, "alpha").await.unwrap();
    f.post_constraint(
      "keep-erp-alone",
      TargetOperation::UnassignFormation,
      "DoesNotContainResourceOfSubtype",
      "erp",
    )
    .await;

    let err = f.unassign(second, "alpha").await.unwrap_err();

    assert!(matches!(err, Error::ConstraintViolation { .. }), "{err}");
    assert_eq!(f.scenarios(second).await, ["alpha"]);
    let all = f.all_assignments().await;
    assert_eq!(all.len(), 4);
    assert!(all.iter().all(|fa| fa.state == FormationAssignmentState::Ready));
    let summary = f.service.orchestrator().reconcile(4).await.unwrap();
    assert_eq!(summary.processed, 0);
  }

  #[tokio::test]
  async fn failed_post_create_leaves_no_formation() {
    let f = fixture().await;
    f.failing_crud_constraint(TargetOperation::CreateFormation).await;

    let err = f
      .service
      .create_formation(f.tenant.id, "alpha", f.template.id)
      .await
      .unwrap_err();

    assert!(matches!(err, Error::Configuration(_)), "{err}");
    assert!(
      f.store
        .get_formation_by_name(f.tenant.id, "alpha".into())
        .await
        .unwrap()
        .is_none()
    );
  }

  #[tokio::test]
  async fn failed_post_delete_restores_the_formation() {
    let f = fixture().await;
    let formation = f
      .service
      .create_formation(f.tenant.id, "alpha", f.template.id)
      .await
      .unwrap();
    f.failing_crud_constraint(TargetOperation::DeleteFormation).await;

    let err = f.service.delete_formation(f.tenant.id, "alpha").await.unwrap_err();

    assert!(matches!(err, Error::Configuration(_)), "{err}");
    let restored = f.store.get_formation(formation.id).await.unwrap().unwrap();
    assert_eq!(restored.name, "alpha");
  }
}
