//! The `ControlPlaneStore` trait.
//!
//! Implemented by storage backends (e.g. `compass-store-sqlite`). The
//! constraint engine, operators, orchestrator and formation service depend on
//! this abstraction, not on any concrete backend.

use std::future::Future;

use uuid::Uuid;

use crate::{
  Error,
  assignment::{FormationAssignment, FormationAssignmentState},
  constraint::{FormationConstraint, JoinPointLocation},
  formation::{Formation, FormationTemplate},
  label::{
    APPLICATION_TYPE_KEY, Label, RUNTIME_TYPE_KEY, ScenarioAssignment,
    string_value,
  },
  resource::{Application, ResourceType, Runtime, RuntimeContext, Tenant},
};

/// Abstraction over the control-plane persistence backend.
///
/// Every write is atomic on its own; callers never hold a write open across
/// an external call. All methods return `Send` futures so the trait can be
/// used from multi-threaded runtimes.
pub trait ControlPlaneStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Tenants ───────────────────────────────────────────────────────────

  fn create_tenant(
    &self,
    tenant: Tenant,
  ) -> impl Future<Output = Result<Tenant, Self::Error>> + Send + '_;

  fn get_tenant(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Tenant>, Self::Error>> + Send + '_;

  /// Resolve an external tenant ID to the internal one.
  fn get_internal_tenant(
    &self,
    external_id: String,
  ) -> impl Future<Output = Result<Option<Uuid>, Self::Error>> + Send + '_;

  fn list_tenants(
    &self,
  ) -> impl Future<Output = Result<Vec<Tenant>, Self::Error>> + Send + '_;

  // ── Participants ──────────────────────────────────────────────────────

  fn create_application(
    &self,
    application: Application,
  ) -> impl Future<Output = Result<Application, Self::Error>> + Send + '_;

  fn get_application(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Application>, Self::Error>> + Send + '_;

  /// Applications of `tenant` whose `scenarios` label contains any of
  /// `scenarios`.
  fn list_applications_by_scenarios(
    &self,
    tenant: Uuid,
    scenarios: Vec<String>,
  ) -> impl Future<Output = Result<Vec<Application>, Self::Error>> + Send + '_;

  fn create_runtime(
    &self,
    runtime: Runtime,
  ) -> impl Future<Output = Result<Runtime, Self::Error>> + Send + '_;

  fn get_runtime(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Runtime>, Self::Error>> + Send + '_;

  fn list_runtimes_for_tenant(
    &self,
    tenant: Uuid,
  ) -> impl Future<Output = Result<Vec<Runtime>, Self::Error>> + Send + '_;

  fn create_runtime_context(
    &self,
    context: RuntimeContext,
  ) -> impl Future<Output = Result<RuntimeContext, Self::Error>> + Send + '_;

  fn get_runtime_context(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<RuntimeContext>, Self::Error>> + Send + '_;

  // ── Labels ────────────────────────────────────────────────────────────

  fn get_label_by_key(
    &self,
    tenant: Uuid,
    object_type: ResourceType,
    object_id: Uuid,
    key: String,
  ) -> impl Future<Output = Result<Option<Label>, Self::Error>> + Send + '_;

  /// Insert the label or replace the value of the existing label with the
  /// same `(tenant, object_type, object_id, key)`.
  fn upsert_label(
    &self,
    label: Label,
  ) -> impl Future<Output = Result<Label, Self::Error>> + Send + '_;

  /// Returns `true` if a label was removed.
  fn delete_label(
    &self,
    tenant: Uuid,
    object_type: ResourceType,
    object_id: Uuid,
    key: String,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Automatic scenario assignments ────────────────────────────────────

  fn create_scenario_assignment(
    &self,
    assignment: ScenarioAssignment,
  ) -> impl Future<Output = Result<ScenarioAssignment, Self::Error>> + Send + '_;

  fn delete_scenario_assignment(
    &self,
    tenant: Uuid,
    scenario_name: String,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn list_scenario_assignments_for_target_tenant(
    &self,
    target_tenant: Uuid,
  ) -> impl Future<Output = Result<Vec<ScenarioAssignment>, Self::Error>> + Send + '_;

  // ── Formation templates ───────────────────────────────────────────────

  fn create_formation_template(
    &self,
    template: FormationTemplate,
  ) -> impl Future<Output = Result<FormationTemplate, Self::Error>> + Send + '_;

  fn get_formation_template(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<FormationTemplate>, Self::Error>> + Send + '_;

  fn list_formation_templates(
    &self,
  ) -> impl Future<Output = Result<Vec<FormationTemplate>, Self::Error>> + Send + '_;

  /// Delete a template and its constraint references. Returns `true` if a
  /// template was removed.
  fn delete_formation_template(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn attach_constraint(
    &self,
    template_id: Uuid,
    constraint_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn detach_constraint(
    &self,
    template_id: Uuid,
    constraint_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Formation constraints ─────────────────────────────────────────────

  fn create_formation_constraint(
    &self,
    constraint: FormationConstraint,
  ) -> impl Future<Output = Result<FormationConstraint, Self::Error>> + Send + '_;

  fn get_formation_constraint(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<FormationConstraint>, Self::Error>> + Send + '_;

  fn list_formation_constraints(
    &self,
  ) -> impl Future<Output = Result<Vec<FormationConstraint>, Self::Error>> + Send + '_;

  /// Delete a constraint and every template reference to it.
  fn delete_formation_constraint(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Constraints at `location` that are either global or attached to
  /// `template_id`. Order is unspecified.
  fn list_constraints_for_location(
    &self,
    location: JoinPointLocation,
    template_id: Option<Uuid>,
  ) -> impl Future<Output = Result<Vec<FormationConstraint>, Self::Error>> + Send + '_;

  // ── Formations ────────────────────────────────────────────────────────

  fn create_formation(
    &self,
    formation: Formation,
  ) -> impl Future<Output = Result<Formation, Self::Error>> + Send + '_;

  fn get_formation(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Formation>, Self::Error>> + Send + '_;

  fn get_formation_by_name(
    &self,
    tenant: Uuid,
    name: String,
  ) -> impl Future<Output = Result<Option<Formation>, Self::Error>> + Send + '_;

  fn list_formations_by_names(
    &self,
    names: Vec<String>,
    tenant: Uuid,
  ) -> impl Future<Output = Result<Vec<Formation>, Self::Error>> + Send + '_;

  fn update_formation(
    &self,
    formation: Formation,
  ) -> impl Future<Output = Result<Formation, Self::Error>> + Send + '_;

  fn delete_formation(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn count_formations_by_template(
    &self,
    template_id: Uuid,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Formation assignments ─────────────────────────────────────────────

  /// Fails if an assignment for the same `(formation, source, target)`
  /// already exists.
  fn create_formation_assignment(
    &self,
    assignment: FormationAssignment,
  ) -> impl Future<Output = Result<FormationAssignment, Self::Error>> + Send + '_;

  fn get_formation_assignment(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<FormationAssignment>, Self::Error>> + Send + '_;

  fn get_formation_assignment_by_source_and_target(
    &self,
    formation_id: Uuid,
    source: Uuid,
    target: Uuid,
  ) -> impl Future<Output = Result<Option<FormationAssignment>, Self::Error>> + Send + '_;

  fn list_assignments_for_formation(
    &self,
    formation_id: Uuid,
  ) -> impl Future<Output = Result<Vec<FormationAssignment>, Self::Error>> + Send + '_;

  /// Assignments of `formation_id` whose source or target is `participant`.
  fn list_assignments_for_participant(
    &self,
    formation_id: Uuid,
    participant: Uuid,
  ) -> impl Future<Output = Result<Vec<FormationAssignment>, Self::Error>> + Send + '_;

  fn list_assignments_by_states(
    &self,
    states: Vec<FormationAssignmentState>,
  ) -> impl Future<Output = Result<Vec<FormationAssignment>, Self::Error>> + Send + '_;

  /// Replace `state`, `value` and `error` of an existing assignment.
  fn update_formation_assignment(
    &self,
    assignment: FormationAssignment,
  ) -> impl Future<Output = Result<FormationAssignment, Self::Error>> + Send + '_;

  fn delete_formation_assignment(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}

/// The label-derived subtype of a participant: `applicationType` for
/// applications, `runtimeType` for runtimes, and the owning runtime's
/// `runtimeType` for runtime contexts. Empty when unlabelled.
pub async fn resource_subtype<S>(
  store: &S,
  tenant: Uuid,
  resource_type: ResourceType,
  id: Uuid,
) -> crate::Result<String>
where
  S: ControlPlaneStore,
{
  let (object_type, object_id, key) = match resource_type {
    ResourceType::Application => (resource_type, id, APPLICATION_TYPE_KEY),
    ResourceType::Runtime => (resource_type, id, RUNTIME_TYPE_KEY),
    ResourceType::RuntimeContext => {
      let context = store
        .get_runtime_context(id)
        .await
        .map_err(Error::store)?
        .ok_or_else(|| Error::not_found(format!("runtime context {id}")))?;
      (ResourceType::Runtime, context.runtime_id, RUNTIME_TYPE_KEY)
    }
    ResourceType::Tenant | ResourceType::Formation => return Ok(String::new()),
  };
  let label = store
    .get_label_by_key(tenant, object_type, object_id, key.to_owned())
    .await
    .map_err(Error::store)?;
  Ok(
    label
      .as_ref()
      .and_then(string_value)
      .map(str::to_owned)
      .unwrap_or_default(),
  )
}
