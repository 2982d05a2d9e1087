//! In-memory test doubles: a `ControlPlaneStore`, a recording destination
//! service, and a call-counting operator.

use std::{
  collections::{HashMap, HashSet},
  sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::{
  Result,
  assignment::{FormationAssignment, FormationAssignmentState},
  constraint::{ConstraintScope, FormationConstraint, JoinPointLocation},
  destination::{
    CertificateRequest, CertificateResponse, CreateOutcome, DestinationError,
    DestinationRequest, DestinationService, DestinationTarget,
  },
  formation::{Formation, FormationTemplate},
  label::{Label, SCENARIOS_KEY, ScenarioAssignment, scenarios_from_value},
  operators::{Operator, OperatorInput, OperatorName},
  resource::{
    Application, ResourceType, Runtime, RuntimeContext, Tenant, TenantType,
  },
  store::ControlPlaneStore,
};

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MemoryStoreError {
  #[error("conflict: {0}")]
  Conflict(String),
  #[error("{0} not found")]
  NotFound(String),
}

#[derive(Default)]
struct Inner {
  tenants:          HashMap<Uuid, Tenant>,
  applications:     HashMap<Uuid, Application>,
  runtimes:         HashMap<Uuid, Runtime>,
  runtime_contexts: HashMap<Uuid, RuntimeContext>,
  labels:           Vec<Label>,
  scenario_assigns: Vec<ScenarioAssignment>,
  templates:        HashMap<Uuid, FormationTemplate>,
  constraints:      HashMap<Uuid, FormationConstraint>,
  references:       HashSet<(Uuid, Uuid)>,
  formations:       HashMap<Uuid, Formation>,
  assignments:      HashMap<Uuid, FormationAssignment>,
}

impl Inner {
  fn scenarios_of(
    &self,
    tenant: Uuid,
    object_type: ResourceType,
    object_id: Uuid,
  ) -> Vec<String> {
    self
      .labels
      .iter()
      .find(|l| {
        l.tenant_id == tenant
          && l.object_type == object_type
          && l.object_id == object_id
          && l.key == SCENARIOS_KEY
      })
      .and_then(|l| scenarios_from_value(&l.value).ok())
      .unwrap_or_default()
  }
}

#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

impl MemoryStore {
  pub fn tenant(external_id: &str, region: Option<&str>) -> Tenant {
    Tenant {
      id:          Uuid::new_v4(),
      external_id: external_id.to_owned(),
      name:        external_id.to_owned(),
      tenant_type: TenantType::Subaccount,
      region:      region.map(str::to_owned),
      parent:      None,
    }
  }

  fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
    let mut inner = self.inner.lock().unwrap();
    f(&mut inner)
  }
}

type R<T> = std::result::Result<T, MemoryStoreError>;

impl ControlPlaneStore for MemoryStore {
  type Error = MemoryStoreError;

  async fn create_tenant(&self, tenant: Tenant) -> R<Tenant> {
    self.with(|i| {
      i.tenants.insert(tenant.id, tenant.clone());
      Ok(tenant)
    })
  }

  async fn get_tenant(&self, id: Uuid) -> R<Option<Tenant>> {
    self.with(|i| Ok(i.tenants.get(&id).cloned()))
  }

  async fn get_internal_tenant(&self, external_id: String) -> R<Option<Uuid>> {
    self.with(|i| {
      Ok(
        i.tenants
          .values()
          .find(|t| t.external_id == external_id)
          .map(|t| t.id),
      )
    })
  }

  async fn list_tenants(&self) -> R<Vec<Tenant>> {
    self.with(|i| Ok(i.tenants.values().cloned().collect()))
  }

  async fn create_application(&self, application: Application) -> R<Application> {
    self.with(|i| {
      i.applications.insert(application.id, application.clone());
      Ok(application)
    })
  }

  async fn get_application(&self, id: Uuid) -> R<Option<Application>> {
    self.with(|i| Ok(i.applications.get(&id).cloned()))
  }

  async fn list_applications_by_scenarios(
    &self,
    tenant: Uuid,
    scenarios: Vec<String>,
  ) -> R<Vec<Application>> {
    self.with(|i| {
      Ok(
        i.applications
          .values()
          .filter(|a| a.tenant_id == tenant)
          .filter(|a| {
            i.scenarios_of(tenant, ResourceType::Application, a.id)
              .iter()
              .any(|s| scenarios.contains(s))
          })
          .cloned()
          .collect(),
      )
    })
  }

  async fn create_runtime(&self, runtime: Runtime) -> R<Runtime> {
    self.with(|i| {
      i.runtimes.insert(runtime.id, runtime.clone());
      Ok(runtime)
    })
  }

  async fn get_runtime(&self, id: Uuid) -> R<Option<Runtime>> {
    self.with(|i| Ok(i.runtimes.get(&id).cloned()))
  }

  async fn list_runtimes_for_tenant(&self, tenant: Uuid) -> R<Vec<Runtime>> {
    self.with(|i| {
      Ok(
        i.runtimes
          .values()
          .filter(|r| r.tenant_id == tenant)
          .cloned()
          .collect(),
      )
    })
  }

  async fn create_runtime_context(
    &self,
    context: RuntimeContext,
  ) -> R<RuntimeContext> {
    self.with(|i| {
      i.runtime_contexts.insert(context.id, context.clone());
      Ok(context)
    })
  }

  async fn get_runtime_context(&self, id: Uuid) -> R<Option<RuntimeContext>> {
    self.with(|i| Ok(i.runtime_contexts.get(&id).cloned()))
  }

  async fn get_label_by_key(
    &self,
    tenant: Uuid,
    object_type: ResourceType,
    object_id: Uuid,
    key: String,
  ) -> R<Option<Label>> {
    self.with(|i| {
      Ok(
        i.labels
          .iter()
          .find(|l| {
            l.tenant_id == tenant
              && l.object_type == object_type
              && l.object_id == object_id
              && l.key == key
          })
          .cloned(),
      )
    })
  }

  async fn upsert_label(&self, label: Label) -> R<Label> {
    self.with(|i| {
      let existing = i.labels.iter_mut().find(|l| {
        l.tenant_id == label.tenant_id
          && l.object_type == label.object_type
          && l.object_id == label.object_id
          && l.key == label.key
      });
      match existing {
        Some(l) => {
          l.value = label.value;
          Ok(l.clone())
        }
        None => {
          i.labels.push(label.clone());
          Ok(label)
        }
      }
    })
  }

  async fn delete_label(
    &self,
    tenant: Uuid,
    object_type: ResourceType,
    object_id: Uuid,
    key: String,
  ) -> R<bool> {
    self.with(|i| {
      let before = i.labels.len();
      i.labels.retain(|l| {
        !(l.tenant_id == tenant
          && l.object_type == object_type
          && l.object_id == object_id
          && l.key == key)
      });
      Ok(i.labels.len() != before)
    })
  }

  async fn create_scenario_assignment(
    &self,
    assignment: ScenarioAssignment,
  ) -> R<ScenarioAssignment> {
    self.with(|i| {
      if i.scenario_assigns.iter().any(|a| {
        a.tenant_id == assignment.tenant_id
          && a.scenario_name == assignment.scenario_name
      }) {
        return Err(MemoryStoreError::Conflict(assignment.scenario_name));
      }
      i.scenario_assigns.push(assignment.clone());
      Ok(assignment)
    })
  }

  async fn delete_scenario_assignment(
    &self,
    tenant: Uuid,
    scenario_name: String,
  ) -> R<bool> {
    self.with(|i| {
      let before = i.scenario_assigns.len();
      i.scenario_assigns
        .retain(|a| !(a.tenant_id == tenant && a.scenario_name == scenario_name));
      Ok(i.scenario_assigns.len() != before)
    })
  }

  async fn list_scenario_assignments_for_target_tenant(
    &self,
    target_tenant: Uuid,
  ) -> R<Vec<ScenarioAssignment>> {
    self.with(|i| {
      Ok(
        i.scenario_assigns
          .iter()
          .filter(|a| a.target_tenant_id == target_tenant)
          .cloned()
          .collect(),
      )
    })
  }

  async fn create_formation_template(
    &self,
    template: FormationTemplate,
  ) -> R<FormationTemplate> {
    self.with(|i| {
      i.templates.insert(template.id, template.clone());
      Ok(template)
    })
  }

  async fn get_formation_template(
    &self,
    id: Uuid,
  ) -> R<Option<FormationTemplate>> {
    self.with(|i| Ok(i.templates.get(&id).cloned()))
  }

  async fn list_formation_templates(&self) -> R<Vec<FormationTemplate>> {
    self.with(|i| Ok(i.templates.values().cloned().collect()))
  }

  async fn delete_formation_template(&self, id: Uuid) -> R<bool> {
    self.with(|i| {
      i.references.retain(|(t, _)| *t != id);
      Ok(i.templates.remove(&id).is_some())
    })
  }

  async fn attach_constraint(
    &self,
    template_id: Uuid,
    constraint_id: Uuid,
  ) -> R<()> {
    self.with(|i| {
      i.references.insert((template_id, constraint_id));
      Ok(())
    })
  }

  async fn detach_constraint(
    &self,
    template_id: Uuid,
    constraint_id: Uuid,
  ) -> R<bool> {
    self.with(|i| Ok(i.references.remove(&(template_id, constraint_id))))
  }

  async fn create_formation_constraint(
    &self,
    constraint: FormationConstraint,
  ) -> R<FormationConstraint> {
    self.with(|i| {
      i.constraints.insert(constraint.id, constraint.clone());
      Ok(constraint)
    })
  }

  async fn get_formation_constraint(
    &self,
    id: Uuid,
  ) -> R<Option<FormationConstraint>> {
    self.with(|i| Ok(i.constraints.get(&id).cloned()))
  }

  async fn list_formation_constraints(&self) -> R<Vec<FormationConstraint>> {
    self.with(|i| Ok(i.constraints.values().cloned().collect()))
  }

  async fn delete_formation_constraint(&self, id: Uuid) -> R<bool> {
    self.with(|i| {
      i.references.retain(|(_, c)| *c != id);
      Ok(i.constraints.remove(&id).is_some())
    })
  }

  async fn list_constraints_for_location(
    &self,
    location: JoinPointLocation,
    template_id: Option<Uuid>,
  ) -> R<Vec<FormationConstraint>> {
    self.with(|i| {
      Ok(
        i.constraints
          .values()
          .filter(|c| c.location() == location)
          .filter(|c| {
            c.constraint_scope == ConstraintScope::Global
              || template_id
                .is_some_and(|t| i.references.contains(&(t, c.id)))
          })
          .cloned()
          .collect(),
      )
    })
  }

  async fn create_formation(&self, formation: Formation) -> R<Formation> {
    self.with(|i| {
      if i.formations.values().any(|f| {
        f.tenant_id == formation.tenant_id && f.name == formation.name
      }) {
        return Err(MemoryStoreError::Conflict(formation.name));
      }
      i.formations.insert(formation.id, formation.clone());
      Ok(formation)
    })
  }

  async fn get_formation(&self, id: Uuid) -> R<Option<Formation>> {
    self.with(|i| Ok(i.formations.get(&id).cloned()))
  }

  async fn get_formation_by_name(
    &self,
    tenant: Uuid,
    name: String,
  ) -> R<Option<Formation>> {
    self.with(|i| {
      Ok(
        i.formations
          .values()
          .find(|f| f.tenant_id == tenant && f.name == name)
          .cloned(),
      )
    })
  }

  async fn list_formations_by_names(
    &self,
    names: Vec<String>,
    tenant: Uuid,
  ) -> R<Vec<Formation>> {
    self.with(|i| {
      Ok(
        i.formations
          .values()
          .filter(|f| f.tenant_id == tenant && names.contains(&f.name))
          .cloned()
          .collect(),
      )
    })
  }

  async fn update_formation(&self, formation: Formation) -> R<Formation> {
    self.with(|i| match i.formations.get_mut(&formation.id) {
      Some(f) => {
        *f = formation.clone();
        Ok(formation)
      }
      None => Err(MemoryStoreError::NotFound(formation.id.to_string())),
    })
  }

  async fn delete_formation(&self, id: Uuid) -> R<bool> {
    self.with(|i| Ok(i.formations.remove(&id).is_some()))
  }

  async fn count_formations_by_template(&self, template_id: Uuid) -> R<usize> {
    self.with(|i| {
      Ok(
        i.formations
          .values()
          .filter(|f| f.formation_template_id == template_id)
          .count(),
      )
    })
  }

  async fn create_formation_assignment(
    &self,
    assignment: FormationAssignment,
  ) -> R<FormationAssignment> {
    self.with(|i| {
      if i.assignments.values().any(|a| {
        a.formation_id == assignment.formation_id
          && a.source == assignment.source
          && a.target == assignment.target
      }) {
        return Err(MemoryStoreError::Conflict(format!(
          "assignment {} -> {}",
          assignment.source, assignment.target
        )));
      }
      i.assignments.insert(assignment.id, assignment.clone());
      Ok(assignment)
    })
  }

  async fn get_formation_assignment(
    &self,
    id: Uuid,
  ) -> R<Option<FormationAssignment>> {
    self.with(|i| Ok(i.assignments.get(&id).cloned()))
  }

  async fn get_formation_assignment_by_source_and_target(
    &self,
    formation_id: Uuid,
    source: Uuid,
    target: Uuid,
  ) -> R<Option<FormationAssignment>> {
    self.with(|i| {
      Ok(
        i.assignments
          .values()
          .find(|a| {
            a.formation_id == formation_id
              && a.source == source
              && a.target == target
          })
          .cloned(),
      )
    })
  }

  async fn list_assignments_for_formation(
    &self,
    formation_id: Uuid,
  ) -> R<Vec<FormationAssignment>> {
    self.with(|i| {
      Ok(
        i.assignments
          .values()
          .filter(|a| a.formation_id == formation_id)
          .cloned()
          .collect(),
      )
    })
  }

  async fn list_assignments_for_participant(
    &self,
    formation_id: Uuid,
    participant: Uuid,
  ) -> R<Vec<FormationAssignment>> {
    self.with(|i| {
      Ok(
        i.assignments
          .values()
          .filter(|a| a.formation_id == formation_id && a.touches(participant))
          .cloned()
          .collect(),
      )
    })
  }

  async fn list_assignments_by_states(
    &self,
    states: Vec<FormationAssignmentState>,
  ) -> R<Vec<FormationAssignment>> {
    self.with(|i| {
      Ok(
        i.assignments
          .values()
          .filter(|a| states.contains(&a.state))
          .cloned()
          .collect(),
      )
    })
  }

  async fn update_formation_assignment(
    &self,
    assignment: FormationAssignment,
  ) -> R<FormationAssignment> {
    self.with(|i| match i.assignments.get_mut(&assignment.id) {
      Some(a) => {
        a.state = assignment.state;
        a.value = assignment.value.clone();
        a.error = assignment.error.clone();
        Ok(a.clone())
      }
      None => Err(MemoryStoreError::NotFound(assignment.id.to_string())),
    })
  }

  async fn delete_formation_assignment(&self, id: Uuid) -> R<bool> {
    self.with(|i| Ok(i.assignments.remove(&id).is_some()))
  }
}

// ─── Destination service ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
  CreateDestination(DestinationRequest),
  DeleteDestination(String),
  CreateCertificate(CertificateRequest),
  DeleteCertificate(String),
}

/// Records every call; failures are scripted per resource name and persist
/// until cleared.
#[derive(Default)]
pub struct RecordingDestinationService {
  calls:         Mutex<Vec<ServiceCall>>,
  create_errors: Mutex<HashMap<String, DestinationError>>,
  delete_errors: Mutex<HashMap<String, DestinationError>>,
}

impl RecordingDestinationService {
  pub fn calls(&self) -> Vec<ServiceCall> { self.calls.lock().unwrap().clone() }

  pub fn fail_creates_of(&self, name: &str, error: DestinationError) {
    self.create_errors.lock().unwrap().insert(name.to_owned(), error);
  }

  pub fn fail_deletes_of(&self, name: &str, error: DestinationError) {
    self.delete_errors.lock().unwrap().insert(name.to_owned(), error);
  }

  pub fn clear_failures(&self) {
    self.create_errors.lock().unwrap().clear();
    self.delete_errors.lock().unwrap().clear();
  }

  pub fn creates_of(&self, name: &str) -> usize {
    self
      .calls()
      .iter()
      .filter(|c| matches!(c, ServiceCall::CreateDestination(r) if r.name() == name))
      .count()
  }

  pub fn deletes_of(&self, name: &str) -> usize {
    self
      .calls()
      .iter()
      .filter(|c| matches!(c, ServiceCall::DeleteDestination(n) if n == name))
      .count()
  }

  pub fn last_destination_request(&self, name: &str) -> Option<DestinationRequest> {
    self.calls().into_iter().rev().find_map(|c| match c {
      ServiceCall::CreateDestination(r) if r.name() == name => Some(r),
      _ => None,
    })
  }

  fn record(&self, call: ServiceCall) {
    self.calls.lock().unwrap().push(call);
  }

  fn scripted(
    errors: &Mutex<HashMap<String, DestinationError>>,
    name: &str,
  ) -> std::result::Result<(), DestinationError> {
    match errors.lock().unwrap().get(name) {
      Some(e) => Err(e.clone()),
      None => Ok(()),
    }
  }
}

#[async_trait]
impl DestinationService for RecordingDestinationService {
  async fn create_destination(
    &self,
    _target: &DestinationTarget,
    request: &DestinationRequest,
  ) -> std::result::Result<CreateOutcome, DestinationError> {
    self.record(ServiceCall::CreateDestination(request.clone()));
    Self::scripted(&self.create_errors, request.name())?;
    Ok(CreateOutcome::Created)
  }

  async fn delete_destination(
    &self,
    _target: &DestinationTarget,
    name: &str,
  ) -> std::result::Result<(), DestinationError> {
    self.record(ServiceCall::DeleteDestination(name.to_owned()));
    Self::scripted(&self.delete_errors, name)
  }

  async fn create_certificate(
    &self,
    _target: &DestinationTarget,
    request: &CertificateRequest,
  ) -> std::result::Result<CertificateResponse, DestinationError> {
    self.record(ServiceCall::CreateCertificate(request.clone()));
    Self::scripted(&self.create_errors, &request.file_name)?;
    Ok(CertificateResponse {
      file_name:         format!("{}.pem", request.file_name),
      common_name:       request.common_name.clone(),
      certificate_chain: "-----BEGIN CERTIFICATE-----".into(),
    })
  }

  async fn delete_certificate(
    &self,
    _target: &DestinationTarget,
    name: &str,
  ) -> std::result::Result<(), DestinationError> {
    self.record(ServiceCall::DeleteCertificate(name.to_owned()));
    Self::scripted(&self.delete_errors, name)
  }
}

// ─── Operators ───────────────────────────────────────────────────────────────

/// Returns a fixed verdict under a chosen name and counts invocations.
pub struct CountingOperator {
  name:    OperatorName,
  verdict: bool,
  calls:   AtomicUsize,
}

impl CountingOperator {
  pub fn new(name: OperatorName, verdict: bool) -> Self {
    Self { name, verdict, calls: AtomicUsize::new(0) }
  }

  pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl Operator for CountingOperator {
  fn name(&self) -> OperatorName { self.name }

  async fn evaluate(&self, _input: &OperatorInput) -> Result<bool> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    Ok(self.verdict)
  }
}

/// A JSON configuration with one design-time destination per name.
pub fn design_time_config(names: &[&str]) -> Value {
  let destinations: Vec<Value> = names
    .iter()
    .map(|name| {
      serde_json::json!({
        "name": name,
        "url": "https://erp.example.com",
        "additionalProperties": { "correlationIds": "sap.erp" }
      })
    })
    .collect();
  serde_json::json!({ "destinations": destinations })
}
