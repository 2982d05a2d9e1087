//! Processing of formation assignments.
//!
//! Each assignment is driven in three steps. The pending direction is read
//! from the persisted state and the `SEND_NOTIFICATION` constraints are
//! checked; then the destination service is called with no store write in
//! flight; finally the outcome is written back in a single update. A crash
//! between the steps leaves the last committed state, from which the next
//! reconciliation pass re-derives the same work.

use std::sync::Arc;

use futures::{StreamExt as _, stream};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  assignment::{
    AssignmentError, AssignmentOperation, FormationAssignment,
    FormationAssignmentState, StatusReport,
  },
  constraint::{
    AssignmentNotificationDetails, JoinPointDetails, JoinPointLocation,
    TargetOperation,
  },
  destination::{
    AssignmentConfig, AssignmentContext, AuthSection, DestinationCreator,
    DestinationError, DestinationService, Provisioned,
    enrich_assignment_config_with_certificate_data,
  },
  engine::ConstraintEngine,
  formation::{Formation, FormationTemplate},
  label::{CORRELATION_IDS_KEY, string_value},
  resource::Tenant,
  store::{ControlPlaneStore, resource_subtype},
};

/// States reconciliation looks at.
const RECONCILABLE_STATES: [FormationAssignmentState; 4] = [
  FormationAssignmentState::Initial,
  FormationAssignmentState::CreateError,
  FormationAssignmentState::Deleting,
  FormationAssignmentState::DeleteError,
];

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
  pub processed: usize,
  pub failed:    usize,
}

/// What provisioning produced: the new assignment value and every failed
/// item.
struct ProvisionOutcome {
  value:    Option<Value>,
  failures: Vec<DestinationError>,
}

impl ProvisionOutcome {
  fn error(&self) -> Option<AssignmentError> {
    if self.failures.is_empty() {
      return None;
    }
    let message = self
      .failures
      .iter()
      .map(ToString::to_string)
      .collect::<Vec<_>>()
      .join("; ");
    Some(if self.failures.iter().all(DestinationError::is_terminal) {
      AssignmentError::client(message)
    } else {
      AssignmentError::technical(message)
    })
  }
}

/// The formation-side context of an assignment.
struct Scope {
  formation: Formation,
  template:  FormationTemplate,
  details:   AssignmentNotificationDetails,
}

pub struct AssignmentOrchestrator<S, D> {
  store:   Arc<S>,
  engine:  Arc<ConstraintEngine<S>>,
  creator: DestinationCreator<D>,
}

impl<S, D> AssignmentOrchestrator<S, D>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  pub fn new(
    store: Arc<S>,
    engine: Arc<ConstraintEngine<S>>,
    creator: DestinationCreator<D>,
  ) -> Self {
    Self { store, engine, creator }
  }

  pub fn creator(&self) -> &DestinationCreator<D> { &self.creator }

  // ── Loading ───────────────────────────────────────────────────────────

  async fn load(&self, id: Uuid) -> Result<FormationAssignment> {
    self
      .store
      .get_formation_assignment(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found(format!("formation assignment {id}")))
  }

  async fn tenant(&self, id: Uuid) -> Result<Tenant> {
    self
      .store
      .get_tenant(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found(format!("tenant {id}")))
  }

  async fn scope(
    &self,
    assignment: &FormationAssignment,
    operation: AssignmentOperation,
  ) -> Result<Scope> {
    let formation = self
      .store
      .get_formation(assignment.formation_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| {
        Error::not_found(format!("formation {}", assignment.formation_id))
      })?;
    let template = self
      .store
      .get_formation_template(formation.formation_template_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| {
        Error::not_found(format!(
          "formation template {}",
          formation.formation_template_id
        ))
      })?;
    let target_subtype = resource_subtype(
      self.store.as_ref(),
      assignment.tenant_id,
      assignment.target_type,
      assignment.target,
    )
    .await?;

    let details = AssignmentNotificationDetails {
      operation,
      formation_id: formation.id,
      formation_name: formation.name.clone(),
      formation_type: template.name.clone(),
      formation_template_id: template.id,
      assignment_id: assignment.id,
      tenant: assignment.tenant_id,
      source_type: assignment.source_type,
      source_id: assignment.source,
      target_type: assignment.target_type,
      target_id: assignment.target,
      target_subtype,
    };
    Ok(Scope { formation, template, details })
  }

  /// Correlation IDs the target participant asks for, from its
  /// `correlationIds` label.
  async fn target_correlation_ids(
    &self,
    assignment: &FormationAssignment,
  ) -> Result<Vec<String>> {
    let label = self
      .store
      .get_label_by_key(
        assignment.tenant_id,
        assignment.target_type,
        assignment.target,
        CORRELATION_IDS_KEY.to_owned(),
      )
      .await
      .map_err(Error::store)?;
    let Some(label) = label else { return Ok(Vec::new()) };
    let ids: Vec<String> = match &label.value {
      Value::Array(items) => {
        items.iter().filter_map(Value::as_str).map(str::to_owned).collect()
      }
      _ => string_value(&label)
        .map(|s| s.split(',').map(|id| id.trim().to_owned()).collect())
        .unwrap_or_default(),
    };
    Ok(ids.into_iter().filter(|id| !id.is_empty()).collect())
  }

  // ── Constraint gates ──────────────────────────────────────────────────

  /// `Ok(None)` when every constraint holds; `Ok(Some(_))` for a rejection
  /// to be recorded on the assignment; `Err` for infrastructure failures,
  /// which leave the assignment untouched.
  async fn gate(
    &self,
    location: JoinPointLocation,
    details: &JoinPointDetails,
    template_id: Uuid,
  ) -> Result<Option<Error>> {
    match self
      .engine
      .enforce_constraints(location, details, template_id)
      .await
    {
      Ok(()) => Ok(None),
      Err(
        rejection @ (Error::ConstraintViolation { .. } | Error::Configuration(_)),
      ) => Ok(Some(rejection)),
      Err(e) => Err(e),
    }
  }

  /// Record a rejection. Configuration errors are returned to the caller as
  /// well; violations are a regular outcome.
  async fn reject(
    &self,
    assignment: FormationAssignment,
    state: FormationAssignmentState,
    rejection: Error,
  ) -> Result<FormationAssignmentState> {
    warn!(
      formation_assignment_id = %assignment.id,
      error = %rejection,
      "formation assignment rejected"
    );
    let value = assignment.value.clone();
    let state = self
      .record(assignment, state, value, Some(AssignmentError::client(rejection.to_string())))
      .await?;
    match rejection {
      Error::Configuration(_) => Err(rejection),
      _ => Ok(state),
    }
  }

  /// Validate the transition and write the outcome.
  async fn record(
    &self,
    mut assignment: FormationAssignment,
    state: FormationAssignmentState,
    value: Option<Value>,
    error: Option<AssignmentError>,
  ) -> Result<FormationAssignmentState> {
    let from = assignment.state;
    assignment.state = from.transition(state)?;
    assignment.value = value;
    assignment.error = error;
    let id = assignment.id;
    self
      .store
      .update_formation_assignment(assignment)
      .await
      .map_err(Error::store)?;
    info!(
      formation_assignment_id = %id,
      from = %from,
      to = %state,
      "formation assignment state changed"
    );
    Ok(state)
  }

  /// Undo an outcome that failed its `POST` constraints. The assignment is
  /// written back from `before`, its state prior to processing, into the
  /// error state of its direction, keeping the current provisioning record.
  /// `value` is used when the row was deleted. Violations are a regular
  /// outcome; other failures are returned after recording.
  async fn roll_back(
    &self,
    before: FormationAssignment,
    value: Option<Value>,
    failure: Error,
  ) -> Result<FormationAssignmentState> {
    let state = match before.state {
      FormationAssignmentState::Deleting | FormationAssignmentState::DeleteError => {
        FormationAssignmentState::DeleteError
      }
      _ => FormationAssignmentState::CreateError,
    };
    let error = match &failure {
      Error::ConstraintViolation { .. } | Error::Configuration(_) => {
        AssignmentError::client(failure.to_string())
      }
      _ => AssignmentError::technical(failure.to_string()),
    };
    warn!(
      formation_assignment_id = %before.id,
      error = %failure,
      "post constraints failed, rolling back"
    );

    let current = self
      .store
      .get_formation_assignment(before.id)
      .await
      .map_err(Error::store)?;
    let (id, from) = (before.id, before.state);
    let mut assignment = before;
    assignment.state = from.transition(state)?;
    assignment.error = Some(error);
    match current {
      Some(current) => {
        assignment.value = current.value;
        self
          .store
          .update_formation_assignment(assignment)
          .await
          .map_err(Error::store)?;
      }
      None => {
        assignment.value = value;
        self
          .store
          .create_formation_assignment(assignment)
          .await
          .map_err(Error::store)?;
      }
    }
    info!(
      formation_assignment_id = %id,
      from = %from,
      to = %state,
      "formation assignment rolled back"
    );

    match failure {
      Error::ConstraintViolation { .. } => Ok(state),
      other => Err(other),
    }
  }

  // ── Processing ────────────────────────────────────────────────────────

  /// Drive one assignment according to its persisted state. Returns the
  /// resulting state; `DELETED` means the row is gone.
  #[instrument(skip_all, fields(formation_assignment_id = %assignment.id))]
  pub async fn process_formation_assignment(
    &self,
    assignment: FormationAssignment,
  ) -> Result<FormationAssignmentState> {
    let assignment = self.load(assignment.id).await?;
    match assignment.state.pending_operation() {
      None => {
        debug!(state = %assignment.state, "nothing to process");
        Ok(assignment.state)
      }
      Some(AssignmentOperation::Assign) => self.process_assign(assignment).await,
      Some(AssignmentOperation::Unassign) => {
        self.process_unassign(assignment).await
      }
    }
  }

  async fn process_assign(
    &self,
    assignment: FormationAssignment,
  ) -> Result<FormationAssignmentState> {
    let scope = self.scope(&assignment, AssignmentOperation::Assign).await?;
    let details = JoinPointDetails::SendNotification(scope.details.clone());

    if let Some(rejection) = self
      .gate(
        JoinPointLocation::pre(TargetOperation::SendNotification),
        &details,
        scope.template.id,
      )
      .await?
    {
      return self
        .reject(assignment, FormationAssignmentState::CreateError, rejection)
        .await;
    }

    let tenant = self.tenant(assignment.tenant_id).await?;
    let correlation_ids = self.target_correlation_ids(&assignment).await?;
    let outcome = self
      .provision(&assignment, &tenant, assignment.value.clone(), &correlation_ids)
      .await?;

    let awaits_callback = scope.template.awaits_callback(assignment.target_type)
      && !assignment.is_self_loop();
    let (state, error) = match outcome.error() {
      Some(error) => (FormationAssignmentState::CreateError, Some(error)),
      None if awaits_callback => (FormationAssignmentState::ConfigPending, None),
      None => (FormationAssignmentState::Ready, None),
    };
    let before = assignment.clone();
    let state = self.record(assignment, state, outcome.value, error).await?;
    if state.is_error() {
      return Ok(state);
    }

    if let Err(failure) = self
      .engine
      .enforce_constraints(
        JoinPointLocation::post(TargetOperation::SendNotification),
        &details,
        scope.template.id,
      )
      .await
    {
      return self.roll_back(before, None, failure).await;
    }
    Ok(state)
  }

  /// Create everything the configuration in `value` asks for that is not yet
  /// recorded. Design-time, basic and SAML items are attempted independently;
  /// what succeeds is recorded even when other items fail.
  async fn provision(
    &self,
    assignment: &FormationAssignment,
    tenant: &Tenant,
    value: Option<Value>,
    correlation_ids: &[String],
  ) -> Result<ProvisionOutcome> {
    let mut provisioned = Provisioned::from_value(value.as_ref())?;
    let config = match value.as_ref().map(AssignmentConfig::from_value) {
      None => AssignmentConfig::default(),
      Some(Ok(config)) => config,
      Some(Err(e)) => {
        return Ok(ProvisionOutcome { value, failures: vec![e] });
      }
    };
    if config.is_empty() {
      return Ok(ProvisionOutcome { value, failures: Vec::new() });
    }

    let ctx = AssignmentContext { assignment, tenant };
    let mut failures = Vec::new();
    let mut value = value.unwrap_or(Value::Null);

    if let Err(e) = self
      .creator
      .create_design_time_destinations(
        ctx,
        &config.destinations,
        correlation_ids,
        &mut provisioned,
      )
      .await
    {
      failures.push(e);
    }

    if let Some(basic) = config.basic_authentication() {
      if let Err(e) = self
        .creator
        .create_basic_credential_destinations(
          ctx,
          basic,
          correlation_ids,
          &mut provisioned,
        )
        .await
      {
        failures.push(e);
      }
    }

    if let Some(saml) = config.saml_assertion() {
      for (index, details) in saml.destinations.iter().enumerate() {
        let created = self
          .creator
          .create_certificate_in_destination_service(
            ctx,
            details,
            index,
            &mut provisioned,
          )
          .await;
        let (certificate, index) = match created {
          Ok(created) => created,
          Err(e) => {
            failures.push(e);
            continue;
          }
        };
        value = enrich_assignment_config_with_certificate_data(
          value,
          AuthSection::SamlAssertion,
          &certificate,
          index,
        );
        if let Err(e) = self
          .creator
          .create_saml_assertion_destination(
            ctx,
            details,
            saml,
            index,
            &certificate,
            correlation_ids,
            &mut provisioned,
          )
          .await
        {
          failures.push(e);
        }
      }
    }

    let value = provisioned.write_into(Some(value))?;
    Ok(ProvisionOutcome { value, failures })
  }

  async fn process_unassign(
    &self,
    assignment: FormationAssignment,
  ) -> Result<FormationAssignmentState> {
    let scope = self.scope(&assignment, AssignmentOperation::Unassign).await?;
    let details = JoinPointDetails::SendNotification(scope.details.clone());

    if let Some(rejection) = self
      .gate(
        JoinPointLocation::pre(TargetOperation::SendNotification),
        &details,
        scope.template.id,
      )
      .await?
    {
      return self
        .reject(assignment, FormationAssignmentState::DeleteError, rejection)
        .await;
    }

    let mut provisioned = Provisioned::from_value(assignment.value.as_ref())?;
    if let Err(errors) = self.creator.delete_destinations(&mut provisioned).await
    {
      let error = if errors.all_terminal() {
        AssignmentError::client(errors.to_string())
      } else {
        AssignmentError::technical(errors.to_string())
      };
      let value = provisioned.write_into(assignment.value.clone())?;
      return self
        .record(assignment, FormationAssignmentState::DeleteError, value, Some(error))
        .await;
    }

    assignment.state.transition(FormationAssignmentState::Deleted)?;
    let remaining = provisioned.write_into(assignment.value.clone())?;
    self
      .store
      .delete_formation_assignment(assignment.id)
      .await
      .map_err(Error::store)?;
    info!(formation_assignment_id = %assignment.id, "formation assignment deleted");

    if let Err(failure) = self
      .engine
      .enforce_constraints(
        JoinPointLocation::post(TargetOperation::SendNotification),
        &details,
        scope.template.id,
      )
      .await
    {
      return self.roll_back(assignment, remaining, failure).await;
    }
    self.delete_formation_if_empty(&scope.formation).await?;
    Ok(FormationAssignmentState::Deleted)
  }

  async fn delete_formation_if_empty(&self, formation: &Formation) -> Result<()> {
    let remaining = self
      .store
      .list_assignments_for_formation(formation.id)
      .await
      .map_err(Error::store)?;
    if remaining.is_empty()
      && self
        .store
        .delete_formation(formation.id)
        .await
        .map_err(Error::store)?
    {
      info!(formation = %formation.name, "deleted formation without participants");
    }
    Ok(())
  }

  // ── Status callbacks ──────────────────────────────────────────────────

  /// Apply a participant's asynchronous status report.
  #[instrument(skip(self, report), fields(reported = %report.state))]
  pub async fn handle_status_callback(
    &self,
    assignment_id: Uuid,
    report: StatusReport,
  ) -> Result<FormationAssignmentState> {
    use FormationAssignmentState::*;

    let assignment = self.load(assignment_id).await?;
    let before = assignment.clone();
    if matches!(report.state, Initial | Deleting) {
      return Err(unreportable(report.state));
    }
    assignment.state.transition(report.state)?;

    let operation = match report.state {
      DeleteError | Deleted => AssignmentOperation::Unassign,
      _ => AssignmentOperation::Assign,
    };
    let scope = self.scope(&assignment, operation).await?;
    let details = JoinPointDetails::NotificationStatusReturned(scope.details);
    self
      .engine
      .enforce_constraints(
        JoinPointLocation::pre(TargetOperation::NotificationStatusReturned),
        &details,
        scope.template.id,
      )
      .await?;

    let provisioned = Provisioned::from_value(assignment.value.as_ref())?;
    let value = match report.configuration {
      Some(configuration) => provisioned.write_into(Some(configuration))?,
      None => assignment.value.clone(),
    };
    let reported_error = || {
      AssignmentError::client(
        report
          .error
          .clone()
          .unwrap_or_else(|| format!("participant reported {}", report.state)),
      )
    };

    let state = match report.state {
      Ready => {
        let tenant = self.tenant(assignment.tenant_id).await?;
        let correlation_ids = self.target_correlation_ids(&assignment).await?;
        let outcome = self
          .provision(&assignment, &tenant, value, &correlation_ids)
          .await?;
        match outcome.error() {
          Some(error) => {
            self
              .record(assignment, CreateError, outcome.value, Some(error))
              .await?
          }
          None => self.record(assignment, Ready, outcome.value, None).await?,
        }
      }
      ConfigPending => self.record(assignment, ConfigPending, value, None).await?,
      CreateError | DeleteError => {
        self
          .record(assignment, report.state, value, Some(reported_error()))
          .await?
      }
      Deleted => self.process_unassign(assignment).await?,
      Initial | Deleting => return Err(unreportable(report.state)),
    };

    if state.is_error() {
      return Ok(state);
    }
    if let Err(failure) = self
      .engine
      .enforce_constraints(
        JoinPointLocation::post(TargetOperation::NotificationStatusReturned),
        &details,
        scope.template.id,
      )
      .await
    {
      let value = Provisioned::default().write_into(before.value.clone())?;
      return self.roll_back(before, value, failure).await;
    }
    Ok(state)
  }

  // ── Batches ───────────────────────────────────────────────────────────

  /// Process `assignments` with at most `concurrency` in flight. Every
  /// future has completed when this returns.
  pub async fn process_formation_assignments(
    &self,
    assignments: Vec<FormationAssignment>,
    concurrency: usize,
  ) -> Vec<(Uuid, Result<FormationAssignmentState>)> {
    stream::iter(assignments)
      .map(|assignment| async move {
        let id = assignment.id;
        (id, self.process_formation_assignment(assignment).await)
      })
      .buffer_unordered(concurrency.max(1))
      .collect()
      .await
  }

  /// Retry every assignment with pending work whose last error, if any, is
  /// technical.
  #[instrument(skip(self))]
  pub async fn reconcile(&self, concurrency: usize) -> Result<ReconcileSummary> {
    let candidates: Vec<_> = self
      .store
      .list_assignments_by_states(RECONCILABLE_STATES.to_vec())
      .await
      .map_err(Error::store)?
      .into_iter()
      .filter(FormationAssignment::is_retryable)
      .collect();
    if candidates.is_empty() {
      debug!("no formation assignments to reconcile");
      return Ok(ReconcileSummary::default());
    }

    let results = self
      .process_formation_assignments(candidates, concurrency)
      .await;
    let mut summary = ReconcileSummary::default();
    for (id, result) in results {
      summary.processed += 1;
      if let Err(e) = result {
        summary.failed += 1;
        warn!(formation_assignment_id = %id, error = %e, "reconciliation failed");
      }
    }
    info!(
      processed = summary.processed,
      failed = summary.failed,
      "reconciliation pass finished"
    );
    Ok(summary)
  }
}

fn unreportable(state: FormationAssignmentState) -> Error {
  Error::InvalidInput(format!("participants cannot report state {state}"))
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::{
    assignment::AssignmentErrorCode,
    constraint::{ConstraintScope, ConstraintType, NewFormationConstraint},
    destination::{DestinationError, PROVISIONED_KEY},
    label::Label,
    operators::OperatorRegistry,
    resource::ResourceType,
    testing::{MemoryStore, RecordingDestinationService, design_time_config},
  };

  struct Fixture {
    store:        Arc<MemoryStore>,
    service:      Arc<RecordingDestinationService>,
    orchestrator: AssignmentOrchestrator<MemoryStore, RecordingDestinationService>,
    tenant:       Tenant,
    formation:    Formation,
  }

  async fn fixture(callback_types: Vec<ResourceType>) -> Fixture {
    let store = Arc::new(MemoryStore::default());
    let service = Arc::new(RecordingDestinationService::default());
    let tenant = store
      .create_tenant(MemoryStore::tenant("ext-1", Some("eu10")))
      .await
      .unwrap();
    let template = store
      .create_formation_template(FormationTemplate {
        id:                         Uuid::new_v4(),
        name:                       "side-by-side".into(),
        application_types:          vec![],
        runtime_types:              vec![],
        callback_participant_types: callback_types,
      })
      .await
      .unwrap();
    let formation = store
      .create_formation(Formation::new(tenant.id, "alpha", template.id))
      .await
      .unwrap();
    let engine = Arc::new(ConstraintEngine::new(
      store.clone(),
      OperatorRegistry::with_defaults(store.clone()),
    ));
    let orchestrator = AssignmentOrchestrator::new(
      store.clone(),
      engine,
      DestinationCreator::new(service.clone()),
    );
    Fixture { store, service, orchestrator, tenant, formation }
  }

  impl Fixture {
    async fn assignment(
      &self,
      target_type: ResourceType,
      value: Option<Value>,
    ) -> FormationAssignment {
      let mut fa = FormationAssignment::new(
        self.formation.id,
        self.tenant.id,
        (Uuid::new_v4(), ResourceType::Application),
        (Uuid::new_v4(), target_type),
      );
      fa.value = value;
      self.store.create_formation_assignment(fa).await.unwrap()
    }

    async fn assignment_to(
      &self,
      target: Uuid,
      value: Option<Value>,
    ) -> FormationAssignment {
      let mut fa = FormationAssignment::new(
        self.formation.id,
        self.tenant.id,
        (Uuid::new_v4(), ResourceType::Application),
        (target, ResourceType::Application),
      );
      fa.value = value;
      self.store.create_formation_assignment(fa).await.unwrap()
    }

    /// Register a global `single-erp` constraint at the given join point,
    /// put another `erp` application into the formation and label `target`
    /// as `erp`, so that assignments targeting it violate the constraint.
    async fn single_erp(
      &self,
      constraint_type: ConstraintType,
      target_operation: TargetOperation,
      target: Uuid,
    ) {
      let registry = OperatorRegistry::with_defaults(self.store.clone());
      let constraint = NewFormationConstraint {
        name: "single-erp".into(),
        constraint_type,
        target_operation,
        operator: "DoesNotContainResourceOfSubtype".into(),
        resource_type: ResourceType::Application,
        resource_subtype: "erp".into(),
        input_template: json!({}),
        constraint_scope: ConstraintScope::Global,
        priority: 0,
      }
      .into_constraint(&registry)
      .unwrap();
      self.store.create_formation_constraint(constraint).await.unwrap();

      let other = Uuid::new_v4();
      for (id, key, value) in [
        (other, "scenarios", json!([self.formation.name])),
        (other, "applicationType", json!("erp")),
        (target, "applicationType", json!("erp")),
      ] {
        self
          .store
          .upsert_label(Label::new(self.tenant.id, ResourceType::Application, id, key, value))
          .await
          .unwrap();
      }
      self
        .store
        .create_application(crate::resource::Application {
          id:        other,
          tenant_id: self.tenant.id,
          name:      "other".into(),
        })
        .await
        .unwrap();
    }

    async fn reload(&self, id: Uuid) -> Option<FormationAssignment> {
      self.store.get_formation_assignment(id).await.unwrap()
    }

    async fn set_state(&self, id: Uuid, state: FormationAssignmentState) {
      let mut fa = self.reload(id).await.unwrap();
      fa.state = state;
      self.store.update_formation_assignment(fa).await.unwrap();
    }
  }

  #[tokio::test]
  async fn assignment_without_configuration_becomes_ready() {
    let f = fixture(vec![]).await;
    let fa = f.assignment(ResourceType::Application, None).await;

    let state = f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();

    assert_eq!(state, FormationAssignmentState::Ready);
    assert_eq!(f.reload(fa.id).await.unwrap().state, FormationAssignmentState::Ready);
    assert!(f.service.calls().is_empty());
  }

  #[tokio::test]
  async fn callback_participants_wait_in_config_pending() {
    let f = fixture(vec![ResourceType::Runtime]).await;
    let fa = f.assignment(ResourceType::Runtime, None).await;

    let state = f.orchestrator.process_formation_assignment(fa).await.unwrap();
    assert_eq!(state, FormationAssignmentState::ConfigPending);
  }

  #[tokio::test]
  async fn ready_assignments_are_left_alone() {
    let f = fixture(vec![]).await;
    let fa = f.assignment(ResourceType::Application, None).await;
    f.set_state(fa.id, FormationAssignmentState::Ready).await;

    let state = f.orchestrator.process_formation_assignment(fa).await.unwrap();
    assert_eq!(state, FormationAssignmentState::Ready);
  }

  #[tokio::test]
  async fn destinations_are_provisioned_and_recorded() {
    let f = fixture(vec![]).await;
    let fa = f
      .assignment(ResourceType::Application, Some(design_time_config(&["first", "second"])))
      .await;

    let state = f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();

    assert_eq!(state, FormationAssignmentState::Ready);
    let stored = f.reload(fa.id).await.unwrap();
    let provisioned = Provisioned::from_value(stored.value.as_ref()).unwrap();
    assert_eq!(provisioned.destinations.len(), 2);
    assert_eq!(stored.value.unwrap()["destinations"][0]["name"], "first");
  }

  #[tokio::test]
  async fn retry_from_create_error_does_not_duplicate_destinations() {
    let f = fixture(vec![]).await;
    let fa = f
      .assignment(ResourceType::Application, Some(design_time_config(&["first", "second"])))
      .await;
    f.service
      .fail_creates_of("second", DestinationError::transient(Some(503), "unavailable"));

    let state = f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();
    assert_eq!(state, FormationAssignmentState::CreateError);
    let stored = f.reload(fa.id).await.unwrap();
    assert_eq!(stored.error.as_ref().unwrap().code, AssignmentErrorCode::TechnicalError);
    assert!(stored.is_retryable());
    let provisioned = Provisioned::from_value(stored.value.as_ref()).unwrap();
    assert_eq!(provisioned.destinations.len(), 1);

    f.service.clear_failures();
    let state = f.orchestrator.process_formation_assignment(stored).await.unwrap();

    assert_eq!(state, FormationAssignmentState::Ready);
    assert_eq!(f.service.creates_of("first"), 1);
    assert_eq!(f.service.creates_of("second"), 2);
    let stored = f.reload(fa.id).await.unwrap();
    assert!(stored.error.is_none());
  }

  #[tokio::test]
  async fn terminal_failures_are_client_errors_and_not_reconciled() {
    let f = fixture(vec![]).await;
    let fa = f
      .assignment(ResourceType::Application, Some(design_time_config(&["bad name"])))
      .await;

    let state = f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();
    assert_eq!(state, FormationAssignmentState::CreateError);
    let stored = f.reload(fa.id).await.unwrap();
    assert_eq!(stored.error.as_ref().unwrap().code, AssignmentErrorCode::ClientError);

    let summary = f.orchestrator.reconcile(4).await.unwrap();
    assert_eq!(summary.processed, 0);
  }

  #[tokio::test]
  async fn unassign_reports_failed_index_and_deletes_the_rest() {
    let f = fixture(vec![]).await;
    let fa = f
      .assignment(ResourceType::Application, Some(design_time_config(&["first", "second"])))
      .await;
    f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();
    f.set_state(fa.id, FormationAssignmentState::Deleting).await;
    f.service
      .fail_deletes_of("first", DestinationError::transient(Some(500), "boom"));

    let state = f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();

    assert_eq!(state, FormationAssignmentState::DeleteError);
    assert_eq!(f.service.deletes_of("first"), 1);
    assert_eq!(f.service.deletes_of("second"), 1);
    let stored = f.reload(fa.id).await.unwrap();
    let message = &stored.error.as_ref().unwrap().message;
    assert!(message.contains("index 0"), "{message}");
    assert!(!message.contains("index 1"), "{message}");
    let provisioned = Provisioned::from_value(stored.value.as_ref()).unwrap();
    let names: Vec<_> = provisioned.destinations.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["first"]);
  }

  #[tokio::test]
  async fn retried_unassign_only_deletes_what_is_left() {
    let f = fixture(vec![]).await;
    let fa = f
      .assignment(ResourceType::Application, Some(design_time_config(&["first", "second"])))
      .await;
    f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();
    f.set_state(fa.id, FormationAssignmentState::Deleting).await;
    f.service
      .fail_deletes_of("first", DestinationError::transient(Some(500), "boom"));
    f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();

    f.service.clear_failures();
    let state = f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();

    assert_eq!(state, FormationAssignmentState::Deleted);
    assert_eq!(f.service.deletes_of("first"), 2);
    assert_eq!(f.service.deletes_of("second"), 1);
    assert!(f.reload(fa.id).await.is_none());
  }

  #[tokio::test]
  async fn last_deleted_assignment_removes_the_formation() {
    let f = fixture(vec![]).await;
    let fa = f.assignment(ResourceType::Application, None).await;
    f.set_state(fa.id, FormationAssignmentState::Deleting).await;

    let state = f.orchestrator.process_formation_assignment(fa).await.unwrap();

    assert_eq!(state, FormationAssignmentState::Deleted);
    assert!(f.store.get_formation(f.formation.id).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn send_notification_violation_is_recorded_as_client_error() {
    let f = fixture(vec![]).await;
    let target = Uuid::new_v4();
    f.single_erp(ConstraintType::Pre, TargetOperation::SendNotification, target)
      .await;
    let fa = f.assignment_to(target, None).await;

    let state = f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();

    assert_eq!(state, FormationAssignmentState::CreateError);
    let stored = f.reload(fa.id).await.unwrap();
    let error = stored.error.unwrap();
    assert_eq!(error.code, AssignmentErrorCode::ClientError);
    assert!(error.message.contains("single-erp"), "{}", error.message);
  }

  #[tokio::test]
  async fn post_send_notification_violation_rolls_back_to_create_error() {
    let f = fixture(vec![]).await;
    let target = Uuid::new_v4();
    f.single_erp(ConstraintType::Post, TargetOperation::SendNotification, target)
      .await;
    let fa = f.assignment_to(target, Some(design_time_config(&["first"]))).await;

    let state = f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();

    assert_eq!(state, FormationAssignmentState::CreateError);
    let stored = f.reload(fa.id).await.unwrap();
    let error = stored.error.as_ref().unwrap();
    assert_eq!(error.code, AssignmentErrorCode::ClientError);
    assert!(error.message.contains("single-erp"), "{}", error.message);
    // What was created stays recorded for a later unassign.
    let provisioned = Provisioned::from_value(stored.value.as_ref()).unwrap();
    assert_eq!(provisioned.destinations.len(), 1);

    let summary = f.orchestrator.reconcile(4).await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(f.reload(fa.id).await.unwrap().state, FormationAssignmentState::CreateError);
  }

  #[tokio::test]
  async fn post_send_notification_violation_keeps_unassigned_row() {
    let f = fixture(vec![]).await;
    let target = Uuid::new_v4();
    let fa = f.assignment_to(target, Some(design_time_config(&["first"]))).await;
    f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();
    f.set_state(fa.id, FormationAssignmentState::Deleting).await;
    f.single_erp(ConstraintType::Post, TargetOperation::SendNotification, target)
      .await;

    let state = f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();

    assert_eq!(state, FormationAssignmentState::DeleteError);
    assert_eq!(f.service.deletes_of("first"), 1);
    let stored = f.reload(fa.id).await.unwrap();
    assert_eq!(stored.error.as_ref().unwrap().code, AssignmentErrorCode::ClientError);
    assert!(Provisioned::from_value(stored.value.as_ref()).unwrap().is_empty());
    assert!(f.store.get_formation(f.formation.id).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn post_status_returned_violation_rolls_back_callback() {
    let f = fixture(vec![ResourceType::Application]).await;
    let target = Uuid::new_v4();
    let fa = f.assignment_to(target, None).await;
    let state = f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();
    assert_eq!(state, FormationAssignmentState::ConfigPending);
    f.single_erp(
      ConstraintType::Post,
      TargetOperation::NotificationStatusReturned,
      target,
    )
    .await;

    let state = f
      .orchestrator
      .handle_status_callback(fa.id, StatusReport {
        state:         FormationAssignmentState::Ready,
        configuration: Some(design_time_config(&["from-callback"])),
        error:         None,
      })
      .await
      .unwrap();

    assert_eq!(state, FormationAssignmentState::CreateError);
    let stored = f.reload(fa.id).await.unwrap();
    assert_eq!(stored.error.as_ref().unwrap().code, AssignmentErrorCode::ClientError);
    let provisioned = Provisioned::from_value(stored.value.as_ref()).unwrap();
    assert_eq!(provisioned.destinations.len(), 1);
  }

  #[tokio::test]
  async fn ready_callback_provisions_reported_configuration() {
    let f = fixture(vec![ResourceType::Runtime]).await;
    let fa = f.assignment(ResourceType::Runtime, None).await;
    f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();

    let state = f
      .orchestrator
      .handle_status_callback(fa.id, StatusReport {
        state:         FormationAssignmentState::Ready,
        configuration: Some(design_time_config(&["from-callback"])),
        error:         None,
      })
      .await
      .unwrap();

    assert_eq!(state, FormationAssignmentState::Ready);
    assert_eq!(f.service.creates_of("from-callback"), 1);
    let stored = f.reload(fa.id).await.unwrap();
    assert!(stored.value.unwrap().get(PROVISIONED_KEY).is_some());
  }

  #[tokio::test]
  async fn callback_keeps_provisioning_record() {
    let f = fixture(vec![ResourceType::Runtime]).await;
    let fa = f
      .assignment(ResourceType::Runtime, Some(design_time_config(&["first"])))
      .await;
    f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();

    f.orchestrator
      .handle_status_callback(fa.id, StatusReport {
        state:         FormationAssignmentState::ConfigPending,
        configuration: Some(json!({ "note": "still working" })),
        error:         None,
      })
      .await
      .unwrap();

    let stored = f.reload(fa.id).await.unwrap();
    let value = stored.value.unwrap();
    assert_eq!(value["note"], "still working");
    let provisioned = Provisioned::from_value(Some(&value)).unwrap();
    assert_eq!(provisioned.destinations.len(), 1);
  }

  #[tokio::test]
  async fn error_callback_is_recorded_as_client_error() {
    let f = fixture(vec![ResourceType::Runtime]).await;
    let fa = f.assignment(ResourceType::Runtime, None).await;
    f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();

    let state = f
      .orchestrator
      .handle_status_callback(fa.id, StatusReport {
        state:         FormationAssignmentState::CreateError,
        configuration: None,
        error:         Some("tenant mapping failed".into()),
      })
      .await
      .unwrap();

    assert_eq!(state, FormationAssignmentState::CreateError);
    let stored = f.reload(fa.id).await.unwrap();
    assert_eq!(stored.error.unwrap(), AssignmentError::client("tenant mapping failed"));
  }

  #[tokio::test]
  async fn callback_rejects_invalid_transition() {
    let f = fixture(vec![]).await;
    let fa = f.assignment(ResourceType::Application, None).await;
    f.orchestrator.process_formation_assignment(fa.clone()).await.unwrap();

    let err = f
      .orchestrator
      .handle_status_callback(fa.id, StatusReport {
        state:         FormationAssignmentState::Ready,
        configuration: None,
        error:         None,
      })
      .await
      .unwrap_err();
    assert!(matches!(err, Error::InvalidStateTransition { .. }));
  }

  #[tokio::test]
  async fn batch_processing_completes_every_assignment() {
    let f = fixture(vec![]).await;
    let mut batch = Vec::new();
    for _ in 0..5 {
      batch.push(f.assignment(ResourceType::Application, None).await);
    }

    let results = f.orchestrator.process_formation_assignments(batch, 2).await;

    assert_eq!(results.len(), 5);
    for (_, result) in results {
      assert_eq!(result.unwrap(), FormationAssignmentState::Ready);
    }
  }

  #[tokio::test]
  async fn reconcile_retries_technical_errors_only() {
    let f = fixture(vec![]).await;
    let pending = f.assignment(ResourceType::Application, None).await;
    let technical = f.assignment(ResourceType::Application, None).await;
    let client = f.assignment(ResourceType::Application, None).await;
    for (fa, error) in [
      (&technical, AssignmentError::technical("503")),
      (&client, AssignmentError::client("bad name")),
    ] {
      let mut stored = f.reload(fa.id).await.unwrap();
      stored.state = FormationAssignmentState::CreateError;
      stored.error = Some(error);
      f.store.update_formation_assignment(stored).await.unwrap();
    }

    let summary = f.orchestrator.reconcile(4).await.unwrap();

    assert_eq!(summary, ReconcileSummary { processed: 2, failed: 0 });
    assert_eq!(f.reload(pending.id).await.unwrap().state, FormationAssignmentState::Ready);
    assert_eq!(f.reload(technical.id).await.unwrap().state, FormationAssignmentState::Ready);
    assert_eq!(
      f.reload(client.id).await.unwrap().state,
      FormationAssignmentState::CreateError
    );
  }
}
