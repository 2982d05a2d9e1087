//! [`SqliteStore`]: the SQLite implementation of [`ControlPlaneStore`].

use std::path::Path;

use compass_core::{
  assignment::{FormationAssignment, FormationAssignmentState},
  constraint::{ConstraintScope, FormationConstraint, JoinPointLocation},
  formation::{Formation, FormationTemplate},
  label::{Label, SCENARIOS_KEY, ScenarioAssignment},
  resource::{Application, ResourceType, Runtime, RuntimeContext, Tenant},
  store::ControlPlaneStore,
};
use rusqlite::{OptionalExtension as _, Row, types::Value as SqlValue};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    ASSIGNMENT_COLUMNS, CONSTRAINT_COLUMNS, FORMATION_COLUMNS, LABEL_COLUMNS,
    RawAssignment, RawConstraint, RawFormation, RawLabel, RawParticipant,
    RawRuntimeContext, RawTemplate, RawTenant, TEMPLATE_COLUMNS, TENANT_COLUMNS,
    decode_uuid, encode_dt, encode_enum, encode_json, encode_list, encode_uuid,
  },
  schema::SCHEMA,
};

type RowMapper<T> = fn(&Row<'_>) -> rusqlite::Result<T>;

fn text(s: impl Into<String>) -> SqlValue { SqlValue::Text(s.into()) }

fn opt_text(s: Option<String>) -> SqlValue {
  s.map_or(SqlValue::Null, SqlValue::Text)
}

fn id(id: Uuid) -> SqlValue { text(encode_uuid(id)) }

fn is_unique_violation(e: &tokio_rusqlite::Error) -> bool {
  matches!(
    e,
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(failure, _))
      if failure.code == rusqlite::ErrorCode::ConstraintViolation
  )
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Compass control-plane store backed by a single SQLite file.
///
/// Clones share the same reference-counted connection.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Query helpers ─────────────────────────────────────────────────────

  async fn query_opt<T>(
    &self,
    sql: String,
    params: Vec<SqlValue>,
    map: RowMapper<T>,
  ) -> Result<Option<T>>
  where
    T: Send + 'static,
  {
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(
            conn
              .query_row(&sql, rusqlite::params_from_iter(params), map)
              .optional()?,
          )
        })
        .await?,
    )
  }

  async fn query_all<T>(
    &self,
    sql: String,
    params: Vec<SqlValue>,
    map: RowMapper<T>,
  ) -> Result<Vec<T>>
  where
    T: Send + 'static,
  {
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(&sql)?;
          let rows = stmt
            .query_map(rusqlite::params_from_iter(params), map)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(rows)
        })
        .await?,
    )
  }

  /// Run one statement and return the number of changed rows. A uniqueness
  /// violation becomes [`Error::Conflict`] naming `what`.
  async fn execute(
    &self,
    sql: &'static str,
    params: Vec<SqlValue>,
    what: impl FnOnce() -> String,
  ) -> Result<usize> {
    self
      .conn
      .call(move |conn| {
        Ok(conn.execute(sql, rusqlite::params_from_iter(params))?)
      })
      .await
      .map_err(|e| {
        if is_unique_violation(&e) {
          Error::Conflict(what())
        } else {
          Error::Database(e)
        }
      })
  }

  async fn select_assignment(&self, assignment_id: Uuid) -> Result<Option<FormationAssignment>> {
    self
      .query_opt(
        format!("SELECT {ASSIGNMENT_COLUMNS} FROM formation_assignments WHERE id = ?1"),
        vec![id(assignment_id)],
        RawAssignment::from_row,
      )
      .await?
      .map(RawAssignment::into_assignment)
      .transpose()
  }

  async fn select_assignments(
    &self,
    condition: &str,
    params: Vec<SqlValue>,
  ) -> Result<Vec<FormationAssignment>> {
    self
      .query_all(
        format!(
          "SELECT {ASSIGNMENT_COLUMNS} FROM formation_assignments \
           WHERE {condition} ORDER BY rowid"
        ),
        params,
        RawAssignment::from_row,
      )
      .await?
      .into_iter()
      .map(RawAssignment::into_assignment)
      .collect()
  }

  async fn select_formations(
    &self,
    condition: &str,
    params: Vec<SqlValue>,
  ) -> Result<Vec<Formation>> {
    self
      .query_all(
        format!(
          "SELECT {FORMATION_COLUMNS} FROM formations WHERE {condition} ORDER BY rowid"
        ),
        params,
        RawFormation::from_row,
      )
      .await?
      .into_iter()
      .map(RawFormation::into_formation)
      .collect()
  }

  async fn select_constraints(
    &self,
    condition: &str,
    params: Vec<SqlValue>,
  ) -> Result<Vec<FormationConstraint>> {
    self
      .query_all(
        format!(
          "SELECT {CONSTRAINT_COLUMNS} FROM formation_constraints \
           WHERE {condition} ORDER BY created_at, rowid"
        ),
        params,
        RawConstraint::from_row,
      )
      .await?
      .into_iter()
      .map(RawConstraint::into_constraint)
      .collect()
  }
}

// ─── ControlPlaneStore impl ──────────────────────────────────────────────────

impl ControlPlaneStore for SqliteStore {
  type Error = Error;

  // ── Tenants ───────────────────────────────────────────────────────────

  async fn create_tenant(&self, tenant: Tenant) -> Result<Tenant> {
    let params = vec![
      id(tenant.id),
      text(tenant.external_id.clone()),
      text(tenant.name.clone()),
      text(encode_enum(tenant.tenant_type)),
      opt_text(tenant.region.clone()),
      opt_text(tenant.parent.map(encode_uuid)),
    ];
    let external_id = tenant.external_id.clone();
    self
      .execute(
        "INSERT INTO tenants (id, external_id, name, tenant_type, region, parent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params,
        || format!("tenant with external id {external_id}"),
      )
      .await?;
    Ok(tenant)
  }

  async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>> {
    self
      .query_opt(
        format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?1"),
        vec![id(tenant_id)],
        RawTenant::from_row,
      )
      .await?
      .map(RawTenant::into_tenant)
      .transpose()
  }

  async fn get_internal_tenant(&self, external_id: String) -> Result<Option<Uuid>> {
    self
      .query_opt(
        "SELECT id FROM tenants WHERE external_id = ?1".to_owned(),
        vec![text(external_id)],
        |row| row.get::<_, String>(0),
      )
      .await?
      .as_deref()
      .map(decode_uuid)
      .transpose()
  }

  async fn list_tenants(&self) -> Result<Vec<Tenant>> {
    self
      .query_all(
        format!("SELECT {TENANT_COLUMNS} FROM tenants ORDER BY name, id"),
        vec![],
        RawTenant::from_row,
      )
      .await?
      .into_iter()
      .map(RawTenant::into_tenant)
      .collect()
  }

  // ── Participants ──────────────────────────────────────────────────────

  async fn create_application(&self, application: Application) -> Result<Application> {
    let params = vec![
      id(application.id),
      id(application.tenant_id),
      text(application.name.clone()),
    ];
    let app_id = application.id;
    self
      .execute(
        "INSERT INTO applications (id, tenant_id, name) VALUES (?1, ?2, ?3)",
        params,
        || format!("application {app_id}"),
      )
      .await?;
    Ok(application)
  }

  async fn get_application(&self, app_id: Uuid) -> Result<Option<Application>> {
    self
      .query_opt(
        "SELECT id, tenant_id, name FROM applications WHERE id = ?1".to_owned(),
        vec![id(app_id)],
        RawParticipant::from_row,
      )
      .await?
      .map(RawParticipant::into_application)
      .transpose()
  }

  async fn list_applications_by_scenarios(
    &self,
    tenant: Uuid,
    scenarios: Vec<String>,
  ) -> Result<Vec<Application>> {
    let sql = format!(
      "SELECT DISTINCT a.id, a.tenant_id, a.name
       FROM applications a
       JOIN labels l
         ON l.object_id = a.id
        AND l.object_type = '{app}'
        AND l.key = '{SCENARIOS_KEY}'
        AND l.tenant_id = ?1
       WHERE a.tenant_id = ?1
         AND EXISTS (
           SELECT 1 FROM json_each(l.value) s
           WHERE s.value IN (SELECT value FROM json_each(?2))
         )
       ORDER BY a.rowid",
      app = encode_enum(ResourceType::Application),
    );
    self
      .query_all(
        sql,
        vec![id(tenant), text(encode_list(&scenarios)?)],
        RawParticipant::from_row,
      )
      .await?
      .into_iter()
      .map(RawParticipant::into_application)
      .collect()
  }

  async fn create_runtime(&self, runtime: Runtime) -> Result<Runtime> {
    let params = vec![id(runtime.id), id(runtime.tenant_id), text(runtime.name.clone())];
    let runtime_id = runtime.id;
    self
      .execute(
        "INSERT INTO runtimes (id, tenant_id, name) VALUES (?1, ?2, ?3)",
        params,
        || format!("runtime {runtime_id}"),
      )
      .await?;
    Ok(runtime)
  }

  async fn get_runtime(&self, runtime_id: Uuid) -> Result<Option<Runtime>> {
    self
      .query_opt(
        "SELECT id, tenant_id, name FROM runtimes WHERE id = ?1".to_owned(),
        vec![id(runtime_id)],
        RawParticipant::from_row,
      )
      .await?
      .map(RawParticipant::into_runtime)
      .transpose()
  }

  async fn list_runtimes_for_tenant(&self, tenant: Uuid) -> Result<Vec<Runtime>> {
    self
      .query_all(
        "SELECT id, tenant_id, name FROM runtimes WHERE tenant_id = ?1 ORDER BY rowid"
          .to_owned(),
        vec![id(tenant)],
        RawParticipant::from_row,
      )
      .await?
      .into_iter()
      .map(RawParticipant::into_runtime)
      .collect()
  }

  async fn create_runtime_context(
    &self,
    context: RuntimeContext,
  ) -> Result<RuntimeContext> {
    let params = vec![
      id(context.id),
      id(context.tenant_id),
      id(context.runtime_id),
      text(context.key.clone()),
      text(context.value.clone()),
    ];
    let context_id = context.id;
    self
      .execute(
        "INSERT INTO runtime_contexts (id, tenant_id, runtime_id, key, value)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params,
        || format!("runtime context {context_id}"),
      )
      .await?;
    Ok(context)
  }

  async fn get_runtime_context(
    &self,
    context_id: Uuid,
  ) -> Result<Option<RuntimeContext>> {
    self
      .query_opt(
        "SELECT id, tenant_id, runtime_id, key, value FROM runtime_contexts WHERE id = ?1"
          .to_owned(),
        vec![id(context_id)],
        RawRuntimeContext::from_row,
      )
      .await?
      .map(RawRuntimeContext::into_context)
      .transpose()
  }

  // ── Labels ────────────────────────────────────────────────────────────

  async fn get_label_by_key(
    &self,
    tenant: Uuid,
    object_type: ResourceType,
    object_id: Uuid,
    key: String,
  ) -> Result<Option<Label>> {
    self
      .query_opt(
        format!(
          "SELECT {LABEL_COLUMNS} FROM labels
           WHERE tenant_id = ?1 AND object_type = ?2 AND object_id = ?3 AND key = ?4"
        ),
        vec![id(tenant), text(encode_enum(object_type)), id(object_id), text(key)],
        RawLabel::from_row,
      )
      .await?
      .map(RawLabel::into_label)
      .transpose()
  }

  async fn upsert_label(&self, label: Label) -> Result<Label> {
    let params = vec![
      id(label.id),
      id(label.tenant_id),
      text(encode_enum(label.object_type)),
      id(label.object_id),
      text(label.key),
      text(encode_json(&label.value)?),
    ];
    let raw = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &format!(
            "INSERT INTO labels ({LABEL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (tenant_id, object_type, object_id, key)
             DO UPDATE SET value = excluded.value
             RETURNING {LABEL_COLUMNS}"
          ),
          rusqlite::params_from_iter(params),
          RawLabel::from_row,
        )?)
      })
      .await?;
    raw.into_label()
  }

  async fn delete_label(
    &self,
    tenant: Uuid,
    object_type: ResourceType,
    object_id: Uuid,
    key: String,
  ) -> Result<bool> {
    let changed = self
      .execute(
        "DELETE FROM labels
         WHERE tenant_id = ?1 AND object_type = ?2 AND object_id = ?3 AND key = ?4",
        vec![id(tenant), text(encode_enum(object_type)), id(object_id), text(key)],
        String::new,
      )
      .await?;
    Ok(changed > 0)
  }

  // ── Automatic scenario assignments ────────────────────────────────────

  async fn create_scenario_assignment(
    &self,
    assignment: ScenarioAssignment,
  ) -> Result<ScenarioAssignment> {
    let params = vec![
      id(assignment.tenant_id),
      text(assignment.scenario_name.clone()),
      id(assignment.target_tenant_id),
    ];
    let name = assignment.scenario_name.clone();
    self
      .execute(
        "INSERT INTO automatic_scenario_assignments
           (tenant_id, scenario_name, target_tenant_id)
         VALUES (?1, ?2, ?3)",
        params,
        || format!("automatic scenario assignment for {name:?}"),
      )
      .await?;
    Ok(assignment)
  }

  async fn delete_scenario_assignment(
    &self,
    tenant: Uuid,
    scenario_name: String,
  ) -> Result<bool> {
    let changed = self
      .execute(
        "DELETE FROM automatic_scenario_assignments
         WHERE tenant_id = ?1 AND scenario_name = ?2",
        vec![id(tenant), text(scenario_name)],
        String::new,
      )
      .await?;
    Ok(changed > 0)
  }

  async fn list_scenario_assignments_for_target_tenant(
    &self,
    target_tenant: Uuid,
  ) -> Result<Vec<ScenarioAssignment>> {
    let raws: Vec<(String, String, String)> = self
      .query_all(
        "SELECT tenant_id, scenario_name, target_tenant_id
         FROM automatic_scenario_assignments
         WHERE target_tenant_id = ?1 ORDER BY rowid"
          .to_owned(),
        vec![id(target_tenant)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .await?;
    raws
      .into_iter()
      .map(|(tenant_id, scenario_name, target_tenant_id)| {
        Ok(ScenarioAssignment {
          scenario_name,
          tenant_id: decode_uuid(&tenant_id)?,
          target_tenant_id: decode_uuid(&target_tenant_id)?,
        })
      })
      .collect()
  }

  // ── Formation templates ───────────────────────────────────────────────

  async fn create_formation_template(
    &self,
    template: FormationTemplate,
  ) -> Result<FormationTemplate> {
    let params = vec![
      id(template.id),
      text(template.name.clone()),
      text(encode_json(&template.application_types)?),
      text(encode_json(&template.runtime_types)?),
      text(encode_json(&template.callback_participant_types)?),
    ];
    let template_id = template.id;
    self
      .execute(
        "INSERT INTO formation_templates
           (id, name, application_types, runtime_types, callback_participant_types)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params,
        || format!("formation template {template_id}"),
      )
      .await?;
    Ok(template)
  }

  async fn get_formation_template(
    &self,
    template_id: Uuid,
  ) -> Result<Option<FormationTemplate>> {
    self
      .query_opt(
        format!("SELECT {TEMPLATE_COLUMNS} FROM formation_templates WHERE id = ?1"),
        vec![id(template_id)],
        RawTemplate::from_row,
      )
      .await?
      .map(RawTemplate::into_template)
      .transpose()
  }

  async fn list_formation_templates(&self) -> Result<Vec<FormationTemplate>> {
    self
      .query_all(
        format!("SELECT {TEMPLATE_COLUMNS} FROM formation_templates ORDER BY name, id"),
        vec![],
        RawTemplate::from_row,
      )
      .await?
      .into_iter()
      .map(RawTemplate::into_template)
      .collect()
  }

  async fn delete_formation_template(&self, template_id: Uuid) -> Result<bool> {
    let template_id = encode_uuid(template_id);
    let changed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM formation_template_constraint_references
           WHERE formation_template_id = ?1",
          rusqlite::params![template_id],
        )?;
        let changed = tx.execute(
          "DELETE FROM formation_templates WHERE id = ?1",
          rusqlite::params![template_id],
        )?;
        tx.commit()?;
        Ok(changed)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn attach_constraint(
    &self,
    template_id: Uuid,
    constraint_id: Uuid,
  ) -> Result<()> {
    self
      .execute(
        "INSERT OR IGNORE INTO formation_template_constraint_references
           (formation_template_id, constraint_id)
         VALUES (?1, ?2)",
        vec![id(template_id), id(constraint_id)],
        String::new,
      )
      .await?;
    Ok(())
  }

  async fn detach_constraint(
    &self,
    template_id: Uuid,
    constraint_id: Uuid,
  ) -> Result<bool> {
    let changed = self
      .execute(
        "DELETE FROM formation_template_constraint_references
         WHERE formation_template_id = ?1 AND constraint_id = ?2",
        vec![id(template_id), id(constraint_id)],
        String::new,
      )
      .await?;
    Ok(changed > 0)
  }

  // ── Formation constraints ─────────────────────────────────────────────

  async fn create_formation_constraint(
    &self,
    constraint: FormationConstraint,
  ) -> Result<FormationConstraint> {
    let params = vec![
      id(constraint.id),
      text(constraint.name.clone()),
      text(encode_enum(constraint.constraint_type)),
      text(encode_enum(constraint.target_operation)),
      text(encode_enum(constraint.operator)),
      text(encode_enum(constraint.resource_type)),
      text(constraint.resource_subtype.clone()),
      text(encode_json(&constraint.input_template)?),
      text(encode_enum(constraint.constraint_scope)),
      SqlValue::Integer(i64::from(constraint.priority)),
      text(encode_dt(constraint.created_at)),
    ];
    let name = constraint.name.clone();
    self
      .execute(
        "INSERT INTO formation_constraints (
           id, name, constraint_type, target_operation, operator, resource_type,
           resource_subtype, input_template, constraint_scope, priority, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params,
        || format!("formation constraint {name:?}"),
      )
      .await?;
    Ok(constraint)
  }

  async fn get_formation_constraint(
    &self,
    constraint_id: Uuid,
  ) -> Result<Option<FormationConstraint>> {
    Ok(
      self
        .select_constraints("id = ?1", vec![id(constraint_id)])
        .await?
        .into_iter()
        .next(),
    )
  }

  async fn list_formation_constraints(&self) -> Result<Vec<FormationConstraint>> {
    self.select_constraints("1 = 1", vec![]).await
  }

  async fn delete_formation_constraint(&self, constraint_id: Uuid) -> Result<bool> {
    let constraint_id = encode_uuid(constraint_id);
    let changed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM formation_template_constraint_references
           WHERE constraint_id = ?1",
          rusqlite::params![constraint_id],
        )?;
        let changed = tx.execute(
          "DELETE FROM formation_constraints WHERE id = ?1",
          rusqlite::params![constraint_id],
        )?;
        tx.commit()?;
        Ok(changed)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn list_constraints_for_location(
    &self,
    location: JoinPointLocation,
    template_id: Option<Uuid>,
  ) -> Result<Vec<FormationConstraint>> {
    let condition = format!(
      "target_operation = ?1 AND constraint_type = ?2 AND (
         constraint_scope = '{global}'
         OR id IN (
           SELECT constraint_id FROM formation_template_constraint_references
           WHERE formation_template_id = ?3
         )
       )",
      global = encode_enum(ConstraintScope::Global),
    );
    self
      .select_constraints(&condition, vec![
        text(encode_enum(location.operation)),
        text(encode_enum(location.constraint_type)),
        opt_text(template_id.map(encode_uuid)),
      ])
      .await
  }

  // ── Formations ────────────────────────────────────────────────────────

  async fn create_formation(&self, formation: Formation) -> Result<Formation> {
    let params = vec![
      id(formation.id),
      text(formation.name.clone()),
      id(formation.formation_template_id),
      id(formation.tenant_id),
      text(encode_enum(formation.state)),
      opt_text(formation.error.clone()),
      text(encode_dt(formation.created_at)),
    ];
    let name = formation.name.clone();
    self
      .execute(
        "INSERT INTO formations (
           id, name, formation_template_id, tenant_id, state, error, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params,
        || format!("formation {name:?}"),
      )
      .await?;
    Ok(formation)
  }

  async fn get_formation(&self, formation_id: Uuid) -> Result<Option<Formation>> {
    Ok(
      self
        .select_formations("id = ?1", vec![id(formation_id)])
        .await?
        .into_iter()
        .next(),
    )
  }

  async fn get_formation_by_name(
    &self,
    tenant: Uuid,
    name: String,
  ) -> Result<Option<Formation>> {
    Ok(
      self
        .select_formations("tenant_id = ?1 AND name = ?2", vec![id(tenant), text(name)])
        .await?
        .into_iter()
        .next(),
    )
  }

  async fn list_formations_by_names(
    &self,
    names: Vec<String>,
    tenant: Uuid,
  ) -> Result<Vec<Formation>> {
    if names.is_empty() {
      return Ok(Vec::new());
    }
    self
      .select_formations(
        "tenant_id = ?1 AND name IN (SELECT value FROM json_each(?2))",
        vec![id(tenant), text(encode_list(&names)?)],
      )
      .await
  }

  async fn update_formation(&self, formation: Formation) -> Result<Formation> {
    let params = vec![
      text(formation.name.clone()),
      text(encode_enum(formation.state)),
      opt_text(formation.error.clone()),
      id(formation.id),
    ];
    let name = formation.name.clone();
    let changed = self
      .execute(
        "UPDATE formations SET name = ?1, state = ?2, error = ?3 WHERE id = ?4",
        params,
        || format!("formation {name:?}"),
      )
      .await?;
    if changed == 0 {
      return Err(Error::NotFound(format!("formation {}", formation.id)));
    }
    Ok(formation)
  }

  async fn delete_formation(&self, formation_id: Uuid) -> Result<bool> {
    let changed = self
      .execute(
        "DELETE FROM formations WHERE id = ?1",
        vec![id(formation_id)],
        String::new,
      )
      .await?;
    Ok(changed > 0)
  }

  async fn count_formations_by_template(&self, template_id: Uuid) -> Result<usize> {
    let count = self
      .query_opt(
        "SELECT COUNT(*) FROM formations WHERE formation_template_id = ?1".to_owned(),
        vec![id(template_id)],
        |row| row.get::<_, i64>(0),
      )
      .await?
      .unwrap_or(0);
    Ok(usize::try_from(count).unwrap_or_default())
  }

  // ── Formation assignments ─────────────────────────────────────────────

  async fn create_formation_assignment(
    &self,
    assignment: FormationAssignment,
  ) -> Result<FormationAssignment> {
    let params = vec![
      id(assignment.id),
      id(assignment.formation_id),
      id(assignment.tenant_id),
      id(assignment.source),
      text(encode_enum(assignment.source_type)),
      id(assignment.target),
      text(encode_enum(assignment.target_type)),
      text(encode_enum(assignment.state)),
      opt_text(assignment.value.as_ref().map(encode_json).transpose()?),
      opt_text(assignment.error.as_ref().map(|e| e.message.clone())),
      opt_text(assignment.error.as_ref().map(|e| encode_enum(e.code))),
    ];
    let (source, target) = (assignment.source, assignment.target);
    self
      .execute(
        "INSERT INTO formation_assignments (
           id, formation_id, tenant_id, source, source_type, target, target_type,
           state, value, error_message, error_code
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params,
        || format!("formation assignment {source} -> {target}"),
      )
      .await?;
    Ok(assignment)
  }

  async fn get_formation_assignment(
    &self,
    assignment_id: Uuid,
  ) -> Result<Option<FormationAssignment>> {
    self.select_assignment(assignment_id).await
  }

  async fn get_formation_assignment_by_source_and_target(
    &self,
    formation_id: Uuid,
    source: Uuid,
    target: Uuid,
  ) -> Result<Option<FormationAssignment>> {
    Ok(
      self
        .select_assignments(
          "formation_id = ?1 AND source = ?2 AND target = ?3",
          vec![id(formation_id), id(source), id(target)],
        )
        .await?
        .into_iter()
        .next(),
    )
  }

  async fn list_assignments_for_formation(
    &self,
    formation_id: Uuid,
  ) -> Result<Vec<FormationAssignment>> {
    self
      .select_assignments("formation_id = ?1", vec![id(formation_id)])
      .await
  }

  async fn list_assignments_for_participant(
    &self,
    formation_id: Uuid,
    participant: Uuid,
  ) -> Result<Vec<FormationAssignment>> {
    self
      .select_assignments(
        "formation_id = ?1 AND (source = ?2 OR target = ?2)",
        vec![id(formation_id), id(participant)],
      )
      .await
  }

  async fn list_assignments_by_states(
    &self,
    states: Vec<FormationAssignmentState>,
  ) -> Result<Vec<FormationAssignment>> {
    if states.is_empty() {
      return Ok(Vec::new());
    }
    self
      .select_assignments(
        "state IN (SELECT value FROM json_each(?1))",
        vec![text(encode_list(&states)?)],
      )
      .await
  }

  async fn update_formation_assignment(
    &self,
    assignment: FormationAssignment,
  ) -> Result<FormationAssignment> {
    let params = vec![
      text(encode_enum(assignment.state)),
      opt_text(assignment.value.as_ref().map(encode_json).transpose()?),
      opt_text(assignment.error.as_ref().map(|e| e.message.clone())),
      opt_text(assignment.error.as_ref().map(|e| encode_enum(e.code))),
      id(assignment.id),
    ];
    let changed = self
      .execute(
        "UPDATE formation_assignments
         SET state = ?1, value = ?2, error_message = ?3, error_code = ?4
         WHERE id = ?5",
        params,
        String::new,
      )
      .await?;
    if changed == 0 {
      return Err(Error::NotFound(format!(
        "formation assignment {}",
        assignment.id
      )));
    }
    self
      .select_assignment(assignment.id)
      .await?
      .ok_or_else(|| Error::NotFound(format!("formation assignment {}", assignment.id)))
  }

  async fn delete_formation_assignment(&self, assignment_id: Uuid) -> Result<bool> {
    let changed = self
      .execute(
        "DELETE FROM formation_assignments WHERE id = ?1",
        vec![id(assignment_id)],
        String::new,
      )
      .await?;
    Ok(changed > 0)
  }
}
