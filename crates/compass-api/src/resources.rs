//! Handlers for tenants, participants and labels.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/tenants` | |
//! | `POST` | `/tenants` | Body: [`NewTenantBody`]; 201 |
//! | `POST` | `/applications` | Body: [`NewParticipantBody`]; optional `type` sets `applicationType` |
//! | `POST` | `/runtimes` | Body: [`NewParticipantBody`]; optional `type` sets `runtimeType` |
//! | `PUT`  | `/labels` | Body: [`LabelBody`]; replaces the value of an existing key |

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use compass_core::{
  destination::DestinationService,
  label::{APPLICATION_TYPE_KEY, Label, RUNTIME_TYPE_KEY},
  resource::{Application, ResourceType, Runtime, Tenant, TenantType},
  store::ControlPlaneStore,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

// ─── Tenants ──────────────────────────────────────────────────────────────────

/// `GET /tenants`
pub async fn list_tenants<S, D>(
  State(state): State<ApiState<S, D>>,
) -> Result<Json<Vec<Tenant>>, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  let tenants = state.store.list_tenants().await.map_err(ApiError::store)?;
  Ok(Json(tenants))
}

#[derive(Debug, Deserialize)]
pub struct NewTenantBody {
  pub external_id: String,
  pub name:        String,
  pub tenant_type: TenantType,
  pub region:      Option<String>,
  pub parent:      Option<Uuid>,
}

/// `POST /tenants`
pub async fn create_tenant<S, D>(
  State(state): State<ApiState<S, D>>,
  Json(body): Json<NewTenantBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  if body.external_id.trim().is_empty() {
    return Err(ApiError::BadRequest("external_id is required".into()));
  }
  let tenant = state
    .store
    .create_tenant(Tenant {
      id:          Uuid::new_v4(),
      external_id: body.external_id,
      name:        body.name,
      tenant_type: body.tenant_type,
      region:      body.region,
      parent:      body.parent,
    })
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(tenant)))
}

// ─── Participants ─────────────────────────────────────────────────────────────

/// JSON body accepted by `POST /applications` and `POST /runtimes`.
#[derive(Debug, Deserialize)]
pub struct NewParticipantBody {
  pub tenant_id: Uuid,
  pub name:      String,
  /// Stored as the `applicationType` or `runtimeType` label.
  #[serde(rename = "type")]
  pub subtype:   Option<String>,
}

async fn ensure_tenant<S: ControlPlaneStore>(
  store: &S,
  id: Uuid,
) -> Result<(), ApiError> {
  store
    .get_tenant(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("tenant {id} not found")))?;
  Ok(())
}

async fn label_subtype<S: ControlPlaneStore>(
  store: &S,
  tenant: Uuid,
  object_type: ResourceType,
  object_id: Uuid,
  key: &str,
  subtype: Option<String>,
) -> Result<(), ApiError> {
  if let Some(subtype) = subtype {
    store
      .upsert_label(Label::new(
        tenant,
        object_type,
        object_id,
        key,
        Value::String(subtype),
      ))
      .await
      .map_err(ApiError::store)?;
  }
  Ok(())
}

/// `POST /applications`
pub async fn create_application<S, D>(
  State(state): State<ApiState<S, D>>,
  Json(body): Json<NewParticipantBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  ensure_tenant(state.store.as_ref(), body.tenant_id).await?;
  let application = state
    .store
    .create_application(Application {
      id:        Uuid::new_v4(),
      tenant_id: body.tenant_id,
      name:      body.name,
    })
    .await
    .map_err(ApiError::store)?;
  label_subtype(
    state.store.as_ref(),
    application.tenant_id,
    ResourceType::Application,
    application.id,
    APPLICATION_TYPE_KEY,
    body.subtype,
  )
  .await?;
  Ok((StatusCode::CREATED, Json(application)))
}

/// `POST /runtimes`
pub async fn create_runtime<S, D>(
  State(state): State<ApiState<S, D>>,
  Json(body): Json<NewParticipantBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  ensure_tenant(state.store.as_ref(), body.tenant_id).await?;
  let runtime = state
    .store
    .create_runtime(Runtime {
      id:        Uuid::new_v4(),
      tenant_id: body.tenant_id,
      name:      body.name,
    })
    .await
    .map_err(ApiError::store)?;
  label_subtype(
    state.store.as_ref(),
    runtime.tenant_id,
    ResourceType::Runtime,
    runtime.id,
    RUNTIME_TYPE_KEY,
    body.subtype,
  )
  .await?;
  Ok((StatusCode::CREATED, Json(runtime)))
}

// ─── Labels ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LabelBody {
  pub tenant_id:   Uuid,
  pub object_type: ResourceType,
  pub object_id:   Uuid,
  pub key:         String,
  pub value:       Value,
}

/// `PUT /labels`
pub async fn set_label<S, D>(
  State(state): State<ApiState<S, D>>,
  Json(body): Json<LabelBody>,
) -> Result<Json<Label>, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  if body.key.trim().is_empty() {
    return Err(ApiError::BadRequest("label key is required".into()));
  }
  let label = state
    .store
    .upsert_label(Label::new(
      body.tenant_id,
      body.object_type,
      body.object_id,
      body.key,
      body.value,
    ))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(label))
}
