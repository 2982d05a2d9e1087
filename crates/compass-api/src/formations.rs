//! Handlers for `/formations` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/formations` | Body: [`NewFormationBody`]; 201 |
//! | `POST` | `/formations/delete` | Body: [`DeleteFormationBody`]; only without participants |
//! | `POST` | `/formations/assign` | Body: [`AssignBody`]; creates the formation if needed |
//! | `POST` | `/formations/unassign` | Body: [`AssignBody`] |
//!
//! Assign and unassign answer with the formation and the stored assignments
//! of the touched participant once processing has finished.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use compass_core::{
  destination::DestinationService,
  formation_service::FormationOutcome,
  resource::ResourceType,
  store::ControlPlaneStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

// ─── Create / delete ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NewFormationBody {
  pub tenant_id:   Uuid,
  pub name:        String,
  pub template_id: Uuid,
}

/// `POST /formations`
pub async fn create<S, D>(
  State(state): State<ApiState<S, D>>,
  Json(body): Json<NewFormationBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ControlPlaneStore + 'static,
  D: DestinationService + 'static,
{
  let formation = state
    .formations
    .create_formation(body.tenant_id, &body.name, body.template_id)
    .await?;
  Ok((StatusCode::CREATED, Json(formation)))
}

#[derive(Debug, Deserialize)]
pub struct DeleteFormationBody {
  pub tenant_id: Uuid,
  pub name:      String,
}

/// `POST /formations/delete`
pub async fn delete_one<S, D>(
  State(state): State<ApiState<S, D>>,
  Json(body): Json<DeleteFormationBody>,
) -> Result<StatusCode, ApiError>
where
  S: ControlPlaneStore + 'static,
  D: DestinationService + 'static,
{
  state
    .formations
    .delete_formation(body.tenant_id, &body.name)
    .await?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Assign / unassign ────────────────────────────────────────────────────────

/// JSON body accepted by `POST /formations/assign` and `/formations/unassign`.
#[derive(Debug, Deserialize)]
pub struct AssignBody {
  pub tenant_id:      Uuid,
  pub object_type:    ResourceType,
  /// Internal ID for participants; external ID for tenants.
  pub object_id:      String,
  pub formation_name: String,
  /// Required when the formation does not exist yet. Ignored on unassign.
  pub template_id:    Option<Uuid>,
}

/// `POST /formations/assign`
pub async fn assign<S, D>(
  State(state): State<ApiState<S, D>>,
  Json(body): Json<AssignBody>,
) -> Result<Json<FormationOutcome>, ApiError>
where
  S: ControlPlaneStore + 'static,
  D: DestinationService + 'static,
{
  let outcome = state
    .formations
    .assign_formation(
      body.tenant_id,
      body.object_type,
      &body.object_id,
      &body.formation_name,
      body.template_id,
    )
    .await?;
  Ok(Json(outcome))
}

/// `POST /formations/unassign`
pub async fn unassign<S, D>(
  State(state): State<ApiState<S, D>>,
  Json(body): Json<AssignBody>,
) -> Result<Json<FormationOutcome>, ApiError>
where
  S: ControlPlaneStore + 'static,
  D: DestinationService + 'static,
{
  let outcome = state
    .formations
    .unassign_formation(
      body.tenant_id,
      body.object_type,
      &body.object_id,
      &body.formation_name,
    )
    .await?;
  Ok(Json(outcome))
}
