//! Handlers for `/formation-constraints` endpoints.
//!
//! Creation resolves the operator and builds its input once against sample
//! join point details, so a misconfigured constraint is rejected up front
//! instead of failing every later operation.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use compass_core::{
  Error as CoreError,
  constraint::{FormationConstraint, NewFormationConstraint},
  destination::DestinationService,
  store::ControlPlaneStore,
};
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

/// `GET /formation-constraints`
pub async fn list<S, D>(
  State(state): State<ApiState<S, D>>,
) -> Result<Json<Vec<FormationConstraint>>, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  let constraints = state
    .store
    .list_formation_constraints()
    .await
    .map_err(ApiError::store)?;
  Ok(Json(constraints))
}

/// `POST /formation-constraints`
///
/// An unknown operator or an input template that does not build is a client
/// mistake here, so it answers 400 rather than the 500 it maps to at
/// evaluation time.
pub async fn create<S, D>(
  State(state): State<ApiState<S, D>>,
  Json(body): Json<NewFormationConstraint>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  let constraint = state
    .formations
    .create_formation_constraint(body)
    .await
    .map_err(|e| match e {
      CoreError::Configuration(m) => ApiError::BadRequest(m),
      other => other.into(),
    })?;
  Ok((StatusCode::CREATED, Json(constraint)))
}

/// `GET /formation-constraints/:id`
pub async fn get_one<S, D>(
  State(state): State<ApiState<S, D>>,
  Path(id): Path<Uuid>,
) -> Result<Json<FormationConstraint>, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  let constraint = state
    .store
    .get_formation_constraint(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| {
      ApiError::NotFound(format!("formation constraint {id} not found"))
    })?;
  Ok(Json(constraint))
}

/// `DELETE /formation-constraints/:id` also detaches it from every template.
pub async fn delete_one<S, D>(
  State(state): State<ApiState<S, D>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  if !state
    .store
    .delete_formation_constraint(id)
    .await
    .map_err(ApiError::store)?
  {
    return Err(ApiError::NotFound(format!(
      "formation constraint {id} not found"
    )));
  }
  Ok(StatusCode::NO_CONTENT)
}
