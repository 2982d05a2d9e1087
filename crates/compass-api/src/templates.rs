//! Handlers for `/formation-templates` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/formation-templates` | |
//! | `POST`   | `/formation-templates` | Body: [`NewTemplateBody`]; 201 |
//! | `GET`    | `/formation-templates/:id` | 404 if not found |
//! | `DELETE` | `/formation-templates/:id` | 400 while a formation uses it |
//! | `POST`   | `/formation-templates/:id/constraints/:cid` | Attach a constraint |
//! | `DELETE` | `/formation-templates/:id/constraints/:cid` | Detach a constraint |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use compass_core::{
  destination::DestinationService, formation::FormationTemplate,
  resource::ResourceType, store::ControlPlaneStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

/// `GET /formation-templates`
pub async fn list<S, D>(
  State(state): State<ApiState<S, D>>,
) -> Result<Json<Vec<FormationTemplate>>, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  let templates = state
    .store
    .list_formation_templates()
    .await
    .map_err(ApiError::store)?;
  Ok(Json(templates))
}

#[derive(Debug, Deserialize)]
pub struct NewTemplateBody {
  pub name:                       String,
  #[serde(default)]
  pub application_types:          Vec<String>,
  #[serde(default)]
  pub runtime_types:              Vec<String>,
  #[serde(default)]
  pub callback_participant_types: Vec<ResourceType>,
}

/// `POST /formation-templates`
pub async fn create<S, D>(
  State(state): State<ApiState<S, D>>,
  Json(body): Json<NewTemplateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  let template = state
    .formations
    .create_formation_template(FormationTemplate {
      id:                         Uuid::new_v4(),
      name:                       body.name,
      application_types:          body.application_types,
      runtime_types:              body.runtime_types,
      callback_participant_types: body.callback_participant_types,
    })
    .await?;
  Ok((StatusCode::CREATED, Json(template)))
}

/// `GET /formation-templates/:id`
pub async fn get_one<S, D>(
  State(state): State<ApiState<S, D>>,
  Path(id): Path<Uuid>,
) -> Result<Json<FormationTemplate>, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  let template = state
    .store
    .get_formation_template(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("formation template {id} not found")))?;
  Ok(Json(template))
}

/// `DELETE /formation-templates/:id`
pub async fn delete_one<S, D>(
  State(state): State<ApiState<S, D>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  state.formations.delete_formation_template(id).await?;
  Ok(StatusCode::NO_CONTENT)
}

/// `POST /formation-templates/:id/constraints/:constraint_id`
pub async fn attach<S, D>(
  State(state): State<ApiState<S, D>>,
  Path((id, constraint_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  state.formations.attach_constraint(id, constraint_id).await?;
  Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /formation-templates/:id/constraints/:constraint_id`
pub async fn detach<S, D>(
  State(state): State<ApiState<S, D>>,
  Path((id, constraint_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  state.formations.detach_constraint(id, constraint_id).await?;
  Ok(StatusCode::NO_CONTENT)
}
