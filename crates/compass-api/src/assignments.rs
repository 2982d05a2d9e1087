//! Handlers for `/formation-assignments` endpoints.
//!
//! | Method  | Path | Notes |
//! |---------|------|-------|
//! | `GET`   | `/formation-assignments` | `?formation_id` required |
//! | `POST`  | `/formation-assignments/:id/process` | Drive the assignment from its stored state |
//! | `PATCH` | `/formation-assignments/:id/status` | Body: [`StatusReport`]; participant callback |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use compass_core::{
  assignment::{FormationAssignment, FormationAssignmentState, StatusReport},
  destination::DestinationService,
  store::ControlPlaneStore,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

/// Response of `process` and `status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessedAssignment {
  pub id:         Uuid,
  pub state:      FormationAssignmentState,
  /// The stored row; absent once the assignment has been deleted.
  pub assignment: Option<FormationAssignment>,
}

async fn processed<S: ControlPlaneStore>(
  store: &S,
  id: Uuid,
  state: FormationAssignmentState,
) -> Result<Json<ProcessedAssignment>, ApiError> {
  let assignment = store
    .get_formation_assignment(id)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(ProcessedAssignment { id, state, assignment }))
}

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub formation_id: Uuid,
}

/// `GET /formation-assignments?formation_id=<id>`
pub async fn list<S, D>(
  State(state): State<ApiState<S, D>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<FormationAssignment>>, ApiError>
where
  S: ControlPlaneStore,
  D: DestinationService,
{
  let assignments = state
    .store
    .list_assignments_for_formation(params.formation_id)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(assignments))
}

// ─── Process ──────────────────────────────────────────────────────────────────

/// `POST /formation-assignments/:id/process`
pub async fn process<S, D>(
  State(state): State<ApiState<S, D>>,
  Path(id): Path<Uuid>,
) -> Result<Json<ProcessedAssignment>, ApiError>
where
  S: ControlPlaneStore + 'static,
  D: DestinationService + 'static,
{
  let assignment = state
    .store
    .get_formation_assignment(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| {
      ApiError::NotFound(format!("formation assignment {id} not found"))
    })?;
  let result = state
    .formations
    .orchestrator()
    .process_formation_assignment(assignment)
    .await?;
  processed(state.store.as_ref(), id, result).await
}

// ─── Status callback ──────────────────────────────────────────────────────────

/// `PATCH /formation-assignments/:id/status`
pub async fn status_callback<S, D>(
  State(state): State<ApiState<S, D>>,
  Path(id): Path<Uuid>,
  Json(report): Json<StatusReport>,
) -> Result<Json<ProcessedAssignment>, ApiError>
where
  S: ControlPlaneStore + 'static,
  D: DestinationService + 'static,
{
  let result = state
    .formations
    .orchestrator()
    .handle_status_callback(id, report)
    .await?;
  processed(state.store.as_ref(), id, result).await
}
