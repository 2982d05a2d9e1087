//! JSON REST API for Compass.
//!
//! Exposes an axum [`Router`] over a [`ControlPlaneStore`] and the
//! [`FormationService`] built on it. Auth, TLS, and transport concerns are the
//! caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", compass_api::api_router(ApiState::new(store, formations)))
//! ```

pub mod assignments;
pub mod constraints;
pub mod error;
pub mod formations;
pub mod resources;
pub mod templates;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, patch, post, put},
};
use compass_core::{
  destination::DestinationService, formation_service::FormationService,
  store::ControlPlaneStore,
};

pub use error::ApiError;

/// Shared handler state.
pub struct ApiState<S, D> {
  pub store:      Arc<S>,
  pub formations: Arc<FormationService<S, D>>,
}

impl<S, D> ApiState<S, D> {
  pub fn new(store: Arc<S>, formations: Arc<FormationService<S, D>>) -> Self {
    Self { store, formations }
  }
}

impl<S, D> Clone for ApiState<S, D> {
  fn clone(&self) -> Self {
    Self {
      store:      self.store.clone(),
      formations: self.formations.clone(),
    }
  }
}

/// Build a fully-materialised API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, D>(state: ApiState<S, D>) -> Router<()>
where
  S: ControlPlaneStore + 'static,
  D: DestinationService + 'static,
{
  Router::new()
    // Tenants, participants and labels
    .route(
      "/tenants",
      get(resources::list_tenants::<S, D>).post(resources::create_tenant::<S, D>),
    )
    .route("/applications", post(resources::create_application::<S, D>))
    .route("/runtimes", post(resources::create_runtime::<S, D>))
    .route("/labels", put(resources::set_label::<S, D>))
    // Formation templates
    .route(
      "/formation-templates",
      get(templates::list::<S, D>).post(templates::create::<S, D>),
    )
    .route(
      "/formation-templates/{id}",
      get(templates::get_one::<S, D>).delete(templates::delete_one::<S, D>),
    )
    .route(
      "/formation-templates/{id}/constraints/{constraint_id}",
      post(templates::attach::<S, D>).delete(templates::detach::<S, D>),
    )
    // Formation constraints
    .route(
      "/formation-constraints",
      get(constraints::list::<S, D>).post(constraints::create::<S, D>),
    )
    .route(
      "/formation-constraints/{id}",
      get(constraints::get_one::<S, D>).delete(constraints::delete_one::<S, D>),
    )
    // Formations
    .route("/formations", post(formations::create::<S, D>))
    .route("/formations/delete", post(formations::delete_one::<S, D>))
    .route("/formations/assign", post(formations::assign::<S, D>))
    .route("/formations/unassign", post(formations::unassign::<S, D>))
    // Formation assignments
    .route("/formation-assignments", get(assignments::list::<S, D>))
    .route(
      "/formation-assignments/{id}/process",
      post(assignments::process::<S, D>),
    )
    .route(
      "/formation-assignments/{id}/status",
      patch(assignments::status_callback::<S, D>),
    )
    .with_state(state)
}
