//! Compass server: wiring, authentication and background reconciliation.
//!
//! The `compass` binary loads a [`ServerConfig`], opens the SQLite store,
//! builds the services with [`AppState::new`] and serves [`router`].

pub mod auth;
pub mod error;
pub mod reconcile;
pub mod settings;

pub use error::Error;
pub use settings::ServerConfig;

use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use compass_api::ApiState;
use compass_core::{
  destination::{DestinationCreator, DestinationService},
  engine::ConstraintEngine,
  formation_service::FormationService,
  operators::OperatorRegistry,
  orchestrator::AssignmentOrchestrator,
  store::ControlPlaneStore,
};
use tower_http::trace::TraceLayer;

use auth::AuthConfig;

// ─── Application state ────────────────────────────────────────────────────────

/// Everything the router and the reconciliation loop share.
pub struct AppState<S, D> {
  pub store:        Arc<S>,
  pub orchestrator: Arc<AssignmentOrchestrator<S, D>>,
  pub formations:   Arc<FormationService<S, D>>,
  pub auth:         Arc<AuthConfig>,
}

impl<S, D> Clone for AppState<S, D> {
  fn clone(&self) -> Self {
    Self {
      store:        self.store.clone(),
      orchestrator: self.orchestrator.clone(),
      formations:   self.formations.clone(),
      auth:         self.auth.clone(),
    }
  }
}

impl<S, D> AppState<S, D>
where
  S: ControlPlaneStore + 'static,
  D: DestinationService + 'static,
{
  /// Build the operator registry, constraint engine, destination creator,
  /// orchestrator and formation service over `store` and `destinations`.
  pub fn new(
    store: Arc<S>,
    destinations: Arc<D>,
    correlation_ids_path: &str,
    concurrency: usize,
    auth: AuthConfig,
  ) -> Self {
    let registry = OperatorRegistry::with_defaults(store.clone());
    let engine = Arc::new(ConstraintEngine::new(store.clone(), registry));
    let creator = DestinationCreator::new(destinations)
      .with_correlation_ids_path(correlation_ids_path);
    let orchestrator = Arc::new(AssignmentOrchestrator::new(
      store.clone(),
      engine.clone(),
      creator,
    ));
    let formations = Arc::new(
      FormationService::new(store.clone(), engine, orchestrator.clone())
        .with_concurrency(concurrency),
    );
    Self { store, orchestrator, formations, auth: Arc::new(auth) }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// The JSON API under `/api` behind Basic auth, plus an unauthenticated
/// `/healthz`.
pub fn router<S, D>(state: AppState<S, D>) -> Router
where
  S: ControlPlaneStore + 'static,
  D: DestinationService + 'static,
{
  let api = compass_api::api_router(ApiState::new(
    state.store.clone(),
    state.formations.clone(),
  ))
  .layer(middleware::from_fn_with_state(
    state.auth.clone(),
    auth::require_auth,
  ));

  Router::new()
    .route("/healthz", get(|| async { "ok" }))
    .nest("/api", api)
    .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests;
