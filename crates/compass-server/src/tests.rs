//! Router and reconciliation tests over an in-memory store.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
  body::Body,
  http::{Request, StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use compass_core::{
  assignment::{FormationAssignment, FormationAssignmentState},
  destination::{
    CertificateRequest, CertificateResponse, CreateOutcome, DestinationError,
    DestinationRequest, DestinationService, DestinationTarget,
  },
  formation::FormationTemplate,
  resource::{Application, ResourceType, Tenant, TenantType},
  store::ControlPlaneStore,
};
use compass_store_sqlite::SqliteStore;
use tokio::sync::watch;
use tower::ServiceExt;
use uuid::Uuid;

use crate::{
  AppState,
  auth::{AuthConfig, hash_password},
  reconcile::spawn_reconciler,
  router,
  settings::ReconciliationConfig,
};

struct AcceptAll;

#[async_trait]
impl DestinationService for AcceptAll {
  async fn create_destination(
    &self,
    _: &DestinationTarget,
    _: &DestinationRequest,
  ) -> Result<CreateOutcome, DestinationError> {
    Ok(CreateOutcome::Created)
  }

  async fn delete_destination(
    &self,
    _: &DestinationTarget,
    _: &str,
  ) -> Result<(), DestinationError> {
    Ok(())
  }

  async fn create_certificate(
    &self,
    _: &DestinationTarget,
    request: &CertificateRequest,
  ) -> Result<CertificateResponse, DestinationError> {
    Ok(CertificateResponse {
      file_name:         request.file_name.clone(),
      common_name:       request.common_name.clone(),
      certificate_chain: String::new(),
    })
  }

  async fn delete_certificate(
    &self,
    _: &DestinationTarget,
    _: &str,
  ) -> Result<(), DestinationError> {
    Ok(())
  }
}

async fn state() -> AppState<SqliteStore, AcceptAll> {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  AppState::new(
    store,
    Arc::new(AcceptAll),
    "correlationIds",
    4,
    AuthConfig {
      username:      "admin".into(),
      password_hash: hash_password("secret").unwrap(),
    },
  )
}

fn basic(user: &str, pass: &str) -> String {
  format!("Basic {}", B64.encode(format!("{user}:{pass}")))
}

#[tokio::test]
async fn health_check_needs_no_credentials() {
  let app = router(state().await);
  let resp = app
    .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
    .await
    .unwrap();
  assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_rejects_missing_credentials() {
  let app = router(state().await);
  let resp = app
    .oneshot(Request::get("/api/tenants").body(Body::empty()).unwrap())
    .await
    .unwrap();
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
}

#[tokio::test]
async fn api_accepts_valid_credentials() {
  let app = router(state().await);
  let resp = app
    .oneshot(
      Request::get("/api/tenants")
        .header(header::AUTHORIZATION, basic("admin", "secret"))
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_rejects_wrong_password() {
  let app = router(state().await);
  let resp = app
    .oneshot(
      Request::get("/api/tenants")
        .header(header::AUTHORIZATION, basic("admin", "nope"))
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reconciler_processes_pending_assignments_and_stops() {
  let state = state().await;
  let store = state.store.clone();

  let tenant = store
    .create_tenant(Tenant {
      id:          Uuid::new_v4(),
      external_id: "ext-1".into(),
      name:        "tenant".into(),
      tenant_type: TenantType::Subaccount,
      region:      Some("eu10".into()),
      parent:      None,
    })
    .await
    .unwrap();
  let template = store
    .create_formation_template(FormationTemplate {
      id:                         Uuid::new_v4(),
      name:                       "side-by-side".into(),
      application_types:          vec![],
      runtime_types:              vec![],
      callback_participant_types: vec![],
    })
    .await
    .unwrap();
  let formation = state
    .formations
    .create_formation(tenant.id, "alpha", template.id)
    .await
    .unwrap();
  let app = store
    .create_application(Application {
      id:        Uuid::new_v4(),
      tenant_id: tenant.id,
      name:      "app".into(),
    })
    .await
    .unwrap();
  let participant = (app.id, ResourceType::Application);
  let assignment = store
    .create_formation_assignment(FormationAssignment::new(
      formation.id,
      tenant.id,
      participant,
      participant,
    ))
    .await
    .unwrap();

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let handle = spawn_reconciler(
    state.orchestrator.clone(),
    ReconciliationConfig { interval_secs: 1, concurrency: 2 },
    shutdown_rx,
  );

  let mut reconciled = false;
  for _ in 0..50 {
    let current = store
      .get_formation_assignment(assignment.id)
      .await
      .unwrap()
      .unwrap();
    if current.state == FormationAssignmentState::Ready {
      reconciled = true;
      break;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
  }
  assert!(reconciled, "assignment was not reconciled");

  shutdown_tx.send(true).unwrap();
  tokio::time::timeout(Duration::from_secs(5), handle)
    .await
    .expect("reconciler did not stop")
    .unwrap();
}
