//! Periodic reconciliation of formation assignments with pending work.

use std::{sync::Arc, time::Duration};

use compass_core::{
  destination::DestinationService, orchestrator::AssignmentOrchestrator,
  store::ControlPlaneStore,
};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{info, warn};

use crate::settings::ReconciliationConfig;

/// Run a reconciliation pass every `interval_secs` until `shutdown` flips to
/// `true`. A pass in progress finishes before the task exits.
pub fn spawn_reconciler<S, D>(
  orchestrator: Arc<AssignmentOrchestrator<S, D>>,
  config: ReconciliationConfig,
  mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
  S: ControlPlaneStore + 'static,
  D: DestinationService + 'static,
{
  tokio::spawn(async move {
    let mut interval =
      tokio::time::interval(Duration::from_secs(config.interval_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
      interval_secs = config.interval_secs,
      concurrency = config.concurrency,
      "reconciliation loop started"
    );

    loop {
      tokio::select! {
        _ = interval.tick() => {
          if let Err(e) = orchestrator.reconcile(config.concurrency).await {
            warn!(error = %e, "reconciliation pass failed");
          }
        }
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            break;
          }
        }
      }
    }
    info!("reconciliation loop stopped");
  })
}
