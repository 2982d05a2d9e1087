//! compass server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`) layered with
//! `COMPASS_*` environment variables, opens an in-process SQLite store, and
//! serves the JSON API while reconciling formation assignments in the
//! background.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for `auth_password_hash`:
//!
//! ```text
//! cargo run -p compass-server --bin compass -- --hash-password
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use compass_destination::DestinationServiceClient;
use compass_server::{
  AppState, ServerConfig,
  auth::{AuthConfig, hash_password},
  reconcile::spawn_reconciler,
  router,
  settings::expand_tilde,
};
use compass_store_sqlite::SqliteStore;
use tokio::{net::TcpListener, sync::watch};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Compass formation control plane")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Helper mode: hash a password and exit.
  if cli.hash_password {
    let password = read_password()?;
    println!("{}", hash_password(&password)?);
    return Ok(());
  }

  let config = ServerConfig::load(&cli.config)
    .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;

  let store_path = expand_tilde(&config.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let destinations = DestinationServiceClient::new(config.destination_service.clone())
    .context("failed to build destination service client")?;

  let state = AppState::new(
    Arc::new(store),
    Arc::new(destinations),
    &config.destination_service.correlation_ids_path,
    config.reconciliation.concurrency,
    AuthConfig {
      username:      config.auth_username.clone(),
      password_hash: config.auth_password_hash.clone(),
    },
  );

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let reconciler = spawn_reconciler(
    state.orchestrator.clone(),
    config.reconciliation.clone(),
    shutdown_rx,
  );

  let app = router(state);
  let address = config.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async move {
      if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
      }
      tracing::info!("shutdown signal received");
      let _ = shutdown_tx.send(true);
    })
    .await
    .context("server error")?;

  reconciler.await.context("reconciliation task panicked")?;
  Ok(())
}

/// Read a password from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_string())
}
