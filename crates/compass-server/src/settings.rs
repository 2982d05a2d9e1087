//! Server configuration.
//!
//! Read from a TOML file layered with `COMPASS_`-prefixed environment
//! variables; nested keys use `__`, e.g. `COMPASS_DESTINATION_SERVICE__URL`.

use std::path::{Path, PathBuf};

use compass_core::formation_service::DEFAULT_CONCURRENCY;
use compass_destination::DestinationServiceConfig;
use serde::Deserialize;

fn default_interval_secs() -> u64 { 60 }

fn default_concurrency() -> usize { DEFAULT_CONCURRENCY }

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
  #[serde(default = "default_concurrency")]
  pub concurrency:   usize,
}

impl Default for ReconciliationConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_interval_secs(),
      concurrency:   default_concurrency(),
    }
  }
}

/// Runtime server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  pub host:                String,
  pub port:                u16,
  pub store_path:          PathBuf,
  pub auth_username:       String,
  pub auth_password_hash:  String,
  pub destination_service: DestinationServiceConfig,
  #[serde(default)]
  pub reconciliation:      ReconciliationConfig,
}

impl ServerConfig {
  /// Layer `file` (optional) and the process environment.
  pub fn load(file: &Path) -> Result<Self, config::ConfigError> {
    Self::from_sources(
      config::File::from(file).required(false),
      config::Environment::with_prefix("COMPASS")
        .prefix_separator("_")
        .separator("__"),
    )
  }

  fn from_sources<F, E>(file: F, env: E) -> Result<Self, config::ConfigError>
  where
    F: config::Source + Send + Sync + 'static,
    E: config::Source + Send + Sync + 'static,
  {
    config::Config::builder()
      .add_source(file)
      .add_source(env)
      .build()?
      .try_deserialize()
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
