//! Connection settings for the destination service.

use compass_core::destination::{DEFAULT_CORRELATION_IDS_PATH, DestinationTarget};
use serde::Deserialize;

use crate::{Error, Result};

fn default_timeout_secs() -> u64 { 30 }

fn default_correlation_ids_path() -> String {
  DEFAULT_CORRELATION_IDS_PATH.to_owned()
}

fn default_destinations_path() -> String {
  "/destination-configuration/v1/subaccountDestinations".to_owned()
}

fn default_certificates_path() -> String {
  "/destination-configuration/v1/subaccountCertificates".to_owned()
}

/// `url`, `token_url` and both paths may contain `{region}` and
/// `{subaccountId}` placeholders, filled per request from the
/// [`DestinationTarget`].
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationServiceConfig {
  pub url:                  String,
  pub token_url:            String,
  pub client_id:            String,
  pub client_secret:        String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs:         u64,
  #[serde(default = "default_destinations_path")]
  pub destinations_path:    String,
  #[serde(default = "default_certificates_path")]
  pub certificates_path:    String,
  /// Where correlation IDs live inside a destination's additional
  /// properties. Read by the destination creator, not sent anywhere.
  #[serde(default = "default_correlation_ids_path")]
  pub correlation_ids_path: String,
}

impl DestinationServiceConfig {
  pub fn new(
    url: impl Into<String>,
    token_url: impl Into<String>,
    client_id: impl Into<String>,
    client_secret: impl Into<String>,
  ) -> Self {
    Self {
      url:                  url.into(),
      token_url:            token_url.into(),
      client_id:            client_id.into(),
      client_secret:        client_secret.into(),
      timeout_secs:         default_timeout_secs(),
      destinations_path:    default_destinations_path(),
      certificates_path:    default_certificates_path(),
      correlation_ids_path: default_correlation_ids_path(),
    }
  }

  pub fn validate(&self) -> Result<()> {
    for (field, value) in [
      ("url", &self.url),
      ("token_url", &self.token_url),
      ("client_id", &self.client_id),
    ] {
      if value.trim().is_empty() {
        return Err(Error::Config(format!("{field} is required")));
      }
    }
    if self.timeout_secs == 0 {
      return Err(Error::Config("timeout_secs must be positive".into()));
    }
    Ok(())
  }

  pub fn destinations_url(&self, target: &DestinationTarget) -> String {
    self.join(&self.destinations_path, target)
  }

  pub fn certificates_url(&self, target: &DestinationTarget) -> String {
    self.join(&self.certificates_path, target)
  }

  pub fn token_url(&self, target: &DestinationTarget) -> String {
    fill(&self.token_url, target)
  }

  fn join(&self, path: &str, target: &DestinationTarget) -> String {
    format!(
      "{}/{}",
      fill(&self.url, target).trim_end_matches('/'),
      fill(path, target).trim_start_matches('/')
    )
  }
}

fn fill(template: &str, target: &DestinationTarget) -> String {
  template
    .replace("{region}", &target.region)
    .replace("{subaccountId}", &target.subaccount_id)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn target() -> DestinationTarget {
    DestinationTarget { region: "eu10".into(), subaccount_id: "sub-1".into() }
  }

  #[test]
  fn placeholders_are_filled() {
    let mut config = DestinationServiceConfig::new(
      "https://destination.{region}.example.com/",
      "https://auth.{region}.example.com/oauth/token",
      "client",
      "secret",
    );
    config.certificates_path = "/subaccounts/{subaccountId}/certificates".into();

    assert_eq!(
      config.destinations_url(&target()),
      "https://destination.eu10.example.com/destination-configuration/v1/subaccountDestinations"
    );
    assert_eq!(
      config.certificates_url(&target()),
      "https://destination.eu10.example.com/subaccounts/sub-1/certificates"
    );
    assert_eq!(
      config.token_url(&target()),
      "https://auth.eu10.example.com/oauth/token"
    );
  }

  #[test]
  fn deserialises_with_defaults() {
    let config: DestinationServiceConfig = serde_json::from_value(serde_json::json!({
      "url": "https://destination.example.com",
      "token_url": "https://auth.example.com/oauth/token",
      "client_id": "client",
      "client_secret": "secret",
    }))
    .unwrap();
    assert_eq!(config.timeout_secs, 30);
    assert_eq!(config.correlation_ids_path, "correlationIds");
    assert!(config.validate().is_ok());
  }

  #[test]
  fn empty_url_is_rejected() {
    let config = DestinationServiceConfig::new("", "https://auth", "client", "secret");
    assert!(matches!(config.validate(), Err(Error::Config(_))));
  }
}
