//! OAuth2 client-credential tokens, cached per subaccount.

use std::{
  collections::HashMap,
  time::{Duration, Instant},
};

use compass_core::destination::{DestinationError, DestinationTarget};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::DestinationServiceConfig;

/// Tokens are refreshed this long before the issuer's expiry.
const EXPIRY_SKEW: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
  access_token: String,
  #[serde(default)]
  expires_in:   Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
  value:      String,
  expires_at: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct TokenCache {
  tokens: Mutex<HashMap<DestinationTarget, CachedToken>>,
}

impl TokenCache {
  /// Return a valid token for `target`, fetching a new one if none is cached
  /// or the cached one is about to expire. The cache is not locked while a
  /// token is fetched, so concurrent misses for one target may each fetch.
  pub(crate) async fn get(
    &self,
    http: &reqwest::Client,
    config: &DestinationServiceConfig,
    target: &DestinationTarget,
  ) -> Result<String, DestinationError> {
    if let Some(value) = self.cached(target).await {
      return Ok(value);
    }

    let token = fetch(http, config, target).await?;
    let value = token.value.clone();
    self.tokens.lock().await.insert(target.clone(), token);
    Ok(value)
  }

  async fn cached(&self, target: &DestinationTarget) -> Option<String> {
    let tokens = self.tokens.lock().await;
    tokens
      .get(target)
      .filter(|token| token.expires_at > Instant::now())
      .map(|token| token.value.clone())
  }

  /// Drop the cached token for `target`, e.g. after a 401.
  pub(crate) async fn invalidate(&self, target: &DestinationTarget) {
    self.tokens.lock().await.remove(target);
  }
}

async fn fetch(
  http: &reqwest::Client,
  config: &DestinationServiceConfig,
  target: &DestinationTarget,
) -> Result<CachedToken, DestinationError> {
  let url = config.token_url(target);
  tracing::debug!(%url, subaccount = %target.subaccount_id, "fetching access token");

  let resp = http
    .post(&url)
    .basic_auth(&config.client_id, Some(&config.client_secret))
    .header("x-zid", &target.subaccount_id)
    .form(&[("grant_type", "client_credentials")])
    .send()
    .await
    .map_err(|e| {
      DestinationError::transient(None, format!("token request failed: {e}"))
    })?;

  let status = resp.status();
  if !status.is_success() {
    let body = resp.text().await.unwrap_or_default();
    let message = format!("token request rejected: {body}");
    // An auth failure is a credential problem, not a caller problem, and may
    // clear once the credentials are rotated.
    return Err(DestinationError::transient(Some(status.as_u16()), message));
  }

  let token: TokenResponse = resp.json().await.map_err(|e| {
    DestinationError::transient(None, format!("malformed token response: {e}"))
  })?;

  let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
  Ok(CachedToken {
    value:      token.access_token,
    expires_at: Instant::now() + lifetime.saturating_sub(EXPIRY_SKEW),
  })
}
