//! The `reqwest` implementation of [`DestinationService`].

use std::time::Duration;

use async_trait::async_trait;
use compass_core::destination::{
  CertificateRequest, CertificateResponse, CreateOutcome, DestinationError,
  DestinationRequest, DestinationService, DestinationTarget,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};

use crate::{DestinationServiceConfig, Result, token::TokenCache};

/// Bodies longer than this are cut when copied into error messages.
const MAX_ERROR_BODY: usize = 512;

pub struct DestinationServiceClient {
  http:   Client,
  config: DestinationServiceConfig,
  tokens: TokenCache,
}

impl DestinationServiceClient {
  pub fn new(config: DestinationServiceConfig) -> Result<Self> {
    config.validate()?;
    let http = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()?;
    Ok(Self { http, config, tokens: TokenCache::default() })
  }

  pub fn config(&self) -> &DestinationServiceConfig { &self.config }

  // ── Request helpers ────────────────────────────────────────────────────────

  /// Send an authenticated request. A 401 drops the cached token and retries
  /// once with a fresh one.
  async fn send(
    &self,
    target: &DestinationTarget,
    build: impl Fn(&Client) -> RequestBuilder,
  ) -> Result<Response, DestinationError> {
    let mut retried = false;
    loop {
      let token = self.tokens.get(&self.http, &self.config, target).await?;
      let resp = build(&self.http)
        .bearer_auth(&token)
        .send()
        .await
        .map_err(transport_error)?;

      if resp.status() == StatusCode::UNAUTHORIZED && !retried {
        tracing::debug!(
          subaccount = %target.subaccount_id,
          "access token rejected; refreshing"
        );
        self.tokens.invalidate(target).await;
        retried = true;
        continue;
      }
      return Ok(resp);
    }
  }

  async fn delete(
    &self,
    target: &DestinationTarget,
    url: String,
    what: &str,
  ) -> Result<(), DestinationError> {
    let resp = self
      .send(target, |http| http.request(Method::DELETE, &url))
      .await?;
    let status = resp.status();
    if status.is_success() || status == StatusCode::NOT_FOUND {
      tracing::debug!(%url, %status, "{what} deleted");
      return Ok(());
    }
    Err(status_error(resp, what).await)
  }

  async fn fetch_certificate(
    &self,
    target: &DestinationTarget,
    name: &str,
  ) -> Result<CertificateResponse, DestinationError> {
    let url = format!("{}/{}", self.config.certificates_url(target), name);
    let resp = self.send(target, |http| http.get(&url)).await?;
    if !resp.status().is_success() {
      return Err(status_error(resp, "certificate lookup").await);
    }
    decode_certificate(resp).await
  }
}

#[async_trait]
impl DestinationService for DestinationServiceClient {
  async fn create_destination(
    &self,
    target: &DestinationTarget,
    request: &DestinationRequest,
  ) -> Result<CreateOutcome, DestinationError> {
    let url = self.config.destinations_url(target);
    let resp = self
      .send(target, |http| http.post(&url).json(request))
      .await?;

    match resp.status() {
      status if status.is_success() => {
        tracing::info!(name = request.name(), subaccount = %target.subaccount_id, "destination created");
        Ok(CreateOutcome::Created)
      }
      StatusCode::CONFLICT => {
        tracing::debug!(name = request.name(), "destination already exists");
        Ok(CreateOutcome::AlreadyExists)
      }
      _ => Err(status_error(resp, "destination creation").await),
    }
  }

  async fn delete_destination(
    &self,
    target: &DestinationTarget,
    name: &str,
  ) -> Result<(), DestinationError> {
    let url = format!("{}/{}", self.config.destinations_url(target), name);
    self.delete(target, url, "destination").await
  }

  async fn create_certificate(
    &self,
    target: &DestinationTarget,
    request: &CertificateRequest,
  ) -> Result<CertificateResponse, DestinationError> {
    let url = self.config.certificates_url(target);
    let resp = self
      .send(target, |http| http.post(&url).json(request))
      .await?;

    match resp.status() {
      status if status.is_success() => {
        tracing::info!(name = %request.file_name, subaccount = %target.subaccount_id, "certificate created");
        decode_certificate(resp).await
      }
      StatusCode::CONFLICT => {
        tracing::debug!(name = %request.file_name, "certificate already exists");
        self.fetch_certificate(target, &request.file_name).await
      }
      _ => Err(status_error(resp, "certificate creation").await),
    }
  }

  async fn delete_certificate(
    &self,
    target: &DestinationTarget,
    name: &str,
  ) -> Result<(), DestinationError> {
    let url = format!("{}/{}", self.config.certificates_url(target), name);
    self.delete(target, url, "certificate").await
  }
}

// ─── Response classification ─────────────────────────────────────────────────

fn transport_error(e: reqwest::Error) -> DestinationError {
  DestinationError::transient(
    e.status().map(|s| s.as_u16()),
    format!("request failed: {e}"),
  )
}

/// 429 and 5xx are worth retrying; every other non-success status is the
/// caller's fault.
async fn status_error(resp: Response, what: &str) -> DestinationError {
  let status = resp.status();
  let mut body = resp.text().await.unwrap_or_default();
  if body.len() > MAX_ERROR_BODY {
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
      end -= 1;
    }
    body.truncate(end);
  }
  let message = if body.is_empty() {
    format!("{what} returned {status}")
  } else {
    format!("{what} returned {status}: {body}")
  };

  if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
    DestinationError::transient(Some(status.as_u16()), message)
  } else {
    DestinationError::client(status.as_u16(), message)
  }
}

async fn decode_certificate(
  resp: Response,
) -> Result<CertificateResponse, DestinationError> {
  resp.json().await.map_err(|e| {
    DestinationError::transient(None, format!("malformed certificate response: {e}"))
  })
}
