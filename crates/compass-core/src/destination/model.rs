//! Destination-service request bodies, the assignment configuration they are
//! built from, and their validation.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

use super::DestinationError;

type Pattern = LazyLock<Result<Regex, regex::Error>>;

static DESTINATION_NAME: Pattern =
  LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{1,64}$"));

static CERTIFICATE_NAME: Pattern =
  LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.-]{1,64}$"));

fn pattern(p: &'static Pattern) -> Result<&'static Regex, DestinationError> {
  p.as_ref()
    .map_err(|e| DestinationError::validation(format!("name pattern: {e}")))
}

const MAX_USER_LEN: usize = 256;

// ─── Enumerations ────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum DestinationType {
  Http,
  Rfc,
  Ldap,
  Mail,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
pub enum ProxyType {
  Internet,
  OnPremise,
  PrivateLink,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
pub enum AuthenticationType {
  NoAuthentication,
  BasicAuthentication,
  #[serde(rename = "SAMLAssertion")]
  #[strum(serialize = "SAMLAssertion")]
  SamlAssertion,
}

/// Credential sections of the assignment configuration that certificate data
/// is written into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum AuthSection {
  BasicAuthentication,
  SamlAssertion,
}

// ─── Assignment configuration ────────────────────────────────────────────────

/// One destination as described by a participant in the assignment
/// configuration. Fields are kept loose here and checked when the request
/// body is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationDetails {
  pub name:                  String,
  #[serde(rename = "type", default)]
  pub destination_type:      Option<String>,
  #[serde(default)]
  pub description:           Option<String>,
  #[serde(default)]
  pub proxy_type:            Option<String>,
  #[serde(default)]
  pub authentication_type:   Option<String>,
  #[serde(default)]
  pub url:                   Option<String>,
  /// Subaccount to create the destination in; defaults to the tenant's.
  #[serde(default)]
  pub subaccount_id:         Option<String>,
  #[serde(default)]
  pub additional_properties: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuthenticationCredentials {
  #[serde(default)]
  pub url:             Option<String>,
  pub username:        String,
  pub password:        String,
  #[serde(default)]
  pub correlation_ids: Vec<String>,
  #[serde(default)]
  pub destinations:    Vec<DestinationDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamlAssertionCredentials {
  #[serde(default)]
  pub url:             Option<String>,
  #[serde(default)]
  pub audience:        Option<String>,
  #[serde(default)]
  pub correlation_ids: Vec<String>,
  #[serde(default)]
  pub destinations:    Vec<DestinationDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCommunication {
  #[serde(default)]
  pub basic_authentication: Option<BasicAuthenticationCredentials>,
  #[serde(default)]
  pub saml_assertion:       Option<SamlAssertionCredentials>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
  #[serde(default)]
  pub outbound_communication: Option<OutboundCommunication>,
}

/// The destination-related parts of a formation assignment's `value`.
/// Unrelated keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentConfig {
  #[serde(default)]
  pub destinations: Vec<DestinationDetails>,
  #[serde(default)]
  pub credentials:  Option<Credentials>,
}

impl AssignmentConfig {
  pub fn from_value(value: &Value) -> Result<Self, DestinationError> {
    serde_json::from_value(value.clone()).map_err(|e| {
      DestinationError::validation(format!(
        "invalid assignment configuration: {e}"
      ))
    })
  }

  fn outbound(&self) -> Option<&OutboundCommunication> {
    self.credentials.as_ref()?.outbound_communication.as_ref()
  }

  pub fn basic_authentication(&self) -> Option<&BasicAuthenticationCredentials> {
    self.outbound()?.basic_authentication.as_ref()
  }

  pub fn saml_assertion(&self) -> Option<&SamlAssertionCredentials> {
    self.outbound()?.saml_assertion.as_ref()
  }

  pub fn is_empty(&self) -> bool {
    self.destinations.is_empty()
      && self.basic_authentication().is_none_or(|c| c.destinations.is_empty())
      && self.saml_assertion().is_none_or(|c| c.destinations.is_empty())
  }
}

// ─── Request bodies ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignTimeDestinationRequest {
  pub name:                  String,
  pub url:                   String,
  #[serde(rename = "type")]
  pub destination_type:      DestinationType,
  pub proxy_type:            ProxyType,
  pub authentication_type:   AuthenticationType,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description:           Option<String>,
  pub additional_properties: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuthenticationDestinationRequest {
  pub name:                  String,
  pub url:                   String,
  #[serde(rename = "type")]
  pub destination_type:      DestinationType,
  pub proxy_type:            ProxyType,
  pub authentication_type:   AuthenticationType,
  pub user:                  String,
  pub password:              String,
  pub additional_properties: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SamlAssertionDestinationRequest {
  pub name:                  String,
  pub url:                   String,
  #[serde(rename = "type")]
  pub destination_type:      DestinationType,
  pub proxy_type:            ProxyType,
  pub authentication_type:   AuthenticationType,
  pub audience:              String,
  pub key_store_location:    String,
  pub additional_properties: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequest {
  pub file_name:   String,
  pub common_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateResponse {
  pub file_name:         String,
  pub common_name:       String,
  pub certificate_chain: String,
}

/// Any destination request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DestinationRequest {
  DesignTime(DesignTimeDestinationRequest),
  BasicAuthentication(BasicAuthenticationDestinationRequest),
  SamlAssertion(SamlAssertionDestinationRequest),
}

impl DestinationRequest {
  pub fn name(&self) -> &str {
    match self {
      Self::DesignTime(r) => &r.name,
      Self::BasicAuthentication(r) => &r.name,
      Self::SamlAssertion(r) => &r.name,
    }
  }

  pub fn additional_properties(&self) -> &Value {
    match self {
      Self::DesignTime(r) => &r.additional_properties,
      Self::BasicAuthentication(r) => &r.additional_properties,
      Self::SamlAssertion(r) => &r.additional_properties,
    }
  }

  pub fn validate(&self, correlation_ids_path: &str) -> Result<(), DestinationError> {
    match self {
      Self::DesignTime(r) => r.validate(correlation_ids_path),
      Self::BasicAuthentication(r) => r.validate(correlation_ids_path),
      Self::SamlAssertion(r) => r.validate(correlation_ids_path),
    }
  }
}

// ─── Construction ────────────────────────────────────────────────────────────

fn parse_field<T: std::str::FromStr>(
  field: &str,
  value: Option<&str>,
  default: Option<T>,
) -> Result<T, DestinationError> {
  match value {
    Some(raw) => raw.parse().map_err(|_| {
      DestinationError::validation(format!("unsupported {field} {raw:?}"))
    }),
    None => default.ok_or_else(|| {
      DestinationError::validation(format!("{field} is required"))
    }),
  }
}

fn required_url(
  details: &DestinationDetails,
  fallback: Option<&str>,
) -> Result<String, DestinationError> {
  details
    .url
    .as_deref()
    .or(fallback)
    .filter(|u| !u.trim().is_empty())
    .map(str::to_owned)
    .ok_or_else(|| {
      DestinationError::validation(format!(
        "destination {:?} has no url",
        details.name
      ))
    })
}

/// Copy `additionalProperties`, filling the correlation IDs at `path` from
/// `fallback` when the participant did not supply any.
fn additional_properties(
  details: &DestinationDetails,
  path: &str,
  fallback: &[String],
) -> Value {
  let mut props = details
    .additional_properties
    .clone()
    .unwrap_or_else(|| Value::Object(Map::new()));
  if props.is_object()
    && read_correlation_ids(&props, path).is_empty()
    && !fallback.is_empty()
  {
    set_path(&mut props, path, Value::String(fallback.join(",")));
  }
  props
}

impl DesignTimeDestinationRequest {
  pub fn from_details(
    details: &DestinationDetails,
    correlation_ids_path: &str,
    correlation_ids: &[String],
  ) -> Result<Self, DestinationError> {
    Ok(Self {
      name:                  details.name.clone(),
      url:                   required_url(details, None)?,
      destination_type:      parse_field(
        "destination type",
        details.destination_type.as_deref(),
        Some(DestinationType::Http),
      )?,
      proxy_type:            parse_field(
        "proxy type",
        details.proxy_type.as_deref(),
        Some(ProxyType::Internet),
      )?,
      authentication_type:   parse_field(
        "authentication type",
        details.authentication_type.as_deref(),
        Some(AuthenticationType::NoAuthentication),
      )?,
      description:           details.description.clone(),
      additional_properties: additional_properties(
        details,
        correlation_ids_path,
        correlation_ids,
      ),
    })
  }

  pub fn validate(&self, correlation_ids_path: &str) -> Result<(), DestinationError> {
    validate_name(&self.name)?;
    validate_url(&self.url)?;
    validate_auth(self.authentication_type, AuthenticationType::NoAuthentication)?;
    validate_additional_properties(&self.additional_properties, correlation_ids_path)
  }
}

impl BasicAuthenticationDestinationRequest {
  pub fn from_details(
    details: &DestinationDetails,
    credentials: &BasicAuthenticationCredentials,
    correlation_ids_path: &str,
    correlation_ids: &[String],
  ) -> Result<Self, DestinationError> {
    Ok(Self {
      name:                  details.name.clone(),
      url:                   required_url(details, credentials.url.as_deref())?,
      destination_type:      parse_field(
        "destination type",
        details.destination_type.as_deref(),
        Some(DestinationType::Http),
      )?,
      proxy_type:            parse_field(
        "proxy type",
        details.proxy_type.as_deref(),
        Some(ProxyType::Internet),
      )?,
      authentication_type:   parse_field(
        "authentication type",
        details.authentication_type.as_deref(),
        Some(AuthenticationType::BasicAuthentication),
      )?,
      user:                  credentials.username.clone(),
      password:              credentials.password.clone(),
      additional_properties: additional_properties(
        details,
        correlation_ids_path,
        correlation_ids,
      ),
    })
  }

  pub fn validate(&self, correlation_ids_path: &str) -> Result<(), DestinationError> {
    validate_name(&self.name)?;
    validate_url(&self.url)?;
    validate_http(self.destination_type)?;
    validate_auth(
      self.authentication_type,
      AuthenticationType::BasicAuthentication,
    )?;
    let user_len = self.user.chars().count();
    if user_len == 0 || user_len > MAX_USER_LEN {
      return Err(DestinationError::validation(format!(
        "user must be between 1 and {MAX_USER_LEN} characters"
      )));
    }
    if self.password.is_empty() {
      return Err(DestinationError::validation("password is required"));
    }
    validate_additional_properties(&self.additional_properties, correlation_ids_path)
  }
}

impl SamlAssertionDestinationRequest {
  pub fn from_details(
    details: &DestinationDetails,
    credentials: &SamlAssertionCredentials,
    key_store_location: &str,
    correlation_ids_path: &str,
    correlation_ids: &[String],
  ) -> Result<Self, DestinationError> {
    Ok(Self {
      name:                  details.name.clone(),
      url:                   required_url(details, credentials.url.as_deref())?,
      destination_type:      parse_field(
        "destination type",
        details.destination_type.as_deref(),
        Some(DestinationType::Http),
      )?,
      proxy_type:            parse_field(
        "proxy type",
        details.proxy_type.as_deref(),
        Some(ProxyType::Internet),
      )?,
      authentication_type:   parse_field(
        "authentication type",
        details.authentication_type.as_deref(),
        Some(AuthenticationType::SamlAssertion),
      )?,
      audience:              credentials.audience.clone().unwrap_or_default(),
      key_store_location:    key_store_location.to_owned(),
      additional_properties: additional_properties(
        details,
        correlation_ids_path,
        correlation_ids,
      ),
    })
  }

  pub fn validate(&self, correlation_ids_path: &str) -> Result<(), DestinationError> {
    validate_name(&self.name)?;
    validate_url(&self.url)?;
    validate_http(self.destination_type)?;
    validate_auth(self.authentication_type, AuthenticationType::SamlAssertion)?;
    if self.audience.trim().is_empty() {
      return Err(DestinationError::validation("audience is required"));
    }
    if self.key_store_location.trim().is_empty() {
      return Err(DestinationError::validation("keyStoreLocation is required"));
    }
    validate_additional_properties(&self.additional_properties, correlation_ids_path)
  }
}

impl CertificateRequest {
  pub fn new(name: impl Into<String>) -> Self {
    let name = name.into();
    Self { common_name: name.clone(), file_name: name }
  }

  pub fn validate(&self) -> Result<(), DestinationError> {
    let re = pattern(&CERTIFICATE_NAME)?;
    if !re.is_match(&self.file_name) {
      return Err(DestinationError::validation(format!(
        "certificate name {:?} must match {}",
        self.file_name,
        re.as_str()
      )));
    }
    if self.common_name.trim().is_empty() {
      return Err(DestinationError::validation("common name is required"));
    }
    Ok(())
  }
}

// ─── Validation helpers ──────────────────────────────────────────────────────

fn validate_name(name: &str) -> Result<(), DestinationError> {
  let re = pattern(&DESTINATION_NAME)?;
  if re.is_match(name) {
    Ok(())
  } else {
    Err(DestinationError::validation(format!(
      "destination name {name:?} must match {}",
      re.as_str()
    )))
  }
}

fn validate_url(url: &str) -> Result<(), DestinationError> {
  if url.trim().is_empty() {
    return Err(DestinationError::validation("url is required"));
  }
  Ok(())
}

fn validate_http(destination_type: DestinationType) -> Result<(), DestinationError> {
  if destination_type != DestinationType::Http {
    return Err(DestinationError::validation(format!(
      "destination type must be HTTP, got {destination_type}"
    )));
  }
  Ok(())
}

fn validate_auth(
  actual: AuthenticationType,
  expected: AuthenticationType,
) -> Result<(), DestinationError> {
  if actual != expected {
    return Err(DestinationError::validation(format!(
      "authentication type must be {expected}, got {actual}"
    )));
  }
  Ok(())
}

fn validate_additional_properties(
  props: &Value,
  path: &str,
) -> Result<(), DestinationError> {
  if !props.is_object() {
    return Err(DestinationError::validation(
      "additionalProperties must be a JSON object",
    ));
  }
  if read_correlation_ids(props, path).is_empty() {
    return Err(DestinationError::validation(format!(
      "additionalProperties has no correlation IDs at {path:?}"
    )));
  }
  Ok(())
}

// ─── JSON helpers ────────────────────────────────────────────────────────────

/// Correlation IDs at the dotted `path`: a string, a comma-separated string,
/// or an array of strings. Blank entries are dropped.
pub fn read_correlation_ids(value: &Value, path: &str) -> Vec<String> {
  let mut node = value;
  for segment in path.split('.') {
    match node.get(segment) {
      Some(next) => node = next,
      None => return Vec::new(),
    }
  }
  let raw: Vec<&str> = match node {
    Value::String(s) => s.split(',').collect(),
    Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
    _ => Vec::new(),
  };
  raw
    .into_iter()
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_owned)
    .collect()
}

/// Set the value at a dotted path, creating intermediate objects. Non-object
/// intermediates are replaced.
fn set_path(value: &mut Value, path: &str, new: Value) {
  let mut node = value;
  let mut segments = path.split('.').peekable();
  while let Some(segment) = segments.next() {
    if !node.is_object() {
      *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else { return };
    if segments.peek().is_none() {
      map.insert(segment.to_owned(), new);
      return;
    }
    node = map
      .entry(segment.to_owned())
      .or_insert_with(|| Value::Object(Map::new()));
  }
}

/// Write the certificate fields into
/// `credentials.inboundCommunication.<section>.destinations[index]`, padding
/// the array with empty objects as needed.
pub fn enrich_assignment_config_with_certificate_data(
  mut config: Value,
  section: AuthSection,
  certificate: &CertificateResponse,
  index: usize,
) -> Value {
  let path = format!("credentials.inboundCommunication.{section}.destinations");
  set_path_default_array(&mut config, &path);

  let mut node = &mut config;
  for segment in path.split('.') {
    node = &mut node[segment];
  }
  if let Value::Array(destinations) = node {
    while destinations.len() <= index {
      destinations.push(Value::Object(Map::new()));
    }
    let entry = &mut destinations[index];
    if !entry.is_object() {
      *entry = Value::Object(Map::new());
    }
    if let Value::Object(entry) = entry {
      entry.insert(
        "certificate".into(),
        Value::String(certificate.certificate_chain.clone()),
      );
      entry.insert(
        "fileName".into(),
        Value::String(certificate.file_name.clone()),
      );
      entry.insert(
        "commonName".into(),
        Value::String(certificate.common_name.clone()),
      );
    }
  }
  config
}

fn set_path_default_array(config: &mut Value, path: &str) {
  let mut node = &*config;
  let mut present = true;
  for segment in path.split('.') {
    match node.get(segment) {
      Some(next) => node = next,
      None => {
        present = false;
        break;
      }
    }
  }
  if !present || !node.is_array() {
    set_path(config, path, Value::Array(Vec::new()));
  }
}
