//! The record of external resources created for an assignment.
//!
//! Stored in the assignment's `value` under [`PROVISIONED_KEY`]. Re-processing
//! consults it to skip work already done, and unassignment deletes exactly
//! what it lists.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::Display;

use super::DestinationTarget;

/// Reserved key of the provisioning record inside an assignment's value.
pub const PROVISIONED_KEY: &str = "provisioned";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionedKind {
  #[strum(to_string = "design-time destination")]
  DesignTime,
  #[strum(to_string = "basic authentication destination")]
  BasicAuthentication,
  #[strum(to_string = "SAML assertion destination")]
  SamlAssertion,
  #[strum(to_string = "certificate")]
  Certificate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedDestination {
  /// Position of the destination in its configuration section.
  pub index:           usize,
  pub kind:            ProvisionedKind,
  pub name:            String,
  pub subaccount_id:   String,
  pub region:          String,
  #[serde(default)]
  pub correlation_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedCertificate {
  /// Index of the destination the certificate was created for.
  pub index:             usize,
  pub name:              String,
  pub subaccount_id:     String,
  pub region:            String,
  pub file_name:         String,
  pub common_name:       String,
  #[serde(default)]
  pub certificate_chain: String,
}

impl ProvisionedDestination {
  pub fn target(&self) -> DestinationTarget {
    DestinationTarget {
      region:        self.region.clone(),
      subaccount_id: self.subaccount_id.clone(),
    }
  }
}

impl ProvisionedCertificate {
  pub fn target(&self) -> DestinationTarget {
    DestinationTarget {
      region:        self.region.clone(),
      subaccount_id: self.subaccount_id.clone(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioned {
  #[serde(default)]
  pub destinations: Vec<ProvisionedDestination>,
  #[serde(default)]
  pub certificates: Vec<ProvisionedCertificate>,
}

impl Provisioned {
  /// Read the record from an assignment value; absent means nothing was
  /// provisioned.
  pub fn from_value(value: Option<&Value>) -> Result<Self, serde_json::Error> {
    match value.and_then(|v| v.get(PROVISIONED_KEY)) {
      Some(record) => serde_json::from_value(record.clone()),
      None => Ok(Self::default()),
    }
  }

  /// Return `value` with the record stored under [`PROVISIONED_KEY`], or
  /// removed when empty. A non-object value is replaced by an object.
  pub fn write_into(&self, value: Option<Value>) -> Result<Option<Value>, serde_json::Error> {
    let mut map = match value {
      Some(Value::Object(map)) => map,
      _ => Map::new(),
    };
    if self.is_empty() {
      map.remove(PROVISIONED_KEY);
    } else {
      map.insert(PROVISIONED_KEY.to_owned(), serde_json::to_value(self)?);
    }
    Ok(if map.is_empty() { None } else { Some(Value::Object(map)) })
  }

  pub fn is_empty(&self) -> bool {
    self.destinations.is_empty() && self.certificates.is_empty()
  }

  /// Whether a destination with this name and subaccount is recorded with
  /// every one of `correlation_ids`.
  pub fn covers_destination(
    &self,
    name: &str,
    target: &DestinationTarget,
    correlation_ids: &[String],
  ) -> bool {
    self.destinations.iter().any(|d| {
      d.name == name
        && d.subaccount_id == target.subaccount_id
        && correlation_ids.iter().all(|id| d.correlation_ids.contains(id))
    })
  }

  /// Record a destination, replacing an entry with the same name and
  /// subaccount.
  pub fn record_destination(&mut self, destination: ProvisionedDestination) {
    self.remove_destination(&destination.name, &destination.subaccount_id);
    self.destinations.push(destination);
  }

  pub fn remove_destination(&mut self, name: &str, subaccount_id: &str) {
    self
      .destinations
      .retain(|d| !(d.name == name && d.subaccount_id == subaccount_id));
  }

  pub fn certificate(
    &self,
    name: &str,
    target: &DestinationTarget,
  ) -> Option<&ProvisionedCertificate> {
    self
      .certificates
      .iter()
      .find(|c| c.name == name && c.subaccount_id == target.subaccount_id)
  }

  pub fn record_certificate(&mut self, certificate: ProvisionedCertificate) {
    self.remove_certificate(&certificate.name, &certificate.subaccount_id);
    self.certificates.push(certificate);
  }

  pub fn remove_certificate(&mut self, name: &str, subaccount_id: &str) {
    self
      .certificates
      .retain(|c| !(c.name == name && c.subaccount_id == subaccount_id));
  }
}
