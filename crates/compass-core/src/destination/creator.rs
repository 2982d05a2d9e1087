//! Creation and deletion of destinations and certificates for one
//! assignment.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
  BasicAuthenticationCredentials, BasicAuthenticationDestinationRequest,
  CertificateRequest, CertificateResponse, CreateOutcome, DeletionErrors,
  DeletionFailure, DesignTimeDestinationRequest, DestinationDetails,
  DestinationError, DestinationRequest, DestinationService, DestinationTarget,
  Provisioned, ProvisionedCertificate, ProvisionedDestination, ProvisionedKind,
  SamlAssertionCredentials, SamlAssertionDestinationRequest,
  read_correlation_ids,
};
use crate::{assignment::FormationAssignment, resource::Tenant};

/// Default dotted path of the correlation IDs inside `additionalProperties`.
pub const DEFAULT_CORRELATION_IDS_PATH: &str = "correlationIds";

const CERTIFICATE_PREFIX: &str = "saml";

/// The assignment a destination is created for, with its owning tenant.
#[derive(Debug, Clone, Copy)]
pub struct AssignmentContext<'a> {
  pub assignment: &'a FormationAssignment,
  pub tenant:     &'a Tenant,
}

impl AssignmentContext<'_> {
  /// Resolve where a destination lives: its own subaccount when given, else
  /// the tenant's; always the tenant's region.
  pub fn target(
    &self,
    details: &DestinationDetails,
  ) -> Result<DestinationTarget, DestinationError> {
    let region = self
      .tenant
      .region
      .clone()
      .filter(|r| !r.trim().is_empty())
      .ok_or_else(|| {
        DestinationError::validation(format!(
          "tenant {} has no destination service region",
          self.tenant.external_id
        ))
      })?;
    let subaccount_id = details
      .subaccount_id
      .clone()
      .filter(|s| !s.trim().is_empty())
      .unwrap_or_else(|| self.tenant.external_id.clone());
    Ok(DestinationTarget { region, subaccount_id })
  }
}

/// Name of the certificate backing the SAML destination at `index`.
pub fn certificate_name(assignment_id: Uuid, index: usize) -> String {
  format!("{CERTIFICATE_PREFIX}-{}-{index}", assignment_id.simple())
}

pub struct DestinationCreator<D> {
  service:              Arc<D>,
  correlation_ids_path: String,
}

impl<D> Clone for DestinationCreator<D> {
  fn clone(&self) -> Self {
    Self {
      service:              self.service.clone(),
      correlation_ids_path: self.correlation_ids_path.clone(),
    }
  }
}

impl<D: DestinationService> DestinationCreator<D> {
  pub fn new(service: Arc<D>) -> Self {
    Self {
      service,
      correlation_ids_path: DEFAULT_CORRELATION_IDS_PATH.to_owned(),
    }
  }

  pub fn with_correlation_ids_path(mut self, path: impl Into<String>) -> Self {
    self.correlation_ids_path = path.into();
    self
  }

  pub fn service(&self) -> &D { &self.service }

  /// Validate, skip if already recorded, create, record. Returns whether a
  /// create call was made.
  async fn create_one(
    &self,
    ctx: AssignmentContext<'_>,
    index: usize,
    kind: ProvisionedKind,
    target: DestinationTarget,
    request: DestinationRequest,
    provisioned: &mut Provisioned,
  ) -> Result<bool, DestinationError> {
    request.validate(&self.correlation_ids_path)?;
    let correlation_ids = read_correlation_ids(
      request.additional_properties(),
      &self.correlation_ids_path,
    );

    if provisioned.covers_destination(request.name(), &target, &correlation_ids) {
      debug!(
        formation_assignment_id = %ctx.assignment.id,
        destination = %request.name(),
        "destination already provisioned, skipping"
      );
      return Ok(false);
    }

    let outcome = self.service.create_destination(&target, &request).await?;
    info!(
      formation_assignment_id = %ctx.assignment.id,
      destination = %request.name(),
      subaccount_id = %target.subaccount_id,
      existed = outcome == CreateOutcome::AlreadyExists,
      "created {kind}"
    );
    provisioned.record_destination(ProvisionedDestination {
      index,
      kind,
      name: request.name().to_owned(),
      subaccount_id: target.subaccount_id,
      region: target.region,
      correlation_ids,
    });
    Ok(true)
  }

  /// Create the design-time destinations of an assignment, stopping at the
  /// first failure. Returns how many create calls succeeded.
  pub async fn create_design_time_destinations(
    &self,
    ctx: AssignmentContext<'_>,
    destinations: &[DestinationDetails],
    correlation_ids: &[String],
    provisioned: &mut Provisioned,
  ) -> Result<usize, DestinationError> {
    let mut created = 0;
    for (index, details) in destinations.iter().enumerate() {
      let target = ctx.target(details)?;
      let request =
        DestinationRequest::DesignTime(DesignTimeDestinationRequest::from_details(
          details,
          &self.correlation_ids_path,
          correlation_ids,
        )?);
      if self
        .create_one(ctx, index, ProvisionedKind::DesignTime, target, request, provisioned)
        .await?
      {
        created += 1;
      }
    }
    Ok(created)
  }

  /// Create the basic-authentication destinations, stopping at the first
  /// failure. Correlation IDs listed on the credentials take precedence over
  /// `correlation_ids`.
  pub async fn create_basic_credential_destinations(
    &self,
    ctx: AssignmentContext<'_>,
    credentials: &BasicAuthenticationCredentials,
    correlation_ids: &[String],
    provisioned: &mut Provisioned,
  ) -> Result<usize, DestinationError> {
    let ids: &[String] = if credentials.correlation_ids.is_empty() {
      correlation_ids
    } else {
      &credentials.correlation_ids
    };
    let mut created = 0;
    for (index, details) in credentials.destinations.iter().enumerate() {
      let target = ctx.target(details)?;
      let request = DestinationRequest::BasicAuthentication(
        BasicAuthenticationDestinationRequest::from_details(
          details,
          credentials,
          &self.correlation_ids_path,
          ids,
        )?,
      );
      if self
        .create_one(
          ctx,
          index,
          ProvisionedKind::BasicAuthentication,
          target,
          request,
          provisioned,
        )
        .await?
      {
        created += 1;
      }
    }
    Ok(created)
  }

  /// Create the SAML assertion destination at `index`, using `certificate`
  /// as its key store.
  #[allow(clippy::too_many_arguments)]
  pub async fn create_saml_assertion_destination(
    &self,
    ctx: AssignmentContext<'_>,
    details: &DestinationDetails,
    credentials: &SamlAssertionCredentials,
    index: usize,
    certificate: &CertificateResponse,
    correlation_ids: &[String],
    provisioned: &mut Provisioned,
  ) -> Result<usize, DestinationError> {
    let ids: &[String] = if credentials.correlation_ids.is_empty() {
      correlation_ids
    } else {
      &credentials.correlation_ids
    };
    let target = ctx.target(details)?;
    let request = DestinationRequest::SamlAssertion(
      SamlAssertionDestinationRequest::from_details(
        details,
        credentials,
        &certificate.file_name,
        &self.correlation_ids_path,
        ids,
      )?,
    );
    let created = self
      .create_one(ctx, index, ProvisionedKind::SamlAssertion, target, request, provisioned)
      .await?;
    Ok(usize::from(created))
  }

  /// Create (or reuse) the certificate for the destination at `index`.
  pub async fn create_certificate_in_destination_service(
    &self,
    ctx: AssignmentContext<'_>,
    details: &DestinationDetails,
    index: usize,
    provisioned: &mut Provisioned,
  ) -> Result<(CertificateResponse, usize), DestinationError> {
    let target = ctx.target(details)?;
    let name = certificate_name(ctx.assignment.id, index);

    if let Some(existing) = provisioned.certificate(&name, &target) {
      debug!(
        formation_assignment_id = %ctx.assignment.id,
        certificate = %name,
        "certificate already provisioned, reusing"
      );
      return Ok((
        CertificateResponse {
          file_name:         existing.file_name.clone(),
          common_name:       existing.common_name.clone(),
          certificate_chain: existing.certificate_chain.clone(),
        },
        index,
      ));
    }

    let request = CertificateRequest::new(name.clone());
    request.validate()?;
    let response = self.service.create_certificate(&target, &request).await?;
    info!(
      formation_assignment_id = %ctx.assignment.id,
      certificate = %name,
      subaccount_id = %target.subaccount_id,
      "created certificate"
    );
    provisioned.record_certificate(ProvisionedCertificate {
      index,
      name,
      subaccount_id: target.subaccount_id,
      region: target.region,
      file_name: response.file_name.clone(),
      common_name: response.common_name.clone(),
      certificate_chain: response.certificate_chain.clone(),
    });
    Ok((response, index))
  }

  pub async fn delete_certificate_from_destination_service(
    &self,
    name: &str,
    target: &DestinationTarget,
  ) -> Result<(), DestinationError> {
    self.service.delete_certificate(target, name).await?;
    info!(certificate = %name, subaccount_id = %target.subaccount_id, "deleted certificate");
    Ok(())
  }

  pub async fn delete_destination_from_destination_service(
    &self,
    name: &str,
    target: &DestinationTarget,
  ) -> Result<(), DestinationError> {
    self.service.delete_destination(target, name).await?;
    info!(destination = %name, subaccount_id = %target.subaccount_id, "deleted destination");
    Ok(())
  }

  /// Delete every destination, then every certificate, listed in
  /// `provisioned`. Every item is attempted; deleted items are removed from
  /// the record and the rest are reported together.
  pub async fn delete_destinations(
    &self,
    provisioned: &mut Provisioned,
  ) -> Result<(), DeletionErrors> {
    let mut errors = DeletionErrors::default();

    for destination in provisioned.destinations.clone() {
      let result = self
        .delete_destination_from_destination_service(
          &destination.name,
          &destination.target(),
        )
        .await;
      match result {
        Ok(()) => provisioned
          .remove_destination(&destination.name, &destination.subaccount_id),
        Err(error) => {
          warn!(
            destination = %destination.name,
            index = destination.index,
            error = %error,
            "failed to delete destination"
          );
          errors.push(DeletionFailure {
            index: destination.index,
            resource: destination.kind,
            name: destination.name,
            error,
          });
        }
      }
    }

    for certificate in provisioned.certificates.clone() {
      let result = self
        .delete_certificate_from_destination_service(
          &certificate.name,
          &certificate.target(),
        )
        .await;
      match result {
        Ok(()) => provisioned
          .remove_certificate(&certificate.name, &certificate.subaccount_id),
        Err(error) => {
          warn!(
            certificate = %certificate.name,
            index = certificate.index,
            error = %error,
            "failed to delete certificate"
          );
          errors.push(DeletionFailure {
            index: certificate.index,
            resource: ProvisionedKind::Certificate,
            name: certificate.name,
            error,
          });
        }
      }
    }

    errors.into_result()
  }
}
