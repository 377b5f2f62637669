//! TLS certificates validated through DNS
//!
//! The provider issues a validation token when the certificate is requested;
//! the certificate only becomes usable once a DNS record carrying that token
//! exists and has propagated. The record is declared as a dependent of the
//! certificate so the engine orders them, nothing polls.

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::GraphError;
use crate::graph::{attr, ResourceDescriptor, ResourceHandle, ResourceKind, StackGraph};
use crate::provider::ProviderBinding;

/// TTL of the validation record, in seconds
pub const VALIDATION_RECORD_TTL: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertificateState {
    Requested,
    PendingValidation,
    Validated,
    Active,
}

impl std::fmt::Display for CertificateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertificateState::Requested => write!(f, "requested"),
            CertificateState::PendingValidation => write!(f, "pending-validation"),
            CertificateState::Validated => write!(f, "validated"),
            CertificateState::Active => write!(f, "active"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    /// The requested step does not follow from the current state
    #[error("certificate for {domain}: cannot go from {from} to {to}")]
    InvalidTransition {
        domain: String,
        from: CertificateState,
        to: CertificateState,
    },

    /// The validation record is missing, wrong, or not yet visible
    #[error("certificate for {domain}: validation record {record} is not satisfied")]
    ValidationPending { domain: String, record: String },
}

/// Token the provider asks to see in DNS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationToken {
    pub record_name: String,
    pub record_type: String,
    pub record_value: String,
}

/// What a resolver currently sees for the validation record name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedRecord {
    pub name: String,
    pub record_type: String,
    pub values: Vec<String>,
    pub propagated: bool,
}

impl ObservedRecord {
    fn satisfies(&self, token: &ValidationToken) -> bool {
        self.propagated
            && self.name.trim_end_matches('.') == token.record_name.trim_end_matches('.')
            && self.record_type == token.record_type
            && self.values.iter().any(|v| v == &token.record_value)
    }
}

/// Lifecycle of one DNS-validated certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateLifecycle {
    pub domain: String,
    pub state: CertificateState,
    pub token: Option<ValidationToken>,
}

impl CertificateLifecycle {
    pub fn request(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            state: CertificateState::Requested,
            token: None,
        }
    }

    fn invalid(&self, to: CertificateState) -> CertificateError {
        CertificateError::InvalidTransition {
            domain: self.domain.clone(),
            from: self.state,
            to,
        }
    }

    /// Requested -> PendingValidation once the provider hands out a token
    pub fn issue_token(&mut self, token: ValidationToken) -> Result<(), CertificateError> {
        if self.state != CertificateState::Requested {
            return Err(self.invalid(CertificateState::PendingValidation));
        }
        debug!(domain = %self.domain, record = %token.record_name, "Validation token issued");
        self.token = Some(token);
        self.state = CertificateState::PendingValidation;
        Ok(())
    }

    /// PendingValidation -> Validated, only when `observed` carries the token
    /// and has propagated
    pub fn validate(&mut self, observed: Option<&ObservedRecord>) -> Result<(), CertificateError> {
        let token = match (&self.state, &self.token) {
            (CertificateState::PendingValidation, Some(token)) => token,
            _ => return Err(self.invalid(CertificateState::Validated)),
        };
        match observed {
            Some(record) if record.satisfies(token) => {
                info!(domain = %self.domain, "Certificate validated");
                self.state = CertificateState::Validated;
                Ok(())
            }
            _ => Err(CertificateError::ValidationPending {
                domain: self.domain.clone(),
                record: token.record_name.clone(),
            }),
        }
    }

    /// Validated -> Active
    pub fn activate(&mut self) -> Result<(), CertificateError> {
        if self.state != CertificateState::Validated {
            return Err(self.invalid(CertificateState::Active));
        }
        self.state = CertificateState::Active;
        Ok(())
    }

    pub fn is_usable(&self) -> bool {
        self.state == CertificateState::Active
    }
}

/// Certificate plus the record that validates it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedCertificate {
    pub certificate: ResourceHandle,
    pub validation_record: ResourceHandle,
}

/// Declare a DNS-validated certificate for `domain` through `issuer`, with
/// its validation record written into `zone_id` through `dns`.
/// The record is named `<name>ValidationDomain`.
pub fn declare_certificate(
    graph: &mut StackGraph,
    name: &str,
    domain: &str,
    issuer: &ProviderBinding,
    dns: &ProviderBinding,
    zone_id: &str,
) -> Result<ValidatedCertificate, GraphError> {
    let certificate = graph.declare(ResourceDescriptor::new(
        name,
        ResourceKind::Certificate,
        issuer,
        json!({
            "domainName": domain,
            "validationMethod": "DNS",
        }),
    ))?;

    let validation_record = graph.declare(
        ResourceDescriptor::new(
            format!("{}ValidationDomain", name),
            ResourceKind::DnsRecord,
            dns,
            json!({
                "name": certificate.attr(attr::VALIDATION_RECORD_NAME),
                "zoneId": zone_id,
                "type": certificate.attr(attr::VALIDATION_RECORD_TYPE),
                "records": [certificate.attr(attr::VALIDATION_RECORD_VALUE)],
                "ttl": VALIDATION_RECORD_TTL,
            }),
        )
        .depends_on(&certificate),
    )?;

    debug!(certificate = %name, domain = %domain, region = %issuer.region, "Declared certificate");
    Ok(ValidatedCertificate {
        certificate,
        validation_record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> ValidationToken {
        ValidationToken {
            record_name: "_x1.api.eneftea.com.".to_string(),
            record_type: "CNAME".to_string(),
            record_value: "_y2.acm-validations.aws.".to_string(),
        }
    }

    fn observed(propagated: bool) -> ObservedRecord {
        ObservedRecord {
            name: "_x1.api.eneftea.com".to_string(),
            record_type: "CNAME".to_string(),
            values: vec!["_y2.acm-validations.aws.".to_string()],
            propagated,
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let mut cert = CertificateLifecycle::request("api.eneftea.com");
        cert.issue_token(token()).unwrap();
        assert_eq!(cert.state, CertificateState::PendingValidation);
        cert.validate(Some(&observed(true))).unwrap();
        cert.activate().unwrap();
        assert!(cert.is_usable());
    }

    #[test]
    fn test_validation_requires_propagated_record() {
        let mut cert = CertificateLifecycle::request("api.eneftea.com");
        cert.issue_token(token()).unwrap();

        assert!(matches!(
            cert.validate(None),
            Err(CertificateError::ValidationPending { .. })
        ));
        assert!(matches!(
            cert.validate(Some(&observed(false))),
            Err(CertificateError::ValidationPending { .. })
        ));

        let mut wrong = observed(true);
        wrong.values = vec!["something-else".to_string()];
        assert!(cert.validate(Some(&wrong)).is_err());
        assert_eq!(cert.state, CertificateState::PendingValidation);
    }

    #[test]
    fn test_skipping_states_is_rejected() {
        let mut cert = CertificateLifecycle::request("api.eneftea.com");
        assert_eq!(
            cert.activate().unwrap_err(),
            CertificateError::InvalidTransition {
                domain: "api.eneftea.com".to_string(),
                from: CertificateState::Requested,
                to: CertificateState::Active,
            }
        );
        assert!(cert.validate(Some(&observed(true))).is_err());

        cert.issue_token(token()).unwrap();
        assert!(cert.issue_token(token()).is_err());
    }

    #[test]
    fn test_declared_record_depends_on_certificate() {
        let mut graph = StackGraph::new();
        let primary = ProviderBinding::new("eu-west-2", "eneftea");
        let edge = ProviderBinding::new("us-east-1", "eneftea");

        let cert = declare_certificate(
            &mut graph,
            "cdn-certificate",
            "cdn.eneftea.com",
            &edge,
            &primary,
            "Z0123456789",
        )
        .unwrap();

        assert_eq!(cert.validation_record.name, "cdn-certificateValidationDomain");
        let record = graph.get("cdn-certificateValidationDomain").unwrap();
        assert!(record.predecessors().contains("cdn-certificate"));
        assert_eq!(record.provider, "aws_eu-west-2");
        assert_eq!(record.properties["ttl"], 300);
        assert_eq!(graph.get("cdn-certificate").unwrap().provider, "aws_us-east-1");
    }
}
