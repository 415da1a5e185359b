//! Certificate chain validation against a trust store.

use chrono::{DateTime, Utc};

use crate::certificate::Certificate;
use crate::trust_store::TrustStore;

/// Outcome of validating one certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateValidity {
    reason: Option<String>,
}

impl CertificateValidity {
    pub fn valid() -> Self {
        Self { reason: None }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.reason.is_none()
    }

    /// Why validation failed, if it did
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Validates a certificate against a set of trusted certificates
pub trait CertificateChainValidator: Send + Sync {
    fn validate(&self, certificate: &Certificate, trust_store: &TrustStore) -> CertificateValidity;
}

/// Default validator.
///
/// A certificate passes when it is inside its validity window and is either a
/// trust store entry itself, or is signed by a trust store entry that may
/// issue certificates (a CA, or a self-issued root) and is itself still valid.
/// Every trust store entry is treated as a trust anchor, so no path is built
/// through untrusted intermediates.
#[derive(Debug, Clone, Default)]
pub struct X509CertificateChainValidator {
    validation_time: Option<DateTime<Utc>>,
}

impl X509CertificateChainValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate at a fixed instant instead of the current time
    pub fn at(validation_time: DateTime<Utc>) -> Self {
        Self {
            validation_time: Some(validation_time),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.validation_time.unwrap_or_else(Utc::now)
    }
}

impl CertificateChainValidator for X509CertificateChainValidator {
    fn validate(&self, certificate: &Certificate, trust_store: &TrustStore) -> CertificateValidity {
        let now = self.now();

        if !certificate.is_valid_at(now) {
            return CertificateValidity::invalid(format!(
                "certificate '{}' is outside its validity period ({} - {})",
                certificate.subject(),
                certificate.not_before(),
                certificate.not_after()
            ));
        }

        if trust_store.is_empty() {
            return CertificateValidity::invalid(format!("trust store '{}' is empty", trust_store.name()));
        }

        if trust_store.contains(certificate) {
            return CertificateValidity::valid();
        }

        let mut expired_issuer = None;
        for trusted in trust_store.certificates() {
            if !(trusted.is_ca() || trusted.is_self_issued()) || !certificate.is_issued_by(trusted) {
                continue;
            }
            if trusted.is_valid_at(now) {
                return CertificateValidity::valid();
            }
            expired_issuer = Some(trusted.subject().to_string());
        }

        match expired_issuer {
            Some(issuer) => CertificateValidity::invalid(format!(
                "issuer '{issuer}' of certificate '{}' is outside its validity period",
                certificate.subject()
            )),
            None => CertificateValidity::invalid(format!(
                "no trusted issuer found for certificate '{}' (issuer '{}')",
                certificate.subject(),
                certificate.issuer()
            )),
        }
    }
}
