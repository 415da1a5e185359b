//! X.509 certificate handling.
//!
//! Certificates arrive in several encodings: base64 DER inside JWK `x5c`
//! arrays and metadata key descriptors, and PEM bundles on disk. This module
//! normalizes all of them into [`Certificate`], which keeps the DER bytes and
//! the handful of fields the trust repository and the metadata filter need.

use std::fmt;

use base64::{engine::general_purpose, Engine};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::pem::Pem;
use x509_parser::prelude::*;

use crate::error::{Result, TrustError};

/// A parsed X.509 certificate
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
    issuer: String,
    serial: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    public_key: Vec<u8>,
    is_ca: bool,
}

impl Certificate {
    /// Parse a DER encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| TrustError::CertificateParse(format!("x509 parse failed: {e}")))?;

        let validity = cert.validity();
        let not_before = timestamp_to_datetime(validity.not_before.timestamp())?;
        let not_after = timestamp_to_datetime(validity.not_after.timestamp())?;

        let mut is_ca = false;
        for ext in cert.extensions() {
            if let ParsedExtension::BasicConstraints(bc) = ext.parsed_extension() {
                is_ca = bc.ca;
            }
        }

        Ok(Self {
            der: der.to_vec(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: hex::encode_upper(cert.serial.to_bytes_be()),
            not_before,
            not_after,
            public_key: cert.public_key().raw.to_vec(),
            is_ca,
        })
    }

    /// Parse a base64 encoded DER certificate, as found in `x5c` and `KeyInfo`.
    ///
    /// Embedded whitespace (line-wrapped values are common in metadata) is ignored.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let der = general_purpose::STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| TrustError::CertificateEncoding(e.to_string()))?;
        Self::from_der(&der)
    }

    /// Parse every `CERTIFICATE` block of a PEM bundle, in file order
    pub fn from_pem(pem: &[u8]) -> Result<Vec<Self>> {
        let mut certificates = Vec::new();
        for block in Pem::iter_from_buffer(pem) {
            let block = block.map_err(|e| TrustError::CertificateEncoding(format!("bad PEM block: {e}")))?;
            if block.label != "CERTIFICATE" {
                continue;
            }
            certificates.push(Self::from_der(&block.contents)?);
        }
        Ok(certificates)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Serial number as upper-case hex
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// DER encoded SubjectPublicKeyInfo
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Whether the basicConstraints extension marks this certificate as a CA
    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    /// Check that `at` falls inside the certificate validity window
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.not_before && at <= self.not_after
    }

    /// Check that this certificate names `issuer` as its issuer and carries a
    /// signature made with the issuer's key.
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        if self.issuer != issuer.subject {
            return false;
        }

        let Ok((_, cert)) = X509Certificate::from_der(&self.der) else {
            return false;
        };
        let Ok((_, issuer_cert)) = X509Certificate::from_der(&issuer.der) else {
            return false;
        };

        cert.verify_signature(Some(issuer_cert.public_key())).is_ok()
    }

    /// SHA-256 fingerprint of the DER encoding, lower-case hex
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }

    /// Base64 of the DER encoding, the form used in `x5c` arrays
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.der)
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("not_after", &self.not_after)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

fn timestamp_to_datetime(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .ok_or_else(|| TrustError::CertificateParse(format!("validity timestamp out of range: {seconds}")))
}

/// Order certificates by `notAfter`, soonest first.
///
/// The sort is stable, so certificates expiring at the same instant keep their
/// chain order.
pub fn sort_by_expiry(certificates: &[Certificate]) -> Vec<Certificate> {
    let mut sorted = certificates.to_vec();
    sorted.sort_by_key(Certificate::not_after);
    sorted
}

/// The soonest `notAfter` in a chain, or `None` for an empty chain
pub fn earliest_expiry(certificates: &[Certificate]) -> Option<DateTime<Utc>> {
    certificates.iter().map(Certificate::not_after).min()
}
