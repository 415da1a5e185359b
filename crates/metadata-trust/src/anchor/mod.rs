//! Trust anchors and the sources that supply them.
//!
//! A trust anchor is published as a JSON Web Key: `kid` carries the entity
//! identifier of the federation partner and `x5c` its certificate chain,
//! leaf first. Anchors are plain values; a refresh compares them by value to
//! decide whether a cached resolver can be kept.

mod http;

pub use http::HttpTrustAnchorSource;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;
use crate::error::{Result, TrustError};

/// Entity identifier plus certificate chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrustAnchor {
    /// Entity identifier of the partner (JWK `kid`)
    #[serde(rename = "kid")]
    pub key_id: String,

    /// Base64 DER certificates, leaf first (JWK `x5c`)
    #[serde(rename = "x5c", default)]
    pub x509_cert_chain: Vec<String>,
}

impl TrustAnchor {
    pub fn new(entity_id: impl Into<String>, x509_cert_chain: Vec<String>) -> Self {
        Self {
            key_id: entity_id.into(),
            x509_cert_chain,
        }
    }

    /// Build an anchor from already parsed certificates
    pub fn from_certificates(entity_id: impl Into<String>, chain: &[Certificate]) -> Self {
        Self::new(entity_id, chain.iter().map(Certificate::to_base64).collect())
    }

    pub fn entity_id(&self) -> &str {
        &self.key_id
    }

    /// Decode the certificate chain, rejecting empty or malformed chains
    pub fn certificate_chain(&self) -> Result<Vec<Certificate>> {
        if self.x509_cert_chain.is_empty() {
            return Err(TrustError::EmptyCertificateChain {
                entity_id: self.key_id.clone(),
            });
        }

        self.x509_cert_chain
            .iter()
            .map(|encoded| Certificate::from_base64(encoded))
            .collect()
    }
}

/// A JSON Web Key Set of trust anchors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustAnchorSet {
    pub keys: Vec<TrustAnchor>,
}

/// Parse a JWK Set document into trust anchors
pub fn parse_trust_anchors(document: &[u8]) -> Result<Vec<TrustAnchor>> {
    let set: TrustAnchorSet = serde_json::from_slice(document)?;
    Ok(set.keys)
}

/// Supplies the current set of trust anchors.
///
/// Implementations may be called repeatedly and may serve a cached list when
/// the upstream is temporarily unavailable.
#[async_trait]
pub trait TrustAnchorSource: Send + Sync {
    async fn trust_anchors(&self) -> Result<Vec<TrustAnchor>>;
}
