//! Error types shared by the trust repository, the metadata filter and their
//! collaborators.

use thiserror::Error;

/// Errors raised while building trust material or talking to collaborators.
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("trust anchor '{entity_id}' has an empty certificate chain")]
    EmptyCertificateChain { entity_id: String },

    #[error("invalid certificate encoding: {0}")]
    CertificateEncoding(String),

    #[error("invalid certificate: {0}")]
    CertificateParse(String),

    #[error("trust anchor '{entity_id}' failed certificate chain validation: {reason}")]
    UntrustedAnchor { entity_id: String, reason: String },

    #[error("invalid metadata source uri: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to build metadata client: {0}")]
    Client(String),

    #[error("failed to build metadata resolver: {0}")]
    ResolverConstruction(String),

    #[error("failed to build signature trust engine: {0}")]
    TrustEngineConstruction(String),

    #[error("failed to parse metadata: {0}")]
    MetadataParse(String),

    #[error("trust anchor source unavailable: {0}")]
    TrustAnchorSource(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0:#}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type used across the crate.
pub type Result<T, E = TrustError> = std::result::Result<T, E>;
