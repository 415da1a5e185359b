//! Trust management for federation metadata.
//!
//! [`MetadataResolverRepository`] keeps one metadata resolver and signature
//! trust engine per trust anchor, refreshed from a [`TrustAnchorSource`].
//! [`CertificateChainValidationFilter`] prunes fetched metadata down to the
//! entities whose certificates validate against a trust store.

pub mod anchor;
pub mod certificate;
pub mod encoding;
pub mod error;
pub mod metadata;
pub mod repository;
pub mod resolver;
pub mod trust_store;
pub mod validation;

pub use anchor::{HttpTrustAnchorSource, TrustAnchor, TrustAnchorSource};
pub use certificate::Certificate;
pub use error::{Result, TrustError};
pub use metadata::{CertificateChainValidationFilter, Metadata, MetadataFilter, MetadataFilterChain, RoleType};
pub use repository::{
    AnchorValidation, MetadataResolverRepository, RefreshScheduler, RefreshSummary, RepositoryConfig,
    RepositoryStats,
};
pub use resolver::{MetadataResolver, SignatureTrustEngine};
pub use trust_store::{TrustStore, TrustStoreConfiguration};
pub use validation::{CertificateChainValidator, CertificateValidity, X509CertificateChainValidator};
