//! Metadata resolvers, signature trust engines and the factories that build
//! them for the trust anchor repository.

mod client;
mod http;
mod trust_engine;

pub use client::ReqwestMetadataClientFactory;
pub use http::{HttpMetadataResolver, HttpMetadataResolverFactory};
pub use trust_engine::{ExplicitKeySignatureTrustEngine, MetadataSignatureTrustEngineFactory};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use crate::certificate::Certificate;
use crate::error::Result;
use crate::metadata::{EntityDescriptor, Metadata, RoleType};
use crate::trust_store::TrustStore;

/// Default lower bound between two metadata fetches
pub const DEFAULT_MIN_REFRESH_DELAY: Duration = Duration::from_secs(60);

/// Default upper bound between two metadata fetches
pub const DEFAULT_MAX_REFRESH_DELAY: Duration = Duration::from_secs(600);

/// Everything a resolver factory needs to build a resolver for one entity
#[derive(Debug, Clone)]
pub struct MetadataResolverConfiguration {
    /// Where the entity's metadata is published
    pub uri: Url,

    /// Entity the metadata is expected to describe
    pub expected_entity_id: String,

    /// Certificates of the entity's trust anchor chain
    pub trust_store: Arc<TrustStore>,

    pub min_refresh_delay: Duration,

    /// Never longer than the time left before the first chain certificate expires
    pub max_refresh_delay: Duration,
}

/// Builds resolver configurations, bounding the refresh delays by the
/// expiry of the anchor chain.
#[derive(Debug, Clone)]
pub struct MetadataResolverConfigBuilder {
    min_refresh_delay: Duration,
    max_refresh_delay: Duration,
}

impl Default for MetadataResolverConfigBuilder {
    fn default() -> Self {
        Self {
            min_refresh_delay: DEFAULT_MIN_REFRESH_DELAY,
            max_refresh_delay: DEFAULT_MAX_REFRESH_DELAY,
        }
    }
}

impl MetadataResolverConfigBuilder {
    pub fn new(min_refresh_delay: Duration, max_refresh_delay: Duration) -> Self {
        Self {
            min_refresh_delay,
            max_refresh_delay,
        }
    }

    /// Create the configuration for one entity.
    ///
    /// The max refresh delay is capped at the time remaining until
    /// `earliest_expiry` (zero when already expired) and the min refresh
    /// delay never exceeds the max.
    pub fn create_config(
        &self,
        uri: Url,
        expected_entity_id: &str,
        trust_store: Arc<TrustStore>,
        earliest_expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MetadataResolverConfiguration {
        let until_expiry = (earliest_expiry - now).to_std().unwrap_or(Duration::ZERO);
        let max_refresh_delay = self.max_refresh_delay.min(until_expiry);
        let min_refresh_delay = self.min_refresh_delay.min(max_refresh_delay);

        MetadataResolverConfiguration {
            uri,
            expected_entity_id: expected_entity_id.to_string(),
            trust_store,
            min_refresh_delay,
            max_refresh_delay,
        }
    }
}

/// Live source of one entity's metadata
pub trait MetadataResolver: Send + Sync {
    /// Identifier used in logs
    fn id(&self) -> &str;

    /// Most recent validated metadata, if any is currently trusted
    fn metadata(&self) -> Option<Arc<Metadata>>;

    fn resolve_entity(&self, entity_id: &str) -> Option<EntityDescriptor> {
        self.metadata()?.find_entity(entity_id).cloned()
    }

    /// Stop background work and drop any held metadata
    fn destroy(&self);
}

/// Builds metadata resolvers
pub trait MetadataResolverFactory: Send + Sync {
    fn create_metadata_resolver(
        &self,
        config: &MetadataResolverConfiguration,
        require_valid_metadata: bool,
        client: reqwest::Client,
    ) -> Result<Arc<dyn MetadataResolver>>;
}

/// What a credential is being trusted for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialCriteria {
    pub entity_id: String,
    pub role: RoleType,
}

impl CredentialCriteria {
    pub fn new(entity_id: impl Into<String>, role: RoleType) -> Self {
        Self {
            entity_id: entity_id.into(),
            role,
        }
    }
}

/// Decides whether a signing credential is trusted for an entity and role
pub trait SignatureTrustEngine: Send + Sync {
    fn is_trusted_credential(&self, credential: &Certificate, criteria: &CredentialCriteria) -> bool;
}

/// Builds the trust engine paired with a resolver
pub trait SignatureTrustEngineFactory: Send + Sync {
    fn create_signature_trust_engine(
        &self,
        resolver: Arc<dyn MetadataResolver>,
    ) -> Result<Arc<dyn SignatureTrustEngine>>;
}

/// Builds the HTTP client a resolver fetches metadata with
pub trait MetadataClientFactory: Send + Sync {
    fn client(&self, environment: &str, config: &MetadataResolverConfiguration) -> Result<reqwest::Client>;
}
