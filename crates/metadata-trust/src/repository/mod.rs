//! Trust anchor repository.
//!
//! Turns the current set of trust anchors into one metadata resolver and one
//! signature trust engine per partner entity. The cache is an immutable
//! [`ResolverSnapshot`] behind an `Arc` that each refresh swaps out in one
//! step: lookups always see a complete snapshot, and entries whose anchor is
//! unchanged are carried over by reference.

mod scheduler;

pub use scheduler::{RefreshScheduler, DEFAULT_MIN_SCHEDULER_DELAY};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::anchor::{TrustAnchor, TrustAnchorSource};
use crate::certificate::earliest_expiry;
use crate::encoding::metadata_source_uri;
use crate::error::{Result, TrustError};
use crate::metadata::JsonMetadataParser;
use crate::resolver::{
    HttpMetadataResolverFactory, MetadataClientFactory, MetadataResolver, MetadataResolverConfigBuilder,
    MetadataResolverConfiguration, MetadataResolverFactory, MetadataSignatureTrustEngineFactory,
    ReqwestMetadataClientFactory, SignatureTrustEngine, SignatureTrustEngineFactory, DEFAULT_MAX_REFRESH_DELAY,
    DEFAULT_MIN_REFRESH_DELAY,
};
use crate::trust_store::TrustStore;
use crate::validation::{CertificateChainValidator, X509CertificateChainValidator};

/// Repository settings
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Base URI that per-entity metadata paths are appended to
    pub metadata_source_uri: Url,

    /// Passed to the client factory
    pub environment: String,

    pub min_refresh_delay: Duration,
    pub max_refresh_delay: Duration,
}

impl RepositoryConfig {
    pub fn new(metadata_source_uri: Url) -> Self {
        Self {
            metadata_source_uri,
            environment: "production".to_string(),
            min_refresh_delay: DEFAULT_MIN_REFRESH_DELAY,
            max_refresh_delay: DEFAULT_MAX_REFRESH_DELAY,
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_refresh_delays(mut self, min_refresh_delay: Duration, max_refresh_delay: Duration) -> Self {
        self.min_refresh_delay = min_refresh_delay;
        self.max_refresh_delay = max_refresh_delay;
        self
    }
}

/// Checks each anchor's leaf certificate against a keystore before use
#[derive(Clone)]
pub struct AnchorValidation {
    pub validator: Arc<dyn CertificateChainValidator>,
    pub trust_store: Arc<TrustStore>,
}

impl AnchorValidation {
    pub fn new(validator: Arc<dyn CertificateChainValidator>, trust_store: Arc<TrustStore>) -> Self {
        Self { validator, trust_store }
    }
}

/// Resolver, trust engine and the anchor they were built from
pub struct ResolverEntry {
    trust_anchor: TrustAnchor,
    resolver: Arc<dyn MetadataResolver>,
    trust_engine: Arc<dyn SignatureTrustEngine>,
    earliest_expiry: DateTime<Utc>,
    config: MetadataResolverConfiguration,
}

impl ResolverEntry {
    pub fn trust_anchor(&self) -> &TrustAnchor {
        &self.trust_anchor
    }

    pub fn resolver(&self) -> &Arc<dyn MetadataResolver> {
        &self.resolver
    }

    pub fn trust_engine(&self) -> &Arc<dyn SignatureTrustEngine> {
        &self.trust_engine
    }

    /// Earliest `notAfter` of the anchor's chain
    pub fn earliest_expiry(&self) -> DateTime<Utc> {
        self.earliest_expiry
    }

    pub fn config(&self) -> &MetadataResolverConfiguration {
        &self.config
    }

    fn release(&self) {
        debug!(entity_id = %self.trust_anchor.entity_id(), "Releasing metadata resolver");
        self.resolver.destroy();
    }
}

/// One published state of the cache
#[derive(Default)]
pub struct ResolverSnapshot {
    entries: HashMap<String, Arc<ResolverEntry>>,
    rejected: BTreeMap<String, String>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl ResolverSnapshot {
    pub fn entry(&self, entity_id: &str) -> Option<&Arc<ResolverEntry>> {
        self.entries.get(entity_id)
    }

    pub fn entity_ids(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Anchors left out of this snapshot, with the reason
    pub fn rejected(&self) -> &BTreeMap<String, String> {
        &self.rejected
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What one refresh did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    /// Entries carried over unchanged
    pub reused: usize,
    /// Entries built from new or changed anchors
    pub materialized: usize,
    /// Anchors that could not be turned into an entry
    pub rejected: usize,
    /// Previous entries that were removed or replaced
    pub released: usize,
    /// Set when the anchor source failed and the snapshot was kept
    pub source_error: Option<String>,
}

/// Repository counters for status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryStats {
    pub resolvers: usize,
    pub rejected: usize,
    pub resolvers_with_metadata: usize,
    pub earliest_expiry: Option<DateTime<Utc>>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Per-entity metadata resolvers and signature trust engines
pub struct MetadataResolverRepository {
    source: Arc<dyn TrustAnchorSource>,
    config: RepositoryConfig,
    resolver_configs: MetadataResolverConfigBuilder,
    client_factory: Arc<dyn MetadataClientFactory>,
    resolver_factory: Arc<dyn MetadataResolverFactory>,
    trust_engine_factory: Arc<dyn SignatureTrustEngineFactory>,
    anchor_validation: Option<AnchorValidation>,
    snapshot: RwLock<Arc<ResolverSnapshot>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl MetadataResolverRepository {
    pub fn builder(source: Arc<dyn TrustAnchorSource>, config: RepositoryConfig) -> RepositoryBuilder {
        RepositoryBuilder::new(source, config)
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// The currently published snapshot
    pub fn snapshot(&self) -> Arc<ResolverSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn get_metadata_resolver(&self, entity_id: &str) -> Option<Arc<dyn MetadataResolver>> {
        self.snapshot().entry(entity_id).map(|entry| Arc::clone(&entry.resolver))
    }

    pub fn get_signature_trust_engine(&self, entity_id: &str) -> Option<Arc<dyn SignatureTrustEngine>> {
        self.snapshot().entry(entity_id).map(|entry| Arc::clone(&entry.trust_engine))
    }

    pub fn get_trust_anchors_entity_ids(&self) -> BTreeSet<String> {
        self.snapshot().entity_ids()
    }

    pub fn get_metadata_resolvers(&self) -> BTreeMap<String, Arc<dyn MetadataResolver>> {
        self.snapshot()
            .entries
            .iter()
            .map(|(entity_id, entry)| (entity_id.clone(), Arc::clone(&entry.resolver)))
            .collect()
    }

    /// Where the cached resolver for an entity fetches its metadata
    pub fn get_metadata_source_uri(&self, entity_id: &str) -> Option<Url> {
        self.snapshot().entry(entity_id).map(|entry| entry.config.uri.clone())
    }

    pub fn get_rejected_trust_anchors(&self) -> BTreeMap<String, String> {
        self.snapshot().rejected.clone()
    }

    /// Earliest certificate expiry across every cached anchor chain
    pub fn earliest_expiry(&self) -> Option<DateTime<Utc>> {
        self.snapshot().entries.values().map(|entry| entry.earliest_expiry).min()
    }

    /// Earliest cached chain expiry strictly after `now`
    pub fn next_expiry_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.snapshot()
            .entries
            .values()
            .map(|entry| entry.earliest_expiry)
            .filter(|expiry| *expiry > now)
            .min()
    }

    pub fn stats(&self) -> RepositoryStats {
        let snapshot = self.snapshot();
        RepositoryStats {
            resolvers: snapshot.entries.len(),
            rejected: snapshot.rejected.len(),
            resolvers_with_metadata: snapshot
                .entries
                .values()
                .filter(|entry| entry.resolver.metadata().is_some())
                .count(),
            earliest_expiry: snapshot.entries.values().map(|entry| entry.earliest_expiry).min(),
            refreshed_at: snapshot.refreshed_at,
        }
    }

    /// Bring the cache in line with the current trust anchors.
    ///
    /// Never fails: an unavailable anchor source keeps the published snapshot
    /// and anchors that cannot be materialized are left out of the new one.
    /// Refreshes are serialized; lookups keep reading the previous snapshot
    /// until the new one is swapped in.
    pub async fn refresh(&self) -> RefreshSummary {
        let _guard = self.refresh_lock.lock().await;

        let anchors = match self.source.trust_anchors().await {
            Ok(anchors) => anchors,
            Err(e) => {
                error!(error = %e, "Failed to fetch trust anchors, keeping current metadata resolvers");
                return RefreshSummary {
                    source_error: Some(e.to_string()),
                    ..RefreshSummary::default()
                };
            }
        };

        let current = deduplicate(anchors);
        let previous = self.snapshot();
        let now = Utc::now();

        let mut summary = RefreshSummary::default();
        let mut entries = HashMap::with_capacity(current.len());
        let mut rejected = BTreeMap::new();

        for (entity_id, anchor) in current {
            if let Some(entry) = previous.entries.get(&entity_id) {
                if entry.trust_anchor == anchor {
                    entries.insert(entity_id, Arc::clone(entry));
                    summary.reused += 1;
                    continue;
                }
                info!(entity_id = %entity_id, "Trust anchor changed, rebuilding metadata resolver");
            }

            match self.materialize(&anchor, now) {
                Ok(entry) => {
                    entries.insert(entity_id, Arc::new(entry));
                    summary.materialized += 1;
                }
                Err(e) => {
                    error!(entity_id = %entity_id, error = %e, "Failed to create metadata resolver for trust anchor");
                    rejected.insert(entity_id, e.to_string());
                    summary.rejected += 1;
                }
            }
        }

        let released: Vec<Arc<ResolverEntry>> = previous
            .entries
            .iter()
            .filter(|&(entity_id, entry)| {
                !entries
                    .get(entity_id)
                    .is_some_and(|kept| Arc::ptr_eq(kept, entry))
            })
            .map(|(_, entry)| Arc::clone(entry))
            .collect();
        summary.released = released.len();

        *self.snapshot.write() = Arc::new(ResolverSnapshot {
            entries,
            rejected,
            refreshed_at: Some(now),
        });

        for entry in released {
            entry.release();
        }

        info!(
            reused = summary.reused,
            materialized = summary.materialized,
            rejected = summary.rejected,
            released = summary.released,
            "Refreshed metadata resolvers"
        );
        summary
    }

    /// Release every resolver and publish an empty snapshot
    pub async fn shutdown(&self) {
        let _guard = self.refresh_lock.lock().await;

        let previous = std::mem::take(&mut *self.snapshot.write());
        for entry in previous.entries.values() {
            entry.release();
        }
        info!(released = previous.entries.len(), "Metadata resolver repository shut down");
    }

    fn materialize(&self, anchor: &TrustAnchor, now: DateTime<Utc>) -> Result<ResolverEntry> {
        let entity_id = anchor.entity_id();
        let chain = anchor.certificate_chain()?;

        let leaf = chain.first().ok_or_else(|| TrustError::EmptyCertificateChain {
            entity_id: entity_id.to_string(),
        })?;
        if let Some(validation) = &self.anchor_validation {
            let validity = validation.validator.validate(leaf, &validation.trust_store);
            if !validity.is_valid() {
                return Err(TrustError::UntrustedAnchor {
                    entity_id: entity_id.to_string(),
                    reason: validity.reason().unwrap_or("certificate chain validation failed").to_string(),
                });
            }
        }

        let earliest_expiry = earliest_expiry(&chain).ok_or_else(|| TrustError::EmptyCertificateChain {
            entity_id: entity_id.to_string(),
        })?;
        let trust_store = Arc::new(TrustStore::from_chain(entity_id, &chain));
        let uri = metadata_source_uri(&self.config.metadata_source_uri, entity_id)?;

        let config = self
            .resolver_configs
            .create_config(uri, entity_id, trust_store, earliest_expiry, now);
        let client = self.client_factory.client(&self.config.environment, &config)?;
        let resolver = self.resolver_factory.create_metadata_resolver(&config, true, client)?;

        let trust_engine = match self
            .trust_engine_factory
            .create_signature_trust_engine(Arc::clone(&resolver))
        {
            Ok(trust_engine) => trust_engine,
            Err(e) => {
                resolver.destroy();
                return Err(e);
            }
        };

        debug!(
            entity_id = %entity_id,
            uri = %config.uri,
            earliest_expiry = %earliest_expiry,
            max_refresh_delay = ?config.max_refresh_delay,
            "Created metadata resolver"
        );

        Ok(ResolverEntry {
            trust_anchor: anchor.clone(),
            resolver,
            trust_engine,
            earliest_expiry,
            config,
        })
    }
}

/// Collapse anchors sharing an entity identifier; the last one wins
fn deduplicate(anchors: Vec<TrustAnchor>) -> BTreeMap<String, TrustAnchor> {
    let mut current = BTreeMap::new();
    for anchor in anchors {
        if let Some(replaced) = current.insert(anchor.entity_id().to_string(), anchor) {
            warn!(entity_id = %replaced.entity_id(), "Duplicate trust anchor, using the last one");
        }
    }
    current
}

/// Builder for [`MetadataResolverRepository`].
///
/// Without explicit factories the repository fetches JSON metadata over
/// HTTP with reqwest, filters identity provider roles with the X.509 chain
/// validator and pairs each resolver with an explicit-key trust engine.
pub struct RepositoryBuilder {
    source: Arc<dyn TrustAnchorSource>,
    config: RepositoryConfig,
    client_factory: Arc<dyn MetadataClientFactory>,
    resolver_factory: Arc<dyn MetadataResolverFactory>,
    trust_engine_factory: Arc<dyn SignatureTrustEngineFactory>,
    anchor_validation: Option<AnchorValidation>,
}

impl RepositoryBuilder {
    fn new(source: Arc<dyn TrustAnchorSource>, config: RepositoryConfig) -> Self {
        Self {
            source,
            config,
            client_factory: Arc::new(ReqwestMetadataClientFactory::default()),
            resolver_factory: Arc::new(HttpMetadataResolverFactory::new(
                Arc::new(JsonMetadataParser),
                Arc::new(X509CertificateChainValidator::new()),
            )),
            trust_engine_factory: Arc::new(MetadataSignatureTrustEngineFactory),
            anchor_validation: None,
        }
    }

    pub fn with_client_factory(mut self, client_factory: Arc<dyn MetadataClientFactory>) -> Self {
        self.client_factory = client_factory;
        self
    }

    pub fn with_resolver_factory(mut self, resolver_factory: Arc<dyn MetadataResolverFactory>) -> Self {
        self.resolver_factory = resolver_factory;
        self
    }

    pub fn with_trust_engine_factory(mut self, trust_engine_factory: Arc<dyn SignatureTrustEngineFactory>) -> Self {
        self.trust_engine_factory = trust_engine_factory;
        self
    }

    pub fn with_anchor_validation(mut self, anchor_validation: AnchorValidation) -> Self {
        self.anchor_validation = Some(anchor_validation);
        self
    }

    /// Build the repository without loading any anchors
    pub fn build_empty(self) -> MetadataResolverRepository {
        let resolver_configs =
            MetadataResolverConfigBuilder::new(self.config.min_refresh_delay, self.config.max_refresh_delay);

        MetadataResolverRepository {
            source: self.source,
            config: self.config,
            resolver_configs,
            client_factory: self.client_factory,
            resolver_factory: self.resolver_factory,
            trust_engine_factory: self.trust_engine_factory,
            anchor_validation: self.anchor_validation,
            snapshot: RwLock::new(Arc::new(ResolverSnapshot::default())),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Build the repository and load the current anchors
    pub async fn build(self) -> MetadataResolverRepository {
        let repository = self.build_empty();
        let summary = repository.refresh().await;
        if let Some(e) = &summary.source_error {
            warn!(error = %e, "Starting without trust anchors");
        }
        repository
    }
}
