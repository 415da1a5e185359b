//! Metadata resolver that polls an HTTP endpoint.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{MetadataResolver, MetadataResolverConfiguration, MetadataResolverFactory};
use crate::error::{Result, TrustError};
use crate::metadata::{
    CertificateChainValidationFilter, Metadata, MetadataFilter, MetadataFilterChain, MetadataParser, RoleType,
};
use crate::validation::CertificateChainValidator;

/// Shortest pause between two fetches, whatever the configured delays say
pub const MIN_FETCH_INTERVAL: Duration = Duration::from_secs(1);

/// Parses, filters and publishes fetched documents
struct MetadataPipeline {
    id: String,
    parser: Arc<dyn MetadataParser>,
    filters: MetadataFilterChain,
    current: RwLock<Option<Arc<Metadata>>>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
}

impl MetadataPipeline {
    fn apply(&self, document: &[u8]) -> Result<()> {
        let parsed = self.parser.parse(document)?;
        let filtered = self.filters.filter(Some(parsed));

        match &filtered {
            Some(metadata) => {
                debug!(resolver = %self.id, entities = metadata.entities().len(), "Published metadata")
            }
            None => warn!(resolver = %self.id, "No trusted metadata left after filtering"),
        }

        *self.current.write() = filtered.map(Arc::new);
        *self.last_refresh.write() = Some(Utc::now());
        Ok(())
    }

    fn clear(&self) {
        *self.current.write() = None;
    }
}

/// Periodically fetches one metadata document.
///
/// After a successful fetch the next one happens after the max refresh
/// delay, after a failed fetch after the min refresh delay.
pub struct HttpMetadataResolver {
    id: String,
    uri: Url,
    pipeline: Arc<MetadataPipeline>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpMetadataResolver {
    fn start(
        runtime: &Handle,
        config: &MetadataResolverConfiguration,
        client: reqwest::Client,
        parser: Arc<dyn MetadataParser>,
        filters: MetadataFilterChain,
    ) -> Self {
        let id = config.expected_entity_id.clone();
        let pipeline = Arc::new(MetadataPipeline {
            id: id.clone(),
            parser,
            filters,
            current: RwLock::new(None),
            last_refresh: RwLock::new(None),
        });

        let task = runtime.spawn(poll(
            Arc::clone(&pipeline),
            client,
            config.uri.clone(),
            config.min_refresh_delay.max(MIN_FETCH_INTERVAL),
            config.max_refresh_delay.max(MIN_FETCH_INTERVAL),
        ));

        info!(resolver = %id, uri = %config.uri, "Started metadata resolver");

        Self {
            id,
            uri: config.uri.clone(),
            pipeline,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// When metadata was last fetched and published
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.pipeline.last_refresh.read()
    }
}

async fn poll(
    pipeline: Arc<MetadataPipeline>,
    client: reqwest::Client,
    uri: Url,
    min_refresh_delay: Duration,
    max_refresh_delay: Duration,
) {
    loop {
        let delay = match fetch(&client, &uri).await.and_then(|document| pipeline.apply(&document)) {
            Ok(()) => max_refresh_delay,
            Err(e) => {
                warn!(resolver = %pipeline.id, uri = %uri, error = %e, "Metadata refresh failed");
                min_refresh_delay
            }
        };
        tokio::time::sleep(delay).await;
    }
}

async fn fetch(client: &reqwest::Client, uri: &Url) -> Result<Vec<u8>> {
    let response = client.get(uri.clone()).send().await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

impl MetadataResolver for HttpMetadataResolver {
    fn id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> Option<Arc<Metadata>> {
        self.pipeline.current.read().clone()
    }

    fn destroy(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!(resolver = %self.id, "Stopped metadata resolver");
        }
        self.pipeline.clear();
    }
}

impl Drop for HttpMetadataResolver {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Builds [`HttpMetadataResolver`]s.
///
/// When valid metadata is required, each resolver filters its documents with
/// one [`CertificateChainValidationFilter`] per configured role, validating
/// against the resolver's own anchor trust store.
pub struct HttpMetadataResolverFactory {
    parser: Arc<dyn MetadataParser>,
    validator: Arc<dyn CertificateChainValidator>,
    roles: Vec<RoleType>,
}

impl HttpMetadataResolverFactory {
    pub fn new(parser: Arc<dyn MetadataParser>, validator: Arc<dyn CertificateChainValidator>) -> Self {
        Self {
            parser,
            validator,
            roles: vec![RoleType::IdpSso],
        }
    }

    /// Role types whose certificates are validated
    pub fn with_roles(mut self, roles: Vec<RoleType>) -> Self {
        self.roles = roles;
        self
    }

    fn filters_for(&self, config: &MetadataResolverConfiguration) -> MetadataFilterChain {
        self.roles.iter().fold(MetadataFilterChain::default(), |chain, role| {
            chain.with_filter(Arc::new(CertificateChainValidationFilter::new(
                *role,
                Arc::clone(&self.validator),
                Arc::clone(&config.trust_store),
            )))
        })
    }
}

impl MetadataResolverFactory for HttpMetadataResolverFactory {
    fn create_metadata_resolver(
        &self,
        config: &MetadataResolverConfiguration,
        require_valid_metadata: bool,
        client: reqwest::Client,
    ) -> Result<Arc<dyn MetadataResolver>> {
        let runtime = Handle::try_current()
            .map_err(|e| TrustError::ResolverConstruction(format!("no async runtime available: {e}")))?;

        let filters = if require_valid_metadata {
            self.filters_for(config)
        } else {
            MetadataFilterChain::default()
        };

        Ok(Arc::new(HttpMetadataResolver::start(
            &runtime,
            config,
            client,
            Arc::clone(&self.parser),
            filters,
        )))
    }
}
