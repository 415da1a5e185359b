//! Shared fixtures: generated certificates and recording collaborators.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metadata_trust::anchor::{TrustAnchor, TrustAnchorSource};
use metadata_trust::certificate::Certificate;
use metadata_trust::error::{Result, TrustError};
use metadata_trust::metadata::Metadata;
use metadata_trust::repository::{MetadataResolverRepository, RepositoryConfig};
use metadata_trust::resolver::{
    CredentialCriteria, MetadataClientFactory, MetadataResolver, MetadataResolverConfiguration,
    MetadataResolverFactory, SignatureTrustEngine, SignatureTrustEngineFactory,
};
use parking_lot::Mutex;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use url::Url;

pub const BASE_URI: &str = "https://source.com";

/// A generated CA that can issue leaf certificates
pub struct TestAuthority {
    certificate: rcgen::Certificate,
    key: KeyPair,
}

impl TestAuthority {
    pub fn new(name: &str) -> Self {
        Self::expiring(name, 2100)
    }

    pub fn expiring(name: &str, year: i32) -> Self {
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = rcgen::date_time_ymd(year, 1, 1);
        let key = KeyPair::generate().unwrap();
        let certificate = params.self_signed(&key).unwrap();
        Self { certificate, key }
    }

    pub fn certificate(&self) -> Certificate {
        Certificate::from_der(self.certificate.der()).unwrap()
    }

    pub fn issue(&self, name: &str) -> Certificate {
        self.issue_until(name, (2099, 1, 1))
    }

    pub fn issue_until(&self, name: &str, (year, month, day): (i32, u8, u8)) -> Certificate {
        let mut params = CertificateParams::new(vec![format!("{name}.example")]).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = rcgen::date_time_ymd(year, month, day);
        let key = KeyPair::generate().unwrap();
        let certificate = params.signed_by(&key, &self.certificate, &self.key).unwrap();
        Certificate::from_der(certificate.der()).unwrap()
    }
}

pub fn self_signed(name: &str) -> Certificate {
    let mut params = CertificateParams::new(vec![format!("{name}.example")]).unwrap();
    params.distinguished_name.push(DnType::CommonName, name);
    let certificate = params.self_signed(&KeyPair::generate().unwrap()).unwrap();
    Certificate::from_der(certificate.der()).unwrap()
}

/// Anchor whose chain is a fresh self-signed certificate
pub fn anchor(entity_id: &str) -> TrustAnchor {
    TrustAnchor::from_certificates(entity_id, &[self_signed(entity_id)])
}

/// Anchor source whose answer the test controls
#[derive(Default)]
pub struct MockAnchorSource {
    anchors: Mutex<Vec<TrustAnchor>>,
    failing: AtomicBool,
    pub calls: AtomicUsize,
}

impl MockAnchorSource {
    pub fn with_anchors(anchors: Vec<TrustAnchor>) -> Arc<Self> {
        let source = Self::default();
        *source.anchors.lock() = anchors;
        Arc::new(source)
    }

    pub fn set(&self, anchors: Vec<TrustAnchor>) {
        *self.anchors.lock() = anchors;
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TrustAnchorSource for MockAnchorSource {
    async fn trust_anchors(&self) -> Result<Vec<TrustAnchor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TrustError::TrustAnchorSource("upstream unavailable".to_string()));
        }
        Ok(self.anchors.lock().clone())
    }
}

/// Resolver that only records whether it was destroyed
pub struct RecordingResolver {
    pub config: MetadataResolverConfiguration,
    pub require_valid_metadata: bool,
    pub destroyed: AtomicBool,
}

impl RecordingResolver {
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl MetadataResolver for RecordingResolver {
    fn id(&self) -> &str {
        &self.config.expected_entity_id
    }

    fn metadata(&self) -> Option<Arc<Metadata>> {
        None
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingResolverFactory {
    pub calls: AtomicUsize,
    pub created: Mutex<Vec<Arc<RecordingResolver>>>,
    failing_for: Mutex<HashSet<String>>,
}

impl RecordingResolverFactory {
    pub fn fail_for(&self, entity_id: &str) {
        self.failing_for.lock().insert(entity_id.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most recently created resolver for an entity
    pub fn created_for(&self, entity_id: &str) -> Option<Arc<RecordingResolver>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|resolver| resolver.config.expected_entity_id == entity_id)
            .cloned()
    }
}

impl MetadataResolverFactory for RecordingResolverFactory {
    fn create_metadata_resolver(
        &self,
        config: &MetadataResolverConfiguration,
        require_valid_metadata: bool,
        _client: reqwest::Client,
    ) -> Result<Arc<dyn MetadataResolver>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_for.lock().contains(&config.expected_entity_id) {
            return Err(TrustError::ResolverConstruction("refused by test".to_string()));
        }

        let resolver = Arc::new(RecordingResolver {
            config: config.clone(),
            require_valid_metadata,
            destroyed: AtomicBool::new(false),
        });
        self.created.lock().push(Arc::clone(&resolver));
        Ok(resolver)
    }
}

pub struct NoopTrustEngine;

impl SignatureTrustEngine for NoopTrustEngine {
    fn is_trusted_credential(&self, _credential: &Certificate, _criteria: &CredentialCriteria) -> bool {
        false
    }
}

#[derive(Default)]
pub struct RecordingTrustEngineFactory {
    pub calls: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingTrustEngineFactory {
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SignatureTrustEngineFactory for RecordingTrustEngineFactory {
    fn create_signature_trust_engine(
        &self,
        _resolver: Arc<dyn MetadataResolver>,
    ) -> Result<Arc<dyn SignatureTrustEngine>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TrustError::TrustEngineConstruction("refused by test".to_string()));
        }
        Ok(Arc::new(NoopTrustEngine))
    }
}

/// Hands out plain clients and records who asked
#[derive(Default)]
pub struct RecordingClientFactory {
    pub requests: Mutex<Vec<(String, Url)>>,
}

impl MetadataClientFactory for RecordingClientFactory {
    fn client(&self, environment: &str, config: &MetadataResolverConfiguration) -> Result<reqwest::Client> {
        self.requests
            .lock()
            .push((environment.to_string(), config.uri.clone()));
        Ok(reqwest::Client::new())
    }
}

/// Mock collaborators wired into one repository
pub struct Harness {
    pub source: Arc<MockAnchorSource>,
    pub clients: Arc<RecordingClientFactory>,
    pub resolvers: Arc<RecordingResolverFactory>,
    pub trust_engines: Arc<RecordingTrustEngineFactory>,
}

impl Harness {
    pub fn new(anchors: Vec<TrustAnchor>) -> Self {
        let _ = tracing_subscriber::fmt::try_init();

        Self {
            source: MockAnchorSource::with_anchors(anchors),
            clients: Arc::new(RecordingClientFactory::default()),
            resolvers: Arc::new(RecordingResolverFactory::default()),
            trust_engines: Arc::new(RecordingTrustEngineFactory::default()),
        }
    }

    pub fn config() -> RepositoryConfig {
        RepositoryConfig::new(Url::parse(BASE_URI).unwrap()).with_environment("test")
    }

    pub fn builder(&self) -> metadata_trust::repository::RepositoryBuilder {
        MetadataResolverRepository::builder(self.source.clone(), Self::config())
            .with_client_factory(self.clients.clone())
            .with_resolver_factory(self.resolvers.clone())
            .with_trust_engine_factory(self.trust_engines.clone())
    }

    pub fn factory_calls(&self) -> (usize, usize) {
        (self.resolvers.calls(), self.trust_engines.calls())
    }
}
