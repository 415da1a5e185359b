use std::time::Duration;

use tracing::debug;

use super::{MetadataClientFactory, MetadataResolverConfiguration};
use crate::error::{Result, TrustError};

/// Builds one reqwest client per resolver.
///
/// The client additionally trusts the certificates of the resolver's anchor
/// trust store, so a partner may serve its metadata behind a certificate
/// issued from its own chain.
#[derive(Debug, Clone)]
pub struct ReqwestMetadataClientFactory {
    timeout: Duration,
}

impl Default for ReqwestMetadataClientFactory {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

impl ReqwestMetadataClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl MetadataClientFactory for ReqwestMetadataClientFactory {
    fn client(&self, environment: &str, config: &MetadataResolverConfiguration) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(format!("{environment}-metadata-client/{}", env!("CARGO_PKG_VERSION")));

        for certificate in config.trust_store.certificates() {
            let root = reqwest::Certificate::from_der(certificate.der())
                .map_err(|e| TrustError::Client(format!("unusable trust store certificate: {e}")))?;
            builder = builder.add_root_certificate(root);
        }

        debug!(
            uri = %config.uri,
            trust_store = %config.trust_store.name(),
            "Building metadata client"
        );
        builder.build().map_err(|e| TrustError::Client(e.to_string()))
    }
}
