//! Trust anchors fetched over HTTPS.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};
use url::Url;

use super::{parse_trust_anchors, TrustAnchor, TrustAnchorSource};
use crate::error::{Result, TrustError};

/// Default timeout for a single trust anchor request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches a JWK Set of trust anchors, trying each URI in order.
///
/// The last successfully fetched list is kept and served when every URI
/// fails, so a transient outage does not empty the repository.
pub struct HttpTrustAnchorSource {
    client: reqwest::Client,
    uris: Vec<Url>,
    last_known: Mutex<Option<Vec<TrustAnchor>>>,
}

impl HttpTrustAnchorSource {
    /// Create a source with a default client
    pub fn new(uris: Vec<Url>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, uris))
    }

    pub fn with_client(client: reqwest::Client, uris: Vec<Url>) -> Self {
        Self {
            client,
            uris,
            last_known: Mutex::new(None),
        }
    }

    pub fn uris(&self) -> &[Url] {
        &self.uris
    }

    async fn fetch(&self, uri: &Url) -> Result<Vec<TrustAnchor>> {
        let response = self.client.get(uri.clone()).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        parse_trust_anchors(&body)
    }
}

#[async_trait]
impl TrustAnchorSource for HttpTrustAnchorSource {
    async fn trust_anchors(&self) -> Result<Vec<TrustAnchor>> {
        let mut last_error = None;

        for uri in &self.uris {
            match self.fetch(uri).await {
                Ok(anchors) => {
                    info!(uri = %uri, count = anchors.len(), "Fetched trust anchors");
                    *self.last_known.lock() = Some(anchors.clone());
                    return Ok(anchors);
                }
                Err(e) => {
                    warn!(uri = %uri, error = %e, "Failed to fetch trust anchors");
                    last_error = Some(e);
                }
            }
        }

        if let Some(anchors) = self.last_known.lock().clone() {
            warn!(count = anchors.len(), "All trust anchor sources failed, serving last known anchors");
            return Ok(anchors);
        }

        Err(last_error.unwrap_or_else(|| TrustError::TrustAnchorSource("no trust anchor uris configured".to_string())))
    }
}
