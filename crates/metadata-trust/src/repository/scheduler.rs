use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::MetadataResolverRepository;

/// Shortest pause between two scheduled refreshes
pub const DEFAULT_MIN_SCHEDULER_DELAY: Duration = Duration::from_secs(1);

/// Drives periodic repository refreshes from a single task
pub struct RefreshScheduler {
    repository: Arc<MetadataResolverRepository>,
    interval: Duration,
    min_delay: Duration,
}

impl RefreshScheduler {
    pub fn new(repository: Arc<MetadataResolverRepository>, interval: Duration) -> Self {
        Self {
            repository,
            interval,
            min_delay: DEFAULT_MIN_SCHEDULER_DELAY,
        }
    }

    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Delay before the next refresh: the interval, shortened to the next
    /// cached certificate expiry, but never below the minimum delay.
    ///
    /// Chains that have already expired do not shorten the delay. Refreshing
    /// reuses unchanged anchors, so polling faster would not evict them.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Duration {
        let until_expiry = self
            .repository
            .next_expiry_after(now)
            .map(|expiry| (expiry - now).to_std().unwrap_or(Duration::ZERO));

        let delay = match until_expiry {
            Some(until_expiry) => self.interval.min(until_expiry),
            None => self.interval,
        };
        delay.max(self.min_delay)
    }

    /// Start refreshing in the background
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let delay = self.next_delay(Utc::now());
                debug!(delay = ?delay, "Next trust anchor refresh scheduled");
                tokio::time::sleep(delay).await;

                let summary = self.repository.refresh().await;
                if let Some(e) = summary.source_error {
                    warn!(error = %e, "Scheduled refresh kept the previous trust anchors");
                }
            }
        })
    }
}
