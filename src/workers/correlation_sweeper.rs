//! Background purge of payment correlations whose callback never arrived.
//!
//! A correlation is consumed when its callback settles the order. Prompts
//! the buyer never answers leave their row behind, so rows older than the
//! TTL are removed on a fixed interval.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::database::error::DbResult;
use crate::database::repository::CorrelationStore;

const MAX_TTL_DAYS: i64 = 365;

pub struct CorrelationSweeper {
    store: Arc<dyn CorrelationStore>,
    ttl: Duration,
    interval: Duration,
}

impl CorrelationSweeper {
    pub fn new(store: Arc<dyn CorrelationStore>, ttl: Duration, interval: Duration) -> Self {
        Self {
            store,
            ttl,
            interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            ttl_secs = self.ttl.as_secs(),
            interval_secs = self.interval.as_secs(),
            "correlation sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("correlation sweeper stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "correlation sweep failed");
                    }
                }
            }
        }

        info!("correlation sweeper stopped");
    }

    /// Remove every correlation older than the TTL. Returns the count removed.
    pub async fn sweep_once(&self) -> DbResult<u64> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(MAX_TTL_DAYS));
        let cutoff = Utc::now() - ttl.min(chrono::Duration::days(MAX_TTL_DAYS));

        let removed = self.store.purge_older_than(cutoff).await?;
        if removed > 0 {
            info!(removed = removed, cutoff = %cutoff, "expired payment correlations purged");
        } else {
            debug!("no expired payment correlations");
        }
        Ok(removed)
    }
}
