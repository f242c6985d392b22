//! Event compaction against the retention window.
//!
//! Runs hourly. ChangeEvent and K8sEvent nodes older than the cutoff are
//! detach-deleted in bounded sweeps so no single transaction grows with the
//! backlog. Resource identities are never removed.

use crate::config::RetentionConfig;
use crate::error::Result;
use crate::metrics::IngestMetrics;
use crate::now_ns;

use std::sync::Arc;
use std::time::Duration;

use spectre_graph::query::{expired_events_sweep, EventLabel};
use spectre_graph::GraphStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RUN_INTERVAL: Duration = Duration::from_secs(3600);
/// Nodes deleted per sweep statement.
const SWEEP_LIMIT: i64 = 500;

pub struct RetentionManager {
    store: Arc<dyn GraphStore>,
    config: RetentionConfig,
    metrics: Arc<IngestMetrics>,
}

impl RetentionManager {
    pub fn new(
        store: Arc<dyn GraphStore>,
        config: RetentionConfig,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(RUN_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // consume the immediate first tick so the first sweep is one
        // interval after startup
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep_once().await {
                        warn!(msg = "retention sweep failed", %error);
                    }
                }
            }
        }
    }

    /// One full sweep over both event labels.
    pub async fn sweep_once(&self) -> Result<u64> {
        let cutoff = now_ns() - self.config.window as i64 * 1_000_000_000;
        let mut total = 0u64;
        for label in [EventLabel::Change, EventLabel::K8s] {
            total += self.sweep_label(label, cutoff).await?;
        }
        if total > 0 {
            info!(msg = "retention sweep complete", deleted = total);
            self.metrics.retention_deleted(total);
        }
        Ok(total)
    }

    async fn sweep_label(&self, label: EventLabel, cutoff: i64) -> Result<u64> {
        let mut total = 0u64;
        loop {
            let result = self
                .store
                .execute(expired_events_sweep(label, cutoff, SWEEP_LIMIT))
                .await?;
            let deleted = result
                .scalar_i64()
                .unwrap_or(result.stats.nodes_deleted as i64);
            if deleted <= 0 {
                break;
            }
            total += deleted as u64;
            debug!(msg = "retention sweep batch", ?label, deleted);
            if deleted < SWEEP_LIMIT {
                break;
            }
        }
        Ok(total)
    }
}
