//! Periodic diff of live resources against the graph.
//!
//! Resources that vanished without a DELETE event (missed watch window,
//! producer restart) are marked deleted by pushing a synthetic DELETE
//! through the pipeline, so the regular Phase 1 path maintains the
//! invariants. Converges in at most one full cycle per kind and is safe to
//! stop and restart mid-cycle.

use crate::config::ReconcilerConfig;
use crate::error::Result;
use crate::metrics::IngestMetrics;
use crate::now_ns;
use crate::pipeline::Pipeline;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use spectre_graph::query;
use spectre_graph::GraphStore;
use spectre_k8s_util::event::{EventType, RawEvent, ResourceMeta};
use spectre_k8s_util::types::GroupVersionKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The producer-side listing interface the reconciler diffs against.
#[async_trait]
pub trait LiveLister: Send + Sync {
    /// Kinds this lister can enumerate.
    fn kinds(&self) -> Vec<GroupVersionKind>;

    /// Uids of all live resources of one kind.
    async fn list_uids(&self, gvk: &GroupVersionKind) -> Result<HashSet<String>>;
}

pub struct Reconciler {
    lister: Arc<dyn LiveLister>,
    store: Arc<dyn GraphStore>,
    pipeline: Arc<Pipeline>,
    config: ReconcilerConfig,
    metrics: Arc<IngestMetrics>,
}

impl Reconciler {
    pub fn new(
        lister: Arc<dyn LiveLister>,
        store: Arc<dyn GraphStore>,
        pipeline: Arc<Pipeline>,
        config: ReconcilerConfig,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            lister,
            store,
            pipeline,
            config,
            metrics,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        if !self.config.enabled {
            info!(msg = "reconciler disabled");
            return;
        }
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(error) = self.reconcile_once(&cancel).await {
                        warn!(msg = "reconcile cycle failed", %error);
                    }
                }
            }
        }
    }

    /// One cycle over every watched kind.
    pub async fn reconcile_once(&self, cancel: &CancellationToken) -> Result<u64> {
        let mut swept = 0u64;
        for gvk in self.lister.kinds() {
            if cancel.is_cancelled() {
                break;
            }
            match self.reconcile_kind(cancel, &gvk).await {
                Ok(count) => swept += count,
                Err(error) => {
                    warn!(msg = "kind reconciliation failed", kind = %gvk, %error);
                }
            }
        }
        if swept > 0 {
            info!(msg = "reconciler swept vanished resources", count = swept);
        }
        Ok(swept)
    }

    async fn reconcile_kind(
        &self,
        cancel: &CancellationToken,
        gvk: &GroupVersionKind,
    ) -> Result<u64> {
        let live = self.lister.list_uids(gvk).await?;
        let graph_result = self
            .store
            .execute(query::active_resources_of_kind(&gvk.kind, self.config.batch_size))
            .await?;

        let mut swept = 0u64;
        for row in &graph_result.rows {
            if cancel.is_cancelled() {
                break;
            }
            let Some(uid) = row.first().and_then(Value::as_str) else {
                continue;
            };
            if live.contains(uid) {
                continue;
            }
            let namespace = row.get(1).and_then(Value::as_str).unwrap_or_default();
            let name = row.get(2).and_then(Value::as_str).unwrap_or_default();
            let now = now_ns();
            let event = RawEvent {
                id: format!("reconcile-{uid}-{now}"),
                timestamp: now,
                event_type: EventType::Delete,
                resource: ResourceMeta {
                    uid: uid.to_string(),
                    group: gvk.group.clone(),
                    version: gvk.version.clone(),
                    kind: gvk.kind.clone(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    involved_object_uid: None,
                },
                data: Value::Null,
            };
            debug!(msg = "synthesising DELETE for vanished resource", uid, kind = %gvk.kind);
            self.pipeline.process_event(cancel, event).await?;
            self.metrics.reconciler_delete();
            swept += 1;
        }
        Ok(swept)
    }
}
