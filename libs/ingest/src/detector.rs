//! Change detection against the previous snapshot of a resource.
//!
//! The prior comes from the batch-local cache first (peers of the same
//! batch), then from a bounded graph lookup. Without any prior the event is
//! treated as the first known state: a status change may have happened
//! between observations, so `status_changed` defaults to true and the other
//! flags to false.

use crate::error::Result;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use spectre_graph::query;
use spectre_graph::GraphStore;
use spectre_k8s_util::event::{EventType, RawEvent};
use spectre_k8s_util::parse;
use tracing::{debug, warn};

/// Graph round-trip bound for the prior lookup.
const PRIOR_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChangeFlags {
    pub config_changed: bool,
    pub status_changed: bool,
    pub replicas_changed: bool,
}

impl ChangeFlags {
    pub const NONE: ChangeFlags = ChangeFlags {
        config_changed: false,
        status_changed: false,
        replicas_changed: false,
    };

    /// First observation of a resource.
    pub const FIRST_SEEN: ChangeFlags = ChangeFlags {
        config_changed: false,
        status_changed: true,
        replicas_changed: false,
    };
}

/// Snapshots of this batch's events, written in Phase 1 and read-only
/// afterwards. Cleared between batches by construction (one cache per
/// batch).
#[derive(Default)]
pub struct BatchCache {
    snapshots: HashMap<String, Value>,
}

impl BatchCache {
    pub fn insert(&mut self, uid: &str, data: &Value) {
        if data.is_object() {
            self.snapshots.insert(uid.to_string(), data.clone());
        }
    }

    pub fn get(&self, uid: &str) -> Option<&Value> {
        self.snapshots.get(uid)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

pub struct ChangeDetector {
    store: Arc<dyn GraphStore>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Flags for one event. DELETE carries no change flags; CREATE and
    /// prior-less UPDATE get the first-observation defaults.
    pub async fn detect(&self, event: &RawEvent, cache: &BatchCache) -> ChangeFlags {
        match event.event_type {
            EventType::Delete => ChangeFlags::NONE,
            EventType::Create => first_seen_flags(&event.data),
            EventType::Update => {
                if let Some(prior) = cache.get(&event.resource.uid) {
                    return compare(&event.data, prior);
                }
                match self.prior_from_graph(event).await {
                    Ok(Some(prior)) => compare(&event.data, &prior),
                    Ok(None) => first_seen_flags(&event.data),
                    Err(error) => {
                        warn!(
                            msg = "prior lookup failed, using conservative flags",
                            uid = %event.resource.uid,
                            %error
                        );
                        first_seen_flags(&event.data)
                    }
                }
            }
        }
    }

    async fn prior_from_graph(&self, event: &RawEvent) -> Result<Option<Value>> {
        let lookup = self.store.execute(query::latest_change_event_data(
            &event.resource.uid,
            event.timestamp,
        ));
        let result = tokio::time::timeout(PRIOR_LOOKUP_TIMEOUT, lookup)
            .await
            .map_err(|_| spectre_graph::Error::Timeout(PRIOR_LOOKUP_TIMEOUT))??;
        let Some(raw) = result.scalar_str() else {
            return Ok(None);
        };
        match serde_json::from_str(raw) {
            Ok(prior) => Ok(Some(prior)),
            Err(error) => {
                debug!(msg = "stored prior snapshot unparseable", uid = %event.resource.uid, %error);
                Ok(None)
            }
        }
    }
}

fn first_seen_flags(data: &Value) -> ChangeFlags {
    ChangeFlags {
        config_changed: false,
        // conservative: either the subtree exists, or we cannot tell
        status_changed: parse::field(data, &["status"]).is_some() || !data.is_object(),
        replicas_changed: false,
    }
}

/// Pure comparison of current against prior snapshot.
pub fn compare(current: &Value, prior: &Value) -> ChangeFlags {
    let current_generation = parse::i64_field(current, &["metadata", "generation"]);
    let prior_generation = parse::i64_field(prior, &["metadata", "generation"]);
    let config_changed = match (current_generation, prior_generation) {
        (Some(now), Some(before)) => now > before,
        (Some(_), None) => false,
        _ => false,
    };

    let status_changed = match parse::field(current, &["status"]) {
        Some(status) => parse::field(prior, &["status"]) != Some(status),
        None => false,
    };

    let replicas_changed = match parse::i64_field(current, &["spec", "replicas"]) {
        Some(replicas) => parse::i64_field(prior, &["spec", "replicas"]) != Some(replicas),
        None => false,
    };

    ChangeFlags {
        config_changed,
        status_changed,
        replicas_changed,
    }
}
