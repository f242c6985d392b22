//! Graph-backed implementation of the extractor lookup facade, with the
//! optional read cache in front of repeated extractor queries.

use crate::now_ns;

use std::sync::Arc;

use async_trait::async_trait;
use spectre_extractors::lookup::{resource_row, EventRef, ResourceLookup, ResourceRef};
use spectre_graph::cache::QueryCache;
use spectre_graph::client::CacheConfig;
use spectre_graph::query::{self, GraphQuery};
use spectre_graph::{GraphStore, QueryResult};
use spectre_k8s_util::event::EventType;

/// Recent-event listings are bounded; scoring never needs more.
const RECENT_EVENT_LIMIT: i64 = 100;

pub struct GraphLookup {
    store: Arc<dyn GraphStore>,
    cache: Option<QueryCache>,
}

impl GraphLookup {
    pub fn new(store: Arc<dyn GraphStore>, cache_config: &CacheConfig) -> Self {
        let cache = cache_config.enabled.then(|| QueryCache::new(cache_config));
        Self { store, cache }
    }
}

#[async_trait]
impl ResourceLookup for GraphLookup {
    async fn find_by_uid(&self, uid: &str) -> spectre_extractors::Result<Option<ResourceRef>> {
        let result = self.query(query::resource_by_uid(uid)).await?;
        Ok(result.rows.first().and_then(|row| resource_row(row)))
    }

    async fn find_by_namespace(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> spectre_extractors::Result<Option<ResourceRef>> {
        let result = self
            .query(query::resource_by_namespace(namespace, kind, name))
            .await?;
        Ok(result.rows.first().and_then(|row| resource_row(row)))
    }

    async fn recent_events(
        &self,
        uid: &str,
        window_ns: i64,
    ) -> spectre_extractors::Result<Vec<EventRef>> {
        let since = now_ns() - window_ns;
        let result = self
            .query(query::recent_change_events(uid, since, RECENT_EVENT_LIMIT))
            .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                Some(EventRef {
                    id: row.first()?.as_str()?.to_string(),
                    timestamp: row.get(1)?.as_i64()?,
                    event_type: row
                        .get(2)
                        .and_then(|v| v.as_str())
                        .and_then(EventType::parse)
                        .unwrap_or(EventType::Update),
                })
            })
            .collect())
    }

    async fn query(&self, query: GraphQuery) -> spectre_extractors::Result<QueryResult> {
        let Some(cache) = &self.cache else {
            return Ok(self.store.execute(query).await?);
        };
        // only reads are memoised; every write builder emits MERGE
        if query.text.contains("MERGE ") {
            return Ok(self.store.execute(query).await?);
        }
        let key = query.render();
        if let Some(hit) = cache.get(&key) {
            return Ok(hit);
        }
        let result = self.store.execute(query).await?;
        cache.put(key, result.clone());
        Ok(result)
    }
}
