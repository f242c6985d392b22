//! Resource lookup facade injected into extractors.
//!
//! Extractors run in Phase 2, after every node of the batch is committed, so
//! lookups observe a graph that already contains their batch peers. The four
//! required methods are the full contract; `resources_in_namespace` is
//! provided on top of `query` for candidate listings.

use crate::error::Result;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use spectre_graph::query::{self, GraphQuery};
use spectre_graph::QueryResult;
use spectre_k8s_util::event::EventType;

/// Projection of a Resource node used during extraction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceRef {
    pub uid: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub first_seen: i64,
}

/// Projection of a ChangeEvent node used by temporal scoring.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRef {
    pub id: String,
    pub timestamp: i64,
    pub event_type: EventType,
}

#[async_trait]
pub trait ResourceLookup: Send + Sync {
    async fn find_by_uid(&self, uid: &str) -> Result<Option<ResourceRef>>;

    async fn find_by_namespace(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<Option<ResourceRef>>;

    /// ChangeEvents of `uid` within the last `window_ns`, newest first.
    async fn recent_events(&self, uid: &str, window_ns: i64) -> Result<Vec<EventRef>>;

    async fn query(&self, query: GraphQuery) -> Result<QueryResult>;

    /// Bounded candidate listing, excluding `exclude_uid` and pending
    /// placeholder nodes.
    async fn resources_in_namespace(
        &self,
        namespace: &str,
        exclude_uid: &str,
        limit: i64,
    ) -> Result<Vec<ResourceRef>> {
        let result = self
            .query(query::resources_in_namespace(namespace, exclude_uid, limit))
            .await?;
        Ok(result.rows.iter().filter_map(|row| resource_row(row)).collect())
    }
}

/// Decode one `RESOURCE_COLUMNS` row.
pub fn resource_row(row: &[Value]) -> Option<ResourceRef> {
    Some(ResourceRef {
        uid: row.first()?.as_str()?.to_string(),
        kind: row.get(1)?.as_str().unwrap_or_default().to_string(),
        namespace: row.get(4)?.as_str().unwrap_or_default().to_string(),
        name: row.get(5)?.as_str().unwrap_or_default().to_string(),
        labels: row
            .get(6)
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default(),
        first_seen: row.get(7).and_then(Value::as_i64).unwrap_or(0),
    })
}
