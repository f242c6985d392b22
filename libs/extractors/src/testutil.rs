//! Shared fixtures for extractor tests.

use crate::error::Result;
use crate::lookup::{EventRef, ResourceLookup, ResourceRef};

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use spectre_graph::{GraphQuery, QueryResult};
use spectre_k8s_util::event::{EventType, RawEvent, ResourceMeta};

#[derive(Default)]
pub struct MockLookup {
    pub resources: Vec<ResourceRef>,
    pub events: Vec<EventRef>,
}

impl MockLookup {
    pub fn with_resource(mut self, r: ResourceRef) -> Self {
        self.resources.push(r);
        self
    }

    pub fn with_event(mut self, e: EventRef) -> Self {
        self.events.push(e);
        self
    }
}

#[async_trait]
impl ResourceLookup for MockLookup {
    async fn find_by_uid(&self, uid: &str) -> Result<Option<ResourceRef>> {
        Ok(self.resources.iter().find(|r| r.uid == uid).cloned())
    }

    async fn find_by_namespace(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<Option<ResourceRef>> {
        Ok(self
            .resources
            .iter()
            .find(|r| r.namespace == namespace && r.kind == kind && r.name == name)
            .cloned())
    }

    async fn recent_events(&self, _uid: &str, _window_ns: i64) -> Result<Vec<EventRef>> {
        Ok(self.events.clone())
    }

    async fn query(&self, _query: GraphQuery) -> Result<QueryResult> {
        Ok(QueryResult::default())
    }

    async fn resources_in_namespace(
        &self,
        namespace: &str,
        exclude_uid: &str,
        limit: i64,
    ) -> Result<Vec<ResourceRef>> {
        Ok(self
            .resources
            .iter()
            .filter(|r| r.namespace == namespace && r.uid != exclude_uid)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

pub fn event_for(kind: &str, namespace: &str, name: &str, uid: &str, data: Value) -> RawEvent {
    RawEvent {
        id: format!("{uid}-ev"),
        timestamp: 1_000_000_000,
        event_type: EventType::Update,
        resource: ResourceMeta {
            uid: uid.to_string(),
            group: String::new(),
            version: "v1".to_string(),
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            involved_object_uid: None,
        },
        data,
    }
}

pub fn resource(uid: &str, kind: &str, namespace: &str, name: &str) -> ResourceRef {
    ResourceRef {
        uid: uid.to_string(),
        kind: kind.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        labels: BTreeMap::new(),
        first_seen: 0,
    }
}

pub fn labelled(mut r: ResourceRef, labels: &[(&str, &str)]) -> ResourceRef {
    r.labels = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    r
}
