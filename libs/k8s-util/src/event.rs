//! The event model at the producer boundary.
//!
//! The informer layer delivers one [`RawEvent`] per observed object mutation.
//! Per-resource ordering is the producer's responsibility; everything
//! downstream only assumes that two events for the same uid arrive in the
//! order they happened.

use crate::parse;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Create,
    Update,
    Delete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Create => "CREATE",
            EventType::Update => "UPDATE",
            EventType::Delete => "DELETE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "CREATE" => Some(EventType::Create),
            "UPDATE" => Some(EventType::Update),
            "DELETE" => Some(EventType::Delete),
            _ => None,
        }
    }
}

/// Identity block attached to every event by the producer.
///
/// `namespace` is empty for cluster-scoped resources. `involved_object_uid`
/// is only set for `kind = Event` objects and names the resource the event
/// is about.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub uid: String,
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub involved_object_uid: Option<String>,
}

impl ResourceMeta {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// A single resource mutation as delivered by the producer.
///
/// `data` carries the full object JSON and may be `Value::Null` on DELETE.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub resource: ResourceMeta,
    #[serde(default)]
    pub data: Value,
}

impl RawEvent {
    /// The object payload, when one was delivered.
    pub fn object(&self) -> Option<&Value> {
        self.data.as_object().map(|_| &self.data)
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.object()
            .map(|obj| parse::string_map(obj, &["metadata", "labels"]))
            .unwrap_or_default()
    }

    pub fn generation(&self) -> Option<i64> {
        parse::i64_field(&self.data, &["metadata", "generation"])
    }

    pub fn is_k8s_event(&self) -> bool {
        self.resource.kind == "Event"
    }
}

/// A finite group of events processed atomically by the pipeline.
#[derive(Clone, Debug)]
pub struct EventBatch {
    pub batch_id: Uuid,
    /// Nanoseconds since the Unix epoch at batch formation.
    pub timestamp: i64,
    pub events: Vec<RawEvent>,
}

impl EventBatch {
    pub fn new(timestamp: i64, events: Vec<RawEvent>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            timestamp,
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use serde_json::json;

    #[test]
    fn api_version_omits_empty_group() {
        let core = ResourceMeta {
            version: "v1".into(),
            kind: "Pod".into(),
            ..Default::default()
        };
        assert_eq!(core.api_version(), "v1");

        let apps = ResourceMeta {
            group: "apps".into(),
            version: "v1".into(),
            kind: "Deployment".into(),
            ..Default::default()
        };
        assert_eq!(apps.api_version(), "apps/v1");
    }

    #[test]
    fn labels_from_object_payload() {
        let event = RawEvent {
            id: "e1".into(),
            timestamp: 1,
            event_type: EventType::Create,
            resource: ResourceMeta::default(),
            data: json!({"metadata": {"labels": {"app": "frontend"}}}),
        };
        assert_eq!(event.labels().get("app").map(String::as_str), Some("frontend"));
    }

    #[test]
    fn delete_without_payload_has_no_object() {
        let event = RawEvent {
            id: "e2".into(),
            timestamp: 1,
            event_type: EventType::Delete,
            resource: ResourceMeta::default(),
            data: Value::Null,
        };
        assert!(event.object().is_none());
        assert!(event.labels().is_empty());
        assert_eq!(event.generation(), None);
    }
}
