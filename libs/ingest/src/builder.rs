//! Event-to-graph transformation.
//!
//! Phase 1 turns one event into node writes plus its structural edge; Phase 2
//! (driven by the pipeline) turns it into relationship edges through the
//! extractor registry. The split guarantees every node of the batch exists
//! before any relationship edge is written.

use crate::detector::ChangeFlags;
use crate::error::{Error, Result};
use crate::status;

use serde_json::Value;
use spectre_graph::schema::{
    ChangeEventNode, Edge, EdgeKind, K8sEventNode, NodeRef, ResourceNode,
};
use spectre_k8s_util::event::{EventType, RawEvent};
use spectre_k8s_util::parse;

/// One node write of Phase 1.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeWrite {
    Resource {
        node: ResourceNode,
        /// False when the event carried no payload (DELETE), keeping the
        /// previously stored labels.
        overwrite_labels: bool,
    },
    /// Create-only merge for a resource synthesised from involvedObject.
    Placeholder(ResourceNode),
    ChangeEvent(ChangeEventNode),
    K8sEvent(K8sEventNode),
}

/// All Phase 1 output for one event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphUpdate {
    pub nodes: Vec<NodeWrite>,
    pub edges: Vec<Edge>,
}

/// Phase 1: resource identity, event node, structural edge.
pub fn build_resource_nodes(event: &RawEvent, flags: ChangeFlags) -> Result<GraphUpdate> {
    if event.resource.uid.is_empty() {
        return Err(Error::MissingData(format!(
            "event {} has no resource uid",
            event.id
        )));
    }
    if event.is_k8s_event() {
        build_k8s_event(event)
    } else {
        build_change_event(event, flags)
    }
}

fn build_change_event(event: &RawEvent, flags: ChangeFlags) -> Result<GraphUpdate> {
    let meta = &event.resource;
    let is_delete = event.event_type == EventType::Delete;
    let resource = ResourceNode {
        uid: meta.uid.clone(),
        kind: meta.kind.clone(),
        api_group: meta.group.clone(),
        version: meta.version.clone(),
        namespace: meta.namespace.clone(),
        name: meta.name.clone(),
        labels: event.labels(),
        first_seen: event.timestamp,
        last_seen: event.timestamp,
        deleted: is_delete,
        deleted_at: if is_delete { event.timestamp } else { 0 },
    };

    let inferred = status::infer(event);
    let data = match &event.data {
        Value::Null => String::new(),
        value => serde_json::to_string(value).map_err(|e| {
            Error::SerializationError(format!("event {} payload", event.id), e)
        })?,
    };
    let change = ChangeEventNode {
        id: event.id.clone(),
        timestamp: event.timestamp,
        event_type: event.event_type,
        status: inferred.status,
        impact_score: status::impact_score(&inferred),
        error_message: inferred.error_message,
        container_issues: inferred.container_issues,
        config_changed: flags.config_changed,
        status_changed: flags.status_changed,
        replicas_changed: flags.replicas_changed,
        data,
    };

    Ok(GraphUpdate {
        nodes: vec![
            NodeWrite::Resource {
                node: resource,
                overwrite_labels: !is_delete && event.object().is_some(),
            },
            NodeWrite::ChangeEvent(change),
        ],
        edges: vec![Edge {
            from: NodeRef::resource(meta.uid.clone()),
            to: NodeRef::change_event(event.id.clone()),
            // the timestamp orders a resource's events and replays
            // idempotently, unlike a process-local counter
            kind: EdgeKind::Changed {
                sequence_number: event.timestamp,
            },
        }],
    })
}

fn build_k8s_event(event: &RawEvent) -> Result<GraphUpdate> {
    let object = event.object();
    let involved_uid = event
        .resource
        .involved_object_uid
        .clone()
        .or_else(|| {
            object
                .and_then(|o| parse::str_field(o, &["involvedObject", "uid"]))
                .map(str::to_string)
        })
        .ok_or_else(|| {
            Error::MissingData(format!("k8s event {} has no involvedObject.uid", event.id))
        })?;

    // synthesised identity; a real event for the same uid upserts over it
    let (group, version) = object
        .and_then(|o| parse::str_field(o, &["involvedObject", "apiVersion"]))
        .map(split_api_version)
        .unwrap_or_default();
    let placeholder = ResourceNode {
        uid: involved_uid.clone(),
        kind: object
            .and_then(|o| parse::str_field(o, &["involvedObject", "kind"]))
            .unwrap_or_default()
            .to_string(),
        api_group: group,
        version,
        namespace: object
            .and_then(|o| parse::str_field(o, &["involvedObject", "namespace"]))
            .unwrap_or_default()
            .to_string(),
        name: object
            .and_then(|o| parse::str_field(o, &["involvedObject", "name"]))
            .unwrap_or_default()
            .to_string(),
        labels: Default::default(),
        first_seen: event.timestamp,
        last_seen: event.timestamp,
        deleted: false,
        deleted_at: 0,
    };

    let k8s_event = K8sEventNode {
        id: event.id.clone(),
        timestamp: event.timestamp,
        reason: object
            .and_then(|o| parse::str_field(o, &["reason"]))
            .unwrap_or_default()
            .to_string(),
        message: object
            .and_then(|o| parse::str_field(o, &["message"]))
            .unwrap_or_default()
            .to_string(),
        event_type: object
            .and_then(|o| parse::str_field(o, &["type"]))
            .unwrap_or("Normal")
            .to_string(),
        count: object
            .and_then(|o| parse::i64_field(o, &["count"]))
            .unwrap_or(1),
        source: object
            .and_then(|o| {
                parse::str_field(o, &["source", "component"])
                    .or_else(|| parse::str_field(o, &["reportingComponent"]))
            })
            .unwrap_or_default()
            .to_string(),
    };

    Ok(GraphUpdate {
        nodes: vec![
            NodeWrite::Placeholder(placeholder),
            NodeWrite::K8sEvent(k8s_event),
        ],
        edges: vec![Edge {
            from: NodeRef::resource(involved_uid),
            to: NodeRef::k8s_event(event.id.clone()),
            kind: EdgeKind::EmittedEvent,
        }],
    })
}

fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use serde_json::json;
    use spectre_graph::schema::ResourceStatus;
    use spectre_k8s_util::event::ResourceMeta;

    fn raw(kind: &str, uid: &str, event_type: EventType, ts: i64, data: Value) -> RawEvent {
        RawEvent {
            id: format!("{uid}-{ts}"),
            timestamp: ts,
            event_type,
            resource: ResourceMeta {
                uid: uid.into(),
                version: "v1".into(),
                kind: kind.into(),
                namespace: "default".into(),
                name: "web-0".into(),
                ..Default::default()
            },
            data,
        }
    }

    #[test]
    fn create_produces_resource_change_event_and_edge() {
        let event = raw(
            "Pod",
            "u1",
            EventType::Create,
            10,
            json!({"metadata": {"labels": {"app": "web"}}, "status": {"phase": "Pending"}}),
        );
        let update = build_resource_nodes(&event, ChangeFlags::FIRST_SEEN).unwrap();
        assert_eq!(update.nodes.len(), 2);
        match &update.nodes[0] {
            NodeWrite::Resource {
                node,
                overwrite_labels,
            } => {
                assert_eq!(node.uid, "u1");
                assert_eq!(node.first_seen, 10);
                assert_eq!(node.last_seen, 10);
                assert!(!node.deleted);
                assert!(*overwrite_labels);
                assert_eq!(node.labels.get("app").map(String::as_str), Some("web"));
            }
            other => panic!("expected resource write, got {other:?}"),
        }
        match &update.nodes[1] {
            NodeWrite::ChangeEvent(change) => {
                assert_eq!(change.status, ResourceStatus::Warning);
                assert!(change.status_changed);
                assert!(!change.config_changed);
                assert!(!change.data.is_empty());
            }
            other => panic!("expected change event, got {other:?}"),
        }
        assert_eq!(update.edges.len(), 1);
        assert!(matches!(
            update.edges[0].kind,
            EdgeKind::Changed { sequence_number: 10 }
        ));
    }

    #[test]
    fn delete_marks_deleted_and_keeps_labels() {
        let event = raw("Pod", "u1", EventType::Delete, 99, Value::Null);
        let update = build_resource_nodes(&event, ChangeFlags::NONE).unwrap();
        match &update.nodes[0] {
            NodeWrite::Resource {
                node,
                overwrite_labels,
            } => {
                assert!(node.deleted);
                assert_eq!(node.deleted_at, 99);
                assert!(!overwrite_labels);
            }
            other => panic!("expected resource write, got {other:?}"),
        }
        match &update.nodes[1] {
            NodeWrite::ChangeEvent(change) => {
                assert_eq!(change.status, ResourceStatus::Terminating);
                assert_eq!(change.event_type, EventType::Delete);
                assert!(change.data.is_empty());
                assert!(!change.status_changed);
            }
            other => panic!("expected change event, got {other:?}"),
        }
    }

    #[test]
    fn revive_after_delete_clears_deletion() {
        let event = raw("Pod", "u1", EventType::Create, 200, json!({"metadata": {}}));
        let update = build_resource_nodes(&event, ChangeFlags::FIRST_SEEN).unwrap();
        match &update.nodes[0] {
            NodeWrite::Resource { node, .. } => {
                assert!(!node.deleted);
                assert_eq!(node.deleted_at, 0);
            }
            other => panic!("expected resource write, got {other:?}"),
        }
    }

    #[test]
    fn k8s_event_synthesises_placeholder() {
        let mut event = raw(
            "Event",
            "ev-uid",
            EventType::Create,
            50,
            json!({
                "reason": "FailedScheduling",
                "message": "0/3 nodes available",
                "type": "Warning",
                "count": 4,
                "source": {"component": "default-scheduler"},
                "involvedObject": {
                    "uid": "pod-u",
                    "kind": "Pod",
                    "apiVersion": "v1",
                    "namespace": "default",
                    "name": "web-0"
                }
            }),
        );
        event.resource.involved_object_uid = Some("pod-u".into());

        let update = build_resource_nodes(&event, ChangeFlags::NONE).unwrap();
        match &update.nodes[0] {
            NodeWrite::Placeholder(node) => {
                assert_eq!(node.uid, "pod-u");
                assert_eq!(node.kind, "Pod");
                assert_eq!(node.first_seen, 50);
                assert!(node.labels.is_empty());
            }
            other => panic!("expected placeholder, got {other:?}"),
        }
        match &update.nodes[1] {
            NodeWrite::K8sEvent(k8s) => {
                assert_eq!(k8s.reason, "FailedScheduling");
                assert_eq!(k8s.event_type, "Warning");
                assert_eq!(k8s.count, 4);
                assert_eq!(k8s.source, "default-scheduler");
            }
            other => panic!("expected k8s event, got {other:?}"),
        }
        assert_eq!(update.edges[0].from, NodeRef::resource("pod-u"));
        assert_eq!(update.edges[0].kind, EdgeKind::EmittedEvent);
    }

    #[test]
    fn k8s_event_without_involved_uid_is_malformed() {
        let event = raw("Event", "ev-uid", EventType::Create, 50, json!({"reason": "X"}));
        assert!(matches!(
            build_resource_nodes(&event, ChangeFlags::NONE),
            Err(Error::MissingData(_))
        ));
    }

    #[test]
    fn group_splits_from_api_version() {
        assert_eq!(split_api_version("apps/v1"), ("apps".into(), "v1".into()));
        assert_eq!(split_api_version("v1"), (String::new(), "v1".into()));
    }
}
