//! Node and edge kinds of the temporal property graph.
//!
//! Three node labels: `Resource` (one per uid, never deleted), `ChangeEvent`
//! and `K8sEvent` (append-only, compacted by retention). Edges are typed and
//! upserted with MERGE semantics keyed by endpoint pair + type, so replaying
//! a batch never duplicates them.

use spectre_k8s_util::event::EventType;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const RESOURCE_LABEL: &str = "Resource";
pub const CHANGE_EVENT_LABEL: &str = "ChangeEvent";
pub const K8S_EVENT_LABEL: &str = "K8sEvent";

/// Inferred health of a resource at the moment of an event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Ready,
    Warning,
    Error,
    Terminating,
    #[default]
    Unknown,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Ready => "Ready",
            ResourceStatus::Warning => "Warning",
            ResourceStatus::Error => "Error",
            ResourceStatus::Terminating => "Terminating",
            ResourceStatus::Unknown => "Unknown",
        }
    }
}

/// Identity node, unique per `uid`. Created on first observation and
/// upserted on every later event for the same uid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub uid: String,
    pub kind: String,
    pub api_group: String,
    pub version: String,
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Nanosecond timestamps.
    pub first_seen: i64,
    pub last_seen: i64,
    pub deleted: bool,
    /// 0 when not deleted.
    pub deleted_at: i64,
}

/// One observed mutation of a resource. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEventNode {
    pub id: String,
    pub timestamp: i64,
    pub event_type: EventType,
    pub status: ResourceStatus,
    pub error_message: String,
    pub container_issues: Vec<String>,
    pub config_changed: bool,
    pub status_changed: bool,
    pub replicas_changed: bool,
    /// In [0, 1].
    pub impact_score: f64,
    /// Full object JSON, kept for later reconstruction and change detection.
    pub data: String,
}

/// A producer-emitted `v1.Event` object. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct K8sEventNode {
    pub id: String,
    pub timestamp: i64,
    pub reason: String,
    pub message: String,
    /// Normal or Warning.
    pub event_type: String,
    pub count: i64,
    pub source: String,
}

/// One scored observation backing a MANAGES edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(rename = "type")]
    pub evidence_type: String,
    pub value: String,
    pub weight: f64,
    pub timestamp: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationState {
    Valid,
    Stale,
    Invalid,
}

impl ValidationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationState::Valid => "valid",
            ValidationState::Stale => "stale",
            ValidationState::Invalid => "invalid",
        }
    }
}

/// Endpoint of an edge; the key space differs per node label.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeRef {
    Resource { uid: String },
    ChangeEvent { id: String },
    K8sEvent { id: String },
}

impl NodeRef {
    pub fn resource(uid: impl Into<String>) -> Self {
        NodeRef::Resource { uid: uid.into() }
    }

    pub fn change_event(id: impl Into<String>) -> Self {
        NodeRef::ChangeEvent { id: id.into() }
    }

    pub fn k8s_event(id: impl Into<String>) -> Self {
        NodeRef::K8sEvent { id: id.into() }
    }
}

/// A typed edge with its per-kind properties.
#[derive(Clone, Debug, PartialEq)]
pub struct Edge {
    pub from: NodeRef,
    pub to: NodeRef,
    pub kind: EdgeKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EdgeKind {
    Changed {
        sequence_number: i64,
    },
    EmittedEvent,
    Owns {
        controller: bool,
        block_owner_deletion: bool,
    },
    Selects {
        selector_labels: BTreeMap<String, String>,
    },
    ScheduledOn {
        scheduled_at: i64,
        /// 0 while the pod is still on the node.
        terminated_at: i64,
    },
    Mounts {
        volume_name: String,
        mount_path: String,
    },
    UsesServiceAccount,
    /// Typed spec reference. The target uid may be empty: the query layer
    /// then merges a pending placeholder target keyed by (kind, namespace,
    /// name), the one allowed dangling form.
    ReferencesSpec {
        field_path: String,
        ref_kind: String,
        ref_name: String,
        ref_namespace: String,
    },
    Manages {
        confidence: f64,
        evidence: Vec<Evidence>,
        first_observed: i64,
        last_validated: i64,
        validation_state: ValidationState,
    },
    BindsRole {
        role_kind: String,
        api_group: String,
    },
    GrantsTo {
        subject_kind: String,
        subject_name: String,
        subject_namespace: String,
    },
    TriggeredBy {
        confidence: f64,
        lag_ms: i64,
        heuristic: String,
        reason: String,
    },
}

impl EdgeKind {
    pub fn label(&self) -> &'static str {
        match self {
            EdgeKind::Changed { .. } => "CHANGED",
            EdgeKind::EmittedEvent => "EMITTED_EVENT",
            EdgeKind::Owns { .. } => "OWNS",
            EdgeKind::Selects { .. } => "SELECTS",
            EdgeKind::ScheduledOn { .. } => "SCHEDULED_ON",
            EdgeKind::Mounts { .. } => "MOUNTS",
            EdgeKind::UsesServiceAccount => "USES_SERVICE_ACCOUNT",
            EdgeKind::ReferencesSpec { .. } => "REFERENCES_SPEC",
            EdgeKind::Manages { .. } => "MANAGES",
            EdgeKind::BindsRole { .. } => "BINDS_ROLE",
            EdgeKind::GrantsTo { .. } => "GRANTS_TO",
            EdgeKind::TriggeredBy { .. } => "TRIGGERED_BY",
        }
    }
}

/// Index statements executed once at startup; lookups by these keys back
/// every hot path in the ingest loop.
pub fn index_statements() -> Vec<String> {
    vec![
        format!("CREATE INDEX ON :{RESOURCE_LABEL}(uid)"),
        format!("CREATE INDEX ON :{CHANGE_EVENT_LABEL}(id)"),
        format!("CREATE INDEX ON :{K8S_EVENT_LABEL}(id)"),
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn edge_labels_are_stable() {
        assert_eq!(
            EdgeKind::Changed { sequence_number: 1 }.label(),
            "CHANGED"
        );
        assert_eq!(EdgeKind::UsesServiceAccount.label(), "USES_SERVICE_ACCOUNT");
        assert_eq!(
            EdgeKind::TriggeredBy {
                confidence: 0.9,
                lag_ms: 10,
                heuristic: "same-resource-transition".into(),
                reason: String::new(),
            }
            .label(),
            "TRIGGERED_BY"
        );
    }

    #[test]
    fn index_statements_cover_all_labels() {
        let stmts = index_statements();
        assert_eq!(stmts.len(), 3);
        assert!(stmts.iter().any(|s| s.contains(":Resource(uid)")));
        assert!(stmts.iter().any(|s| s.contains(":ChangeEvent(id)")));
        assert!(stmts.iter().any(|s| s.contains(":K8sEvent(id)")));
    }
}
