//! Parameterised query construction.
//!
//! Every write is a MERGE keyed by the node's identity property or by the
//! endpoint pair + edge type, so replaying a batch is a no-op. Parameters are
//! rendered through [`ParamValue::encode`], the single escape point between
//! object data and query text; builders never interpolate raw strings.

use crate::schema::{
    ChangeEventNode, Edge, EdgeKind, Evidence, K8sEventNode, NodeRef, ResourceNode,
    CHANGE_EVENT_LABEL, K8S_EVENT_LABEL,
};

use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Map(BTreeMap<String, String>),
    StrList(Vec<String>),
}

impl ParamValue {
    /// Render the value as a query literal. Strings are double-quoted with
    /// backslash escaping; map keys are backtick-quoted so label keys like
    /// `app.kubernetes.io/name` survive.
    pub fn encode(&self) -> String {
        match self {
            ParamValue::Str(s) => encode_str(s),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(f) => {
                // keep a decimal point so the store types it as a double
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.1}")
                } else {
                    format!("{f}")
                }
            }
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Map(map) => {
                let mut out = String::from("{");
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "`{}`: {}", k.replace('`', ""), encode_str(v));
                }
                out.push('}');
                out
            }
            ParamValue::StrList(items) => {
                let mut out = String::from("[");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&encode_str(item));
                }
                out.push(']');
                out
            }
        }
    }
}

fn encode_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Float(f)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<BTreeMap<String, String>> for ParamValue {
    fn from(m: BTreeMap<String, String>) -> Self {
        ParamValue::Map(m)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(v: Vec<String>) -> Self {
        ParamValue::StrList(v)
    }
}

/// A query text plus its parameters map.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphQuery {
    pub text: String,
    pub params: BTreeMap<String, ParamValue>,
}

impl GraphQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// Full command string with the `CYPHER name=value` parameter prefix.
    pub fn render(&self) -> String {
        if self.params.is_empty() {
            return self.text.clone();
        }
        let mut out = String::from("CYPHER");
        for (name, value) in &self.params {
            let _ = write!(out, " {}={}", name, value.encode());
        }
        out.push(' ');
        out.push_str(&self.text);
        out
    }
}

/// MERGE the identity node for a resource. `overwrite_labels` is false for
/// DELETE events, which may carry no object payload; prior labels survive.
pub fn upsert_resource(node: &ResourceNode, overwrite_labels: bool) -> GraphQuery {
    let labels_set = if overwrite_labels {
        ", r.labels = $labels"
    } else {
        ""
    };
    let text = format!(
        "MERGE (r:Resource {{uid: $uid}}) \
         ON CREATE SET r.firstSeen = $firstSeen, r.lastSeen = $lastSeen \
         ON MATCH SET r.firstSeen = CASE WHEN r.firstSeen <= $firstSeen THEN r.firstSeen ELSE $firstSeen END, \
         r.lastSeen = CASE WHEN r.lastSeen >= $lastSeen THEN r.lastSeen ELSE $lastSeen END \
         SET r.kind = $kind, r.apiGroup = $apiGroup, r.version = $version, \
         r.namespace = $namespace, r.name = $name, r.deleted = $deleted, r.deletedAt = $deletedAt{labels_set}"
    );
    let mut query = GraphQuery::new(text)
        .param("uid", node.uid.as_str())
        .param("firstSeen", node.first_seen)
        .param("lastSeen", node.last_seen)
        .param("kind", node.kind.as_str())
        .param("apiGroup", node.api_group.as_str())
        .param("version", node.version.as_str())
        .param("namespace", node.namespace.as_str())
        .param("name", node.name.as_str())
        .param("deleted", node.deleted)
        .param("deletedAt", node.deleted_at);
    if overwrite_labels {
        query = query.param("labels", node.labels.clone());
    }
    query
}

/// MERGE a placeholder identity synthesised from an event's involvedObject.
/// Attributes are only set on creation so a later authoritative upsert is
/// never stomped by an out-of-order event batch.
pub fn merge_placeholder_resource(node: &ResourceNode) -> GraphQuery {
    GraphQuery::new(
        "MERGE (r:Resource {uid: $uid}) \
         ON CREATE SET r.kind = $kind, r.apiGroup = $apiGroup, r.version = $version, \
         r.namespace = $namespace, r.name = $name, r.labels = {}, \
         r.firstSeen = $firstSeen, r.lastSeen = $lastSeen, r.deleted = false, r.deletedAt = 0",
    )
    .param("uid", node.uid.as_str())
    .param("kind", node.kind.as_str())
    .param("apiGroup", node.api_group.as_str())
    .param("version", node.version.as_str())
    .param("namespace", node.namespace.as_str())
    .param("name", node.name.as_str())
    .param("firstSeen", node.first_seen)
    .param("lastSeen", node.last_seen)
}

pub fn upsert_change_event(event: &ChangeEventNode) -> GraphQuery {
    GraphQuery::new(
        "MERGE (e:ChangeEvent {id: $id}) \
         SET e.timestamp = $timestamp, e.eventType = $eventType, e.status = $status, \
         e.errorMessage = $errorMessage, e.containerIssues = $containerIssues, \
         e.configChanged = $configChanged, e.statusChanged = $statusChanged, \
         e.replicasChanged = $replicasChanged, e.impactScore = $impactScore, e.data = $data",
    )
    .param("id", event.id.as_str())
    .param("timestamp", event.timestamp)
    .param("eventType", event.event_type.as_str())
    .param("status", event.status.as_str())
    .param("errorMessage", event.error_message.as_str())
    .param("containerIssues", event.container_issues.clone())
    .param("configChanged", event.config_changed)
    .param("statusChanged", event.status_changed)
    .param("replicasChanged", event.replicas_changed)
    .param("impactScore", event.impact_score)
    .param("data", event.data.as_str())
}

pub fn upsert_k8s_event(event: &K8sEventNode) -> GraphQuery {
    GraphQuery::new(
        "MERGE (e:K8sEvent {id: $id}) \
         SET e.timestamp = $timestamp, e.reason = $reason, e.message = $message, \
         e.type = $type, e.count = $count, e.source = $source",
    )
    .param("id", event.id.as_str())
    .param("timestamp", event.timestamp)
    .param("reason", event.reason.as_str())
    .param("message", event.message.as_str())
    .param("type", event.event_type.as_str())
    .param("count", event.count)
    .param("source", event.source.as_str())
}

/// MERGE one typed edge. Endpoints are MATCHed first: if either side is
/// absent the statement writes nothing, which is how edges with vanished
/// endpoints get dropped. REFERENCES_SPEC with an empty target uid instead
/// MERGEs a pending placeholder target, the one allowed dangling form.
pub fn upsert_edge(edge: &Edge) -> GraphQuery {
    let label = edge.kind.label();
    match &edge.kind {
        EdgeKind::Changed { sequence_number } => GraphQuery::new(
            "MATCH (r:Resource {uid: $fromUid}) MATCH (e:ChangeEvent {id: $toId}) \
             MERGE (r)-[c:CHANGED]->(e) SET c.sequenceNumber = $sequenceNumber",
        )
        .param("fromUid", ref_key(&edge.from))
        .param("toId", ref_key(&edge.to))
        .param("sequenceNumber", *sequence_number),

        EdgeKind::EmittedEvent => GraphQuery::new(
            "MATCH (r:Resource {uid: $fromUid}) MATCH (e:K8sEvent {id: $toId}) \
             MERGE (r)-[:EMITTED_EVENT]->(e)",
        )
        .param("fromUid", ref_key(&edge.from))
        .param("toId", ref_key(&edge.to)),

        EdgeKind::Owns {
            controller,
            block_owner_deletion,
        } => resource_pair_edge(edge)
            .param("controller", *controller)
            .param("blockOwnerDeletion", *block_owner_deletion)
            .with_set(label, "e.controller = $controller, e.blockOwnerDeletion = $blockOwnerDeletion"),

        EdgeKind::Selects { selector_labels } => resource_pair_edge(edge)
            .param("selectorLabels", selector_labels.clone())
            .with_set(label, "e.selectorLabels = $selectorLabels"),

        EdgeKind::ScheduledOn {
            scheduled_at,
            terminated_at,
        } => resource_pair_edge(edge)
            .param("scheduledAt", *scheduled_at)
            .param("terminatedAt", *terminated_at)
            .with_set(label, "e.scheduledAt = $scheduledAt, e.terminatedAt = $terminatedAt"),

        EdgeKind::Mounts {
            volume_name,
            mount_path,
        } => resource_pair_edge(edge)
            .param("volumeName", volume_name.as_str())
            .param("mountPath", mount_path.as_str())
            .with_set(label, "e.volumeName = $volumeName, e.mountPath = $mountPath"),

        EdgeKind::UsesServiceAccount => GraphQuery::new(
            "MATCH (s:Resource {uid: $fromUid}) MATCH (t:Resource {uid: $toUid}) \
             MERGE (s)-[:USES_SERVICE_ACCOUNT]->(t)",
        )
        .param("fromUid", ref_key(&edge.from))
        .param("toUid", ref_key(&edge.to)),

        EdgeKind::ReferencesSpec {
            field_path,
            ref_kind,
            ref_name,
            ref_namespace,
        } => {
            let target_uid = ref_key(&edge.to);
            let text = if target_uid.is_empty() {
                "MATCH (s:Resource {uid: $fromUid}) \
                 MERGE (t:Resource {uid: \"\", kind: $refKind, namespace: $refNamespace, name: $refName}) \
                 MERGE (s)-[e:REFERENCES_SPEC {fieldPath: $fieldPath}]->(t) \
                 SET e.refKind = $refKind, e.refName = $refName, e.refNamespace = $refNamespace, e.targetUid = \"\""
            } else {
                "MATCH (s:Resource {uid: $fromUid}) MATCH (t:Resource {uid: $toUid}) \
                 MERGE (s)-[e:REFERENCES_SPEC {fieldPath: $fieldPath}]->(t) \
                 SET e.refKind = $refKind, e.refName = $refName, e.refNamespace = $refNamespace, e.targetUid = $toUid"
            };
            let mut query = GraphQuery::new(text)
                .param("fromUid", ref_key(&edge.from))
                .param("fieldPath", field_path.as_str())
                .param("refKind", ref_kind.as_str())
                .param("refName", ref_name.as_str())
                .param("refNamespace", ref_namespace.as_str());
            if !target_uid.is_empty() {
                query = query.param("toUid", target_uid);
            }
            query
        }

        EdgeKind::Manages {
            confidence,
            evidence,
            first_observed,
            last_validated,
            validation_state,
        } => resource_pair_edge(edge)
            .param("confidence", *confidence)
            .param("evidence", encode_evidence(evidence))
            .param("firstObserved", *first_observed)
            .param("lastValidated", *last_validated)
            .param("validationState", validation_state.as_str())
            .with_set(
                label,
                "e.confidence = $confidence, e.evidence = $evidence, \
                 e.firstObserved = $firstObserved, e.lastValidated = $lastValidated, \
                 e.validationState = $validationState",
            ),

        EdgeKind::BindsRole {
            role_kind,
            api_group,
        } => resource_pair_edge(edge)
            .param("roleKind", role_kind.as_str())
            .param("apiGroup", api_group.as_str())
            .with_set(label, "e.roleKind = $roleKind, e.apiGroup = $apiGroup"),

        EdgeKind::GrantsTo {
            subject_kind,
            subject_name,
            subject_namespace,
        } => resource_pair_edge(edge)
            .param("subjectKind", subject_kind.as_str())
            .param("subjectName", subject_name.as_str())
            .param("subjectNamespace", subject_namespace.as_str())
            .with_set(
                label,
                "e.subjectKind = $subjectKind, e.subjectName = $subjectName, e.subjectNamespace = $subjectNamespace",
            ),

        EdgeKind::TriggeredBy {
            confidence,
            lag_ms,
            heuristic,
            reason,
        } => GraphQuery::new(
            "MATCH (effect:ChangeEvent {id: $fromId}) MATCH (cause:ChangeEvent {id: $toId}) \
             MERGE (effect)-[e:TRIGGERED_BY]->(cause) \
             SET e.confidence = $confidence, e.lagMs = $lagMs, e.heuristic = $heuristic, e.reason = $reason",
        )
        .param("fromId", ref_key(&edge.from))
        .param("toId", ref_key(&edge.to))
        .param("confidence", *confidence)
        .param("lagMs", *lag_ms)
        .param("heuristic", heuristic.as_str())
        .param("reason", reason.as_str()),
    }
}

/// Evidence is a nested structure; it is persisted as a JSON string property.
fn encode_evidence(evidence: &[Evidence]) -> String {
    serde_json::to_string(evidence).unwrap_or_else(|_| "[]".to_string())
}

fn ref_key(node_ref: &NodeRef) -> &str {
    match node_ref {
        NodeRef::Resource { uid } => uid,
        NodeRef::ChangeEvent { id } | NodeRef::K8sEvent { id } => id,
    }
}

fn resource_pair_edge(edge: &Edge) -> GraphQuery {
    GraphQuery::new(String::new())
        .param("fromUid", ref_key(&edge.from))
        .param("toUid", ref_key(&edge.to))
}

impl GraphQuery {
    /// Finish a Resource→Resource edge query with the per-kind SET clause.
    fn with_set(mut self, label: &str, set_clause: &str) -> Self {
        self.text = format!(
            "MATCH (s:Resource {{uid: $fromUid}}) MATCH (t:Resource {{uid: $toUid}}) \
             MERGE (s)-[e:{label}]->(t) SET {set_clause}"
        );
        self
    }
}

/// Most recent prior ChangeEvent payload for a uid, for change detection.
pub fn latest_change_event_data(uid: &str, before_ns: i64) -> GraphQuery {
    GraphQuery::new(
        "MATCH (r:Resource {uid: $uid})-[:CHANGED]->(e:ChangeEvent) \
         WHERE e.timestamp < $before \
         RETURN e.data ORDER BY e.timestamp DESC LIMIT 1",
    )
    .param("uid", uid)
    .param("before", before_ns)
}

pub fn resource_by_uid(uid: &str) -> GraphQuery {
    GraphQuery::new(format!("MATCH (r:Resource {{uid: $uid}}) RETURN {RESOURCE_COLUMNS}"))
        .param("uid", uid)
}

pub fn resource_by_namespace(namespace: &str, kind: &str, name: &str) -> GraphQuery {
    GraphQuery::new(format!(
        "MATCH (r:Resource {{namespace: $namespace, kind: $kind, name: $name}}) \
         WHERE r.deleted = false RETURN {RESOURCE_COLUMNS} LIMIT 1"
    ))
    .param("namespace", namespace)
    .param("kind", kind)
    .param("name", name)
}

/// Candidate listing for relationship scoring; capped by the caller.
pub fn resources_in_namespace(namespace: &str, exclude_uid: &str, limit: i64) -> GraphQuery {
    GraphQuery::new(format!(
        "MATCH (r:Resource {{namespace: $namespace}}) \
         WHERE r.uid <> $exclude AND r.uid <> \"\" AND r.deleted = false \
         RETURN {RESOURCE_COLUMNS} LIMIT $limit"
    ))
    .param("namespace", namespace)
    .param("exclude", exclude_uid)
    .param("limit", limit)
}

pub fn recent_change_events(uid: &str, since_ns: i64, limit: i64) -> GraphQuery {
    GraphQuery::new(
        "MATCH (r:Resource {uid: $uid})-[:CHANGED]->(e:ChangeEvent) \
         WHERE e.timestamp >= $since \
         RETURN e.id, e.timestamp, e.eventType ORDER BY e.timestamp DESC LIMIT $limit",
    )
    .param("uid", uid)
    .param("since", since_ns)
    .param("limit", limit)
}

/// Non-deleted identities of one kind, for the reconciler diff. Returns
/// uid, namespace and name so a synthetic DELETE can be fabricated.
pub fn active_resources_of_kind(kind: &str, limit: i64) -> GraphQuery {
    GraphQuery::new(
        "MATCH (r:Resource {kind: $kind}) WHERE r.deleted = false AND r.uid <> \"\" \
         RETURN r.uid, r.namespace, r.name LIMIT $limit",
    )
    .param("kind", kind)
    .param("limit", limit)
}

const RESOURCE_COLUMNS: &str = "r.uid, r.kind, r.apiGroup, r.version, r.namespace, r.name, \
                                r.labels, r.firstSeen, r.lastSeen, r.deleted, r.deletedAt";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventLabel {
    Change,
    K8s,
}

impl EventLabel {
    fn as_str(&self) -> &'static str {
        match self {
            EventLabel::Change => CHANGE_EVENT_LABEL,
            EventLabel::K8s => K8S_EVENT_LABEL,
        }
    }
}

/// One bounded retention sweep; returns the number of deleted event nodes so
/// the caller can loop until the cutoff is drained.
pub fn expired_events_sweep(label: EventLabel, cutoff_ns: i64, limit: i64) -> GraphQuery {
    GraphQuery::new(format!(
        "MATCH (e:{}) WHERE e.timestamp < $cutoff \
         WITH e LIMIT $limit DETACH DELETE e RETURN count(e)",
        label.as_str()
    ))
    .param("cutoff", cutoff_ns)
    .param("limit", limit)
}
