//! Three-phase batch processing, the only writer in the ingest path.
//!
//! Phase 1 commits every node of the batch and fills the change cache;
//! Phase 2 runs the extractor registry and writes relationship edges;
//! Phase 3 infers causality. Per-event failures are swallowed into typed
//! counters; idempotent MERGEs make any retry safe. Only an exhausted
//! storage retry budget propagates.

use crate::builder::{self, GraphUpdate, NodeWrite};
use crate::causality::CausalityEngine;
use crate::config::IngestorConfig;
use crate::detector::{BatchCache, ChangeDetector, ChangeFlags};
use crate::error::{Error, Result};
use crate::lookup::GraphLookup;
use crate::metrics::IngestMetrics;
use crate::stats::{PipelineStats, StatsSnapshot};

use std::sync::Arc;

use spectre_extractors::ExtractorRegistry;
use spectre_graph::query;
use spectre_graph::schema::{Edge, EdgeKind, NodeRef};
use spectre_graph::GraphStore;
use spectre_k8s_util::event::{EventBatch, RawEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info_span, instrument, warn, Instrument};

pub struct Pipeline {
    store: Arc<dyn GraphStore>,
    lookup: GraphLookup,
    registry: ExtractorRegistry,
    detector: ChangeDetector,
    causality: CausalityEngine,
    stats: Arc<PipelineStats>,
    metrics: Arc<IngestMetrics>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn GraphStore>,
        registry: ExtractorRegistry,
        config: &IngestorConfig,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            lookup: GraphLookup::new(store.clone(), &config.graph.cache),
            detector: ChangeDetector::new(store.clone()),
            causality: CausalityEngine::new(config.causality.clone()),
            store,
            registry,
            stats: Arc::new(PipelineStats::default()),
            metrics,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Convenience wrapper for a single event.
    pub async fn process_event(&self, cancel: &CancellationToken, event: RawEvent) -> Result<()> {
        let batch = EventBatch::new(event.timestamp, vec![event]);
        self.process_batch(cancel, &batch).await
    }

    #[instrument(skip_all, fields(batch_id = %batch.batch_id, size = batch.len()))]
    pub async fn process_batch(&self, cancel: &CancellationToken, batch: &EventBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let timer = self.metrics.batch_timer();

        let mut cache = BatchCache::default();
        self.phase_nodes(cancel, batch, &mut cache)
            .instrument(info_span!("phase", name = "nodes"))
            .await?;
        if !cancel.is_cancelled() {
            self.phase_edges(cancel, batch)
                .instrument(info_span!("phase", name = "edges"))
                .await?;
        }
        if !cancel.is_cancelled() && self.causality.is_enabled() && batch.len() >= 2 {
            self.phase_causality(batch)
                .instrument(info_span!("phase", name = "causality"))
                .await?;
        }

        let newest = batch.events.iter().map(|e| e.timestamp).max().unwrap_or(0);
        self.stats.record_batch(batch.len() as u64, newest);
        self.metrics.batch_processed(batch.len() as u64);
        drop(timer);
        if cancel.is_cancelled() {
            debug!(msg = "batch abandoned on cancellation", batch_id = %batch.batch_id);
        }
        Ok(())
    }

    /// Phase 1: node upserts and structural edges, in batch order.
    async fn phase_nodes(
        &self,
        cancel: &CancellationToken,
        batch: &EventBatch,
        cache: &mut BatchCache,
    ) -> Result<()> {
        for event in &batch.events {
            if cancel.is_cancelled() {
                return Ok(());
            }
            self.event_nodes(event, cache)
                .instrument(debug_span!("event", id = %event.id))
                .await?;
        }
        Ok(())
    }

    async fn event_nodes(&self, event: &RawEvent, cache: &mut BatchCache) -> Result<()> {
        let flags = self.detector.detect(event, cache).await;
        let update = match builder::build_resource_nodes(event, flags) {
            Ok(update) => update,
            Err(error) => {
                self.count_event_error(event, "build", &error);
                return Ok(());
            }
        };
        if let Err(error) = self.apply_update(&update).await {
            if fatal(&error) {
                return Err(error);
            }
            self.count_event_error(event, "nodes", &error);
            return Ok(());
        }
        cache.insert(&event.resource.uid, &event.data);
        Ok(())
    }

    /// Phase 2: relationship edges from the registry. All nodes of the
    /// batch exist at this point.
    async fn phase_edges(&self, cancel: &CancellationToken, batch: &EventBatch) -> Result<()> {
        for event in &batch.events {
            if cancel.is_cancelled() {
                return Ok(());
            }
            self.event_edges(event)
                .instrument(debug_span!("event", id = %event.id))
                .await?;
        }
        Ok(())
    }

    async fn event_edges(&self, event: &RawEvent) -> Result<()> {
        let (edges, extractor_errors) = self.registry.extract_all(event, &self.lookup).await;
        for _ in 0..extractor_errors {
            self.stats.record_error();
            self.metrics.extractor_error();
        }
        for edge in edges {
            if let Some(reason) = invalid_endpoint(&edge) {
                warn!(
                    msg = "edge skipped",
                    edge = edge.kind.label(),
                    uid = %event.resource.uid,
                    reason
                );
                continue;
            }
            match self.store.execute(query::upsert_edge(&edge)).await {
                Ok(result) => {
                    self.stats.record_edges(result.stats.relationships_created);
                }
                Err(error) => {
                    let error = Error::Graph(error);
                    if fatal(&error) {
                        return Err(error);
                    }
                    self.count_event_error(event, "edges", &error);
                }
            }
        }
        Ok(())
    }

    /// Phase 3: TRIGGERED_BY edges between this batch's change events.
    async fn phase_causality(&self, batch: &EventBatch) -> Result<()> {
        let links = self.causality.infer(&batch.events);
        let mut written = 0u64;
        for link in &links {
            let edge = Edge {
                from: NodeRef::change_event(link.effect_event_id.clone()),
                to: NodeRef::change_event(link.cause_event_id.clone()),
                kind: EdgeKind::TriggeredBy {
                    confidence: link.confidence,
                    lag_ms: link.lag_ms,
                    heuristic: link.heuristic.to_string(),
                    reason: link.reason.clone(),
                },
            };
            match self.store.execute(query::upsert_edge(&edge)).await {
                Ok(_) => written += 1,
                Err(error) => {
                    let error = Error::Graph(error);
                    if fatal(&error) {
                        return Err(error);
                    }
                    warn!(msg = "causality edge write failed", %error);
                    self.stats.record_error();
                }
            }
        }
        if written > 0 {
            debug!(msg = "causality links written", count = written);
            self.stats.record_causality_links(written);
        }
        Ok(())
    }

    async fn apply_update(&self, update: &GraphUpdate) -> Result<()> {
        let mut nodes_created = 0;
        for write in &update.nodes {
            let node_query = match write {
                NodeWrite::Resource {
                    node,
                    overwrite_labels,
                } => query::upsert_resource(node, *overwrite_labels),
                NodeWrite::Placeholder(node) => query::merge_placeholder_resource(node),
                NodeWrite::ChangeEvent(node) => query::upsert_change_event(node),
                NodeWrite::K8sEvent(node) => query::upsert_k8s_event(node),
            };
            let result = self.store.execute(node_query).await?;
            nodes_created += result.stats.nodes_created;
        }
        let mut edges_created = 0;
        for edge in &update.edges {
            let result = self.store.execute(query::upsert_edge(edge)).await?;
            edges_created += result.stats.relationships_created;
        }
        self.stats.record_nodes(nodes_created);
        self.stats.record_edges(edges_created);
        Ok(())
    }

    fn count_event_error(&self, event: &RawEvent, phase: &'static str, error: &Error) {
        warn!(
            msg = "event failed, continuing batch",
            event_id = %event.id,
            uid = %event.resource.uid,
            phase,
            %error
        );
        self.stats.record_error();
        self.metrics.event_error(phase);
    }
}

/// Empty endpoints invalidate an edge, except the REFERENCES_SPEC dangling
/// target form.
fn invalid_endpoint(edge: &Edge) -> Option<&'static str> {
    let empty = |node_ref: &NodeRef| match node_ref {
        NodeRef::Resource { uid } => uid.is_empty(),
        NodeRef::ChangeEvent { id } | NodeRef::K8sEvent { id } => id.is_empty(),
    };
    if empty(&edge.from) {
        return Some("missing source");
    }
    if empty(&edge.to) && !matches!(edge.kind, EdgeKind::ReferencesSpec { .. }) {
        return Some("missing target");
    }
    None
}

/// Only an unreachable store aborts the batch; everything else is
/// per-event damage.
fn fatal(error: &Error) -> bool {
    matches!(
        error,
        Error::Graph(spectre_graph::Error::RetriesExhausted { .. })
            | Error::Graph(spectre_graph::Error::Closed)
    )
}

#[cfg(test)]
mod test {
    use super::*;

    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use spectre_graph::client::{QueryResult, QueryStats};
    use spectre_graph::GraphQuery;
    use spectre_k8s_util::event::{EventType, ResourceMeta};

    /// Records every executed query; answers reads with nothing.
    #[derive(Default)]
    struct RecordingStore {
        queries: Mutex<Vec<GraphQuery>>,
        fail_merges: bool,
    }

    #[async_trait]
    impl GraphStore for RecordingStore {
        async fn execute(&self, query: GraphQuery) -> spectre_graph::Result<QueryResult> {
            let is_merge = query.text.contains("MERGE ");
            self.queries.lock().push(query);
            if self.fail_merges && is_merge {
                return Err(spectre_graph::Error::Protocol("injected".into()));
            }
            let stats = if is_merge {
                QueryStats {
                    nodes_created: 1,
                    relationships_created: 1,
                    ..Default::default()
                }
            } else {
                QueryStats::default()
            };
            Ok(QueryResult {
                rows: Vec::new(),
                stats,
            })
        }
    }

    fn pipeline_with(store: Arc<RecordingStore>) -> Pipeline {
        let config = IngestorConfig::default();
        let metrics = Arc::new(IngestMetrics::new(&opentelemetry::global::meter("test")));
        Pipeline::new(store, ExtractorRegistry::with_defaults(), &config, metrics)
    }

    fn event(kind: &str, uid: &str, event_type: EventType, ts_ms: i64, data: serde_json::Value) -> RawEvent {
        RawEvent {
            id: format!("{uid}-{ts_ms}"),
            timestamp: ts_ms * 1_000_000,
            event_type,
            resource: ResourceMeta {
                uid: uid.into(),
                version: "v1".into(),
                kind: kind.into(),
                namespace: "default".into(),
                name: format!("{kind}-{uid}").to_lowercase(),
                ..Default::default()
            },
            data,
        }
    }

    fn texts(store: &RecordingStore) -> Vec<String> {
        store.queries.lock().iter().map(|q| q.text.clone()).collect()
    }

    #[tokio::test]
    async fn phases_run_in_order() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline_with(store.clone());
        let batch = EventBatch::new(
            0,
            vec![
                event("Deployment", "d1", EventType::Create, 0, json!({"metadata": {}})),
                event("Deployment", "d1", EventType::Update, 1_000, json!({"metadata": {"generation": 2}})),
            ],
        );
        pipeline
            .process_batch(&CancellationToken::new(), &batch)
            .await
            .unwrap();

        let texts = texts(&store);
        let first_resource = texts
            .iter()
            .position(|t| t.starts_with("MERGE (r:Resource"))
            .unwrap();
        let last_node_write = texts
            .iter()
            .rposition(|t| t.contains("MERGE (e:ChangeEvent {id: $id})"))
            .unwrap();
        let causality = texts
            .iter()
            .position(|t| t.contains("TRIGGERED_BY"))
            .unwrap();
        assert!(first_resource < last_node_write);
        assert!(last_node_write < causality);

        let stats = pipeline.stats();
        assert_eq!(stats.events_processed, 2);
        assert!(stats.nodes_created >= 4);
        assert_eq!(stats.causality_links_found, 1);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn reprocessing_a_batch_issues_identical_queries() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline_with(store.clone());
        let batch = EventBatch::new(
            0,
            vec![event(
                "Pod",
                "p1",
                EventType::Create,
                5,
                json!({"metadata": {"labels": {"app": "web"}}}),
            )],
        );
        let cancel = CancellationToken::new();
        pipeline.process_batch(&cancel, &batch).await.unwrap();
        let first: Vec<String> = store
            .queries
            .lock()
            .iter()
            .map(|q| q.render())
            .collect();
        store.queries.lock().clear();
        pipeline.process_batch(&cancel, &batch).await.unwrap();
        let second: Vec<String> = store
            .queries
            .lock()
            .iter()
            .map(|q| q.render())
            .collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn write_failures_count_and_do_not_abort() {
        let store = Arc::new(RecordingStore {
            fail_merges: true,
            ..Default::default()
        });
        let pipeline = pipeline_with(store.clone());
        let batch = EventBatch::new(
            0,
            vec![
                event("Pod", "p1", EventType::Create, 1, json!({"metadata": {}})),
                event("Pod", "p2", EventType::Create, 2, json!({"metadata": {}})),
            ],
        );
        pipeline
            .process_batch(&CancellationToken::new(), &batch)
            .await
            .unwrap();
        let stats = pipeline.stats();
        assert_eq!(stats.events_processed, 2);
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.nodes_created, 0);
    }

    #[tokio::test]
    async fn malformed_event_is_skipped() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline_with(store.clone());
        // a k8s Event without involvedObject cannot be attached
        let mut bad = event("Event", "ev1", EventType::Create, 1, json!({"reason": "X"}));
        bad.resource.involved_object_uid = None;
        let good = event("Pod", "p1", EventType::Create, 2, json!({"metadata": {}}));
        let batch = EventBatch::new(0, vec![bad, good]);
        pipeline
            .process_batch(&CancellationToken::new(), &batch)
            .await
            .unwrap();
        let stats = pipeline.stats();
        assert_eq!(stats.errors, 1);
        // the good event still landed
        assert!(texts(&store).iter().any(|t| t.starts_with("MERGE (r:Resource")));
    }

    #[tokio::test]
    async fn cancellation_abandons_remaining_events() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline_with(store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let batch = EventBatch::new(
            0,
            vec![event("Pod", "p1", EventType::Create, 1, json!({"metadata": {}}))],
        );
        pipeline.process_batch(&cancel, &batch).await.unwrap();
        assert!(store.queries.lock().is_empty());
    }

    #[tokio::test]
    async fn dangling_reference_is_written_but_other_empty_targets_are_not() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline_with(store.clone());
        // HelmRelease with a valuesFrom secret that is nowhere in the graph
        let batch = EventBatch::new(
            0,
            vec![event(
                "HelmRelease",
                "hr1",
                EventType::Create,
                1,
                json!({"metadata": {}, "spec": {"valuesFrom": [{"kind": "Secret", "name": "vals"}]}}),
            )],
        );
        pipeline
            .process_batch(&CancellationToken::new(), &batch)
            .await
            .unwrap();
        assert!(texts(&store)
            .iter()
            .any(|t| t.contains("REFERENCES_SPEC") && t.contains("uid: \"\"")));
    }

    #[test]
    fn endpoint_validation() {
        let selects = Edge {
            from: NodeRef::resource("a"),
            to: NodeRef::resource(""),
            kind: EdgeKind::Selects {
                selector_labels: BTreeMap::new(),
            },
        };
        assert_eq!(invalid_endpoint(&selects), Some("missing target"));

        let dangling = Edge {
            from: NodeRef::resource("a"),
            to: NodeRef::resource(""),
            kind: EdgeKind::ReferencesSpec {
                field_path: "spec.x".into(),
                ref_kind: "Secret".into(),
                ref_name: "s".into(),
                ref_namespace: "default".into(),
            },
        };
        assert_eq!(invalid_endpoint(&dangling), None);
    }

    mod scenarios {
        //! Whole-flow checks against a store that applies the known write
        //! shapes to in-memory state, honouring the same merge semantics
        //! the real store would.

        use super::*;

        use std::collections::HashMap;

        use spectre_graph::query::ParamValue;

        #[derive(Clone, Debug, Default, PartialEq)]
        struct ResourceState {
            kind: String,
            name: String,
            first_seen: i64,
            last_seen: i64,
            deleted: bool,
            deleted_at: i64,
        }

        #[derive(Clone, Debug, Default, PartialEq)]
        struct ChangeEventState {
            timestamp: i64,
            event_type: String,
            config_changed: bool,
            status_changed: bool,
            replicas_changed: bool,
            data: String,
        }

        #[derive(Clone, Debug, Default, PartialEq)]
        struct State {
            resources: HashMap<String, ResourceState>,
            change_events: HashMap<String, ChangeEventState>,
            k8s_events: HashMap<String, String>,
            /// (from, to) per structural edge label.
            changed: Vec<(String, String)>,
            emitted: Vec<(String, String)>,
            /// (from, to, label) for relationship edges.
            typed: Vec<(String, String, String)>,
            /// (effect, cause, heuristic).
            triggered: Vec<(String, String, String)>,
        }

        #[derive(Default)]
        struct SemanticStore {
            state: Mutex<State>,
        }

        fn s(query: &GraphQuery, name: &str) -> String {
            match query.params.get(name) {
                Some(ParamValue::Str(v)) => v.clone(),
                other => panic!("param {name} missing or not a string: {other:?}"),
            }
        }

        fn i(query: &GraphQuery, name: &str) -> i64 {
            match query.params.get(name) {
                Some(ParamValue::Int(v)) => *v,
                other => panic!("param {name} missing or not an int: {other:?}"),
            }
        }

        fn b(query: &GraphQuery, name: &str) -> bool {
            match query.params.get(name) {
                Some(ParamValue::Bool(v)) => *v,
                other => panic!("param {name} missing or not a bool: {other:?}"),
            }
        }

        #[async_trait]
        impl GraphStore for SemanticStore {
            async fn execute(&self, query: GraphQuery) -> spectre_graph::Result<QueryResult> {
                let mut state = self.state.lock();
                let text = query.text.as_str();

                if text.contains("ON CREATE SET r.firstSeen") {
                    let entry = state.resources.entry(s(&query, "uid")).or_insert_with(|| {
                        ResourceState {
                            first_seen: i64::MAX,
                            ..Default::default()
                        }
                    });
                    entry.first_seen = entry.first_seen.min(i(&query, "firstSeen"));
                    entry.last_seen = entry.last_seen.max(i(&query, "lastSeen"));
                    entry.kind = s(&query, "kind");
                    entry.name = s(&query, "name");
                    entry.deleted = b(&query, "deleted");
                    entry.deleted_at = i(&query, "deletedAt");
                } else if text.contains("ON CREATE SET r.kind") {
                    // placeholder: attributes only on first sight
                    state
                        .resources
                        .entry(s(&query, "uid"))
                        .or_insert_with(|| ResourceState {
                            kind: s(&query, "kind"),
                            name: s(&query, "name"),
                            first_seen: i(&query, "firstSeen"),
                            last_seen: i(&query, "lastSeen"),
                            deleted: false,
                            deleted_at: 0,
                        });
                } else if text.starts_with("MERGE (e:ChangeEvent") {
                    state.change_events.insert(
                        s(&query, "id"),
                        ChangeEventState {
                            timestamp: i(&query, "timestamp"),
                            event_type: s(&query, "eventType"),
                            config_changed: b(&query, "configChanged"),
                            status_changed: b(&query, "statusChanged"),
                            replicas_changed: b(&query, "replicasChanged"),
                            data: s(&query, "data"),
                        },
                    );
                } else if text.starts_with("MERGE (e:K8sEvent") {
                    state.k8s_events.insert(s(&query, "id"), s(&query, "reason"));
                } else if text.contains("[c:CHANGED]") {
                    let edge = (s(&query, "fromUid"), s(&query, "toId"));
                    if !state.changed.contains(&edge) {
                        state.changed.push(edge);
                    }
                } else if text.contains("EMITTED_EVENT") {
                    let edge = (s(&query, "fromUid"), s(&query, "toId"));
                    if !state.emitted.contains(&edge) {
                        state.emitted.push(edge);
                    }
                } else if text.contains("TRIGGERED_BY") {
                    let link = (
                        s(&query, "fromId"),
                        s(&query, "toId"),
                        s(&query, "heuristic"),
                    );
                    if !state.triggered.contains(&link) {
                        state.triggered.push(link);
                    }
                } else if text.contains("MERGE (s)-[e:") || text.contains("MERGE (s)-[:") {
                    let label = text
                        .split(['[', ']'])
                        .nth(1)
                        .unwrap_or_default()
                        .trim_start_matches("e:")
                        .trim_start_matches(':')
                        .to_string();
                    let edge = (s(&query, "fromUid"), s(&query, "toUid"), label);
                    if !state.typed.contains(&edge) {
                        state.typed.push(edge);
                    }
                } else if text.contains("RETURN e.data") {
                    // latest prior ChangeEvent payload for the detector
                    let uid = s(&query, "uid");
                    let before = i(&query, "before");
                    let prior = state
                        .changed
                        .iter()
                        .filter(|(from, _)| from == &uid)
                        .filter_map(|(_, id)| state.change_events.get(id))
                        .filter(|e| e.timestamp < before && !e.data.is_empty())
                        .max_by_key(|e| e.timestamp);
                    return Ok(QueryResult {
                        rows: prior
                            .map(|e| vec![vec![serde_json::Value::from(e.data.clone())]])
                            .unwrap_or_default(),
                        stats: QueryStats::default(),
                    });
                } else {
                    // remaining reads see an empty graph
                    return Ok(QueryResult::default());
                }
                Ok(QueryResult::default())
            }
        }

        impl SemanticStore {
            fn snapshot(&self) -> State {
                self.state.lock().clone()
            }
        }

        fn fixture() -> (Arc<SemanticStore>, Pipeline) {
            let store = Arc::new(SemanticStore::default());
            let config = IngestorConfig::default();
            let metrics = Arc::new(IngestMetrics::new(&opentelemetry::global::meter("test")));
            let pipeline = Pipeline::new(
                store.clone(),
                ExtractorRegistry::with_defaults(),
                &config,
                metrics,
            );
            (store, pipeline)
        }

        fn raw(
            kind: &str,
            uid: &str,
            name: &str,
            event_type: EventType,
            ts_s: i64,
            data: serde_json::Value,
        ) -> RawEvent {
            RawEvent {
                id: format!("{uid}-{ts_s}"),
                timestamp: ts_s * 1_000_000_000,
                event_type,
                resource: ResourceMeta {
                    uid: uid.into(),
                    group: String::new(),
                    version: "v1".into(),
                    kind: kind.into(),
                    namespace: "default".into(),
                    name: name.into(),
                    involved_object_uid: None,
                },
                data,
            }
        }

        #[tokio::test]
        async fn deployment_rollout_builds_the_expected_graph() {
            let (store, pipeline) = fixture();
            let cancel = CancellationToken::new();

            let batch = EventBatch::new(
                0,
                vec![
                    raw(
                        "Deployment",
                        "dep-1",
                        "frontend",
                        EventType::Create,
                        0,
                        json!({"metadata": {"generation": 1}, "spec": {"replicas": 3}}),
                    ),
                    raw(
                        "ReplicaSet",
                        "rs-1",
                        "frontend-abc",
                        EventType::Create,
                        1,
                        json!({"metadata": {"ownerReferences": [
                            {"uid": "dep-1", "kind": "Deployment", "name": "frontend", "controller": true}
                        ]}}),
                    ),
                    raw(
                        "Pod",
                        "pod-1",
                        "frontend-abc-xyz",
                        EventType::Create,
                        2,
                        json!({"metadata": {"ownerReferences": [
                            {"uid": "rs-1", "kind": "ReplicaSet", "name": "frontend-abc", "controller": true}
                        ]}}),
                    ),
                    raw(
                        "Deployment",
                        "dep-1",
                        "frontend",
                        EventType::Update,
                        60,
                        json!({"metadata": {"generation": 2}, "spec": {"replicas": 3}}),
                    ),
                ],
            );
            pipeline.process_batch(&cancel, &batch).await.unwrap();

            let state = store.snapshot();
            assert_eq!(state.resources.len(), 3);
            assert_eq!(state.change_events.len(), 4);
            assert_eq!(state.changed.len(), 4);

            let owns: Vec<_> = state
                .typed
                .iter()
                .filter(|(_, _, label)| label == "OWNS")
                .collect();
            assert_eq!(owns.len(), 2);
            assert!(owns.contains(&&("dep-1".to_string(), "rs-1".to_string(), "OWNS".to_string())));
            assert!(owns.contains(&&("rs-1".to_string(), "pod-1".to_string(), "OWNS".to_string())));

            // the second deployment event saw its batch-local prior
            let rollout = &state.change_events["dep-1-60"];
            assert!(rollout.config_changed);
            assert!(!rollout.replicas_changed);

            assert_eq!(
                state.triggered,
                vec![(
                    "dep-1-60".to_string(),
                    "dep-1-0".to_string(),
                    "same-resource-transition".to_string()
                )]
            );
        }

        #[tokio::test]
        async fn delete_then_revive_restores_the_identity() {
            let (store, pipeline) = fixture();
            let cancel = CancellationToken::new();
            let up = |ts| raw("Pod", "p-1", "p", EventType::Create, ts, json!({"metadata": {}}));

            pipeline.process_event(&cancel, up(0)).await.unwrap();
            pipeline
                .process_event(
                    &cancel,
                    raw("Pod", "p-1", "p", EventType::Delete, 10, serde_json::Value::Null),
                )
                .await
                .unwrap();

            let gone = store.snapshot();
            assert!(gone.resources["p-1"].deleted);
            assert_eq!(gone.resources["p-1"].deleted_at, 10_000_000_000);

            pipeline.process_event(&cancel, up(20)).await.unwrap();

            let revived = store.snapshot();
            let resource = &revived.resources["p-1"];
            assert!(!resource.deleted);
            assert_eq!(resource.deleted_at, 0);
            assert_eq!(resource.first_seen, 0);
            assert_eq!(resource.last_seen, 20_000_000_000);
            assert_eq!(revived.change_events.len(), 3);
            assert_eq!(revived.changed.len(), 3);
        }

        #[tokio::test]
        async fn orphan_k8s_event_creates_a_placeholder() {
            let (store, pipeline) = fixture();
            let mut event = raw(
                "Event",
                "ev-1",
                "web-0.failed",
                EventType::Create,
                5,
                json!({
                    "reason": "FailedScheduling",
                    "message": "0/3 nodes available",
                    "type": "Warning",
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
            pipeline
                .process_event(&CancellationToken::new(), event)
                .await
                .unwrap();

            let state = store.snapshot();
            let placeholder = &state.resources["pod-u"];
            assert_eq!(placeholder.kind, "Pod");
            assert_eq!(placeholder.first_seen, 5_000_000_000);
            assert!(!placeholder.deleted);
            assert_eq!(state.k8s_events["ev-1-5"], "FailedScheduling");
            assert_eq!(
                state.emitted,
                vec![("pod-u".to_string(), "ev-1-5".to_string())]
            );
        }

        #[tokio::test]
        async fn cross_batch_prior_comes_from_the_graph() {
            let (store, pipeline) = fixture();
            let cancel = CancellationToken::new();

            pipeline
                .process_event(
                    &cancel,
                    raw(
                        "Deployment",
                        "dep-1",
                        "web",
                        EventType::Create,
                        0,
                        json!({"metadata": {"generation": 1}, "spec": {"replicas": 2}}),
                    ),
                )
                .await
                .unwrap();
            // separate batch: the batch-local cache is empty, so the prior
            // snapshot must come back out of the stored event payload
            pipeline
                .process_event(
                    &cancel,
                    raw(
                        "Deployment",
                        "dep-1",
                        "web",
                        EventType::Update,
                        30,
                        json!({"metadata": {"generation": 2}, "spec": {"replicas": 5}}),
                    ),
                )
                .await
                .unwrap();

            let update = &store.snapshot().change_events["dep-1-30"];
            assert!(update.config_changed);
            assert!(update.replicas_changed);
            assert!(!update.status_changed);
        }

        #[tokio::test]
        async fn reprocessing_leaves_the_graph_identical() {
            let (store, pipeline) = fixture();
            let cancel = CancellationToken::new();
            let batch = EventBatch::new(
                0,
                vec![
                    raw(
                        "Deployment",
                        "dep-1",
                        "web",
                        EventType::Create,
                        0,
                        json!({"metadata": {"generation": 1}}),
                    ),
                    raw(
                        "Deployment",
                        "dep-1",
                        "web",
                        EventType::Update,
                        1,
                        json!({"metadata": {"generation": 2}}),
                    ),
                ],
            );
            pipeline.process_batch(&cancel, &batch).await.unwrap();
            let first = store.snapshot();
            pipeline.process_batch(&cancel, &batch).await.unwrap();
            assert_eq!(store.snapshot(), first);
        }
    }
}
