//! Flux CD extractors: source references for GitRepository and
//! Kustomization, and the HelmRelease management inference.

use crate::crd::spec_reference;
use crate::error::Result;
use crate::lookup::{EventRef, ResourceLookup, ResourceRef};
use crate::registry::Extractor;

use async_trait::async_trait;
use serde_json::Value;
use spectre_graph::schema::{Edge, EdgeKind, Evidence, NodeRef, ValidationState};
use spectre_k8s_util::event::RawEvent;
use spectre_k8s_util::parse;

const LABEL_NAME: &str = "helm.toolkit.fluxcd.io/name";
const LABEL_NAMESPACE: &str = "helm.toolkit.fluxcd.io/namespace";

/// Weighted evidence pieces for the non-label scoring path.
const WEIGHT_NAME_PREFIX: f64 = 0.4;
const WEIGHT_NAMESPACE: f64 = 0.1;
const WEIGHT_TEMPORAL: f64 = 0.3;
const WEIGHT_CORRELATION: f64 = 0.2;

const TEMPORAL_WINDOW_NS: i64 = 30 * 1_000_000_000;
const CORRELATION_WINDOW_NS: i64 = 60 * 1_000_000_000;
/// How far back reconcile events of the release are fetched.
const RECONCILE_LOOKBACK_NS: i64 = 10 * 60 * 1_000_000_000;

const MIN_CONFIDENCE: f64 = 0.5;

/// Source references for GitRepository and Kustomization objects.
pub struct FluxSourceExtractor;

#[async_trait]
impl Extractor for FluxSourceExtractor {
    fn name(&self) -> &'static str {
        "flux-sources"
    }

    fn priority(&self) -> u16 {
        110
    }

    fn matches(&self, event: &RawEvent) -> bool {
        matches!(
            event.resource.kind.as_str(),
            "GitRepository" | "Kustomization"
        ) && event.object().is_some()
    }

    async fn extract(
        &self,
        event: &RawEvent,
        lookup: &dyn ResourceLookup,
    ) -> Result<Vec<Edge>> {
        let Some(object) = event.object() else {
            return Ok(Vec::new());
        };
        let uid = &event.resource.uid;
        let namespace = &event.resource.namespace;
        let mut edges = Vec::new();

        if let Some(secret) = parse::str_field(object, &["spec", "secretRef", "name"]) {
            edges.push(
                spec_reference(lookup, uid, "spec.secretRef".into(), "Secret", secret, namespace)
                    .await?,
            );
        }
        if let Some(name) = parse::str_field(object, &["spec", "sourceRef", "name"]) {
            let kind = parse::str_field(object, &["spec", "sourceRef", "kind"])
                .unwrap_or("GitRepository");
            let ref_ns =
                parse::str_field(object, &["spec", "sourceRef", "namespace"]).unwrap_or(namespace);
            edges.push(
                spec_reference(lookup, uid, "spec.sourceRef".into(), kind, name, ref_ns).await?,
            );
        }
        if let Some(secret) = parse::str_field(object, &["spec", "kubeConfig", "secretRef", "name"])
        {
            edges.push(
                spec_reference(
                    lookup,
                    uid,
                    "spec.kubeConfig.secretRef".into(),
                    "Secret",
                    secret,
                    namespace,
                )
                .await?,
            );
        }
        Ok(edges)
    }
}

/// HelmRelease extractor: declared references plus inferred MANAGES edges
/// over candidates in the target namespace.
pub struct HelmReleaseExtractor {
    pub candidate_limit: i64,
}

impl Default for HelmReleaseExtractor {
    fn default() -> Self {
        Self {
            candidate_limit: 500,
        }
    }
}

#[async_trait]
impl Extractor for HelmReleaseExtractor {
    fn name(&self) -> &'static str {
        "helm-release"
    }

    fn priority(&self) -> u16 {
        111
    }

    fn matches(&self, event: &RawEvent) -> bool {
        event.resource.kind == "HelmRelease" && event.object().is_some()
    }

    async fn extract(
        &self,
        event: &RawEvent,
        lookup: &dyn ResourceLookup,
    ) -> Result<Vec<Edge>> {
        let Some(object) = event.object() else {
            return Ok(Vec::new());
        };
        let uid = &event.resource.uid;
        let namespace = &event.resource.namespace;
        let mut edges = Vec::new();

        // declared references, dangling targets allowed
        if let Some(values) = parse::field(object, &["spec", "valuesFrom"]).and_then(Value::as_array)
        {
            for (i, value_ref) in values.iter().enumerate() {
                let Some(name) = parse::str_field(value_ref, &["name"]) else {
                    continue;
                };
                let kind = parse::str_field(value_ref, &["kind"]).unwrap_or("ConfigMap");
                edges.push(
                    spec_reference(
                        lookup,
                        uid,
                        format!("spec.valuesFrom[{i}]"),
                        kind,
                        name,
                        namespace,
                    )
                    .await?,
                );
            }
        }
        if let Some(name) = parse::str_field(object, &["spec", "chart", "spec", "sourceRef", "name"])
        {
            let kind = parse::str_field(object, &["spec", "chart", "spec", "sourceRef", "kind"])
                .unwrap_or("HelmRepository");
            let ref_ns = parse::str_field(object, &["spec", "chart", "spec", "sourceRef", "namespace"])
                .unwrap_or(namespace);
            edges.push(
                spec_reference(
                    lookup,
                    uid,
                    "spec.chart.spec.sourceRef".into(),
                    kind,
                    name,
                    ref_ns,
                )
                .await?,
            );
        }
        if let Some(secret) = parse::str_field(object, &["spec", "kubeConfig", "secretRef", "name"])
        {
            edges.push(
                spec_reference(
                    lookup,
                    uid,
                    "spec.kubeConfig.secretRef".into(),
                    "Secret",
                    secret,
                    namespace,
                )
                .await?,
            );
        }

        // inferred management over namespace candidates
        let release = parse::str_field(object, &["spec", "releaseName"])
            .unwrap_or(event.resource.name.as_str());
        let target_namespace = parse::str_field(object, &["spec", "targetNamespace"])
            .unwrap_or(namespace.as_str());
        let candidates = lookup
            .resources_in_namespace(target_namespace, uid, self.candidate_limit)
            .await?;
        let reconciles = lookup.recent_events(uid, RECONCILE_LOOKBACK_NS).await?;

        for candidate in candidates {
            let Some((confidence, evidence)) =
                score_candidate(release, namespace, target_namespace, &candidate, &reconciles, event.timestamp)
            else {
                continue;
            };
            edges.push(Edge {
                from: NodeRef::resource(uid.clone()),
                to: NodeRef::resource(candidate.uid),
                kind: EdgeKind::Manages {
                    confidence,
                    evidence,
                    first_observed: event.timestamp,
                    last_validated: event.timestamp,
                    validation_state: ValidationState::Valid,
                },
            });
        }
        Ok(edges)
    }
}

/// Score one candidate. Returns None below the confidence floor.
///
/// Both Flux labels matching is definitive. Otherwise each evidence piece
/// contributes its weight to `attempted` when it could be evaluated and to
/// `earned` when it held; the confidence is earned/attempted, which stays in
/// [0, 1] regardless of which pieces were testable.
fn score_candidate(
    release: &str,
    release_namespace: &str,
    target_namespace: &str,
    candidate: &ResourceRef,
    reconciles: &[EventRef],
    now_ns: i64,
) -> Option<(f64, Vec<Evidence>)> {
    let name_label = candidate.labels.get(LABEL_NAME);
    let namespace_label = candidate.labels.get(LABEL_NAMESPACE);
    if name_label.is_some_and(|v| v == release)
        && namespace_label.is_some_and(|v| v == release_namespace)
    {
        return Some((
            1.0,
            vec![Evidence {
                evidence_type: "label".into(),
                value: format!("{LABEL_NAME}={release}"),
                weight: 1.0,
                timestamp: now_ns,
            }],
        ));
    }

    let mut attempted = 0.0;
    let mut earned = 0.0;
    let mut evidence = Vec::new();

    attempted += WEIGHT_NAME_PREFIX;
    let prefixed = candidate.name.starts_with(release)
        || candidate.labels.values().any(|v| v.starts_with(release));
    if prefixed {
        earned += WEIGHT_NAME_PREFIX;
        evidence.push(Evidence {
            evidence_type: "name-prefix".into(),
            value: candidate.name.clone(),
            weight: WEIGHT_NAME_PREFIX,
            timestamp: now_ns,
        });
    }

    attempted += WEIGHT_NAMESPACE;
    if candidate.namespace == target_namespace {
        earned += WEIGHT_NAMESPACE;
        evidence.push(Evidence {
            evidence_type: "namespace".into(),
            value: candidate.namespace.clone(),
            weight: WEIGHT_NAMESPACE,
            timestamp: now_ns,
        });
    }

    if !reconciles.is_empty() {
        let nearest = reconciles
            .iter()
            .map(|e| (candidate.first_seen - e.timestamp).abs())
            .min()
            .unwrap_or(i64::MAX);

        attempted += WEIGHT_TEMPORAL;
        if nearest <= TEMPORAL_WINDOW_NS {
            let scale = 1.0 - nearest as f64 / TEMPORAL_WINDOW_NS as f64;
            let weight = WEIGHT_TEMPORAL * scale;
            earned += weight;
            evidence.push(Evidence {
                evidence_type: "temporal".into(),
                value: format!("created {}ms after reconcile", nearest / 1_000_000),
                weight,
                timestamp: now_ns,
            });
        }

        attempted += WEIGHT_CORRELATION;
        if nearest <= CORRELATION_WINDOW_NS {
            earned += WEIGHT_CORRELATION;
            evidence.push(Evidence {
                evidence_type: "correlation".into(),
                value: format!("reconcile within {}s", CORRELATION_WINDOW_NS / 1_000_000_000),
                weight: WEIGHT_CORRELATION,
                timestamp: now_ns,
            });
        }
    }

    let confidence = if attempted > 0.0 { earned / attempted } else { 0.0 };
    (confidence >= MIN_CONFIDENCE).then_some((confidence, evidence))
}
