//! SELECTS edges from label selectors, plus Ingress backend references.
//!
//! Matching is exact label intersection, namespace-scoped: every selector
//! entry must be present on the candidate pod with an equal value.

use crate::error::Result;
use crate::lookup::ResourceLookup;
use crate::registry::Extractor;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use spectre_graph::schema::{Edge, EdgeKind, NodeRef};
use spectre_k8s_util::event::RawEvent;
use spectre_k8s_util::parse;

/// Upper bound on pods considered per selector evaluation.
const CANDIDATE_LIMIT: i64 = 500;

const WORKLOAD_KINDS: [&str; 4] = ["Deployment", "ReplicaSet", "StatefulSet", "DaemonSet"];

pub struct SelectorExtractor;

#[async_trait]
impl Extractor for SelectorExtractor {
    fn name(&self) -> &'static str {
        "label-selectors"
    }

    fn priority(&self) -> u16 {
        60
    }

    fn matches(&self, event: &RawEvent) -> bool {
        (event.resource.kind == "Service" || WORKLOAD_KINDS.contains(&event.resource.kind.as_str()))
            && event.object().is_some()
    }

    async fn extract(
        &self,
        event: &RawEvent,
        lookup: &dyn ResourceLookup,
    ) -> Result<Vec<Edge>> {
        let Some(object) = event.object() else {
            return Ok(Vec::new());
        };
        let selector = if event.resource.kind == "Service" {
            parse::string_map(object, &["spec", "selector"])
        } else {
            parse::string_map(object, &["spec", "selector", "matchLabels"])
        };
        if selector.is_empty() {
            return Ok(Vec::new());
        }
        select_pods(event, lookup, selector).await
    }
}

pub struct NetworkPolicyExtractor;

#[async_trait]
impl Extractor for NetworkPolicyExtractor {
    fn name(&self) -> &'static str {
        "network-policy"
    }

    fn priority(&self) -> u16 {
        70
    }

    fn matches(&self, event: &RawEvent) -> bool {
        event.resource.kind == "NetworkPolicy" && event.object().is_some()
    }

    async fn extract(
        &self,
        event: &RawEvent,
        lookup: &dyn ResourceLookup,
    ) -> Result<Vec<Edge>> {
        let Some(object) = event.object() else {
            return Ok(Vec::new());
        };
        let selector = parse::string_map(object, &["spec", "podSelector", "matchLabels"]);
        if selector.is_empty() {
            return Ok(Vec::new());
        }
        select_pods(event, lookup, selector).await
    }
}

async fn select_pods(
    event: &RawEvent,
    lookup: &dyn ResourceLookup,
    selector: BTreeMap<String, String>,
) -> Result<Vec<Edge>> {
    let candidates = lookup
        .resources_in_namespace(&event.resource.namespace, &event.resource.uid, CANDIDATE_LIMIT)
        .await?;
    Ok(candidates
        .into_iter()
        .filter(|r| r.kind == "Pod" && parse::selector_matches(&selector, &r.labels))
        .map(|pod| Edge {
            from: NodeRef::resource(event.resource.uid.clone()),
            to: NodeRef::resource(pod.uid),
            kind: EdgeKind::Selects {
                selector_labels: selector.clone(),
            },
        })
        .collect())
}

/// Ingress backends are typed spec references to Services.
pub struct IngressBackendExtractor;

#[async_trait]
impl Extractor for IngressBackendExtractor {
    fn name(&self) -> &'static str {
        "ingress-backends"
    }

    fn priority(&self) -> u16 {
        65
    }

    fn matches(&self, event: &RawEvent) -> bool {
        event.resource.kind == "Ingress" && event.object().is_some()
    }

    async fn extract(
        &self,
        event: &RawEvent,
        lookup: &dyn ResourceLookup,
    ) -> Result<Vec<Edge>> {
        let Some(object) = event.object() else {
            return Ok(Vec::new());
        };
        let namespace = &event.resource.namespace;
        let mut edges = Vec::new();

        let mut backends: Vec<(String, String)> = Vec::new();
        if let Some(name) =
            parse::str_field(object, &["spec", "defaultBackend", "service", "name"])
        {
            backends.push(("spec.defaultBackend.service".to_string(), name.to_string()));
        }
        if let Some(rules) = parse::field(object, &["spec", "rules"]).and_then(Value::as_array) {
            for (i, rule) in rules.iter().enumerate() {
                let Some(paths) = parse::field(rule, &["http", "paths"]).and_then(Value::as_array)
                else {
                    continue;
                };
                for (j, path) in paths.iter().enumerate() {
                    if let Some(name) = parse::str_field(path, &["backend", "service", "name"]) {
                        backends.push((
                            format!("spec.rules[{i}].http.paths[{j}].backend.service"),
                            name.to_string(),
                        ));
                    }
                }
            }
        }

        for (field_path, service_name) in backends {
            let target = lookup
                .find_by_namespace(namespace, "Service", &service_name)
                .await?;
            edges.push(Edge {
                from: NodeRef::resource(event.resource.uid.clone()),
                to: NodeRef::resource(target.map(|t| t.uid).unwrap_or_default()),
                kind: EdgeKind::ReferencesSpec {
                    field_path,
                    ref_kind: "Service".to_string(),
                    ref_name: service_name,
                    ref_namespace: namespace.clone(),
                },
            });
        }
        Ok(edges)
    }
}
