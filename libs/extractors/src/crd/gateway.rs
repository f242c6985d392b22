//! Gateway API references: Gateway TLS certificates and class, HTTPRoute
//! parents and backends.

use crate::crd::spec_reference;
use crate::error::Result;
use crate::lookup::ResourceLookup;
use crate::registry::Extractor;

use async_trait::async_trait;
use serde_json::Value;
use spectre_graph::schema::Edge;
use spectre_k8s_util::event::RawEvent;
use spectre_k8s_util::parse;

pub struct GatewayExtractor;

#[async_trait]
impl Extractor for GatewayExtractor {
    fn name(&self) -> &'static str {
        "gateway-api"
    }

    fn priority(&self) -> u16 {
        130
    }

    fn matches(&self, event: &RawEvent) -> bool {
        matches!(event.resource.kind.as_str(), "Gateway" | "HTTPRoute")
            && event.resource.group == "gateway.networking.k8s.io"
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
        match event.resource.kind.as_str() {
            "Gateway" => gateway_edges(event, object, lookup).await,
            _ => route_edges(event, object, lookup).await,
        }
    }
}

async fn gateway_edges(
    event: &RawEvent,
    object: &Value,
    lookup: &dyn ResourceLookup,
) -> Result<Vec<Edge>> {
    let uid = &event.resource.uid;
    let namespace = &event.resource.namespace;
    let mut edges = Vec::new();

    if let Some(class) = parse::str_field(object, &["spec", "gatewayClassName"]) {
        edges.push(
            spec_reference(
                lookup,
                uid,
                "spec.gatewayClassName".into(),
                "GatewayClass",
                class,
                "",
            )
            .await?,
        );
    }
    if let Some(listeners) = parse::field(object, &["spec", "listeners"]).and_then(Value::as_array)
    {
        for (i, listener) in listeners.iter().enumerate() {
            let Some(refs) =
                parse::field(listener, &["tls", "certificateRefs"]).and_then(Value::as_array)
            else {
                continue;
            };
            for (j, cert_ref) in refs.iter().enumerate() {
                let Some(name) = parse::str_field(cert_ref, &["name"]) else {
                    continue;
                };
                let ref_ns = parse::str_field(cert_ref, &["namespace"]).unwrap_or(namespace);
                edges.push(
                    spec_reference(
                        lookup,
                        uid,
                        format!("spec.listeners[{i}].tls.certificateRefs[{j}]"),
                        "Secret",
                        name,
                        ref_ns,
                    )
                    .await?,
                );
            }
        }
    }
    Ok(edges)
}

async fn route_edges(
    event: &RawEvent,
    object: &Value,
    lookup: &dyn ResourceLookup,
) -> Result<Vec<Edge>> {
    let uid = &event.resource.uid;
    let namespace = &event.resource.namespace;
    let mut edges = Vec::new();

    if let Some(parents) = parse::field(object, &["spec", "parentRefs"]).and_then(Value::as_array) {
        for (i, parent) in parents.iter().enumerate() {
            let Some(name) = parse::str_field(parent, &["name"]) else {
                continue;
            };
            let kind = parse::str_field(parent, &["kind"]).unwrap_or("Gateway");
            let ref_ns = parse::str_field(parent, &["namespace"]).unwrap_or(namespace);
            edges.push(
                spec_reference(
                    lookup,
                    uid,
                    format!("spec.parentRefs[{i}]"),
                    kind,
                    name,
                    ref_ns,
                )
                .await?,
            );
        }
    }
    if let Some(rules) = parse::field(object, &["spec", "rules"]).and_then(Value::as_array) {
        for (i, rule) in rules.iter().enumerate() {
            let Some(backends) = parse::field(rule, &["backendRefs"]).and_then(Value::as_array)
            else {
                continue;
            };
            for (j, backend) in backends.iter().enumerate() {
                let Some(name) = parse::str_field(backend, &["name"]) else {
                    continue;
                };
                let kind = parse::str_field(backend, &["kind"]).unwrap_or("Service");
                let ref_ns = parse::str_field(backend, &["namespace"]).unwrap_or(namespace);
                edges.push(
                    spec_reference(
                        lookup,
                        uid,
                        format!("spec.rules[{i}].backendRefs[{j}]"),
                        kind,
                        name,
                        ref_ns,
                    )
                    .await?,
                );
            }
        }
    }
    Ok(edges)
}
