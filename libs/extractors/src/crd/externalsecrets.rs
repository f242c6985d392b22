//! External Secrets references: backing store and target secret.

use crate::crd::spec_reference;
use crate::error::Result;
use crate::lookup::ResourceLookup;
use crate::registry::Extractor;

use async_trait::async_trait;
use spectre_graph::schema::Edge;
use spectre_k8s_util::event::RawEvent;
use spectre_k8s_util::parse;

pub struct ExternalSecretExtractor;

#[async_trait]
impl Extractor for ExternalSecretExtractor {
    fn name(&self) -> &'static str {
        "external-secrets"
    }

    fn priority(&self) -> u16 {
        150
    }

    fn matches(&self, event: &RawEvent) -> bool {
        event.resource.kind == "ExternalSecret"
            && event.resource.group == "external-secrets.io"
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
        let uid = &event.resource.uid;
        let namespace = &event.resource.namespace;
        let mut edges = Vec::new();

        if let Some(store) = parse::str_field(object, &["spec", "secretStoreRef", "name"]) {
            let kind = parse::str_field(object, &["spec", "secretStoreRef", "kind"])
                .unwrap_or("SecretStore");
            let ref_ns = if kind == "ClusterSecretStore" { "" } else { namespace };
            edges.push(
                spec_reference(lookup, uid, "spec.secretStoreRef".into(), kind, store, ref_ns)
                    .await?,
            );
        }
        // target secret defaults to the ExternalSecret's own name
        let target = parse::str_field(object, &["spec", "target", "name"])
            .unwrap_or(event.resource.name.as_str());
        edges.push(
            spec_reference(lookup, uid, "spec.target.name".into(), "Secret", target, namespace)
                .await?,
        );
        Ok(edges)
    }
}
