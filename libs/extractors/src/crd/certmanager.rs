//! cert-manager Certificate references: issuer and target secret.

use crate::crd::spec_reference;
use crate::error::Result;
use crate::lookup::ResourceLookup;
use crate::registry::Extractor;

use async_trait::async_trait;
use spectre_graph::schema::Edge;
use spectre_k8s_util::event::RawEvent;
use spectre_k8s_util::parse;

pub struct CertificateExtractor;

#[async_trait]
impl Extractor for CertificateExtractor {
    fn name(&self) -> &'static str {
        "cert-manager"
    }

    fn priority(&self) -> u16 {
        140
    }

    fn matches(&self, event: &RawEvent) -> bool {
        event.resource.kind == "Certificate"
            && event.resource.group == "cert-manager.io"
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

        if let Some(issuer) = parse::str_field(object, &["spec", "issuerRef", "name"]) {
            let kind = parse::str_field(object, &["spec", "issuerRef", "kind"]).unwrap_or("Issuer");
            // ClusterIssuer is cluster-scoped
            let ref_ns = if kind == "ClusterIssuer" { "" } else { namespace };
            edges.push(
                spec_reference(lookup, uid, "spec.issuerRef".into(), kind, issuer, ref_ns).await?,
            );
        }
        if let Some(secret) = parse::str_field(object, &["spec", "secretName"]) {
            edges.push(
                spec_reference(lookup, uid, "spec.secretName".into(), "Secret", secret, namespace)
                    .await?,
            );
        }
        Ok(edges)
    }
}
