//! Argo CD Application edges: tracked resources and the project reference.

use crate::crd::spec_reference;
use crate::error::Result;
use crate::lookup::ResourceLookup;
use crate::registry::Extractor;

use async_trait::async_trait;
use spectre_graph::schema::{Edge, EdgeKind, Evidence, NodeRef, ValidationState};
use spectre_k8s_util::event::RawEvent;
use spectre_k8s_util::parse;

/// Argo's default resource tracking label.
const TRACKING_LABEL: &str = "app.kubernetes.io/instance";

const CANDIDATE_LIMIT: i64 = 500;

pub struct ArgoApplicationExtractor;

#[async_trait]
impl Extractor for ArgoApplicationExtractor {
    fn name(&self) -> &'static str {
        "argocd-application"
    }

    fn priority(&self) -> u16 {
        120
    }

    fn matches(&self, event: &RawEvent) -> bool {
        event.resource.kind == "Application"
            && event.resource.group == "argoproj.io"
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
        let mut edges = Vec::new();

        if let Some(project) = parse::str_field(object, &["spec", "project"]) {
            edges.push(
                spec_reference(
                    lookup,
                    uid,
                    "spec.project".into(),
                    "AppProject",
                    project,
                    &event.resource.namespace,
                )
                .await?,
            );
        }

        let Some(destination_ns) =
            parse::str_field(object, &["spec", "destination", "namespace"])
        else {
            return Ok(edges);
        };
        let candidates = lookup
            .resources_in_namespace(destination_ns, uid, CANDIDATE_LIMIT)
            .await?;
        for candidate in candidates {
            if candidate
                .labels
                .get(TRACKING_LABEL)
                .is_none_or(|v| v != &event.resource.name)
            {
                continue;
            }
            edges.push(Edge {
                from: NodeRef::resource(uid.clone()),
                to: NodeRef::resource(candidate.uid),
                kind: EdgeKind::Manages {
                    confidence: 1.0,
                    evidence: vec![Evidence {
                        evidence_type: "label".into(),
                        value: format!("{TRACKING_LABEL}={}", event.resource.name),
                        weight: 1.0,
                        timestamp: event.timestamp,
                    }],
                    first_observed: event.timestamp,
                    last_validated: event.timestamp,
                    validation_state: ValidationState::Valid,
                },
            });
        }
        Ok(edges)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{event_for, labelled, resource, MockLookup};

    use serde_json::json;

    #[tokio::test]
    async fn tracks_labelled_destination_resources() {
        let lookup = MockLookup::default()
            .with_resource(labelled(
                resource("dep-1", "Deployment", "prod", "app-web"),
                &[(TRACKING_LABEL, "app")],
            ))
            .with_resource(resource("dep-2", "Deployment", "prod", "other"));
        let mut event = event_for(
            "Application",
            "argocd",
            "app",
            "app-1",
            json!({"spec": {"project": "default", "destination": {"namespace": "prod"}}}),
        );
        event.resource.group = "argoproj.io".into();

        let edges = ArgoApplicationExtractor.extract(&event, &lookup).await.unwrap();
        assert_eq!(edges.len(), 2);
        assert!(matches!(edges[0].kind, EdgeKind::ReferencesSpec { .. }));
        match &edges[1].kind {
            EdgeKind::Manages { confidence, .. } => assert_eq!(*confidence, 1.0),
            other => panic!("expected MANAGES, got {other:?}"),
        }
        assert_eq!(edges[1].to, NodeRef::resource("dep-1"));
    }
}
