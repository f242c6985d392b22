//! Pod placement edges: node assignment, PVC mounts, service account.
//!
//! Pods are a known core type, so the payload is deserialised into the
//! typed view instead of walking raw JSON; a payload that does not fit is
//! logged and contributes nothing.

use crate::error::Result;
use crate::lookup::ResourceLookup;
use crate::registry::Extractor;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, PodSpec};
use spectre_graph::schema::{Edge, EdgeKind, NodeRef};
use spectre_k8s_util::event::{EventType, RawEvent};
use spectre_k8s_util::parse;
use tracing::debug;

pub struct PodPlacementExtractor;

#[async_trait]
impl Extractor for PodPlacementExtractor {
    fn name(&self) -> &'static str {
        "pod-placement"
    }

    fn priority(&self) -> u16 {
        55
    }

    fn matches(&self, event: &RawEvent) -> bool {
        event.resource.kind == "Pod" && event.object().is_some()
    }

    async fn extract(
        &self,
        event: &RawEvent,
        lookup: &dyn ResourceLookup,
    ) -> Result<Vec<Edge>> {
        let pod: Pod = match serde_json::from_value(event.data.clone()) {
            Ok(pod) => pod,
            Err(error) => {
                debug!(msg = "pod payload not deserialisable", uid = %event.resource.uid, %error);
                return Ok(Vec::new());
            }
        };
        let Some(spec) = &pod.spec else {
            return Ok(Vec::new());
        };
        let pod_uid = &event.resource.uid;
        let namespace = &event.resource.namespace;
        let mut edges = Vec::new();

        if let Some(node_name) = &spec.node_name {
            // Node is cluster-scoped
            match lookup.find_by_namespace("", "Node", node_name).await? {
                Some(node) => edges.push(Edge {
                    from: NodeRef::resource(pod_uid.clone()),
                    to: NodeRef::resource(node.uid),
                    kind: EdgeKind::ScheduledOn {
                        scheduled_at: scheduled_at(event).unwrap_or(event.timestamp),
                        terminated_at: match event.event_type {
                            EventType::Delete => event.timestamp,
                            _ => 0,
                        },
                    },
                }),
                None => debug!(msg = "node not yet observed", node = %node_name),
            }
        }

        for volume in spec.volumes.iter().flatten() {
            let Some(claim) = &volume.persistent_volume_claim else {
                continue;
            };
            let Some(pvc) = lookup
                .find_by_namespace(namespace, "PersistentVolumeClaim", &claim.claim_name)
                .await?
            else {
                debug!(msg = "claim not yet observed", claim = %claim.claim_name);
                continue;
            };
            edges.push(Edge {
                from: NodeRef::resource(pod_uid.clone()),
                to: NodeRef::resource(pvc.uid),
                kind: EdgeKind::Mounts {
                    mount_path: mount_path(spec, &volume.name).unwrap_or_default(),
                    volume_name: volume.name.clone(),
                },
            });
        }

        if let Some(sa_name) = &spec.service_account_name {
            if let Some(account) = lookup
                .find_by_namespace(namespace, "ServiceAccount", sa_name)
                .await?
            {
                edges.push(Edge {
                    from: NodeRef::resource(pod_uid.clone()),
                    to: NodeRef::resource(account.uid),
                    kind: EdgeKind::UsesServiceAccount,
                });
            }
        }

        Ok(edges)
    }
}

/// `scheduledAt` from the PodScheduled condition transition time.
fn scheduled_at(event: &RawEvent) -> Option<i64> {
    let condition = parse::condition(&event.data, "PodScheduled")?;
    parse::str_field(condition, &["lastTransitionTime"]).and_then(parse::rfc3339_to_ns)
}

/// First container mount of the named volume.
fn mount_path(spec: &PodSpec, volume_name: &str) -> Option<String> {
    spec.containers
        .iter()
        .filter_map(|c| c.volume_mounts.as_ref())
        .flatten()
        .find(|m| m.name == volume_name)
        .map(|m| m.mount_path.clone())
}
