//! RBAC edges: bindings to roles and roles to their subjects.

use crate::error::Result;
use crate::lookup::ResourceLookup;
use crate::registry::Extractor;

use async_trait::async_trait;
use serde_json::Value;
use spectre_graph::schema::{Edge, EdgeKind, NodeRef};
use spectre_k8s_util::event::RawEvent;
use spectre_k8s_util::parse;

pub struct RbacExtractor;

#[async_trait]
impl Extractor for RbacExtractor {
    fn name(&self) -> &'static str {
        "rbac"
    }

    fn priority(&self) -> u16 {
        100
    }

    fn matches(&self, event: &RawEvent) -> bool {
        matches!(
            event.resource.kind.as_str(),
            "RoleBinding" | "ClusterRoleBinding"
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
        let mut edges = Vec::new();

        let role_kind = parse::str_field(object, &["roleRef", "kind"]).unwrap_or("Role");
        let role_namespace = if role_kind == "ClusterRole" {
            ""
        } else {
            event.resource.namespace.as_str()
        };
        let Some(role_name) = parse::str_field(object, &["roleRef", "name"]) else {
            return Ok(Vec::new());
        };
        let role = lookup
            .find_by_namespace(role_namespace, role_kind, role_name)
            .await?;

        if let Some(role) = &role {
            edges.push(Edge {
                from: NodeRef::resource(event.resource.uid.clone()),
                to: NodeRef::resource(role.uid.clone()),
                kind: EdgeKind::BindsRole {
                    role_kind: role_kind.to_string(),
                    api_group: parse::str_field(object, &["roleRef", "apiGroup"])
                        .unwrap_or_default()
                        .to_string(),
                },
            });
        }

        // only ServiceAccount subjects are resources we can point at
        let subjects = parse::field(object, &["subjects"])
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for subject in &subjects {
            let kind = parse::str_field(subject, &["kind"]).unwrap_or_default();
            let Some(name) = parse::str_field(subject, &["name"]) else {
                continue;
            };
            let namespace = parse::str_field(subject, &["namespace"])
                .unwrap_or(event.resource.namespace.as_str());
            if kind != "ServiceAccount" {
                continue;
            }
            let (Some(role), Some(account)) = (
                &role,
                lookup
                    .find_by_namespace(namespace, "ServiceAccount", name)
                    .await?,
            ) else {
                continue;
            };
            edges.push(Edge {
                from: NodeRef::resource(role.uid.clone()),
                to: NodeRef::resource(account.uid),
                kind: EdgeKind::GrantsTo {
                    subject_kind: kind.to_string(),
                    subject_name: name.to_string(),
                    subject_namespace: namespace.to_string(),
                },
            });
        }
        Ok(edges)
    }
}
