//! OWNS edges from native ownerReferences.

use crate::error::Result;
use crate::lookup::ResourceLookup;
use crate::registry::Extractor;

use async_trait::async_trait;
use spectre_graph::schema::{Edge, EdgeKind, NodeRef};
use spectre_k8s_util::event::RawEvent;
use spectre_k8s_util::parse;

pub struct OwnerReferenceExtractor;

#[async_trait]
impl Extractor for OwnerReferenceExtractor {
    fn name(&self) -> &'static str {
        "owner-references"
    }

    fn priority(&self) -> u16 {
        50
    }

    fn matches(&self, event: &RawEvent) -> bool {
        event
            .object()
            .is_some_and(|obj| !parse::owner_references(obj).is_empty())
    }

    async fn extract(
        &self,
        event: &RawEvent,
        _lookup: &dyn ResourceLookup,
    ) -> Result<Vec<Edge>> {
        // owner uid comes straight off the reference; no resolution needed
        let Some(object) = event.object() else {
            return Ok(Vec::new());
        };
        Ok(parse::owner_references(object)
            .into_iter()
            .map(|owner| Edge {
                from: NodeRef::resource(owner.uid),
                to: NodeRef::resource(event.resource.uid.clone()),
                kind: EdgeKind::Owns {
                    controller: owner.controller,
                    block_owner_deletion: owner.block_owner_deletion,
                },
            })
            .collect())
    }
}
