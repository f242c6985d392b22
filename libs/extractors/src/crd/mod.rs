pub mod argocd;
pub mod certmanager;
pub mod externalsecrets;
pub mod flux;
pub mod gateway;
pub mod rbac;

use crate::error::Result;
use crate::lookup::ResourceLookup;

use spectre_graph::schema::{Edge, EdgeKind, NodeRef};

/// Build a REFERENCES_SPEC edge, resolving the target uid when the resource
/// is already known and leaving it empty (dangling) otherwise.
pub(crate) async fn spec_reference(
    lookup: &dyn ResourceLookup,
    from_uid: &str,
    field_path: String,
    ref_kind: &str,
    ref_name: &str,
    ref_namespace: &str,
) -> Result<Edge> {
    let target = lookup
        .find_by_namespace(ref_namespace, ref_kind, ref_name)
        .await?;
    Ok(Edge {
        from: NodeRef::resource(from_uid.to_string()),
        to: NodeRef::resource(target.map(|t| t.uid).unwrap_or_default()),
        kind: EdgeKind::ReferencesSpec {
            field_path,
            ref_kind: ref_kind.to_string(),
            ref_name: ref_name.to_string(),
            ref_namespace: ref_namespace.to_string(),
        },
    })
}
