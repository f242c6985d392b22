//! Field access over untyped object JSON.
//!
//! Extractors and the change detector work on whatever the producer watched,
//! including CRDs with no typed binding, so most lookups go through these
//! path helpers instead of deserialising into k8s-openapi structs.

use std::collections::BTreeMap;

use chrono::DateTime;
use serde_json::Value;

/// Walk `path` through nested objects.
pub fn field<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, key| current.as_object()?.get(*key))
}

pub fn str_field<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    field(value, path).and_then(Value::as_str)
}

pub fn i64_field(value: &Value, path: &[&str]) -> Option<i64> {
    field(value, path).and_then(Value::as_i64)
}

/// A `string → string` mapping at `path`; non-string values are skipped.
pub fn string_map(value: &Value, path: &[&str]) -> BTreeMap<String, String> {
    field(value, path)
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Label-selector intersection: every selector entry must be present with an
/// equal value. An empty selector selects nothing (a Service without a
/// selector is backed by manual Endpoints, not by every pod in the
/// namespace).
pub fn selector_matches(
    selector: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> bool {
    !selector.is_empty()
        && selector
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|label| label == v))
}

/// RFC 3339 timestamp to nanoseconds since the Unix epoch.
pub fn rfc3339_to_ns(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .and_then(|ts| ts.timestamp_nanos_opt())
}

/// `metadata.ownerReferences`, as (uid, kind, name, controller, blockOwnerDeletion).
pub fn owner_references(value: &Value) -> Vec<OwnerRef> {
    field(value, &["metadata", "ownerReferences"])
        .and_then(Value::as_array)
        .map(|refs| {
            refs.iter()
                .filter_map(|r| {
                    Some(OwnerRef {
                        uid: r.get("uid")?.as_str()?.to_string(),
                        kind: str_field(r, &["kind"]).unwrap_or_default().to_string(),
                        name: str_field(r, &["name"]).unwrap_or_default().to_string(),
                        controller: field(r, &["controller"])
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                        block_owner_deletion: field(r, &["blockOwnerDeletion"])
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerRef {
    pub uid: String,
    pub kind: String,
    pub name: String,
    pub controller: bool,
    pub block_owner_deletion: bool,
}

/// The `status.conditions` entry with the given type, if any.
pub fn condition<'a>(value: &'a Value, type_: &str) -> Option<&'a Value> {
    field(value, &["status", "conditions"])
        .and_then(Value::as_array)?
        .iter()
        .find(|c| str_field(c, &["type"]) == Some(type_))
}
