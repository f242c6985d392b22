//! Status inference from parsed object state.
//!
//! A closed deterministic mapping: per-kind rules for Pods, workload
//! controllers and Nodes, a Ready-condition fallback for everything else.
//! DELETE events always map to Terminating.

use serde_json::Value;
use spectre_graph::schema::ResourceStatus;
use spectre_k8s_util::event::{EventType, RawEvent};
use spectre_k8s_util::parse;

/// Container waiting reasons that indicate a hard failure.
const ERROR_REASONS: [&str; 6] = [
    "CrashLoopBackOff",
    "ErrImagePull",
    "ImagePullBackOff",
    "CreateContainerError",
    "CreateContainerConfigError",
    "OOMKilled",
];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InferredStatus {
    pub status: ResourceStatus,
    pub error_message: String,
    pub container_issues: Vec<String>,
}

pub fn infer(event: &RawEvent) -> InferredStatus {
    if event.event_type == EventType::Delete {
        return InferredStatus {
            status: ResourceStatus::Terminating,
            ..Default::default()
        };
    }
    let Some(object) = event.object() else {
        return InferredStatus::default();
    };
    if parse::str_field(object, &["metadata", "deletionTimestamp"]).is_some() {
        return InferredStatus {
            status: ResourceStatus::Terminating,
            ..Default::default()
        };
    }
    match event.resource.kind.as_str() {
        "Pod" => pod_status(object),
        "Deployment" | "StatefulSet" => replica_status(
            parse::i64_field(object, &["spec", "replicas"]).unwrap_or(1),
            parse::i64_field(object, &["status", "readyReplicas"]).unwrap_or(0),
        ),
        "DaemonSet" => replica_status(
            parse::i64_field(object, &["status", "desiredNumberScheduled"]).unwrap_or(0),
            parse::i64_field(object, &["status", "numberReady"]).unwrap_or(0),
        ),
        "Node" => node_status(object),
        _ => generic_status(object),
    }
}

/// Impact score in [0, 1] from the inferred state.
pub fn impact_score(inferred: &InferredStatus) -> f64 {
    let base: f64 = match inferred.status {
        ResourceStatus::Error => 0.8,
        ResourceStatus::Terminating => 0.6,
        ResourceStatus::Warning => 0.5,
        ResourceStatus::Unknown => 0.3,
        ResourceStatus::Ready => 0.1,
    };
    let score = if inferred.container_issues.is_empty() {
        base
    } else {
        base + 0.2
    };
    score.min(1.0)
}

fn pod_status(object: &Value) -> InferredStatus {
    let phase = parse::str_field(object, &["status", "phase"]).unwrap_or("Unknown");
    let (issues, first_error) = container_issues(object);

    let status = if issues.iter().any(|i| ERROR_REASONS.iter().any(|r| i.contains(r))) {
        ResourceStatus::Error
    } else {
        match phase {
            "Failed" => ResourceStatus::Error,
            "Succeeded" => ResourceStatus::Ready,
            "Pending" => ResourceStatus::Warning,
            "Running" => {
                if issues.is_empty() {
                    ResourceStatus::Ready
                } else {
                    ResourceStatus::Warning
                }
            }
            _ => ResourceStatus::Unknown,
        }
    };
    InferredStatus {
        status,
        error_message: first_error,
        container_issues: issues,
    }
}

/// Waiting or not-ready containers, in declaration order.
fn container_issues(object: &Value) -> (Vec<String>, String) {
    let mut issues = Vec::new();
    let mut first_error = String::new();
    let statuses = parse::field(object, &["status", "containerStatuses"])
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for status in &statuses {
        let name = parse::str_field(status, &["name"]).unwrap_or("unknown");
        if let Some(reason) = parse::str_field(status, &["state", "waiting", "reason"]) {
            issues.push(format!("{name}: {reason}"));
            if first_error.is_empty() {
                first_error = parse::str_field(status, &["state", "waiting", "message"])
                    .unwrap_or(reason)
                    .to_string();
            }
            continue;
        }
        if let Some(reason) = parse::str_field(status, &["state", "terminated", "reason"]) {
            if reason != "Completed" {
                issues.push(format!("{name}: {reason}"));
                if first_error.is_empty() {
                    first_error = reason.to_string();
                }
                continue;
            }
        }
        let ready = parse::field(status, &["ready"])
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !ready {
            issues.push(format!("{name}: not ready"));
        }
    }
    (issues, first_error)
}

fn replica_status(desired: i64, ready: i64) -> InferredStatus {
    let status = if desired <= 0 || ready >= desired {
        ResourceStatus::Ready
    } else if ready == 0 {
        ResourceStatus::Error
    } else {
        ResourceStatus::Warning
    };
    let error_message = if status == ResourceStatus::Ready {
        String::new()
    } else {
        format!("{ready}/{desired} replicas ready")
    };
    InferredStatus {
        status,
        error_message,
        container_issues: Vec::new(),
    }
}

fn node_status(object: &Value) -> InferredStatus {
    let Some(ready) = parse::condition(object, "Ready") else {
        return InferredStatus::default();
    };
    let (status, error_message) = match parse::str_field(ready, &["status"]) {
        Some("True") => (ResourceStatus::Ready, String::new()),
        Some("False") => (
            ResourceStatus::Error,
            parse::str_field(ready, &["message"]).unwrap_or_default().to_string(),
        ),
        _ => (
            ResourceStatus::Warning,
            "node readiness unknown".to_string(),
        ),
    };
    InferredStatus {
        status,
        error_message,
        container_issues: Vec::new(),
    }
}

fn generic_status(object: &Value) -> InferredStatus {
    match parse::condition(object, "Ready").and_then(|c| parse::str_field(c, &["status"])) {
        Some("True") => InferredStatus {
            status: ResourceStatus::Ready,
            ..Default::default()
        },
        Some(_) => InferredStatus {
            status: ResourceStatus::Warning,
            error_message: parse::condition(object, "Ready")
                .and_then(|c| parse::str_field(c, &["message"]))
                .unwrap_or_default()
                .to_string(),
            container_issues: Vec::new(),
        },
        None => InferredStatus::default(),
    }
}
