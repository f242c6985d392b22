//! Causality inference over the events of one batch.
//!
//! Ordered pairs within the lag window are scored by every registered
//! heuristic; the best score wins and names the heuristic. A heuristic
//! error contributes 0 to that pair and the others proceed.

use crate::config::CausalityConfig;
use crate::error::Result;

use spectre_k8s_util::event::{EventType, RawEvent};
use tracing::debug;

const NS_PER_MS: i64 = 1_000_000;

const WORKLOAD_KINDS: [&str; 4] = ["Deployment", "ReplicaSet", "StatefulSet", "DaemonSet"];
const CONFIG_KINDS: [&str; 2] = ["ConfigMap", "Secret"];

/// One accepted causal link; written as a TRIGGERED_BY edge effect→cause.
#[derive(Clone, Debug, PartialEq)]
pub struct CausalLink {
    pub cause_event_id: String,
    pub effect_event_id: String,
    pub confidence: f64,
    pub lag_ms: i64,
    pub heuristic: &'static str,
    pub reason: String,
}

pub trait Heuristic: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score in [0, 1] for `cause` preceding `effect`. `batch` is the full
    /// batch in timestamp order, for context such as intervening events.
    fn score(&self, cause: &RawEvent, effect: &RawEvent, batch: &[RawEvent]) -> Result<f64>;

    fn reason(&self, cause: &RawEvent, effect: &RawEvent) -> String;
}

pub struct CausalityEngine {
    config: CausalityConfig,
    heuristics: Vec<Box<dyn Heuristic>>,
}

impl CausalityEngine {
    pub fn new(config: CausalityConfig) -> Self {
        Self {
            config,
            heuristics: vec![
                Box::new(SameResourceTransition),
                Box::new(DeploymentRollout),
                Box::new(ConfigChangeRestart),
            ],
        }
    }

    pub fn register(&mut self, heuristic: Box<dyn Heuristic>) {
        self.heuristics.push(heuristic);
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Links for all ordered pairs within `max_lag` scoring at or above
    /// `min_confidence`. K8s Event objects are not change events and do not
    /// participate.
    pub fn infer(&self, events: &[RawEvent]) -> Vec<CausalLink> {
        let mut ordered: Vec<&RawEvent> = events.iter().filter(|e| !e.is_k8s_event()).collect();
        if ordered.len() < 2 {
            return Vec::new();
        }
        ordered.sort_by_key(|e| e.timestamp);
        let sorted: Vec<RawEvent> = ordered.iter().map(|e| (*e).clone()).collect();
        let max_lag_ns = self.config.max_lag as i64 * NS_PER_MS;

        let mut links = Vec::new();
        for (i, cause) in sorted.iter().enumerate() {
            for effect in sorted.iter().skip(i + 1) {
                let lag_ns = effect.timestamp - cause.timestamp;
                if lag_ns < 0 || lag_ns > max_lag_ns {
                    continue;
                }
                let mut best: Option<(&dyn Heuristic, f64)> = None;
                for heuristic in &self.heuristics {
                    let score = match heuristic.score(cause, effect, &sorted) {
                        Ok(score) => score.clamp(0.0, 1.0),
                        Err(error) => {
                            debug!(
                                msg = "heuristic failed, scoring 0",
                                heuristic = heuristic.name(),
                                %error
                            );
                            0.0
                        }
                    };
                    if best.is_none_or(|(_, b)| score > b) {
                        best = Some((heuristic.as_ref(), score));
                    }
                }
                let Some((heuristic, confidence)) = best else {
                    continue;
                };
                if confidence < self.config.min_confidence {
                    continue;
                }
                links.push(CausalLink {
                    cause_event_id: cause.id.clone(),
                    effect_event_id: effect.id.clone(),
                    confidence,
                    lag_ms: lag_ns / NS_PER_MS,
                    heuristic: heuristic.name(),
                    reason: heuristic.reason(cause, effect),
                });
            }
        }
        links
    }
}

/// Consecutive events of the same resource: the strongest signal there is.
struct SameResourceTransition;

impl Heuristic for SameResourceTransition {
    fn name(&self) -> &'static str {
        "same-resource-transition"
    }

    fn score(&self, cause: &RawEvent, effect: &RawEvent, batch: &[RawEvent]) -> Result<f64> {
        if cause.resource.uid != effect.resource.uid || cause.id == effect.id {
            return Ok(0.0);
        }
        let intervening = batch.iter().any(|e| {
            e.resource.uid == cause.resource.uid
                && e.id != cause.id
                && e.id != effect.id
                && e.timestamp > cause.timestamp
                && e.timestamp < effect.timestamp
        });
        Ok(if intervening { 0.0 } else { 0.95 })
    }

    fn reason(&self, cause: &RawEvent, _effect: &RawEvent) -> String {
        format!(
            "consecutive events of {} {}/{}",
            cause.resource.kind, cause.resource.namespace, cause.resource.name
        )
    }
}

/// Workload controller update followed by pod churn in its scope. Pod names
/// inherit the controller chain's name, so a name prefix in the same
/// namespace bounds the scope without a graph round-trip.
struct DeploymentRollout;

impl Heuristic for DeploymentRollout {
    fn name(&self) -> &'static str {
        "deployment-rollout"
    }

    fn score(&self, cause: &RawEvent, effect: &RawEvent, _batch: &[RawEvent]) -> Result<f64> {
        let rollout = WORKLOAD_KINDS.contains(&cause.resource.kind.as_str())
            && cause.event_type == EventType::Update
            && effect.resource.kind == "Pod"
            && matches!(effect.event_type, EventType::Create | EventType::Delete)
            && cause.resource.namespace == effect.resource.namespace
            && effect.resource.name.starts_with(cause.resource.name.as_str());
        Ok(if rollout { 0.7 } else { 0.0 })
    }

    fn reason(&self, cause: &RawEvent, effect: &RawEvent) -> String {
        format!(
            "{} {} rollout drove pod {}",
            cause.resource.kind, cause.resource.name, effect.resource.name
        )
    }
}

/// ConfigMap/Secret update followed by pod restarts in the same namespace.
struct ConfigChangeRestart;

impl Heuristic for ConfigChangeRestart {
    fn name(&self) -> &'static str {
        "config-change-restart"
    }

    fn score(&self, cause: &RawEvent, effect: &RawEvent, _batch: &[RawEvent]) -> Result<f64> {
        let restart = CONFIG_KINDS.contains(&cause.resource.kind.as_str())
            && cause.event_type == EventType::Update
            && effect.resource.kind == "Pod"
            && matches!(effect.event_type, EventType::Update | EventType::Delete)
            && cause.resource.namespace == effect.resource.namespace;
        Ok(if restart { 0.6 } else { 0.0 })
    }

    fn reason(&self, cause: &RawEvent, effect: &RawEvent) -> String {
        format!(
            "{} {} changed before pod {} restarted",
            cause.resource.kind, cause.resource.name, effect.resource.name
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use serde_json::Value;
    use spectre_k8s_util::event::ResourceMeta;

    fn event(kind: &str, name: &str, uid: &str, event_type: EventType, ts_ms: i64) -> RawEvent {
        RawEvent {
            id: format!("{uid}-{ts_ms}"),
            timestamp: ts_ms * NS_PER_MS,
            event_type,
            resource: ResourceMeta {
                uid: uid.into(),
                version: "v1".into(),
                kind: kind.into(),
                namespace: "default".into(),
                name: name.into(),
                ..Default::default()
            },
            data: Value::Null,
        }
    }

    fn engine() -> CausalityEngine {
        CausalityEngine::new(CausalityConfig::default())
    }

    #[test]
    fn same_resource_consecutive_scores_095() {
        let events = vec![
            event("Deployment", "web", "d1", EventType::Create, 0),
            event("Deployment", "web", "d1", EventType::Update, 1_000),
        ];
        let links = engine().infer(&events);
        assert_eq!(links.len(), 1);
        let link = &links[0];
        assert_eq!(link.heuristic, "same-resource-transition");
        assert!((link.confidence - 0.95).abs() < 1e-9);
        assert_eq!(link.lag_ms, 1_000);
        assert_eq!(link.cause_event_id, events[0].id);
        assert_eq!(link.effect_event_id, events[1].id);
    }

    #[test]
    fn intervening_event_breaks_consecutiveness() {
        let events = vec![
            event("Pod", "p", "u1", EventType::Create, 0),
            event("Pod", "p", "u1", EventType::Update, 500),
            event("Pod", "p", "u1", EventType::Update, 1_000),
        ];
        let links = engine().infer(&events);
        // only adjacent pairs link; first→third has an intervening event
        assert_eq!(links.len(), 2);
        assert!(links
            .iter()
            .all(|l| l.heuristic == "same-resource-transition"));
        assert!(!links.iter().any(|l| l.lag_ms == 1_000));
    }

    #[test]
    fn rollout_links_controller_to_pod() {
        let events = vec![
            event("Deployment", "web", "d1", EventType::Update, 0),
            event("Pod", "web-abc-xyz", "p1", EventType::Create, 2_000),
        ];
        let links = engine().infer(&events);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].heuristic, "deployment-rollout");
        assert!((links[0].confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn config_change_links_to_pod_restart() {
        let events = vec![
            event("ConfigMap", "app-config", "cm1", EventType::Update, 0),
            event("Pod", "web-abc", "p1", EventType::Delete, 3_000),
        ];
        let links = engine().infer(&events);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].heuristic, "config-change-restart");
        assert!((links[0].confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn pairs_beyond_max_lag_are_ignored() {
        let events = vec![
            event("Pod", "p", "u1", EventType::Create, 0),
            event("Pod", "p", "u1", EventType::Update, 120_000),
        ];
        assert!(engine().infer(&events).is_empty());
    }

    #[test]
    fn min_confidence_filters_weak_links() {
        let mut config = CausalityConfig::default();
        config.min_confidence = 0.8;
        let events = vec![
            event("Deployment", "web", "d1", EventType::Update, 0),
            event("Pod", "web-abc", "p1", EventType::Create, 1_000),
        ];
        assert!(CausalityEngine::new(config).infer(&events).is_empty());
    }

    #[test]
    fn k8s_events_do_not_participate() {
        let events = vec![
            event("Event", "ev", "e1", EventType::Create, 0),
            event("Event", "ev2", "e2", EventType::Create, 100),
        ];
        assert!(engine().infer(&events).is_empty());
    }

    #[test]
    fn failing_heuristic_scores_zero_for_the_pair() {
        struct Broken;
        impl Heuristic for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn score(&self, _: &RawEvent, _: &RawEvent, _: &[RawEvent]) -> Result<f64> {
                Err(crate::Error::MissingData("boom".into()))
            }
            fn reason(&self, _: &RawEvent, _: &RawEvent) -> String {
                String::new()
            }
        }
        let mut engine = engine();
        engine.register(Box::new(Broken));
        let events = vec![
            event("Deployment", "web", "d1", EventType::Create, 0),
            event("Deployment", "web", "d1", EventType::Update, 1_000),
        ];
        // the broken heuristic does not suppress the others
        let links = engine.infer(&events);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].heuristic, "same-resource-transition");
    }
}
