//! Ingestion core configuration, loadable from YAML.

use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use spectre_graph::client::GraphConfig;
use spectre_k8s_util::types::GroupVersionKind;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IngestorConfig {
    pub listener: ListenerConfig,
    pub causality: CausalityConfig,
    pub retention: RetentionConfig,
    pub reconciler: ReconcilerConfig,
    pub graph: GraphConfig,
    /// Kinds the producer watches.
    pub watch: Vec<GroupVersionKind>,
}

impl IngestorConfig {
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("failed to read {path}"), Box::new(e)))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::ConfigError(format!("failed to parse {path}"), Box::new(e)))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListenerConfig {
    /// Queue depth between the producer and the batcher.
    pub buffer_size: usize,
    pub batch_size: usize,
    /// Milliseconds since the first pending event before a partial batch is
    /// flushed.
    pub batch_timeout: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 10_000,
            batch_size: 100,
            batch_timeout: 1_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CausalityConfig {
    pub enabled: bool,
    /// Maximum cause→effect distance in milliseconds.
    pub max_lag: u64,
    pub min_confidence: f64,
}

impl Default for CausalityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_lag: 60_000,
            min_confidence: 0.5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetentionConfig {
    /// Event age cutoff in seconds.
    pub window: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window: 7 * 24 * 3600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcilerConfig {
    pub enabled: bool,
    /// Seconds between cycles.
    pub interval: u64,
    /// Resources examined per kind per cycle.
    pub batch_size: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 300,
            batch_size: 500,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = IngestorConfig::default();
        assert_eq!(config.listener.batch_size, 100);
        assert_eq!(config.causality.max_lag, 60_000);
        assert!(config.causality.enabled);
        assert_eq!(config.reconciler.interval, 300);
        assert_eq!(config.graph.pool_size, 10);
        assert_eq!(config.graph.max_retries, 10);
    }

    #[test]
    fn yaml_overrides_selected_fields() {
        let raw = r#"
listener:
  bufferSize: 50
  batchTimeout: 250
causality:
  minConfidence: 0.7
retention:
  window: 3600
graph:
  host: falkordb
  cache:
    enabled: true
watch:
  - version: v1
    kind: Pod
"#;
        let config: IngestorConfig = serde_yaml::from_str(raw).unwrap();
        assert_eq!(config.listener.buffer_size, 50);
        assert_eq!(config.listener.batch_timeout, 250);
        // untouched fields keep defaults
        assert_eq!(config.listener.batch_size, 100);
        assert_eq!(config.causality.min_confidence, 0.7);
        assert_eq!(config.retention.window, 3600);
        assert_eq!(config.graph.host, "falkordb");
        assert!(config.graph.cache.enabled);
        assert_eq!(config.watch.len(), 1);
    }
}
