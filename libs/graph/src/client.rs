//! Client facade over the graph store.
//!
//! The store speaks the Redis protocol (`GRAPH.QUERY` / `GRAPH.DELETE`).
//! Connection establishment tolerates sidecar startup with a bounded
//! exponential retry budget; per-query concurrency is bounded by a semaphore
//! sized to the pool, and every query runs under the read timeout.

use crate::error::{Error, Result};
use crate::query::GraphQuery;
use crate::schema;

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GraphConfig {
    pub host: String,
    pub port: u16,
    /// Graph key inside the store.
    pub name: String,
    pub pool_size: usize,
    /// Timeouts in milliseconds.
    #[serde(rename = "dialTimeout")]
    pub dial_timeout_ms: u64,
    #[serde(rename = "readTimeout")]
    pub read_timeout_ms: u64,
    #[serde(rename = "writeTimeout")]
    pub write_timeout_ms: u64,
    pub max_retries: usize,
    pub cache: CacheConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            name: "spectre".to_string(),
            pool_size: 10,
            dial_timeout_ms: 5_000,
            read_timeout_ms: 10_000,
            write_timeout_ms: 10_000,
            max_retries: 10,
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    #[serde(rename = "memoryMB")]
    pub memory_mb: usize,
    /// Entry lifetime in milliseconds.
    #[serde(rename = "ttl")]
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            memory_mb: 64,
            ttl_ms: 30_000,
        }
    }
}

/// Write/read statistics reported by the store for one query.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QueryStats {
    pub nodes_created: u64,
    pub relationships_created: u64,
    pub properties_set: u64,
    pub nodes_deleted: u64,
    pub relationships_deleted: u64,
    pub execution_ms: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Vec<Value>>,
    pub stats: QueryStats,
}

impl QueryResult {
    /// First column of the first row as i64, for count-style queries.
    pub fn scalar_i64(&self) -> Option<i64> {
        self.rows.first()?.first()?.as_i64()
    }

    pub fn scalar_str(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_str()
    }
}

/// The seam the pipeline writes through; production uses [`GraphClient`],
/// tests a recording mock.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn execute(&self, query: GraphQuery) -> Result<QueryResult>;
}

pub struct GraphClient {
    config: GraphConfig,
    manager: ConnectionManager,
    permits: Semaphore,
}

impl GraphClient {
    /// Dial the store, retrying with exponential backoff inside
    /// `max_retries` to tolerate a storage sidecar that is still starting.
    pub async fn connect(config: GraphConfig) -> Result<Self> {
        let url = format!("redis://{}:{}/", config.host, config.port);
        let client = redis::Client::open(url.as_str())
            .map_err(|e| Error::Backend(format!("invalid store address {url}"), e))?;

        let max_retries = config.max_retries;
        let dial = Duration::from_millis(config.dial_timeout_ms);
        let manager = (|| async {
            let client = client.clone();
            tokio::time::timeout(dial, ConnectionManager::new(client))
                .await
                .map_err(|_| {
                    redis::RedisError::from((redis::ErrorKind::IoError, "dial timeout"))
                })?
        })
        .retry(
            ExponentialBuilder::default()
                .with_max_times(max_retries)
                .with_max_delay(Duration::from_secs(5)),
        )
        .notify(|err: &redis::RedisError, dur: Duration| {
            warn!(msg = "graph store not ready, retrying", %err, backoff = ?dur);
        })
        .await
        .map_err(|e| Error::RetriesExhausted {
            attempts: max_retries,
            source: e,
        })?;

        info!(msg = "connected to graph store", host = %config.host, port = config.port, graph = %config.name);
        let permits = Semaphore::new(config.pool_size.max(1));
        Ok(Self {
            config,
            manager,
            permits,
        })
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| Error::Backend("ping failed".to_string(), e))
    }

    /// Create the graph key and its indexes. Index creation is idempotent on
    /// FalkorDB-compatible stores but may also report "already indexed";
    /// both are fine.
    pub async fn init_schema(&self) -> Result<()> {
        for statement in schema::index_statements() {
            match self.run(&statement).await {
                Ok(_) => debug!(msg = "index ensured", %statement),
                Err(Error::Backend(_, e)) if e.to_string().contains("already indexed") => {
                    debug!(msg = "index already present", %statement);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// An empty graph key is created implicitly by the first query.
    pub async fn create_graph(&self) -> Result<()> {
        self.run("RETURN 1").await.map(|_| ())
    }

    pub async fn delete_graph(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("GRAPH.DELETE")
            .arg(&self.config.name)
            .query_async::<redis::Value>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| Error::Backend(format!("failed to delete graph {}", self.config.name), e))
    }

    /// Refuse new queries; the connection manager releases its connection
    /// when the last clone of the client drops.
    pub async fn close(&self) {
        self.permits.close();
    }

    async fn run(&self, rendered: &str) -> Result<QueryResult> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Closed)?;
        let is_write = rendered.contains("MERGE ") || rendered.contains("DELETE ");
        let timeout = Duration::from_millis(if is_write {
            self.config.write_timeout_ms
        } else {
            self.config.read_timeout_ms
        });
        let mut conn = self.manager.clone();
        let reply = tokio::time::timeout(
            timeout,
            redis::cmd("GRAPH.QUERY")
                .arg(&self.config.name)
                .arg(rendered)
                .query_async::<redis::Value>(&mut conn),
        )
        .await
        .map_err(|_| Error::Timeout(timeout))?
        .map_err(|e| Error::Backend("query failed".to_string(), e))?;
        parse_reply(reply)
    }
}

#[async_trait]
impl GraphStore for GraphClient {
    async fn execute(&self, query: GraphQuery) -> Result<QueryResult> {
        self.run(&query.render()).await
    }
}

/// GRAPH.QUERY replies as `[header, rows, stats]` for reads and
/// `[stats]` for pure writes.
fn parse_reply(reply: redis::Value) -> Result<QueryResult> {
    let redis::Value::Array(sections) = reply else {
        return Err(Error::Protocol(format!("non-array reply: {reply:?}")));
    };
    match sections.len() {
        1 => Ok(QueryResult {
            rows: Vec::new(),
            stats: parse_stats(&sections[0]),
        }),
        3 => {
            let redis::Value::Array(raw_rows) = &sections[1] else {
                return Err(Error::Protocol("rows section is not an array".to_string()));
            };
            let rows = raw_rows
                .iter()
                .map(|row| match row {
                    redis::Value::Array(cells) => cells.iter().map(to_json).collect(),
                    other => vec![to_json(other)],
                })
                .collect();
            Ok(QueryResult {
                rows,
                stats: parse_stats(&sections[2]),
            })
        }
        n => Err(Error::Protocol(format!("unexpected reply arity {n}"))),
    }
}

fn to_json(value: &redis::Value) -> Value {
    match value {
        redis::Value::Nil => Value::Null,
        redis::Value::Int(i) => Value::from(*i),
        redis::Value::Double(d) => Value::from(*d),
        redis::Value::Boolean(b) => Value::from(*b),
        redis::Value::BulkString(bytes) => Value::from(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::SimpleString(s) => Value::from(s.clone()),
        redis::Value::Array(items) => Value::Array(items.iter().map(to_json).collect()),
        redis::Value::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| {
                    let key = match to_json(k) {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, to_json(v))
                })
                .collect(),
        ),
        other => Value::from(format!("{other:?}")),
    }
}

/// Stats arrive as lines like `Nodes created: 2` and
/// `Query internal execution time: 0.24 milliseconds`.
fn parse_stats(section: &redis::Value) -> QueryStats {
    let mut stats = QueryStats::default();
    let redis::Value::Array(lines) = section else {
        return stats;
    };
    for line in lines {
        let text = match line {
            redis::Value::BulkString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            redis::Value::SimpleString(s) => s.clone(),
            _ => continue,
        };
        let Some((key, value)) = text.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Nodes created" => stats.nodes_created = value.parse().unwrap_or(0),
            "Relationships created" => stats.relationships_created = value.parse().unwrap_or(0),
            "Properties set" => stats.properties_set = value.parse().unwrap_or(0),
            "Nodes deleted" => stats.nodes_deleted = value.parse().unwrap_or(0),
            "Relationships deleted" => stats.relationships_deleted = value.parse().unwrap_or(0),
            "Query internal execution time" => {
                stats.execution_ms = value
                    .split_whitespace()
                    .next()
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(0.0);
            }
            _ => {}
        }
    }
    stats
}

#[cfg(test)]
mod test {
    use super::*;

    fn bulk(s: &str) -> redis::Value {
        redis::Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn write_reply_carries_only_stats() {
        let reply = redis::Value::Array(vec![redis::Value::Array(vec![
            bulk("Nodes created: 2"),
            bulk("Properties set: 11"),
            bulk("Query internal execution time: 0.5 milliseconds"),
        ])]);
        let result = parse_reply(reply).unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.stats.nodes_created, 2);
        assert_eq!(result.stats.properties_set, 11);
        assert!((result.stats.execution_ms - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn read_reply_converts_rows() {
        let reply = redis::Value::Array(vec![
            redis::Value::Array(vec![bulk("e.data")]),
            redis::Value::Array(vec![redis::Value::Array(vec![
                bulk("{\"metadata\":{}}"),
                redis::Value::Int(7),
            ])]),
            redis::Value::Array(vec![bulk("Query internal execution time: 1 milliseconds")]),
        ]);
        let result = parse_reply(reply).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0], Value::from("{\"metadata\":{}}"));
        assert_eq!(result.rows[0][1], Value::from(7));
    }

    #[test]
    fn scalar_accessors() {
        let result = QueryResult {
            rows: vec![vec![Value::from(3)]],
            stats: QueryStats::default(),
        };
        assert_eq!(result.scalar_i64(), Some(3));
        assert_eq!(QueryResult::default().scalar_i64(), None);
    }

    #[test]
    fn malformed_reply_is_a_protocol_error() {
        let err = parse_reply(redis::Value::Int(1)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
