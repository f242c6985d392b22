//! Memory- and TTL-bounded memoisation of read-only queries.
//!
//! Extractor scoring repeats the same candidate listings many times inside a
//! batch window; the cache keeps those off the store. Entries are keyed by
//! the rendered query text and sized by an estimate of their JSON payload.

use crate::client::{CacheConfig, QueryResult};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Entry {
    result: QueryResult,
    inserted: Instant,
    bytes: usize,
}

pub struct QueryCache {
    ttl: Duration,
    max_bytes: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashMap<String, Entry>,
    used_bytes: usize,
}

impl QueryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttl: Duration::from_millis(config.ttl_ms),
            max_bytes: config.memory_mb * 1024 * 1024,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                used_bytes: 0,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<QueryResult> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.inserted.elapsed() <= self.ttl => Some(entry.result.clone()),
            Some(_) => {
                if let Some(stale) = inner.entries.remove(key) {
                    inner.used_bytes -= stale.bytes;
                }
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, result: QueryResult) {
        let bytes = key.len() + estimate_bytes(&result);
        if bytes > self.max_bytes {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.entries.remove(&key) {
            inner.used_bytes -= previous.bytes;
        }
        // evict expired first, then oldest, until the entry fits
        if inner.used_bytes + bytes > self.max_bytes {
            let ttl = self.ttl;
            let expired: Vec<String> = inner
                .entries
                .iter()
                .filter(|(_, e)| e.inserted.elapsed() > ttl)
                .map(|(k, _)| k.clone())
                .collect();
            for k in expired {
                if let Some(e) = inner.entries.remove(&k) {
                    inner.used_bytes -= e.bytes;
                }
            }
        }
        while inner.used_bytes + bytes > self.max_bytes {
            let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            if let Some(e) = inner.entries.remove(&oldest) {
                inner.used_bytes -= e.bytes;
            }
        }
        inner.used_bytes += bytes;
        inner.entries.insert(
            key,
            Entry {
                result,
                inserted: Instant::now(),
                bytes,
            },
        );
    }

    #[cfg(test)]
    fn used_bytes(&self) -> usize {
        self.inner.lock().used_bytes
    }
}

fn estimate_bytes(result: &QueryResult) -> usize {
    result
        .rows
        .iter()
        .flat_map(|row| row.iter())
        .map(|value| serde_json::to_string(value).map(|s| s.len()).unwrap_or(16))
        .sum::<usize>()
        + 64
}
