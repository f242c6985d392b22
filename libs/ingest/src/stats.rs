//! Pipeline statistics: atomic counters behind a pull interface.

use crate::now_ns;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Rolling window for the processing rate.
const RATE_WINDOW_NS: i64 = 60 * 1_000_000_000;

#[derive(Default)]
pub struct PipelineStats {
    events_processed: AtomicU64,
    nodes_created: AtomicU64,
    edges_created: AtomicU64,
    causality_links_found: AtomicU64,
    errors: AtomicU64,
    last_event_time_ns: AtomicI64,
    last_sync_time_ns: AtomicI64,
    sync_lag_ms: AtomicI64,
    window: Mutex<VecDeque<(i64, u64)>>,
}

/// Point-in-time copy, serialisable for the stats endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub events_processed: u64,
    pub nodes_created: u64,
    pub edges_created: u64,
    pub causality_links_found: u64,
    pub errors: u64,
    pub last_event_time_ns: i64,
    pub last_sync_time_ns: i64,
    pub sync_lag_ms: i64,
    /// Events per second over the rolling window.
    pub processing_rate: f64,
}

impl PipelineStats {
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nodes(&self, count: u64) {
        self.nodes_created.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_edges(&self, count: u64) {
        self.edges_created.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_causality_links(&self, count: u64) {
        self.causality_links_found.fetch_add(count, Ordering::Relaxed);
    }

    /// Called once per finished batch with the newest event timestamp.
    pub fn record_batch(&self, events: u64, newest_event_ns: i64) {
        let now = now_ns();
        self.events_processed.fetch_add(events, Ordering::Relaxed);
        self.last_sync_time_ns.store(now, Ordering::Relaxed);
        if newest_event_ns > 0 {
            self.last_event_time_ns
                .fetch_max(newest_event_ns, Ordering::Relaxed);
            self.sync_lag_ms
                .store((now - newest_event_ns) / 1_000_000, Ordering::Relaxed);
        }

        let mut window = self.window.lock();
        window.push_back((now, events));
        while window
            .front()
            .is_some_and(|(ts, _)| now - ts > RATE_WINDOW_NS)
        {
            window.pop_front();
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (rate_events, oldest) = {
            let window = self.window.lock();
            (
                window.iter().map(|(_, n)| n).sum::<u64>(),
                window.front().map(|(ts, _)| *ts),
            )
        };
        let processing_rate = match oldest {
            Some(oldest) => {
                let span_ns = (now_ns() - oldest).max(1_000_000_000);
                rate_events as f64 / (span_ns as f64 / 1e9)
            }
            None => 0.0,
        };
        StatsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            nodes_created: self.nodes_created.load(Ordering::Relaxed),
            edges_created: self.edges_created.load(Ordering::Relaxed),
            causality_links_found: self.causality_links_found.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_event_time_ns: self.last_event_time_ns.load(Ordering::Relaxed),
            last_sync_time_ns: self.last_sync_time_ns.load(Ordering::Relaxed),
            sync_lag_ms: self.sync_lag_ms.load(Ordering::Relaxed),
            processing_rate,
        }
    }
}
