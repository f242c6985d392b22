pub mod builder;
pub mod causality;
pub mod config;
pub mod detector;
pub mod error;
pub mod listener;
pub mod lookup;
pub mod metrics;
pub mod pipeline;
pub mod reconciler;
pub mod retention;
pub mod stats;
pub mod status;
pub mod telemetry;

pub use error::{Error, Result};

use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
