use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0} (redis error: {1})")]
    Backend(String, #[source] redis::RedisError),

    #[error("graph store unreachable after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: redis::RedisError,
    },

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected reply shape: {0}")]
    Protocol(String),

    #[error("client is closed")]
    Closed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
