use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("graph error: {0}")]
    Graph(#[from] spectre_graph::Error),

    #[error("{0}: {1}")]
    SerializationError(String, #[source] serde_json::Error),

    #[error("{0}: {1}")]
    ConfigError(String, #[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("missing data: {0}")]
    MissingData(String),

    #[error("listener buffer full")]
    BufferFull,

    #[error("producer list failed: {0}")]
    Producer(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
