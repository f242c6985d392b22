use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("graph lookup failed: {0}")]
    Lookup(#[from] spectre_graph::Error),

    #[error("{0}: {1}")]
    SerializationError(String, #[source] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
