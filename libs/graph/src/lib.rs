pub mod cache;
pub mod client;
pub mod error;
pub mod query;
pub mod schema;

pub use client::{GraphClient, GraphStore, QueryResult, QueryStats};
pub use error::{Error, Result};
pub use query::GraphQuery;
