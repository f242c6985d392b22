pub mod crd;
pub mod error;
pub mod lookup;
pub mod native;
pub mod registry;

pub use error::{Error, Result};
pub use lookup::{EventRef, ResourceLookup, ResourceRef};
pub use registry::{Extractor, ExtractorRegistry};

#[cfg(test)]
pub(crate) mod testutil;
