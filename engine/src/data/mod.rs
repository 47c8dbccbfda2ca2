//! Data access layer
//!
//! Everything that knows how CDM documents are stored:
//! - `index` - Legacy/Sharded index naming and resolution
//! - `fullid` - Fully qualified entity ids pinned to one index
//! - `filters` - Filter mini-language parser and query clause builder
//! - `documents` - Typed projections of CDM documents
//! - `backend` - Search capability consumed by the engine
//! - `opensearch` - HTTP implementation of the search capability
//! - `error` - Unified error type for the data layer

pub mod backend;
pub mod documents;
pub mod error;
pub mod filters;
pub mod fullid;
pub mod index;
pub mod opensearch;

#[cfg(test)]
pub mod testing;

pub use backend::{Hit, SearchBackend, SearchRequest, SearchResponse};
pub use error::DataError;
pub use fullid::FullId;
pub use index::{Collection, IndexResolver, IndexTarget, SchemaGeneration};
pub use opensearch::OpenSearchBackend;
