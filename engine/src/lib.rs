//! CDM query engine
//!
//! Read-only query and aggregation layer over Common Data Model benchmark
//! results stored in OpenSearch.

pub mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
