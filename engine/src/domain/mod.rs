//! Query operations over CDM data
//!
//! - `context` - Backend handle and index scoping shared by every operation
//! - `runs` - Run listing with iterations, tags and params assembled
//! - `entities` - Tags, params, iterations, samples and periods
//! - `metrics` - Metric resolution and time-series retrieval
//! - `graph` - Plot series and layout composition
//! - `stats` - Statistical summaries of metric series
//! - `service` - Connected engine facade

pub mod context;
pub mod entities;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod runs;
pub mod service;
pub mod stats;

pub use context::{EntityRef, QueryContext};
pub use error::{AmbiguityDiagnostic, QueryError};
pub use service::CdmService;
