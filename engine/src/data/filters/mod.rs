//! CDM filter system
//!
//! Parses the `namespace:key<op>value` filter mini-language and compiles terms,
//! breakout filters, period filters and sort keys into backend query clauses.
//!
//! ## Usage
//!
//! ```no_run
//! use cdmq::data::filters::{build_filters, parse_terms};
//!
//! let terms = parse_terms(&["tag:topology=2node,param:bs~64".to_string()]).unwrap();
//! let filters = build_filters(&terms).unwrap();
//! assert!(filters.tag.is_some());
//! ```

mod builder;
mod parser;
mod types;

pub use builder::{
    build_filters, build_name_filters, build_period_filter, build_sort_terms, columns,
};
pub use parser::{Parser, parse_terms};
pub use types::{BoolQuery, FilterSet, Namespace, SortDirection, SortTerm, Term, TermOp};
