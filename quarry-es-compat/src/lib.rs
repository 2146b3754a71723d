//! Elasticsearch API compatibility layer for Quarry
//!
//! Parses Elasticsearch request bodies, compiles them against an index's
//! mappings and analyzers, and renders results in Elasticsearch's shapes.
//!
//! # Operations
//!
//! - search over one index, a comma list or `*` patterns, with per-index
//!   timeouts and merged hits and aggregations
//! - multi-search over NDJSON header/body pairs
//! - index create/delete, mapping and settings get/put, listing
//! - `_analyze`
//!
//! # Query DSL Support
//!
//! Supported query types:
//! - `bool` (must, should, must_not, filter)
//! - `match_all` / `match_none`
//! - `match` / `match_phrase` / `multi_match`
//! - `term` / `terms` / `ids`
//! - `range` / `exists`
//! - `prefix` / `wildcard` / `regexp` / `fuzzy`
//! - `query_string`
//!
//! Supported aggregations:
//! - `terms`
//! - `histogram` / `date_histogram`
//! - `avg` / `sum` / `min` / `max` / `value_count`

pub mod aggregations;
pub mod analyze;
pub mod error;
pub mod highlight;
pub mod indices;
pub mod pattern;
pub mod query;
pub mod request;
pub mod response;
pub mod search;

pub use analyze::{analyze, AnalyzeRequest, AnalyzeResponse};
pub use error::EsErrorBody;
pub use query::{QueryCompiler, QueryNode};
pub use request::SearchRequest;
pub use response::{MsearchResponse, SearchResponse};
pub use search::SearchOrchestrator;
