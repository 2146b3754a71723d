//! Quarry: an embeddable full-text search core.
//!
//! Indices live in an [`IndexCatalog`](catalog::IndexCatalog). Each index
//! carries a [`SchemaRegistry`](mapping::SchemaRegistry) of field mappings,
//! an analyzer set, and a tantivy-backed [`IndexEngine`](engine::IndexEngine).
//! Documents go through the [`DocumentBuilder`](document::DocumentBuilder);
//! queries arrive as [`ExecutableQuery`](query::ExecutableQuery) trees.

pub mod aggregations;
pub mod analysis;
pub mod catalog;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod metrics;
pub mod query;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
