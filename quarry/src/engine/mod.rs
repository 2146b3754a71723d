//! Index engine seam.
//!
//! The document builder produces [`EngineDocument`]s and the query compiler
//! produces [`ExecutableQuery`] trees; an [`IndexEngine`] stores the former
//! and evaluates the latter. [`TextEngine`] is the tantivy-backed engine.

mod facets;
mod lower;
mod terms;
mod text;

pub use text::TextEngine;

use crate::aggregations::{AggregationRequest, AggregationResult};
use crate::analysis::Token;
use crate::query::ExecutableQuery;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A typed value ready for indexing.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text { raw: String, tokens: Vec<Token> },
    Keyword(String),
    Numeric(f64),
    Bool(bool),
    /// Epoch milliseconds.
    Time(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineField {
    pub name: String,
    pub value: FieldValue,
    pub aggregatable: bool,
    /// Copy the field's terms into `_all`.
    pub include_in_all: bool,
}

/// One document as handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineDocument {
    pub id: String,
    pub index: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// The stored `_source`, already serialized as JSON.
    pub source: String,
    pub fields: Vec<EngineField>,
}

#[derive(Debug, Clone)]
pub struct EngineSearch {
    pub query: ExecutableQuery,
    /// Number of top hits to return, counted from the first hit.
    pub limit: usize,
    pub aggregations: Vec<AggregationRequest>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineHit {
    pub index: String,
    pub id: String,
    pub score: f32,
    pub timestamp: i64,
    pub source: Value,
}

#[derive(Debug, Clone, Default)]
pub struct EngineResults {
    pub total: u64,
    pub hits: Vec<EngineHit>,
    /// Unfinalized: terms buckets are neither sorted nor truncated.
    pub aggregations: Vec<AggregationResult>,
    pub took_ms: u64,
}

/// Outcome of a write batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub inserted: u64,
    pub replaced: u64,
}

/// Per-index storage engine.
///
/// One engine instance owns the single writer of its index; reads may run
/// concurrently with writes.
#[async_trait]
pub trait IndexEngine: Send + Sync {
    /// Add documents, replacing any live document with the same id.
    async fn write(&self, docs: Vec<EngineDocument>) -> Result<WriteStats>;

    /// Delete a document by id; reports whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn search(&self, request: EngineSearch) -> Result<EngineResults>;

    /// Live document count.
    fn doc_count(&self) -> Result<u64>;

    /// Release the writer. Later writes fail.
    async fn close(&self) -> Result<()>;
}
