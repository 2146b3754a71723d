//! Tantivy-backed [`IndexEngine`].
//!
//! Every index uses the same fixed physical schema; user fields are encoded
//! into prefixed terms (see [`super::terms`]) so mappings can grow without
//! touching the tantivy schema.

use super::facets::{self, FacetCountCollector};
use super::lower::QueryLowering;
use super::terms::{f64_sortable, facet_num, facet_str, facet_time, i64_sortable, term_key};
use super::{
    EngineDocument, EngineHit, EngineResults, EngineSearch, FieldValue, IndexEngine, WriteStats,
};
use crate::mapping::{ALL_FIELD, ID_FIELD, INDEX_FIELD, SOURCE_FIELD, TIMESTAMP_FIELD};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::TermQuery;
use tantivy::schema::*;
use tantivy::tokenizer::{PreTokenizedString, Token};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term};

pub const TERMS_FIELD: &str = "_terms";
pub const POINTS_FIELD: &str = "_points";
pub const EXISTS_FIELD: &str = "_exists";
pub const FACETS_FIELD: &str = "_facets";

/// Gap between the positions of consecutive values, so phrases never span them.
const POSITION_GAP: usize = 100;

/// Handles to the physical fields.
#[derive(Debug, Clone, Copy)]
pub struct SchemaFields {
    pub id: Field,
    pub index: Field,
    pub source: Field,
    pub timestamp: Field,
    pub terms: Field,
    pub points: Field,
    pub exists: Field,
    pub facets: Field,
}

impl SchemaFields {
    fn build_schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field(ID_FIELD, STRING | STORED);
        builder.add_text_field(INDEX_FIELD, STORED);
        builder.add_text_field(SOURCE_FIELD, STORED);
        builder.add_i64_field(TIMESTAMP_FIELD, STORED | FAST);
        let terms = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("raw")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );
        builder.add_text_field(TERMS_FIELD, terms);
        builder.add_text_field(POINTS_FIELD, STRING);
        builder.add_text_field(EXISTS_FIELD, STRING);
        builder.add_text_field(FACETS_FIELD, STRING | FAST);
        builder.build()
    }

    fn resolve(schema: &Schema) -> Result<Self> {
        Ok(Self {
            id: schema.get_field(ID_FIELD)?,
            index: schema.get_field(INDEX_FIELD)?,
            source: schema.get_field(SOURCE_FIELD)?,
            timestamp: schema.get_field(TIMESTAMP_FIELD)?,
            terms: schema.get_field(TERMS_FIELD)?,
            points: schema.get_field(POINTS_FIELD)?,
            exists: schema.get_field(EXISTS_FIELD)?,
            facets: schema.get_field(FACETS_FIELD)?,
        })
    }
}

pub struct TextEngine {
    inner: Arc<TextEngineInner>,
}

struct TextEngineInner {
    name: String,
    fields: SchemaFields,
    reader: IndexReader,
    /// `None` once closed.
    writer: Mutex<Option<IndexWriter>>,
}

impl TextEngine {
    /// Open the index stored in `dir`, creating it when absent.
    pub fn open(name: &str, dir: &Path, writer_heap: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir)?
        } else {
            Index::create_in_dir(dir, SchemaFields::build_schema())?
        };
        Self::from_index(name, index, writer_heap)
    }

    /// Non-persistent engine.
    pub fn in_memory(name: &str, writer_heap: usize) -> Result<Self> {
        let index = Index::create_in_ram(SchemaFields::build_schema());
        Self::from_index(name, index, writer_heap)
    }

    fn from_index(name: &str, index: Index, writer_heap: usize) -> Result<Self> {
        let fields = SchemaFields::resolve(&index.schema())?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer(writer_heap)?;
        Ok(Self {
            inner: Arc::new(TextEngineInner {
                name: name.to_string(),
                fields,
                reader,
                writer: Mutex::new(Some(writer)),
            }),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&TextEngineInner) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| Error::EngineFailure(format!("engine task failed: {}", e)))?
    }
}

impl TextEngineInner {
    fn closed(&self) -> Error {
        Error::EngineFailure(format!("index [{}] is closed", self.name))
    }

    fn id_term(&self, id: &str) -> Term {
        Term::from_field_text(self.fields.id, id)
    }

    fn is_live(&self, searcher: &Searcher, id: &str) -> Result<bool> {
        let query = TermQuery::new(self.id_term(id), IndexRecordOption::Basic);
        Ok(searcher.search(&query, &Count)? > 0)
    }

    fn write(&self, docs: Vec<EngineDocument>) -> Result<WriteStats> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or_else(|| self.closed())?;
        let searcher = self.reader.searcher();
        let mut seen = HashSet::with_capacity(docs.len());
        let mut stats = WriteStats::default();

        for doc in docs {
            let replaced = seen.contains(&doc.id) || self.is_live(&searcher, &doc.id)?;
            writer.delete_term(self.id_term(&doc.id));
            writer.add_document(self.to_tantivy(&doc))?;
            if replaced {
                stats.replaced += 1;
            } else {
                stats.inserted += 1;
            }
            seen.insert(doc.id);
        }

        writer.commit()?;
        self.reader.reload()?;
        tracing::debug!(
            "Index '{}': wrote {} new and {} replaced documents",
            self.name,
            stats.inserted,
            stats.replaced
        );
        Ok(stats)
    }

    fn to_tantivy(&self, doc: &EngineDocument) -> TantivyDocument {
        let f = &self.fields;
        let mut out = TantivyDocument::new();
        out.add_text(f.id, &doc.id);
        out.add_text(f.index, &doc.index);
        out.add_text(f.source, &doc.source);
        out.add_i64(f.timestamp, doc.timestamp);

        // The document time is queryable and aggregatable like any time field.
        out.add_text(f.points, term_key(TIMESTAMP_FIELD, &i64_sortable(doc.timestamp)));
        let mut tokens: Vec<Token> = Vec::new();
        let mut exists: BTreeSet<&str> = BTreeSet::from([TIMESTAMP_FIELD]);
        let mut facets: BTreeSet<String> = BTreeSet::from([facet_time(TIMESTAMP_FIELD, doc.timestamp)]);
        let mut base = 0usize;

        for field in &doc.fields {
            let name = field.name.as_str();
            exists.insert(name);
            // Parent objects exist whenever a child does.
            for (i, _) in name.match_indices('.') {
                exists.insert(&name[..i]);
            }

            match &field.value {
                FieldValue::Text { raw, tokens: analyzed } => {
                    let mut last = base;
                    for token in analyzed {
                        let position = base + token.position;
                        push_token(&mut tokens, name, &token.text, position);
                        if field.include_in_all {
                            push_token(&mut tokens, ALL_FIELD, &token.text, position);
                        }
                        last = last.max(position);
                    }
                    base = last + POSITION_GAP;
                    if field.aggregatable {
                        facets.insert(facet_str(name, raw));
                    }
                }
                FieldValue::Keyword(value) => {
                    push_token(&mut tokens, name, value, base);
                    if field.include_in_all {
                        push_token(&mut tokens, ALL_FIELD, value, base);
                    }
                    base += POSITION_GAP;
                    if field.aggregatable {
                        facets.insert(facet_str(name, value));
                    }
                }
                FieldValue::Bool(value) => {
                    let text = if *value { "true" } else { "false" };
                    push_token(&mut tokens, name, text, base);
                    if field.include_in_all {
                        push_token(&mut tokens, ALL_FIELD, text, base);
                    }
                    base += POSITION_GAP;
                    if field.aggregatable {
                        facets.insert(facet_str(name, text));
                    }
                }
                FieldValue::Numeric(value) => {
                    out.add_text(f.points, term_key(name, &f64_sortable(*value)));
                    if field.aggregatable {
                        facets.insert(facet_num(name, *value));
                    }
                }
                FieldValue::Time(value) => {
                    out.add_text(f.points, term_key(name, &i64_sortable(*value)));
                    if field.aggregatable {
                        facets.insert(facet_time(name, *value));
                    }
                }
            }
        }

        if !tokens.is_empty() {
            // Postings expect positions in order within a document.
            tokens.sort_by_key(|t| t.position);
            out.add_pre_tokenized_text(
                f.terms,
                PreTokenizedString {
                    text: String::new(),
                    tokens,
                },
            );
        }
        for name in exists {
            out.add_text(f.exists, name);
        }
        for facet in facets {
            out.add_text(f.facets, facet);
        }
        out
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or_else(|| self.closed())?;
        if !self.is_live(&self.reader.searcher(), id)? {
            return Ok(false);
        }
        writer.delete_term(self.id_term(id));
        writer.commit()?;
        self.reader.reload()?;
        Ok(true)
    }

    fn search(&self, request: EngineSearch) -> Result<EngineResults> {
        let start = Instant::now();
        let searcher = self.reader.searcher();
        let query = QueryLowering::new(&self.fields).lower(&request.query)?;
        let top = TopDocs::with_limit(request.limit.max(1));

        let (top_docs, total, aggregations) = if request.aggregations.is_empty() {
            let (top_docs, total) = searcher.search(&*query, &(top, Count))?;
            (top_docs, total, Vec::new())
        } else {
            let collector = FacetCountCollector::new(FACETS_FIELD);
            let (top_docs, total, counts) = searcher.search(&*query, &(top, Count, collector))?;
            (top_docs, total, facets::compute(&request.aggregations, &counts))
        };

        let mut hits = Vec::with_capacity(top_docs.len().min(request.limit));
        for (score, address) in top_docs.into_iter().take(request.limit) {
            let doc: TantivyDocument = searcher.doc(address)?;
            let text = |field: Field| {
                doc.get_first(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string()
            };
            let source = text(self.fields.source);
            hits.push(EngineHit {
                index: text(self.fields.index),
                id: text(self.fields.id),
                score,
                timestamp: doc
                    .get_first(self.fields.timestamp)
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0),
                source: serde_json::from_str(&source)?,
            });
        }

        Ok(EngineResults {
            total: total as u64,
            hits,
            aggregations,
            took_ms: start.elapsed().as_millis() as u64,
        })
    }
}

fn push_token(tokens: &mut Vec<Token>, field: &str, text: &str, position: usize) {
    tokens.push(Token {
        offset_from: 0,
        offset_to: 0,
        position,
        text: term_key(field, text),
        position_length: 1,
    });
}

#[async_trait]
impl IndexEngine for TextEngine {
    async fn write(&self, docs: Vec<EngineDocument>) -> Result<WriteStats> {
        if docs.is_empty() {
            return Ok(WriteStats::default());
        }
        self.blocking(move |inner| inner.write(docs)).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.blocking(move |inner| inner.delete(&id)).await
    }

    async fn search(&self, request: EngineSearch) -> Result<EngineResults> {
        self.blocking(move |inner| inner.search(request)).await
    }

    fn doc_count(&self) -> Result<u64> {
        Ok(self.inner.reader.searcher().num_docs())
    }

    async fn close(&self) -> Result<()> {
        self.blocking(|inner| {
            if let Some(writer) = inner.writer.lock().take() {
                writer.wait_merging_threads()?;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analyzer;
    use crate::engine::EngineField;
    use crate::query::{ExecutableQuery, Operator, TermValue};
    use std::ops::Bound;
    use tempfile::TempDir;

    const HEAP: usize = 15_000_000;

    fn text_field(name: &str, value: &str) -> EngineField {
        EngineField {
            name: name.to_string(),
            value: FieldValue::Text {
                raw: value.to_string(),
                tokens: Analyzer::standard().analyze(value),
            },
            aggregatable: false,
            include_in_all: true,
        }
    }

    fn numeric_field(name: &str, value: f64) -> EngineField {
        EngineField {
            name: name.to_string(),
            value: FieldValue::Numeric(value),
            aggregatable: true,
            include_in_all: false,
        }
    }

    fn doc(id: &str, fields: Vec<EngineField>) -> EngineDocument {
        EngineDocument {
            id: id.to_string(),
            index: "books".to_string(),
            timestamp: 1_700_000_000_000,
            source: format!(r#"{{"id":"{}"}}"#, id),
            fields,
        }
    }

    fn search(query: ExecutableQuery) -> EngineSearch {
        EngineSearch {
            query,
            limit: 10,
            aggregations: vec![],
        }
    }

    fn matching(field: &str, terms: &[&str]) -> ExecutableQuery {
        ExecutableQuery::Match {
            field: field.to_string(),
            analyzer: None,
            terms: terms.iter().map(|t| t.to_string()).collect(),
            operator: Operator::Or,
            fuzziness: None,
            prefix_length: None,
            boost: None,
        }
    }

    #[tokio::test]
    async fn test_write_replaces_by_id() -> Result<()> {
        let engine = TextEngine::in_memory("books", HEAP)?;
        let stats = engine
            .write(vec![
                doc("1", vec![text_field("title", "Quick brown fox")]),
                doc("2", vec![text_field("title", "Lazy dog")]),
                doc("1", vec![text_field("title", "Slow green turtle")]),
            ])
            .await?;
        assert_eq!(stats, WriteStats { inserted: 2, replaced: 1 });
        assert_eq!(engine.doc_count()?, 2);

        let results = engine.search(search(matching("title", &["fox"]))).await?;
        assert_eq!(results.total, 0);
        let results = engine.search(search(matching("title", &["turtle"]))).await?;
        assert_eq!(results.total, 1);
        assert_eq!(results.hits[0].id, "1");
        assert_eq!(results.hits[0].index, "books");
        Ok(())
    }

    #[tokio::test]
    async fn test_fields_do_not_leak() -> Result<()> {
        let engine = TextEngine::in_memory("books", HEAP)?;
        engine
            .write(vec![doc(
                "1",
                vec![text_field("title", "fox"), text_field("body", "hen")],
            )])
            .await?;
        assert_eq!(engine.search(search(matching("body", &["fox"]))).await?.total, 0);
        assert_eq!(engine.search(search(matching("_all", &["fox"]))).await?.total, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_bool_reaches_all_field() -> Result<()> {
        let engine = TextEngine::in_memory("books", HEAP)?;
        let active = EngineField {
            name: "active".to_string(),
            value: FieldValue::Bool(true),
            aggregatable: true,
            include_in_all: true,
        };
        engine.write(vec![doc("1", vec![active])]).await?;
        assert_eq!(engine.search(search(matching("_all", &["true"]))).await?.total, 1);
        assert_eq!(engine.search(search(matching("_all", &["false"]))).await?.total, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_phrase_and_range() -> Result<()> {
        let engine = TextEngine::in_memory("books", HEAP)?;
        engine
            .write(vec![
                doc("1", vec![text_field("title", "quick brown fox"), numeric_field("price", 5.0)]),
                doc("2", vec![text_field("title", "brown quick fox"), numeric_field("price", -3.5)]),
            ])
            .await?;

        let phrase = ExecutableQuery::Phrase {
            field: "title".to_string(),
            analyzer: None,
            terms: vec![(0, "quick".to_string()), (1, "brown".to_string())],
            slop: 0,
            boost: None,
        };
        let results = engine.search(search(phrase)).await?;
        assert_eq!(results.total, 1);
        assert_eq!(results.hits[0].id, "1");

        let range = ExecutableQuery::Range {
            field: "price".to_string(),
            lower: Bound::Included(TermValue::Numeric(-10.0)),
            upper: Bound::Excluded(TermValue::Numeric(0.0)),
            boost: None,
        };
        let results = engine.search(search(range)).await?;
        assert_eq!(results.total, 1);
        assert_eq!(results.hits[0].id, "2");
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_and_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        {
            let engine = TextEngine::open("books", dir.path(), HEAP)?;
            engine
                .write(vec![doc("1", vec![]), doc("2", vec![])])
                .await?;
            assert!(engine.delete("1").await?);
            assert!(!engine.delete("missing").await?);
            engine.close().await?;
            assert!(engine.write(vec![doc("3", vec![])]).await.is_err());
        }
        let engine = TextEngine::open("books", dir.path(), HEAP)?;
        assert_eq!(engine.doc_count()?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_search_with_aggregations() -> Result<()> {
        use crate::aggregations::{AggregationRequest, AggregationType};

        let engine = TextEngine::in_memory("books", HEAP)?;
        engine
            .write(vec![
                doc("1", vec![numeric_field("price", 10.0)]),
                doc("2", vec![numeric_field("price", 30.0)]),
            ])
            .await?;
        let results = engine
            .search(EngineSearch {
                query: ExecutableQuery::all(),
                limit: 0,
                aggregations: vec![AggregationRequest {
                    name: "avg_price".to_string(),
                    agg_type: AggregationType::Avg {
                        field: "price".to_string(),
                    },
                }],
            })
            .await?;
        assert_eq!(results.total, 2);
        assert!(results.hits.is_empty());
        assert_eq!(results.aggregations[0].value.metric(), Some(20.0));
        Ok(())
    }
}
