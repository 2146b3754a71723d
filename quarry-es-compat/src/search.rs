//! Search orchestration: target resolution, per-index execution, fan-out
//! merge and multi-search.

use crate::aggregations::{parse_aggregations, validate};
use crate::error::EsErrorBody;
use crate::highlight::Highlighter;
use crate::pattern::{any_match, glob_match};
use crate::query::QueryCompiler;
use crate::request::{SearchRequest, SourceFilter};
use crate::response::{
    map_aggregations, Hit, HitsResponse, MsearchItem, MsearchResponse, SearchResponse, ShardStats,
    TotalHits,
};
use quarry::aggregations::{self, format_millis, AggregationRequest, AggregationResult};
use quarry::catalog::{IndexCatalog, IndexHandle};
use quarry::config::SearchConfig;
use quarry::document::flatten;
use quarry::engine::EngineSearch;
use quarry::{Error, Result};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Indices a request addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// One index by exact name.
    Single(String),
    /// Every index matched by a pattern or list.
    FanOut(Vec<String>),
}

/// A rendered hit plus the keys it is ranked by.
#[derive(Debug)]
struct RankedHit {
    score: f32,
    timestamp: i64,
    hit: Hit,
}

#[derive(Debug, Default)]
struct IndexHits {
    total: u64,
    hits: Vec<RankedHit>,
    aggregations: Vec<AggregationResult>,
}

/// What one index contributed to a search.
#[derive(Debug)]
enum IndexOutcome {
    Done(IndexHits),
    TimedOut,
    Failed(Error),
}

pub struct SearchOrchestrator {
    catalog: Arc<IndexCatalog>,
    config: SearchConfig,
}

impl SearchOrchestrator {
    pub fn new(catalog: Arc<IndexCatalog>, config: SearchConfig) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &Arc<IndexCatalog> {
        &self.catalog
    }

    /// Parse a search body and run it against `target`.
    pub async fn search(&self, target: &str, body: &Value) -> Result<SearchResponse> {
        let request = SearchRequest::parse(body, &self.config)?;
        self.search_request(target, &request).await
    }

    /// Run a parsed request.
    ///
    /// A plain name searches that index; an empty target, `_all`, a `*`
    /// pattern or a comma list fans out over every matching index.
    pub async fn search_request(&self, target: &str, request: &SearchRequest) -> Result<SearchResponse> {
        let aggs = match &request.aggs {
            Some(value) => parse_aggregations(value)?,
            None => Vec::new(),
        };
        let names = match self.resolve(target)? {
            Target::Single(name) => {
                self.catalog.require(&name)?;
                vec![name]
            }
            Target::FanOut(names) => names,
        };
        debug!("Searching {} index(es) for target '{}'", names.len(), target);

        let searches = names.iter().map(|name| self.search_index(name, request, &aggs));
        let outcomes = futures::future::join_all(searches).await;
        self.merge(names, outcomes, request, &aggs)
    }

    fn resolve(&self, target: &str) -> Result<Target> {
        let target = target.trim();
        let parts: Vec<&str> = target
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if let [single] = parts.as_slice() {
            if !single.contains('*') && *single != "_all" {
                return Ok(Target::Single(single.to_string()));
            }
        }

        let mut names = BTreeSet::new();
        if parts.is_empty() {
            names.extend(self.catalog.list(""));
        }
        for part in &parts {
            match *part {
                "_all" | "*" => names.extend(self.catalog.list("")),
                p if p.ends_with('*') && !p[..p.len() - 1].contains('*') => {
                    names.extend(self.catalog.list(&p[..p.len() - 1]));
                }
                p if p.contains('*') => names.extend(
                    self.catalog
                        .list("")
                        .into_iter()
                        .filter(|name| glob_match(p, name)),
                ),
                p => {
                    self.catalog.require(p)?;
                    names.insert(p.to_string());
                }
            }
        }
        if names.is_empty() {
            let shown = if target.is_empty() { "*" } else { target };
            return Err(Error::index_not_found(shown));
        }
        Ok(Target::FanOut(names.into_iter().collect()))
    }

    /// Compile and run the request on one index, bounded by its timeout.
    async fn search_index(&self, name: &str, request: &SearchRequest, aggs: &[AggregationRequest]) -> (IndexOutcome, u64) {
        let start = Instant::now();
        let Some(handle) = self.catalog.get(name) else {
            return (IndexOutcome::Failed(Error::index_not_found(name)), 0);
        };
        let outcome = bounded(name, request.timeout, execute(handle, request, aggs)).await;
        (outcome, elapsed_ms(start))
    }

    fn merge(
        &self,
        names: Vec<String>,
        outcomes: Vec<(IndexOutcome, u64)>,
        request: &SearchRequest,
        aggs: &[AggregationRequest],
    ) -> Result<SearchResponse> {
        let mut shards = ShardStats {
            total: names.len() as u32,
            ..ShardStats::default()
        };
        let mut timed_out = false;
        let mut took = 0;
        let mut total = 0;
        let mut pool = Vec::new();
        let mut partials = Vec::new();
        let mut last_error = None;

        for (name, (outcome, elapsed)) in names.iter().zip(outcomes) {
            took = took.max(elapsed);
            match outcome {
                IndexOutcome::Done(hits) => {
                    shards.successful += 1;
                    total += hits.total;
                    pool.extend(hits.hits);
                    partials.push(hits.aggregations);
                }
                IndexOutcome::TimedOut => {
                    shards.successful += 1;
                    timed_out = true;
                }
                IndexOutcome::Failed(e) => {
                    warn!("Search on index '{}' failed: {}", name, e);
                    shards.failed += 1;
                    last_error = Some(e);
                }
            }
        }
        let error = match last_error {
            Some(e) if shards.failed == shards.total => return Err(e),
            Some(e) => Some(EsErrorBody::from(&e).error),
            None => None,
        };

        pool.sort_by(compare_ranked);
        let max_score = pool.iter().map(|h| h.score).reduce(f32::max);
        let hits = pool
            .into_iter()
            .skip(request.from)
            .take(request.size)
            .map(|ranked| ranked.hit)
            .collect();

        let mut merged = aggregations::merge(partials);
        aggregations::finalize(aggs, &mut merged);

        Ok(SearchResponse {
            took,
            timed_out,
            shards,
            hits: HitsResponse {
                total: TotalHits::exact(total),
                max_score,
                hits,
            },
            aggregations: map_aggregations(&merged),
            error,
        })
    }

    /// Run NDJSON header/body pairs in order. A header `index` overrides
    /// `default_target`; each failure becomes an error entry.
    pub async fn msearch(&self, default_target: &str, ndjson: &str) -> Result<MsearchResponse> {
        let start = Instant::now();
        let lines: Vec<&str> = ndjson.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if lines.len() % 2 != 0 {
            return Err(Error::parsing(
                "The msearch request must be terminated by a newline and consist of header/body pairs",
            ));
        }
        let mut responses = Vec::with_capacity(lines.len() / 2);
        for pair in lines.chunks(2) {
            let item = match self.msearch_item(default_target, pair[0], pair[1]).await {
                Ok(response) => MsearchItem::Success(response),
                Err(e) => {
                    debug!("msearch item failed: {}", e);
                    MsearchItem::Error(EsErrorBody::from(&e))
                }
            };
            responses.push(item);
        }
        Ok(MsearchResponse {
            took: elapsed_ms(start),
            responses,
        })
    }

    async fn msearch_item(&self, default_target: &str, header: &str, body: &str) -> Result<SearchResponse> {
        let header: Value = serde_json::from_str(header)
            .map_err(|e| Error::parsing(format!("msearch header is not valid JSON: {}", e)))?;
        let target = match header.get("index") {
            None | Some(Value::Null) => default_target.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| Error::parsing("msearch header [index] must hold strings"))?
                .join(","),
            Some(other) => {
                return Err(Error::parsing(format!("msearch header [index] is invalid: {}", other)))
            }
        };
        let body: Value = serde_json::from_str(body)
            .map_err(|e| Error::parsing(format!("msearch body is not valid JSON: {}", e)))?;
        self.search(&target, &body).await
    }
}

/// Await one index's search, giving up once `budget` has elapsed.
async fn bounded<F>(name: &str, budget: Option<Duration>, run: F) -> IndexOutcome
where
    F: Future<Output = Result<IndexHits>>,
{
    let result = match budget {
        Some(budget) => match tokio::time::timeout(budget, run).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Search on index '{}' timed out after {:?}", name, budget);
                return IndexOutcome::TimedOut;
            }
        },
        None => run.await,
    };
    match result {
        Ok(hits) => IndexOutcome::Done(hits),
        Err(e) => IndexOutcome::Failed(e),
    }
}

async fn execute(handle: Arc<IndexHandle>, request: &SearchRequest, aggs: &[AggregationRequest]) -> Result<IndexHits> {
    let mappings = handle.mappings();
    let analyzers = handle.analyzers();
    let query = QueryCompiler::new(&mappings, &analyzers).compile(&request.query)?;
    validate(aggs, &mappings)?;

    let results = handle
        .search(EngineSearch {
            query: query.clone(),
            limit: request.from.saturating_add(request.size),
            aggregations: aggs.to_vec(),
        })
        .await?;

    let highlighter = request
        .highlight
        .as_ref()
        .map(|h| Highlighter::new(h, &query, &mappings, &analyzers));
    let hits = results
        .hits
        .into_iter()
        .map(|engine_hit| {
            let highlight = highlighter
                .as_ref()
                .map(|h| h.highlight(&engine_hit.source))
                .unwrap_or_default();
            RankedHit {
                score: engine_hit.score,
                timestamp: engine_hit.timestamp,
                hit: Hit {
                    index: engine_hit.index,
                    doc_type: "_doc".to_string(),
                    id: engine_hit.id,
                    score: Some(engine_hit.score),
                    timestamp: format_millis(engine_hit.timestamp),
                    fields: project_fields(&engine_hit.source, &request.fields),
                    source: project_source(engine_hit.source, &request.source),
                    highlight,
                },
            }
        })
        .collect();
    Ok(IndexHits {
        total: results.total,
        hits,
        aggregations: results.aggregations,
    })
}

/// Score descending, then newer first, then index and id for a stable order.
fn compare_ranked(a: &RankedHit, b: &RankedHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| a.hit.index.cmp(&b.hit.index))
        .then_with(|| a.hit.id.cmp(&b.hit.id))
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn project_source(source: Value, filter: &SourceFilter) -> Option<Value> {
    match filter {
        SourceFilter::All => Some(source),
        SourceFilter::None => None,
        SourceFilter::Patterns { includes, excludes } => match source {
            Value::Object(map) => Some(Value::Object(filter_object(&map, includes, excludes, ""))),
            other => Some(other),
        },
    }
}

/// Keep paths matched by `includes` (all when empty) minus `excludes`.
fn filter_object(map: &Map<String, Value>, includes: &[String], excludes: &[String], prefix: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        if any_match(excludes, &path) {
            continue;
        }
        let included = includes.is_empty() || any_match(includes, &path);
        match value {
            Value::Object(inner) => {
                let nested = if included {
                    filter_object(inner, &[], excludes, &path)
                } else {
                    filter_object(inner, includes, excludes, &path)
                };
                if included || !nested.is_empty() {
                    out.insert(key.clone(), Value::Object(nested));
                }
            }
            other if included => {
                out.insert(key.clone(), other.clone());
            }
            _ => {}
        }
    }
    out
}

fn project_fields(source: &Value, patterns: &[String]) -> BTreeMap<String, Vec<Value>> {
    let Some(object) = source.as_object().filter(|_| !patterns.is_empty()) else {
        return BTreeMap::new();
    };
    flatten(object, &[])
        .into_iter()
        .filter(|(path, _)| any_match(patterns, path))
        .map(|(path, values)| (path, values.into_iter().cloned().collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry::catalog::CatalogOptions;
    use quarry::mapping::{FieldType, Mappings, Property};
    use serde_json::json;
    use tempfile::TempDir;

    fn orchestrator(dir: &TempDir) -> Result<SearchOrchestrator> {
        let catalog = IndexCatalog::open(dir.path(), CatalogOptions::default())?;
        Ok(SearchOrchestrator::new(Arc::new(catalog), SearchConfig::default()))
    }

    async fn seed(orchestrator: &SearchOrchestrator, index: &str, docs: &[Value]) -> Result<()> {
        let handle = orchestrator.catalog().get_or_create(index)?;
        for (i, doc) in docs.iter().enumerate() {
            handle.index_document(Some(format!("{}-{}", index, i)), doc).await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_fan_out_sums_totals() -> Result<()> {
        let dir = TempDir::new()?;
        let search = orchestrator(&dir)?;
        seed(&search, "a_1", &[json!({"msg": "fox one"}), json!({"msg": "fox two"})]).await?;
        seed(&search, "a_2", &[json!({"msg": "fox three"})]).await?;
        seed(&search, "b_1", &[json!({"msg": "fox elsewhere"})]).await?;

        let body = json!({"query": {"match": {"msg": "fox"}}, "size": 2});
        let response = search.search("a_*", &body).await?;
        assert_eq!(response.hits.total.value, 3);
        assert_eq!(response.hits.hits.len(), 2);
        assert_eq!(response.shards.total, 2);
        assert_eq!(response.shards.successful, 2);
        assert!(response
            .hits
            .hits
            .windows(2)
            .all(|w| w[0].score >= w[1].score));
        assert!(response.hits.hits.iter().all(|h| h.index.starts_with("a_")));
        Ok(())
    }

    #[tokio::test]
    async fn test_single_index_and_not_found() -> Result<()> {
        let dir = TempDir::new()?;
        let search = orchestrator(&dir)?;
        seed(&search, "logs", &[json!({"level": "error", "code": 7})]).await?;

        let response = search.search("logs", &json!({"query": {"term": {"code": 7}}})).await?;
        assert_eq!(response.hits.total.value, 1);
        assert_eq!(response.hits.hits[0].doc_type, "_doc");
        assert_eq!(response.shards.total, 1);

        let err = search.search("missing", &json!({})).await.unwrap_err();
        assert!(err.is_not_found());
        let err = search.search("nomatch-*", &json!({})).await.unwrap_err();
        assert!(err.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_parse_errors_surface() -> Result<()> {
        let dir = TempDir::new()?;
        let search = orchestrator(&dir)?;
        seed(&search, "logs", &[json!({"f": "x"})]).await?;
        let err = search
            .search("logs", &json!({"query": {"match_phrase": {"f": {"bogus": 1}}}}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ParsingException(_)));
        assert!(err.to_string().contains("bogus"));
        Ok(())
    }

    #[tokio::test]
    async fn test_aggregations_merge_across_indices() -> Result<()> {
        let dir = TempDir::new()?;
        let search = orchestrator(&dir)?;
        let mut mappings = Mappings::new();
        mappings.insert("status", Property::new(FieldType::Keyword));
        for name in ["m_1", "m_2"] {
            search.catalog().create(name, None, None, Some(mappings.clone()))?;
        }
        seed(&search, "m_1", &[json!({"status": "up", "price": 10}), json!({"status": "down", "price": 30})]).await?;
        seed(&search, "m_2", &[json!({"status": "up", "price": 50})]).await?;

        let body = json!({
            "size": 0,
            "aggs": {
                "by_status": {"terms": {"field": "status"}},
                "avg_price": {"avg": {"field": "price"}},
                "top": {"max": {"field": "price"}}
            }
        });
        let response = search.search("m_*", &body).await?;
        assert!(response.hits.hits.is_empty());
        let json = serde_json::to_value(&response.aggregations)?;
        assert_eq!(json["by_status"]["buckets"][0], json!({"key": "up", "doc_count": 2}));
        assert_eq!(json["avg_price"]["value"], json!(30.0));
        assert_eq!(json["top"]["value"], json!(50.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_source_fields_and_highlight() -> Result<()> {
        let dir = TempDir::new()?;
        let search = orchestrator(&dir)?;
        seed(&search, "docs", &[json!({"title": "quick fox", "user": {"name": "ann", "age": 3}})]).await?;

        let body = json!({
            "query": {"match": {"title": "fox"}},
            "_source": {"includes": ["user.*"], "excludes": ["user.age"]},
            "fields": ["title"],
            "highlight": {"fields": {"title": {}}}
        });
        let response = search.search("docs", &body).await?;
        let hit = &response.hits.hits[0];
        assert_eq!(hit.source, Some(json!({"user": {"name": "ann"}})));
        assert_eq!(hit.fields["title"], vec![json!("quick fox")]);
        assert_eq!(hit.highlight["title"], vec!["quick <mark>fox</mark>".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_msearch_mixes_results_and_errors() -> Result<()> {
        let dir = TempDir::new()?;
        let search = orchestrator(&dir)?;
        seed(&search, "logs", &[json!({"msg": "hello"})]).await?;

        let ndjson = concat!(
            "{}\n",
            "{\"query\": {\"match_all\": {}}}\n",
            "{\"index\": \"missing\"}\n",
            "{}\n",
            "{\"index\": \"logs\"}\n",
            "{\"query\": {\"nope\": {}}}\n",
        );
        let response = search.msearch("logs", ndjson).await?;
        assert_eq!(response.responses.len(), 3);
        assert!(matches!(&response.responses[0], MsearchItem::Success(r) if r.hits.total.value == 1));
        assert!(matches!(&response.responses[1], MsearchItem::Error(e) if e.status == 404));
        assert!(matches!(&response.responses[2], MsearchItem::Error(e) if e.status == 400));

        assert!(search.msearch("logs", "{}\n").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_other_indices() -> Result<()> {
        let dir = TempDir::new()?;
        let search = orchestrator(&dir)?;
        seed(&search, "p_1", &[json!({"price": 5})]).await?;
        seed(&search, "p_2", &[json!({"price": "abc"})]).await?;

        let response = search.search("p_*", &json!({"query": {"term": {"price": "abc"}}})).await?;
        assert_eq!(response.shards, ShardStats { total: 2, successful: 1, skipped: 0, failed: 1 });
        assert_eq!(response.hits.total.value, 1);
        assert_eq!(response.hits.hits[0].index, "p_2");
        let error = response.error.as_ref().map(|e| e.error_type.as_str());
        assert_eq!(error, Some("parsing_exception"));
        assert!(!response.timed_out);
        Ok(())
    }

    #[tokio::test]
    async fn test_all_indices_failing_returns_error() -> Result<()> {
        let dir = TempDir::new()?;
        let search = orchestrator(&dir)?;
        seed(&search, "n_1", &[json!({"price": 5})]).await?;
        seed(&search, "n_2", &[json!({"price": 6})]).await?;

        let err = search
            .search("n_*", &json!({"query": {"term": {"price": "abc"}}}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ParsingException(_)));

        let ok = search.search("n_*", &json!({"query": {"term": {"price": 5}}})).await?;
        assert!(ok.error.is_none());
        assert!(serde_json::to_value(&ok)?.get("error").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_equal_scores_rank_newer_then_by_index() -> Result<()> {
        let dir = TempDir::new()?;
        let search = orchestrator(&dir)?;
        seed(&search, "t_1", &[json!({"@timestamp": 1000, "n": 1}), json!({"@timestamp": 3000, "n": 2})]).await?;
        seed(&search, "t_2", &[json!({"@timestamp": 2000, "n": 3}), json!({"@timestamp": 1000, "n": 4})]).await?;

        let response = search.search("t_*", &json!({"query": {"match_all": {}}})).await?;
        let order: Vec<&str> = response.hits.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(order, vec!["t_1-1", "t_2-0", "t_1-0", "t_2-1"]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out_slow_search() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, Error>(IndexHits::default())
        };
        let outcome = bounded("slow", Some(Duration::from_secs(1)), slow).await;
        assert!(matches!(outcome, IndexOutcome::TimedOut));

        let quick = async { Ok::<_, Error>(IndexHits::default()) };
        let outcome = bounded("quick", Some(Duration::from_secs(1)), quick).await;
        assert!(matches!(outcome, IndexOutcome::Done(_)));

        let failing = async { Err::<IndexHits, _>(Error::parsing("bad")) };
        let outcome = bounded("failing", None, failing).await;
        assert!(matches!(outcome, IndexOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_timed_out_index_counts_as_successful() -> Result<()> {
        let dir = TempDir::new()?;
        let search = orchestrator(&dir)?;
        let request = SearchRequest::parse(&json!({}), &SearchConfig::default())?;
        let ranked = RankedHit {
            score: 1.0,
            timestamp: 0,
            hit: Hit {
                index: "x_1".to_string(),
                doc_type: "_doc".to_string(),
                id: "1".to_string(),
                score: Some(1.0),
                timestamp: format_millis(0),
                source: None,
                fields: BTreeMap::new(),
                highlight: BTreeMap::new(),
            },
        };
        let outcomes = vec![
            (
                IndexOutcome::Done(IndexHits {
                    total: 1,
                    hits: vec![ranked],
                    aggregations: vec![],
                }),
                3,
            ),
            (IndexOutcome::TimedOut, 7),
        ];
        let names = vec!["x_1".to_string(), "x_2".to_string()];
        let response = search.merge(names, outcomes, &request, &[])?;
        assert!(response.timed_out);
        assert_eq!(response.took, 7);
        assert_eq!(response.shards, ShardStats { total: 2, successful: 2, skipped: 0, failed: 0 });
        assert_eq!(response.hits.total.value, 1);
        assert!(response.error.is_none());
        Ok(())
    }

    #[test]
    fn test_filter_object() {
        let source = json!({"a": 1, "b": {"c": 2, "d": 3}, "e": {"f": 4}});
        let map = source.as_object().cloned().unwrap_or_default();
        let out = filter_object(&map, &["b".to_string()], &["b.d".to_string()], "");
        assert_eq!(Value::Object(out), json!({"b": {"c": 2}}));
        let out = filter_object(&map, &[], &["e".to_string()], "");
        assert_eq!(Value::Object(out), json!({"a": 1, "b": {"c": 2, "d": 3}}));
    }
}
