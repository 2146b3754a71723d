use super::{parse_json, print_json};
use anyhow::{Context, Result};
use quarry::catalog::IndexCatalog;
use quarry::Config;
use quarry_es_compat::SearchOrchestrator;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

pub fn orchestrator(catalog: &Arc<IndexCatalog>, config: &Config) -> SearchOrchestrator {
    SearchOrchestrator::new(catalog.clone(), config.search.clone())
}

/// Build a search body from `--query` DSL or a `-q` query string.
pub fn search_body(query: Option<&str>, q: Option<&str>, size: Option<usize>) -> Result<Value> {
    let mut body = match (query, q) {
        (Some(dsl), _) => {
            let parsed = parse_json("--query", dsl)?;
            // Accept a bare query node as well as a full body.
            if parsed.get("query").is_some() || parsed.get("aggs").is_some() || parsed.get("size").is_some() {
                parsed
            } else {
                json!({"query": parsed})
            }
        }
        (None, Some(text)) => json!({"query": {"query_string": {"query": text}}}),
        (None, None) => json!({}),
    };
    if let (Some(size), Some(obj)) = (size, body.as_object_mut()) {
        obj.insert("size".to_string(), json!(size));
    }
    Ok(body)
}

pub async fn run_search(orchestrator: &SearchOrchestrator, target: &str, body: &Value) -> Result<()> {
    let response = orchestrator.search(target, body).await?;
    tracing::debug!("{} hits in {}ms", response.hits.total.value, response.took);
    print_json(&response)
}

pub async fn run_msearch(orchestrator: &SearchOrchestrator, default_target: &str, input: &Path) -> Result<()> {
    let ndjson = std::fs::read_to_string(input).with_context(|| format!("Failed to read {:?}", input))?;
    print_json(&orchestrator.msearch(default_target, &ndjson).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_body_forms() -> Result<()> {
        assert_eq!(
            search_body(Some(r#"{"term": {"status": "ok"}}"#), None, Some(3))?,
            json!({"query": {"term": {"status": "ok"}}, "size": 3})
        );
        assert_eq!(
            search_body(Some(r#"{"query": {"match_all": {}}}"#), None, None)?,
            json!({"query": {"match_all": {}}})
        );
        assert_eq!(
            search_body(None, Some("title:fox"), None)?,
            json!({"query": {"query_string": {"query": "title:fox"}}})
        );
        assert!(search_body(Some("{"), None, None).is_err());
        Ok(())
    }
}
