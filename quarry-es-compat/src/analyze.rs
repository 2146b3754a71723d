//! `_analyze`: run an analyzer over text and report its tokens.

use quarry::analysis::{Analyzer, AnalyzerSet};
use quarry::catalog::IndexCatalog;
use quarry::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AnalyzeText {
    One(String),
    Many(Vec<String>),
}

impl AnalyzeText {
    fn as_slice(&self) -> &[String] {
        match self {
            AnalyzeText::One(s) => std::slice::from_ref(s),
            AnalyzeText::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzeRequest {
    pub text: AnalyzeText,
    #[serde(default)]
    pub analyzer: Option<String>,
    #[serde(default)]
    pub tokenizer: Option<Value>,
    #[serde(default)]
    pub char_filter: Vec<Value>,
    #[serde(default)]
    pub filter: Vec<Value>,
    /// Analyze with this field's index analyzer.
    #[serde(default)]
    pub field: Option<String>,
}

impl AnalyzeRequest {
    pub fn parse(body: &Value) -> Result<Self> {
        serde_json::from_value(body.clone()).map_err(|e| Error::parsing(format!("[analyze] {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeToken {
    pub token: String,
    pub start_offset: usize,
    pub end_offset: usize,
    #[serde(rename = "type")]
    pub token_type: String,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub tokens: Vec<AnalyzeToken>,
}

/// Analyze against `index`'s analyzers and settings, or the built-ins when
/// no index is given.
pub fn analyze(catalog: &IndexCatalog, index: Option<&str>, request: &AnalyzeRequest) -> Result<AnalyzeResponse> {
    let handle = index.map(|name| catalog.require(name)).transpose()?;
    let analyzers: Arc<AnalyzerSet> = match &handle {
        Some(handle) => handle.analyzers(),
        None => Arc::new(catalog.resolver().build(None)?),
    };

    let analyzer: Arc<Analyzer> = if let Some(name) = &request.analyzer {
        analyzers.resolve(name)?
    } else if let Some(field) = &request.field {
        let mappings = handle.as_ref().map(|h| h.mappings());
        let configured = mappings
            .as_ref()
            .and_then(|m| m.get(field))
            .and_then(|p| p.index_analyzer().map(str::to_string));
        analyzers.resolve_or_default(configured.as_deref())?
    } else if let Some(tokenizer) = &request.tokenizer {
        let settings = handle.as_ref().map(|h| h.settings());
        let analysis = settings.as_ref().and_then(|s| s.analysis.as_ref());
        Arc::new(catalog.resolver().adhoc(tokenizer, &request.char_filter, &request.filter, analysis)?)
    } else if request.char_filter.is_empty() && request.filter.is_empty() {
        analyzers.default_analyzer()
    } else {
        return Err(Error::illegal("tokenizer is required when char_filter or filter is set"));
    };

    Ok(AnalyzeResponse {
        tokens: run(&analyzer, request.text.as_slice()),
    })
}

/// Tokens of every text; positions and offsets continue across texts.
fn run(analyzer: &Analyzer, texts: &[String]) -> Vec<AnalyzeToken> {
    let keyword = analyzer.tokenizer().kind() == "keyword";
    let mut tokens = Vec::new();
    let mut base_offset = 0;
    let mut base_position = 0;
    for text in texts {
        let analyzed = analyzer.analyze(text);
        let last_position = analyzed.iter().map(|t| t.position).max();
        tokens.extend(analyzed.into_iter().map(|t| AnalyzeToken {
            token_type: token_type(keyword, &t.text).to_string(),
            token: t.text,
            start_offset: base_offset + t.offset_from,
            end_offset: base_offset + t.offset_to,
            position: base_position + t.position,
        }));
        base_offset += text.len() + 1;
        if let Some(last) = last_position {
            base_position += last + 1;
        }
    }
    tokens
}

fn token_type(keyword: bool, token: &str) -> &'static str {
    if keyword {
        "word"
    } else if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
        "<NUM>"
    } else {
        "<ALPHANUM>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry::analysis::IndexSettings;
    use quarry::catalog::CatalogOptions;
    use serde_json::json;
    use tempfile::TempDir;

    fn tokens(response: &AnalyzeResponse) -> Vec<&str> {
        response.tokens.iter().map(|t| t.token.as_str()).collect()
    }

    #[test]
    fn test_builtin_analyzer() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = IndexCatalog::open(dir.path(), CatalogOptions::default())?;
        let request = AnalyzeRequest::parse(&json!({"analyzer": "standard", "text": "The 2 Foxes"}))?;
        let response = analyze(&catalog, None, &request)?;
        assert_eq!(tokens(&response), vec!["the", "2", "foxes"]);
        assert_eq!(response.tokens[1].token_type, "<NUM>");
        assert_eq!(response.tokens[2].start_offset, 6);
        assert_eq!(response.tokens[2].end_offset, 11);
        assert_eq!(response.tokens[2].position, 2);
        Ok(())
    }

    #[test]
    fn test_adhoc_chain_and_array_text() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = IndexCatalog::open(dir.path(), CatalogOptions::default())?;
        let request = AnalyzeRequest::parse(&json!({
            "tokenizer": "whitespace",
            "filter": ["lowercase"],
            "text": ["Hello World", "Again"]
        }))?;
        let response = analyze(&catalog, None, &request)?;
        assert_eq!(tokens(&response), vec!["hello", "world", "again"]);
        assert_eq!(response.tokens[2].position, 2);
        assert_eq!(response.tokens[2].start_offset, 12);

        let keyword = AnalyzeRequest::parse(&json!({"tokenizer": "keyword", "text": "New York"}))?;
        let response = analyze(&catalog, None, &keyword)?;
        assert_eq!(tokens(&response), vec!["New York"]);
        assert_eq!(response.tokens[0].token_type, "word");
        Ok(())
    }

    #[test]
    fn test_index_analyzer_and_field() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = IndexCatalog::open(dir.path(), CatalogOptions::default())?;
        let settings = IndexSettings::from_json(&json!({
            "analysis": {"analyzer": {"ws": {"type": "whitespace"}}}
        }))?;
        let mappings = quarry::mapping::Mappings::from_json(&json!({
            "properties": {"code": {"type": "text", "analyzer": "ws"}}
        }))?;
        catalog.create("docs", None, Some(settings), Some(mappings))?;

        let by_field = AnalyzeRequest::parse(&json!({"field": "code", "text": "A-1 B-2"}))?;
        assert_eq!(tokens(&analyze(&catalog, Some("docs"), &by_field)?), vec!["A-1", "B-2"]);

        let by_name = AnalyzeRequest::parse(&json!({"analyzer": "ws", "text": "x y"}))?;
        assert!(analyze(&catalog, None, &by_name).is_err());
        assert!(analyze(&catalog, Some("missing"), &by_name).unwrap_err().is_not_found());
        Ok(())
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = AnalyzeRequest::parse(&json!({"text": "x", "explain": true})).unwrap_err();
        assert!(matches!(err, Error::ParsingException(_)));
    }
}
