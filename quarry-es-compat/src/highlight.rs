//! Hit highlighting.
//!
//! Stored values are re-analyzed with the field's index analyzer; tokens
//! whose text matches a positive query term are wrapped in the field's
//! tags. Keyword values are matched whole.

use crate::pattern::glob_match;
use crate::request::{HighlightField, HighlightRequest};
use quarry::analysis::AnalyzerSet;
use quarry::document::flatten;
use quarry::mapping::{FieldType, Mappings, ALL_FIELD, TIMESTAMP_FIELD};
use quarry::query::ExecutableQuery;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

pub struct Highlighter<'a> {
    request: &'a HighlightRequest,
    mappings: &'a Mappings,
    analyzers: &'a AnalyzerSet,
    /// Query terms per field; `_all` terms apply to every field.
    terms: Vec<(&'a str, &'a str)>,
    /// Fields the query reads, used when the request names none.
    query_fields: Vec<&'a str>,
}

impl<'a> Highlighter<'a> {
    pub fn new(
        request: &'a HighlightRequest,
        query: &'a ExecutableQuery,
        mappings: &'a Mappings,
        analyzers: &'a AnalyzerSet,
    ) -> Self {
        Self {
            request,
            mappings,
            analyzers,
            terms: query.highlight_terms(),
            query_fields: query.fields(),
        }
    }

    /// Highlighted fragments of one hit, keyed by field.
    pub fn highlight(&self, source: &Value) -> BTreeMap<String, Vec<String>> {
        let mut out = BTreeMap::new();
        let Some(object) = source.as_object() else {
            return out;
        };
        if self.terms.is_empty() {
            return out;
        }
        let default_spec = HighlightField::default();
        for (field, values) in flatten(object, &[TIMESTAMP_FIELD]) {
            let Some(spec) = self.field_spec(&field, &default_spec) else {
                continue;
            };
            let terms: HashSet<&str> = self
                .terms
                .iter()
                .filter(|(f, _)| *f == field || *f == ALL_FIELD)
                .map(|(_, t)| *t)
                .collect();
            if terms.is_empty() {
                continue;
            }
            let (pre, post) = self.request.tags(spec);
            let fragments: Vec<String> = values
                .iter()
                .filter_map(|v| v.as_str())
                .filter_map(|text| self.fragment(&field, text, &terms, &pre, &post))
                .collect();
            if !fragments.is_empty() {
                out.insert(field, fragments);
            }
        }
        out
    }

    /// The tag spec for `field` when it is to be highlighted.
    fn field_spec<'s>(&'s self, field: &str, default: &'s HighlightField) -> Option<&'s HighlightField> {
        if let Some(spec) = self.request.fields.get(field) {
            return Some(spec);
        }
        let field_type = self.mappings.get(field).map(|p| p.field_type);
        if self.request.fields.is_empty() {
            let read = self.query_fields.iter().any(|f| *f == field)
                || (self.query_fields.contains(&ALL_FIELD) && field_type == Some(FieldType::Text));
            return read.then_some(default);
        }
        // Patterns only reach text fields and fields marked highlightable.
        let eligible = match self.mappings.get(field) {
            Some(prop) => prop.field_type == FieldType::Text || prop.highlightable,
            None => false,
        };
        if !eligible {
            return None;
        }
        self.request
            .fields
            .iter()
            .find(|(pattern, _)| pattern.contains('*') && glob_match(pattern, field))
            .map(|(_, spec)| spec)
    }

    fn fragment(&self, field: &str, text: &str, terms: &HashSet<&str>, pre: &str, post: &str) -> Option<String> {
        let prop = self.mappings.get(field);
        match prop.map(|p| p.field_type) {
            Some(FieldType::Keyword) => terms
                .contains(text)
                .then(|| format!("{}{}{}", pre, text, post)),
            Some(FieldType::Text) | None => {
                let analyzer = self
                    .analyzers
                    .resolve_or_default(prop.and_then(|p| p.index_analyzer()))
                    .ok()?;
                let filtered = analyzer.filter_text(text);
                let mut spans: Vec<(usize, usize)> = analyzer
                    .analyze(text)
                    .into_iter()
                    .filter(|t| terms.contains(t.text.as_str()))
                    .map(|t| (t.offset_from, t.offset_to))
                    .collect();
                wrap(&filtered, &mut spans, pre, post)
            }
            Some(_) => None,
        }
    }
}

/// Wrap byte spans of `text` in tags, merging overlaps. `None` when no
/// span lands on valid char boundaries.
fn wrap(text: &str, spans: &mut Vec<(usize, usize)>, pre: &str, post: &str) -> Option<String> {
    spans.retain(|(from, to)| from < to && text.get(*from..*to).is_some());
    if spans.is_empty() {
        return None;
    }
    spans.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    for &(from, to) in spans.iter() {
        match merged.last_mut() {
            Some(last) if from <= last.1 => last.1 = last.1.max(to),
            _ => merged.push((from, to)),
        }
    }
    let mut out = String::with_capacity(text.len() + merged.len() * (pre.len() + post.len()));
    let mut cursor = 0;
    for (from, to) in merged {
        out.push_str(&text[cursor..from]);
        out.push_str(pre);
        out.push_str(&text[from..to]);
        out.push_str(post);
        cursor = to;
    }
    out.push_str(&text[cursor..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry::analysis::AnalyzerResolver;
    use quarry::mapping::Property;
    use quarry::Result;
    use serde_json::json;

    fn mappings() -> Mappings {
        let mut m = Mappings::new();
        m.insert("title", Property::new(FieldType::Text));
        m.insert("status", Property::new(FieldType::Keyword));
        m
    }

    fn request(fields: &[&str]) -> HighlightRequest {
        HighlightRequest {
            pre_tags: Vec::new(),
            post_tags: Vec::new(),
            fields: fields
                .iter()
                .map(|f| (f.to_string(), HighlightField::default()))
                .collect(),
        }
    }

    fn match_query(field: &str, terms: &[&str]) -> ExecutableQuery {
        ExecutableQuery::Match {
            field: field.to_string(),
            analyzer: None,
            terms: terms.iter().map(|t| t.to_string()).collect(),
            operator: quarry::query::Operator::Or,
            fuzziness: None,
            prefix_length: None,
            boost: None,
        }
    }

    #[test]
    fn test_wraps_matching_tokens() -> Result<()> {
        let analyzers = AnalyzerResolver::new().build(None)?;
        let mappings = mappings();
        let request = request(&["title"]);
        let query = match_query("title", &["quick", "fox"]);
        let highlighter = Highlighter::new(&request, &query, &mappings, &analyzers);
        let out = highlighter.highlight(&json!({"title": "The Quick brown Fox", "status": "fox"}));
        assert_eq!(out["title"], vec!["The <mark>Quick</mark> brown <mark>Fox</mark>".to_string()]);
        assert!(!out.contains_key("status"));
        Ok(())
    }

    #[test]
    fn test_all_terms_and_keyword_values() -> Result<()> {
        let analyzers = AnalyzerResolver::new().build(None)?;
        let mappings = mappings();
        let mut request = request(&["title", "status"]);
        request.pre_tags = vec!["<em>".to_string()];
        request.post_tags = vec!["</em>".to_string()];
        let query = ExecutableQuery::Bool {
            must: vec![match_query(ALL_FIELD, &["fox"])],
            should: Vec::new(),
            must_not: Vec::new(),
            filter: Vec::new(),
            minimum_should_match: None,
            boost: None,
        };
        let highlighter = Highlighter::new(&request, &query, &mappings, &analyzers);
        let out = highlighter.highlight(&json!({"title": "a fox", "status": "fox"}));
        assert_eq!(out["title"], vec!["a <em>fox</em>".to_string()]);
        assert_eq!(out["status"], vec!["<em>fox</em>".to_string()]);
        Ok(())
    }

    #[test]
    fn test_defaults_to_query_fields() -> Result<()> {
        let analyzers = AnalyzerResolver::new().build(None)?;
        let mappings = mappings();
        let request = request(&[]);
        let query = match_query("title", &["fox"]);
        let highlighter = Highlighter::new(&request, &query, &mappings, &analyzers);
        let out = highlighter.highlight(&json!({"title": "fox", "other": "fox"}));
        assert_eq!(out.len(), 1);
        assert_eq!(out["title"], vec!["<mark>fox</mark>".to_string()]);
        Ok(())
    }

    #[test]
    fn test_wrap_merges_overlaps() {
        let mut spans = vec![(0, 3), (2, 5), (9, 20)];
        assert_eq!(wrap("abcdefgh", &mut spans, "[", "]"), Some("[abcde]fgh".to_string()));
        assert_eq!(wrap("abc", &mut Vec::new(), "[", "]"), None);
    }
}
