//! Search request body.

use crate::query::QueryNode;
use quarry::config::SearchConfig;
use quarry::{Error, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_PRE_TAG: &str = "<mark>";
pub const DEFAULT_POST_TAG: &str = "</mark>";

/// `_source` projection of returned hits.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SourceFilter {
    #[default]
    All,
    None,
    Patterns {
        includes: Vec<String>,
        excludes: Vec<String>,
    },
}

/// Tags for one highlighted field; `None` inherits the request-level tags.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HighlightField {
    pub pre_tags: Option<Vec<String>>,
    pub post_tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HighlightRequest {
    pub pre_tags: Vec<String>,
    pub post_tags: Vec<String>,
    /// Field names or `*` patterns.
    pub fields: BTreeMap<String, HighlightField>,
}

impl HighlightRequest {
    /// Tags for `field`: its own override, else the request's tags.
    pub fn tags(&self, field: &HighlightField) -> (String, String) {
        let first = |own: &Option<Vec<String>>, shared: &[String], default: &str| {
            own.as_deref()
                .and_then(|t| t.first())
                .or_else(|| shared.first())
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };
        (
            first(&field.pre_tags, &self.pre_tags, DEFAULT_PRE_TAG),
            first(&field.post_tags, &self.post_tags, DEFAULT_POST_TAG),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: QueryNode,
    /// Raw `aggs` object, parsed and validated per index.
    pub aggs: Option<Value>,
    pub size: usize,
    pub from: usize,
    /// Budget of each index's search.
    pub timeout: Option<Duration>,
    pub source: SourceFilter,
    /// Patterns of `fields` to return per hit.
    pub fields: Vec<String>,
    pub highlight: Option<HighlightRequest>,
}

impl SearchRequest {
    /// A `match_all` request with the configured default size.
    pub fn match_all(config: &SearchConfig) -> Self {
        Self {
            query: QueryNode::MatchAll { boost: None },
            aggs: None,
            size: config.default_size,
            from: 0,
            timeout: None,
            source: SourceFilter::All,
            fields: Vec::new(),
            highlight: None,
        }
    }

    /// Parse a search body. `null` and `{}` mean match everything.
    pub fn parse(body: &Value, config: &SearchConfig) -> Result<Self> {
        let mut request = Self::match_all(config);
        let obj = match body {
            Value::Null => return Ok(request),
            Value::Object(obj) => obj,
            _ => return Err(Error::parsing("search request body must be an object")),
        };
        for (key, value) in obj {
            match key.as_str() {
                "query" => request.query = QueryNode::parse(value)?,
                "aggs" | "aggregations" => {
                    if !value.is_object() {
                        return Err(Error::parsing(format!("[{}] must be an object", key)));
                    }
                    request.aggs = Some(value.clone());
                }
                "size" => request.size = non_negative(key, value)?,
                "from" => request.from = non_negative(key, value)?,
                "timeout" => request.timeout = Some(parse_timeout(value)?),
                "_source" => request.source = parse_source(value)?,
                "fields" => request.fields = patterns(key, value)?,
                "highlight" => request.highlight = Some(parse_highlight(value)?),
                other => {
                    return Err(Error::parsing(format!(
                        "Unknown key for a START_OBJECT in [{}].",
                        other
                    )))
                }
            }
        }
        let window = request.from.saturating_add(request.size);
        if window > config.max_size {
            return Err(Error::illegal(format!(
                "Result window is too large, from + size must be less than or equal to: [{}] but was [{}].",
                config.max_size, window
            )));
        }
        Ok(request)
    }
}

fn non_negative(key: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .map(|n| n as usize)
        .ok_or_else(|| {
            Error::illegal(format!("[{}] must be a non-negative integer, got [{}]", key, value))
        })
}

/// `timeout`: a number of seconds, or a string with a unit suffix
/// (`ms`, `s`, `m`, `h`, `d`).
pub fn parse_timeout(value: &Value) -> Result<Duration> {
    let invalid = || Error::illegal(format!("failed to parse setting [timeout] with value [{}]", value));
    match value {
        Value::Number(n) => {
            let secs = n.as_f64().filter(|s| *s >= 0.0).ok_or_else(invalid)?;
            Ok(Duration::from_secs_f64(secs))
        }
        Value::String(s) => {
            let s = s.trim();
            let split = s.find(|c: char| !c.is_ascii_digit() && c != '.').ok_or_else(|| {
                Error::illegal(format!(
                    "failed to parse setting [timeout] with value [{}] as a time value: unit is missing or unrecognized",
                    s
                ))
            })?;
            let (num, unit) = s.split_at(split);
            let n: f64 = num.parse().map_err(|_| invalid())?;
            let millis = match unit {
                "ms" => n,
                "s" => n * 1_000.0,
                "m" => n * 60_000.0,
                "h" => n * 3_600_000.0,
                "d" => n * 86_400_000.0,
                _ => return Err(invalid()),
            };
            Ok(Duration::from_secs_f64(millis / 1_000.0))
        }
        _ => Err(invalid()),
    }
}

fn patterns(key: &str, value: &Value) -> Result<Vec<String>> {
    let invalid = || Error::parsing(format!("[{}] must be a string or an array of strings", key));
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                Value::Object(o) => o
                    .get("field")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(invalid),
                _ => Err(invalid()),
            })
            .collect(),
        _ => Err(invalid()),
    }
}

fn parse_source(value: &Value) -> Result<SourceFilter> {
    match value {
        Value::Bool(true) => Ok(SourceFilter::All),
        Value::Bool(false) => Ok(SourceFilter::None),
        Value::String(_) | Value::Array(_) => Ok(SourceFilter::Patterns {
            includes: patterns("_source", value)?,
            excludes: Vec::new(),
        }),
        Value::Object(obj) => {
            let list = |key: &str| match obj.get(key) {
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(v) => patterns(key, v),
            };
            if let Some(key) = obj.keys().find(|k| !matches!(k.as_str(), "includes" | "excludes")) {
                return Err(Error::parsing(format!("[_source] does not support [{}]", key)));
            }
            Ok(SourceFilter::Patterns {
                includes: list("includes")?,
                excludes: list("excludes")?,
            })
        }
        _ => Err(Error::parsing("[_source] must be a boolean, string, array or object")),
    }
}

fn tags(key: &str, value: Option<&Value>) -> Result<Option<Vec<String>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => patterns(key, v).map(Some),
    }
}

fn parse_highlight(value: &Value) -> Result<HighlightRequest> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::parsing("[highlight] must be an object"))?;
    check_keys("highlight", obj, &["pre_tags", "post_tags", "fields"])?;
    let mut fields = BTreeMap::new();
    match obj.get("fields") {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (name, spec) in map {
                fields.insert(name.clone(), highlight_field(name, spec)?);
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                let map = item
                    .as_object()
                    .ok_or_else(|| Error::parsing("[highlight] fields entries must be objects"))?;
                for (name, spec) in map {
                    fields.insert(name.clone(), highlight_field(name, spec)?);
                }
            }
        }
        Some(_) => return Err(Error::parsing("[highlight] fields must be an object or an array")),
    }
    Ok(HighlightRequest {
        pre_tags: tags("pre_tags", obj.get("pre_tags"))?.unwrap_or_default(),
        post_tags: tags("post_tags", obj.get("post_tags"))?.unwrap_or_default(),
        fields,
    })
}

fn highlight_field(name: &str, spec: &Value) -> Result<HighlightField> {
    let obj = match spec {
        Value::Object(obj) => obj,
        Value::Null => return Ok(HighlightField::default()),
        _ => return Err(Error::parsing(format!("[highlight] field [{}] must be an object", name))),
    };
    check_keys("highlight", obj, &["pre_tags", "post_tags"])?;
    Ok(HighlightField {
        pre_tags: tags("pre_tags", obj.get("pre_tags"))?,
        post_tags: tags("post_tags", obj.get("post_tags"))?,
    })
}

fn check_keys(section: &str, obj: &Map<String, Value>, allowed: &[&str]) -> Result<()> {
    match obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(Error::parsing(format!("[{}] does not support [{}]", section, key))),
        None => Ok(()),
    }
}
