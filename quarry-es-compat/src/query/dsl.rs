//! Query DSL model and its validating parse.
//!
//! Every query object is checked against the keys its kind accepts; an
//! unknown key fails the parse naming the key. Optional parameters stay
//! `None` when absent so an explicit zero is never confused with "unset".

use quarry::query::Operator;
use quarry::{Error, Result};
use serde_json::{Map, Value};

/// Edit distance specification of `fuzziness`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fuzziness {
    Edits(u8),
    /// Distance grows with term length: 0 below `low` chars, 1 below
    /// `high`, 2 otherwise.
    Auto { low: usize, high: usize },
}

impl Fuzziness {
    pub fn parse(value: &Value) -> Result<Self> {
        let invalid = || Error::parsing(format!("failed to parse [fuzziness] value [{}]", value));
        match value {
            Value::Number(n) => {
                let edits = n.as_f64().ok_or_else(invalid)?;
                if !(0.0..=2.0).contains(&edits) {
                    return Err(Error::illegal(format!(
                        "[fuzziness] must be one of [0, 1, 2, AUTO], got [{}]",
                        n
                    )));
                }
                Ok(Fuzziness::Edits(edits as u8))
            }
            Value::String(s) => {
                let s = s.trim();
                if let Some(rest) = s.strip_prefix("AUTO").or_else(|| s.strip_prefix("auto")) {
                    return match rest.strip_prefix(':') {
                        None if rest.is_empty() => Ok(Fuzziness::Auto { low: 3, high: 6 }),
                        Some(bounds) => {
                            let (low, high) = bounds.split_once(',').ok_or_else(invalid)?;
                            let low = low.trim().parse().map_err(|_| invalid())?;
                            let high = high.trim().parse().map_err(|_| invalid())?;
                            if low > high {
                                return Err(Error::illegal(format!(
                                    "[fuzziness] AUTO low [{}] must not exceed high [{}]",
                                    low, high
                                )));
                            }
                            Ok(Fuzziness::Auto { low, high })
                        }
                        None => Err(invalid()),
                    };
                }
                let edits: f64 = s.parse().map_err(|_| invalid())?;
                Fuzziness::parse(&Value::from(edits))
            }
            _ => Err(invalid()),
        }
    }

    /// Edit distance applied to a term.
    pub fn distance(&self, term: &str) -> u8 {
        match *self {
            Fuzziness::Edits(n) => n,
            Fuzziness::Auto { low, high } => {
                let len = term.chars().count();
                if len < low {
                    0
                } else if len < high {
                    1
                } else {
                    2
                }
            }
        }
    }
}

/// `minimum_should_match` as a count or a percentage, either of which may
/// be negative (counted from the number of optional clauses).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MinimumShouldMatch {
    Count(i64),
    Percent(f64),
}

impl MinimumShouldMatch {
    pub fn parse(value: &Value) -> Result<Self> {
        let invalid = || {
            Error::parsing(format!(
                "failed to parse [minimum_should_match] value [{}]",
                value
            ))
        };
        match value {
            Value::Number(n) => n.as_i64().map(MinimumShouldMatch::Count).ok_or_else(invalid),
            Value::String(s) => {
                let s = s.trim();
                match s.strip_suffix('%') {
                    Some(p) => p.trim().parse().map(MinimumShouldMatch::Percent).map_err(|_| invalid()),
                    None => s.parse().map(MinimumShouldMatch::Count).map_err(|_| invalid()),
                }
            }
            _ => Err(invalid()),
        }
    }

    /// Required number of optional clauses out of `n`.
    pub fn resolve(&self, n: usize) -> usize {
        let n_i = n as i64;
        let k = match *self {
            MinimumShouldMatch::Count(c) if c < 0 => n_i + c,
            MinimumShouldMatch::Count(c) => c,
            MinimumShouldMatch::Percent(p) if p < 0.0 => n_i - (n as f64 * -p / 100.0).floor() as i64,
            MinimumShouldMatch::Percent(p) => (n as f64 * p / 100.0).floor() as i64,
        };
        k.clamp(0, n_i) as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchQuery {
    pub field: String,
    pub query: String,
    pub analyzer: Option<String>,
    pub operator: Option<Operator>,
    pub fuzziness: Option<Fuzziness>,
    pub prefix_length: Option<usize>,
    pub minimum_should_match: Option<MinimumShouldMatch>,
    pub boost: Option<f32>,
}

impl MatchQuery {
    pub fn new(field: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            query: query.into(),
            analyzer: None,
            operator: None,
            fuzziness: None,
            prefix_length: None,
            minimum_should_match: None,
            boost: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchPhraseQuery {
    pub field: String,
    pub query: String,
    pub analyzer: Option<String>,
    pub slop: Option<u32>,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiMatchType {
    #[default]
    BestFields,
    MostFields,
    Phrase,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiMatchQuery {
    pub query: String,
    /// Field names or patterns with an optional per-field boost (`title^2`).
    pub fields: Vec<(String, Option<f32>)>,
    pub match_type: MultiMatchType,
    pub analyzer: Option<String>,
    pub operator: Option<Operator>,
    pub fuzziness: Option<Fuzziness>,
    pub prefix_length: Option<usize>,
    pub slop: Option<u32>,
    pub minimum_should_match: Option<MinimumShouldMatch>,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermQuery {
    pub field: String,
    pub value: Value,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermsQuery {
    pub field: String,
    pub values: Vec<Value>,
    pub boost: Option<f32>,
}

/// Shared shape of `prefix`, `wildcard` and `regexp`.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternQuery {
    pub field: String,
    pub value: String,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyQuery {
    pub field: String,
    pub value: String,
    pub fuzziness: Option<Fuzziness>,
    pub prefix_length: Option<usize>,
    pub transpositions: Option<bool>,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeQuery {
    pub field: String,
    pub gt: Option<Value>,
    pub gte: Option<Value>,
    pub lt: Option<Value>,
    pub lte: Option<Value>,
    /// Date format of the bounds, overriding the field's mapping format.
    pub format: Option<String>,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoolQuery {
    pub must: Vec<QueryNode>,
    pub should: Vec<QueryNode>,
    pub must_not: Vec<QueryNode>,
    pub filter: Vec<QueryNode>,
    pub minimum_should_match: Option<MinimumShouldMatch>,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryStringQuery {
    pub query: String,
    pub default_field: Option<String>,
    pub fields: Vec<(String, Option<f32>)>,
    pub default_operator: Option<Operator>,
    pub analyzer: Option<String>,
    pub boost: Option<f32>,
}

impl QueryStringQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            default_field: None,
            fields: Vec::new(),
            default_operator: None,
            analyzer: None,
            boost: None,
        }
    }
}

/// One node of a search body's `query`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    MatchAll { boost: Option<f32> },
    MatchNone,
    Match(MatchQuery),
    MatchPhrase(MatchPhraseQuery),
    MultiMatch(MultiMatchQuery),
    Term(TermQuery),
    Terms(TermsQuery),
    Prefix(PatternQuery),
    Wildcard(PatternQuery),
    Regexp(PatternQuery),
    Fuzzy(FuzzyQuery),
    Range(RangeQuery),
    Exists { field: String },
    Ids { values: Vec<String>, boost: Option<f32> },
    Bool(BoolQuery),
    QueryString(QueryStringQuery),
}

impl QueryNode {
    /// Parse a query object such as `{"match": {"title": "fox"}}`.
    pub fn parse(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::parsing("[_na] query malformed, must start with start_object"))?;
        let mut entries = obj.iter();
        let (kind, body) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            (None, _) => return Err(Error::parsing("query malformed, empty clause found")),
            (Some((first, _)), Some((second, _))) => {
                return Err(Error::parsing(format!(
                    "[{}] malformed query, expected [END_OBJECT] but found [{}]",
                    first, second
                )))
            }
        };

        match kind.as_str() {
            "match_all" => {
                let params = Params::object(kind, body)?;
                params.check(&["boost"])?;
                Ok(QueryNode::MatchAll {
                    boost: params.boost()?,
                })
            }
            "match_none" => {
                Params::object(kind, body)?.check(&["boost"])?;
                Ok(QueryNode::MatchNone)
            }
            "match" => parse_match(body),
            "match_phrase" => parse_match_phrase(body),
            "multi_match" => parse_multi_match(body),
            "term" => parse_term(body),
            "terms" => parse_terms(body),
            "prefix" => parse_pattern(kind, body, &["value"]).map(QueryNode::Prefix),
            "wildcard" => parse_pattern(kind, body, &["value", "wildcard"]).map(QueryNode::Wildcard),
            "regexp" => parse_pattern(kind, body, &["value"]).map(QueryNode::Regexp),
            "fuzzy" => parse_fuzzy(body),
            "range" => parse_range(body),
            "exists" => {
                let params = Params::object(kind, body)?;
                params.check(&["field"])?;
                Ok(QueryNode::Exists {
                    field: params.required_str("field")?,
                })
            }
            "ids" => {
                let params = Params::object(kind, body)?;
                params.check(&["values", "boost"])?;
                let values = match params.get("values") {
                    Some(Value::Array(items)) => items.iter().map(scalar_string).collect::<Result<_>>()?,
                    Some(_) => return Err(Error::parsing("[ids] query [values] must be an array")),
                    None => Vec::new(),
                };
                Ok(QueryNode::Ids {
                    values,
                    boost: params.boost()?,
                })
            }
            "bool" => parse_bool(body),
            "query_string" => parse_query_string(body),
            other => Err(Error::parsing(format!("unknown query [{}]", other))),
        }
    }
}

/// Key access over one query object, keyed by the query kind for errors.
struct Params<'a> {
    kind: &'a str,
    obj: &'a Map<String, Value>,
}

impl<'a> Params<'a> {
    fn object(kind: &'a str, value: &'a Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::parsing(format!("[{}] query malformed, no start_object after query name", kind)))?;
        Ok(Self { kind, obj })
    }

    /// Reject keys outside `allowed`.
    fn check(&self, allowed: &[&str]) -> Result<()> {
        match self.obj.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(key) => Err(Error::parsing(format!(
                "[{}] query does not support [{}]",
                self.kind, key
            ))),
            None => Ok(()),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.obj.get(key).filter(|v| !v.is_null())
    }

    fn str(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => scalar_string(v).map(Some).map_err(|_| self.invalid(key, v)),
        }
    }

    fn required_str(&self, key: &str) -> Result<String> {
        self.str(key)?
            .ok_or_else(|| Error::parsing(format!("[{}] requires [{}]", self.kind, key)))
    }

    fn f32(&self, key: &str) -> Result<Option<f32>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => number(v).map(|n| Some(n as f32)).ok_or_else(|| self.invalid(key, v)),
        }
    }

    fn boost(&self) -> Result<Option<f32>> {
        match self.f32("boost")? {
            Some(b) if b < 0.0 => Err(Error::illegal(format!(
                "[{}] query [boost] must be non-negative, got [{}]",
                self.kind, b
            ))),
            boost => Ok(boost),
        }
    }

    fn usize(&self, key: &str) -> Result<Option<usize>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => number(v)
                .filter(|n| *n >= 0.0 && n.fract() == 0.0)
                .map(|n| Some(n as usize))
                .ok_or_else(|| self.invalid(key, v)),
        }
    }

    fn bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) if s == "true" || s == "false" => Ok(Some(s == "true")),
            Some(v) => Err(self.invalid(key, v)),
        }
    }

    fn operator(&self, key: &str) -> Result<Option<Operator>> {
        match self.str(key)? {
            None => Ok(None),
            Some(s) => Operator::parse(&s).map(Some).ok_or_else(|| {
                Error::illegal(format!(
                    "[{}] query [{}] must be one of [AND, OR], got [{}]",
                    self.kind, key, s
                ))
            }),
        }
    }

    fn fuzziness(&self) -> Result<Option<Fuzziness>> {
        self.get("fuzziness").map(Fuzziness::parse).transpose()
    }

    fn minimum_should_match(&self) -> Result<Option<MinimumShouldMatch>> {
        self.get("minimum_should_match")
            .map(MinimumShouldMatch::parse)
            .transpose()
    }

    fn fields(&self, key: &str) -> Result<Vec<(String, Option<f32>)>> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item.as_str() {
                    Some(s) => field_with_boost(s),
                    None => Err(self.invalid(key, item)),
                })
                .collect(),
            Some(Value::String(s)) => Ok(vec![field_with_boost(s)?]),
            Some(v) => Err(self.invalid(key, v)),
        }
    }

    fn invalid(&self, key: &str, value: &Value) -> Error {
        Error::parsing(format!(
            "[{}] query has an invalid value [{}] for [{}]",
            self.kind, value, key
        ))
    }
}

/// Split `title^2` into the field name and its boost.
pub(crate) fn field_with_boost(spec: &str) -> Result<(String, Option<f32>)> {
    match spec.rsplit_once('^') {
        Some((field, boost)) => {
            let boost: f32 = boost
                .parse()
                .map_err(|_| Error::parsing(format!("invalid field boost in [{}]", spec)))?;
            Ok((field.to_string(), Some(boost)))
        }
        None => Ok((spec.to_string(), None)),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Text form of a scalar query value.
pub(crate) fn scalar_string(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(Error::parsing(format!(
            "expected a string, number or boolean but found [{}]",
            other
        ))),
    }
}

/// The single `{field: body}` entry of a field-addressed query.
fn single_field<'a>(kind: &str, value: &'a Value) -> Result<(&'a String, &'a Value)> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::parsing(format!("[{}] query malformed, no start_object after query name", kind)))?;
    let mut entries = obj.iter();
    match (entries.next(), entries.next()) {
        (Some(entry), None) => Ok(entry),
        (None, _) => Err(Error::parsing(format!("[{}] query requires a field", kind))),
        (Some((first, _)), Some((second, _))) => Err(Error::parsing(format!(
            "[{}] query doesn't support multiple fields, found [{}] and [{}]",
            kind, first, second
        ))),
    }
}

fn parse_match(value: &Value) -> Result<QueryNode> {
    let (field, body) = single_field("match", value)?;
    if !body.is_object() {
        return Ok(QueryNode::Match(MatchQuery::new(field, scalar_string(body)?)));
    }
    let params = Params::object("match", body)?;
    params.check(&[
        "query",
        "analyzer",
        "operator",
        "fuzziness",
        "prefix_length",
        "minimum_should_match",
        "boost",
    ])?;
    Ok(QueryNode::Match(MatchQuery {
        field: field.clone(),
        query: params.required_str("query")?,
        analyzer: params.str("analyzer")?,
        operator: params.operator("operator")?,
        fuzziness: params.fuzziness()?,
        prefix_length: params.usize("prefix_length")?,
        minimum_should_match: params.minimum_should_match()?,
        boost: params.boost()?,
    }))
}

fn parse_match_phrase(value: &Value) -> Result<QueryNode> {
    let (field, body) = single_field("match_phrase", value)?;
    if !body.is_object() {
        return Ok(QueryNode::MatchPhrase(MatchPhraseQuery {
            field: field.clone(),
            query: scalar_string(body)?,
            analyzer: None,
            slop: None,
            boost: None,
        }));
    }
    let params = Params::object("match_phrase", body)?;
    params.check(&["query", "analyzer", "slop", "boost"])?;
    Ok(QueryNode::MatchPhrase(MatchPhraseQuery {
        field: field.clone(),
        query: params.required_str("query")?,
        analyzer: params.str("analyzer")?,
        slop: params.usize("slop")?.map(|s| s as u32),
        boost: params.boost()?,
    }))
}

fn parse_multi_match(value: &Value) -> Result<QueryNode> {
    let params = Params::object("multi_match", value)?;
    params.check(&[
        "query",
        "fields",
        "type",
        "analyzer",
        "operator",
        "fuzziness",
        "prefix_length",
        "slop",
        "minimum_should_match",
        "boost",
    ])?;
    let match_type = match params.str("type")?.as_deref() {
        None | Some("best_fields") => MultiMatchType::BestFields,
        Some("most_fields") => MultiMatchType::MostFields,
        Some("phrase") => MultiMatchType::Phrase,
        Some(other) => {
            return Err(Error::illegal(format!(
                "[multi_match] query does not support type [{}]",
                other
            )))
        }
    };
    Ok(QueryNode::MultiMatch(MultiMatchQuery {
        query: params.required_str("query")?,
        fields: params.fields("fields")?,
        match_type,
        analyzer: params.str("analyzer")?,
        operator: params.operator("operator")?,
        fuzziness: params.fuzziness()?,
        prefix_length: params.usize("prefix_length")?,
        slop: params.usize("slop")?.map(|s| s as u32),
        minimum_should_match: params.minimum_should_match()?,
        boost: params.boost()?,
    }))
}

fn parse_term(value: &Value) -> Result<QueryNode> {
    let (field, body) = single_field("term", value)?;
    if !body.is_object() {
        scalar_string(body)?;
        return Ok(QueryNode::Term(TermQuery {
            field: field.clone(),
            value: body.clone(),
            boost: None,
        }));
    }
    let params = Params::object("term", body)?;
    params.check(&["value", "boost"])?;
    let value = params
        .get("value")
        .ok_or_else(|| Error::parsing("[term] query requires [value]"))?;
    scalar_string(value)?;
    Ok(QueryNode::Term(TermQuery {
        field: field.clone(),
        value: value.clone(),
        boost: params.boost()?,
    }))
}

fn parse_terms(value: &Value) -> Result<QueryNode> {
    let params = Params::object("terms", value)?;
    let mut field = None;
    for (key, v) in params.obj {
        if key == "boost" {
            continue;
        }
        if let Some((first, _)) = &field {
            return Err(Error::parsing(format!(
                "[terms] query does not support multiple fields, found [{}] and [{}]",
                first, key
            )));
        }
        let values = v
            .as_array()
            .ok_or_else(|| Error::parsing(format!("[terms] query requires an array of values for [{}]", key)))?;
        for item in values {
            scalar_string(item)?;
        }
        field = Some((key.clone(), values.clone()));
    }
    let (field, values) = field.ok_or_else(|| Error::parsing("[terms] query requires a field"))?;
    Ok(QueryNode::Terms(TermsQuery {
        field,
        values,
        boost: params.boost()?,
    }))
}

fn parse_pattern(kind: &str, value: &Value, value_keys: &[&str]) -> Result<PatternQuery> {
    let (field, body) = single_field(kind, value)?;
    if !body.is_object() {
        return Ok(PatternQuery {
            field: field.clone(),
            value: scalar_string(body)?,
            boost: None,
        });
    }
    let params = Params::object(kind, body)?;
    let mut allowed = value_keys.to_vec();
    allowed.push("boost");
    params.check(&allowed)?;
    let value = value_keys
        .iter()
        .map(|k| params.str(k))
        .find_map(|v| v.transpose())
        .transpose()?
        .ok_or_else(|| Error::parsing(format!("[{}] query requires [value]", kind)))?;
    Ok(PatternQuery {
        field: field.clone(),
        value,
        boost: params.boost()?,
    })
}

fn parse_fuzzy(value: &Value) -> Result<QueryNode> {
    let (field, body) = single_field("fuzzy", value)?;
    if !body.is_object() {
        return Ok(QueryNode::Fuzzy(FuzzyQuery {
            field: field.clone(),
            value: scalar_string(body)?,
            fuzziness: None,
            prefix_length: None,
            transpositions: None,
            boost: None,
        }));
    }
    let params = Params::object("fuzzy", body)?;
    params.check(&["value", "fuzziness", "prefix_length", "transpositions", "boost"])?;
    Ok(QueryNode::Fuzzy(FuzzyQuery {
        field: field.clone(),
        value: params.required_str("value")?,
        fuzziness: params.fuzziness()?,
        prefix_length: params.usize("prefix_length")?,
        transpositions: params.bool("transpositions")?,
        boost: params.boost()?,
    }))
}

fn parse_range(value: &Value) -> Result<QueryNode> {
    let (field, body) = single_field("range", value)?;
    let params = Params::object("range", body)?;
    params.check(&["gt", "gte", "lt", "lte", "format", "boost"])?;
    let bound = |key: &str| -> Result<Option<Value>> {
        match params.get(key) {
            None => Ok(None),
            Some(v) => scalar_string(v).map(|_| Some(v.clone())),
        }
    };
    let range = RangeQuery {
        field: field.clone(),
        gt: bound("gt")?,
        gte: bound("gte")?,
        lt: bound("lt")?,
        lte: bound("lte")?,
        format: params.str("format")?,
        boost: params.boost()?,
    };
    if range.gt.is_some() && range.gte.is_some() {
        return Err(Error::illegal("[range] query does not allow both [gt] and [gte]"));
    }
    if range.lt.is_some() && range.lte.is_some() {
        return Err(Error::illegal("[range] query does not allow both [lt] and [lte]"));
    }
    Ok(QueryNode::Range(range))
}

fn parse_clauses(key: &str, value: Option<&Value>) -> Result<Vec<QueryNode>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(QueryNode::parse).collect(),
        Some(v @ Value::Object(_)) => Ok(vec![QueryNode::parse(v)?]),
        Some(_) => Err(Error::parsing(format!(
            "[bool] query malformed, [{}] must be an object or an array",
            key
        ))),
    }
}

fn parse_bool(value: &Value) -> Result<QueryNode> {
    let params = Params::object("bool", value)?;
    params.check(&["must", "should", "must_not", "filter", "minimum_should_match", "boost"])?;
    Ok(QueryNode::Bool(BoolQuery {
        must: parse_clauses("must", params.get("must"))?,
        should: parse_clauses("should", params.get("should"))?,
        must_not: parse_clauses("must_not", params.get("must_not"))?,
        filter: parse_clauses("filter", params.get("filter"))?,
        minimum_should_match: params.minimum_should_match()?,
        boost: params.boost()?,
    }))
}

fn parse_query_string(value: &Value) -> Result<QueryNode> {
    let params = Params::object("query_string", value)?;
    params.check(&["query", "default_field", "fields", "default_operator", "analyzer", "boost"])?;
    Ok(QueryNode::QueryString(QueryStringQuery {
        query: params.required_str("query")?,
        default_field: params.str("default_field")?,
        fields: params.fields("fields")?,
        default_operator: params.operator("default_operator")?,
        analyzer: params.str("analyzer")?,
        boost: params.boost()?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_short_and_long_forms() -> Result<()> {
        let short = QueryNode::parse(&json!({"match": {"title": "quick fox"}}))?;
        assert_eq!(short, QueryNode::Match(MatchQuery::new("title", "quick fox")));

        let long = QueryNode::parse(&json!({
            "match": {"title": {"query": "quick fox", "operator": "and", "boost": 2}}
        }))?;
        match long {
            QueryNode::Match(m) => {
                assert_eq!(m.operator, Some(Operator::And));
                assert_eq!(m.boost, Some(2.0));
                assert_eq!(m.fuzziness, None);
            }
            other => panic!("unexpected node {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_unknown_key_is_named() {
        let err = QueryNode::parse(&json!({"match_phrase": {"f": {"bogus": 1}}})).unwrap_err();
        assert!(matches!(err, Error::ParsingException(_)));
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_multiple_fields_rejected() {
        let err = QueryNode::parse(&json!({"term": {"a": "x", "b": "y"}})).unwrap_err();
        assert!(matches!(err, Error::ParsingException(_)));
        assert!(err.to_string().contains("multiple fields"));
    }

    #[test]
    fn test_bad_operator_is_illegal_argument() {
        let err = QueryNode::parse(&json!({"match": {"f": {"query": "x", "operator": "xor"}}})).unwrap_err();
        assert!(matches!(err, Error::IllegalArgument(_)));
    }

    #[test]
    fn test_explicit_zero_is_not_unset() -> Result<()> {
        let node = QueryNode::parse(&json!({"match": {"f": {"query": "x", "boost": 0, "fuzziness": 0}}}))?;
        let QueryNode::Match(m) = node else {
            panic!("expected match");
        };
        assert_eq!(m.boost, Some(0.0));
        assert_eq!(m.fuzziness, Some(Fuzziness::Edits(0)));
        Ok(())
    }

    #[test]
    fn test_bool_clause_forms() -> Result<()> {
        let node = QueryNode::parse(&json!({"bool": {
            "must": {"term": {"a": 1}},
            "should": [{"match": {"b": "x"}}, {"exists": {"field": "c"}}],
            "minimum_should_match": "50%"
        }}))?;
        let QueryNode::Bool(b) = node else {
            panic!("expected bool");
        };
        assert_eq!(b.must.len(), 1);
        assert_eq!(b.should.len(), 2);
        assert_eq!(b.minimum_should_match.map(|m| m.resolve(2)), Some(1));
        Ok(())
    }

    #[test]
    fn test_range_rejects_conflicting_bounds() {
        let err = QueryNode::parse(&json!({"range": {"n": {"gt": 1, "gte": 2}}})).unwrap_err();
        assert!(matches!(err, Error::IllegalArgument(_)));
    }

    #[test]
    fn test_fuzziness_auto() -> Result<()> {
        let auto = Fuzziness::parse(&json!("AUTO"))?;
        assert_eq!(auto.distance("ab"), 0);
        assert_eq!(auto.distance("abcd"), 1);
        assert_eq!(auto.distance("abcdefg"), 2);
        assert_eq!(Fuzziness::parse(&json!("AUTO:1,4"))?.distance("abc"), 1);
        assert!(Fuzziness::parse(&json!(3)).is_err());
        Ok(())
    }

    #[test]
    fn test_minimum_should_match_resolve() -> Result<()> {
        assert_eq!(MinimumShouldMatch::parse(&json!(2))?.resolve(5), 2);
        assert_eq!(MinimumShouldMatch::parse(&json!(-1))?.resolve(5), 4);
        assert_eq!(MinimumShouldMatch::parse(&json!("75%"))?.resolve(4), 3);
        assert_eq!(MinimumShouldMatch::parse(&json!("-25%"))?.resolve(4), 3);
        assert_eq!(MinimumShouldMatch::parse(&json!(9))?.resolve(3), 3);
        Ok(())
    }

    #[test]
    fn test_field_boost_suffix() -> Result<()> {
        assert_eq!(field_with_boost("title^2")?, ("title".to_string(), Some(2.0)));
        assert_eq!(field_with_boost("body")?, ("body".to_string(), None));
        Ok(())
    }
}
