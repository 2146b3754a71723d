//! Query compiler: parsed DSL nodes to executable query trees.
//!
//! Compilation happens per index, against that index's mappings and
//! analyzers, so one parsed query may compile differently across a
//! fan-out.

use super::dsl::*;
use super::query_string;
use quarry::aggregations::{date_bucket, parse_calendar_unit, DateInterval};
use quarry::analysis::{Analyzer, AnalyzerSet};
use quarry::document::parse_time;
use quarry::mapping::{FieldType, Mappings, Property, ALL_FIELD, ID_FIELD};
use quarry::query::{ExecutableQuery, Operator, TermValue};
use quarry::{Error, Result};
use serde_json::Value;
use std::ops::Bound;
use std::sync::Arc;

/// Fuzziness of a `fuzzy` query that names none.
const DEFAULT_FUZZINESS: Fuzziness = Fuzziness::Auto { low: 3, high: 6 };

/// An analyzer chosen for a text query, with the name it was chosen by.
#[derive(Clone)]
struct ResolvedAnalyzer {
    name: Option<String>,
    analyzer: Arc<Analyzer>,
}

pub struct QueryCompiler<'a> {
    mappings: &'a Mappings,
    analyzers: &'a AnalyzerSet,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(mappings: &'a Mappings, analyzers: &'a AnalyzerSet) -> Self {
        Self {
            mappings,
            analyzers,
        }
    }

    pub fn compile(&self, node: &QueryNode) -> Result<ExecutableQuery> {
        match node {
            QueryNode::MatchAll { boost } => Ok(ExecutableQuery::All { boost: *boost }),
            QueryNode::MatchNone => Ok(ExecutableQuery::Nothing),
            QueryNode::Match(m) => self.compile_match(m),
            QueryNode::MatchPhrase(m) => self.compile_phrase(m),
            QueryNode::MultiMatch(m) => self.compile_multi_match(m),
            QueryNode::Term(t) => self.compile_term(t),
            QueryNode::Terms(t) => self.compile_terms(t),
            QueryNode::Prefix(p) => {
                let field = self.raw_term_field("prefix", &p.field)?;
                Ok(ExecutableQuery::Prefix {
                    field,
                    prefix: p.value.clone(),
                    boost: p.boost,
                })
            }
            QueryNode::Wildcard(p) => {
                let field = self.raw_term_field("wildcard", &p.field)?;
                Ok(ExecutableQuery::Wildcard {
                    field,
                    pattern: p.value.clone(),
                    boost: p.boost,
                })
            }
            QueryNode::Regexp(p) => {
                let field = self.raw_term_field("regexp", &p.field)?;
                Ok(ExecutableQuery::Regexp {
                    field,
                    pattern: p.value.clone(),
                    boost: p.boost,
                })
            }
            QueryNode::Fuzzy(f) => {
                let field = self.raw_term_field("fuzzy", &f.field)?;
                let fuzziness = f.fuzziness.unwrap_or(DEFAULT_FUZZINESS);
                Ok(ExecutableQuery::Fuzzy {
                    field,
                    distance: fuzziness.distance(&f.value),
                    term: f.value.clone(),
                    prefix_length: f.prefix_length.unwrap_or(0),
                    transpositions: f.transpositions.unwrap_or(true),
                    boost: f.boost,
                })
            }
            QueryNode::Range(r) => self.compile_range(r),
            QueryNode::Exists { field } => {
                let field = normalize_field(field);
                if field == ID_FIELD || field == ALL_FIELD {
                    return Ok(ExecutableQuery::all());
                }
                Ok(ExecutableQuery::Exists {
                    field: field.to_string(),
                })
            }
            QueryNode::Ids { values, boost } => Ok(ExecutableQuery::Ids {
                values: values.clone(),
                boost: *boost,
            }),
            QueryNode::Bool(b) => self.compile_bool(b),
            QueryNode::QueryString(qs) => {
                let node = query_string::parse(qs, self.mappings)?;
                let query = self.compile(&node)?;
                Ok(with_boost(query, qs.boost))
            }
        }
    }

    fn property(&self, field: &str) -> Option<&Property> {
        self.mappings.get(field)
    }

    /// Analyzer precedence for search-time text: the query's own analyzer,
    /// then the field's search analyzer, then its index analyzer, then the
    /// index default.
    fn search_analyzer(&self, field: &str, explicit: Option<&str>) -> Result<ResolvedAnalyzer> {
        let prop = self.property(field);
        let name = explicit
            .or_else(|| prop.and_then(|p| p.search_analyzer.as_deref()))
            .or_else(|| prop.and_then(|p| p.analyzer.as_deref()));
        Ok(ResolvedAnalyzer {
            name: name.map(str::to_string),
            analyzer: self.analyzers.resolve_or_default(name)?,
        })
    }

    /// Fields that `prefix`, `wildcard`, `regexp` and `fuzzy` may address.
    fn raw_term_field(&self, kind: &str, field: &str) -> Result<String> {
        let field = normalize_field(field);
        match self.property(field).map(|p| p.field_type) {
            None | Some(FieldType::Text) | Some(FieldType::Keyword) => Ok(field.to_string()),
            Some(other) => Err(Error::illegal(format!(
                "[{}] query can only be used on text and keyword fields, field [{}] is of type [{}]",
                kind, field, other
            ))),
        }
    }

    /// Text-analyzed fields: mapped `text`, unmapped names and `_all`.
    fn is_analyzed(&self, field: &str) -> bool {
        field == ALL_FIELD
            || self
                .property(field)
                .map_or(true, |p| p.field_type == FieldType::Text)
    }

    fn compile_match(&self, m: &MatchQuery) -> Result<ExecutableQuery> {
        let field = normalize_field(&m.field);
        if !self.is_analyzed(field) {
            return self.exact_match(field, &m.query, m.boost);
        }
        let analyzer = self.search_analyzer(field, m.analyzer.as_deref())?;
        Ok(self.analyzed_match(
            field,
            &m.query,
            &analyzer,
            m.operator.unwrap_or(Operator::Or),
            m.fuzziness,
            m.prefix_length,
            m.minimum_should_match,
            m.boost,
        ))
    }

    /// `match` on a non-text field behaves as a term query on the raw value.
    fn exact_match(&self, field: &str, text: &str, boost: Option<f32>) -> Result<ExecutableQuery> {
        if field == ID_FIELD {
            return Ok(ExecutableQuery::Ids {
                values: vec![text.to_string()],
                boost,
            });
        }
        Ok(ExecutableQuery::Term {
            field: field.to_string(),
            value: self.typed_value(field, &Value::String(text.to_string()), None)?,
            boost,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn analyzed_match(
        &self,
        field: &str,
        text: &str,
        analyzer: &ResolvedAnalyzer,
        operator: Operator,
        fuzziness: Option<Fuzziness>,
        prefix_length: Option<usize>,
        minimum_should_match: Option<MinimumShouldMatch>,
        boost: Option<f32>,
    ) -> ExecutableQuery {
        let terms = analyzer.analyzer.terms(text);
        let per_term = matches!(fuzziness, Some(Fuzziness::Auto { .. }))
            || (minimum_should_match.is_some() && operator == Operator::Or);
        if !per_term || terms.is_empty() {
            return ExecutableQuery::Match {
                field: field.to_string(),
                analyzer: analyzer.name.clone(),
                terms,
                operator,
                fuzziness: match fuzziness {
                    Some(Fuzziness::Edits(n)) if n > 0 => Some(n),
                    _ => None,
                },
                prefix_length,
                boost,
            };
        }

        let clauses: Vec<ExecutableQuery> = terms
            .iter()
            .map(|token| {
                let distance = fuzziness.map_or(0, |f| f.distance(token));
                if distance > 0 {
                    ExecutableQuery::Fuzzy {
                        field: field.to_string(),
                        term: token.clone(),
                        distance,
                        prefix_length: prefix_length.unwrap_or(0),
                        transpositions: true,
                        boost: None,
                    }
                } else {
                    ExecutableQuery::Term {
                        field: field.to_string(),
                        value: TermValue::Str(token.clone()),
                        boost: None,
                    }
                }
            })
            .collect();
        let n = clauses.len();
        let (must, should) = match operator {
            Operator::And => (clauses, Vec::new()),
            Operator::Or => (Vec::new(), clauses),
        };
        ExecutableQuery::Bool {
            must,
            should,
            must_not: Vec::new(),
            filter: Vec::new(),
            minimum_should_match: minimum_should_match.map(|m| m.resolve(n).max(1)),
            boost,
        }
    }

    fn compile_phrase(&self, m: &MatchPhraseQuery) -> Result<ExecutableQuery> {
        let field = normalize_field(&m.field);
        if !self.is_analyzed(field) {
            return self.exact_match(field, &m.query, m.boost);
        }
        let analyzer = self.search_analyzer(field, m.analyzer.as_deref())?;
        Ok(analyzed_phrase(field, &m.query, &analyzer, m.slop, m.boost))
    }

    fn compile_multi_match(&self, m: &MultiMatchQuery) -> Result<ExecutableQuery> {
        let fields = self.expand_fields(&m.fields);
        let Some((first, _)) = fields.first() else {
            return Ok(ExecutableQuery::Nothing);
        };
        // One analyzer for every field, resolved through the first field.
        let analyzer = self.search_analyzer(first, m.analyzer.as_deref())?;
        let operator = m.operator.unwrap_or(Operator::Or);

        let mut clauses = Vec::with_capacity(fields.len());
        for (field, field_boost) in &fields {
            if !self.is_analyzed(field) {
                // Fields the text cannot be typed for simply do not match.
                if let Ok(q) = self.exact_match(field, &m.query, *field_boost) {
                    clauses.push(q);
                }
                continue;
            }
            clauses.push(match m.match_type {
                MultiMatchType::Phrase => analyzed_phrase(field, &m.query, &analyzer, m.slop, *field_boost),
                MultiMatchType::BestFields | MultiMatchType::MostFields => self.analyzed_match(
                    field,
                    &m.query,
                    &analyzer,
                    operator,
                    m.fuzziness,
                    m.prefix_length,
                    None,
                    *field_boost,
                ),
            });
        }
        let n = clauses.len();
        Ok(match clauses.len() {
            0 => ExecutableQuery::Nothing,
            1 if m.minimum_should_match.is_none() => with_boost(clauses.remove(0), m.boost),
            _ => ExecutableQuery::Bool {
                must: Vec::new(),
                should: clauses,
                must_not: Vec::new(),
                filter: Vec::new(),
                minimum_should_match: m.minimum_should_match.map(|msm| msm.resolve(n).max(1)),
                boost: m.boost,
            },
        })
    }

    /// Resolve `*`-patterns against text and keyword mappings; no fields
    /// means `_all`.
    fn expand_fields(&self, specs: &[(String, Option<f32>)]) -> Vec<(String, Option<f32>)> {
        if specs.is_empty() {
            return vec![(ALL_FIELD.to_string(), None)];
        }
        let mut out = Vec::new();
        for (spec, boost) in specs {
            let field = normalize_field(spec);
            if !field.contains('*') {
                out.push((field.to_string(), *boost));
                continue;
            }
            for (name, prop) in self.mappings.iter() {
                if matches!(prop.field_type, FieldType::Text | FieldType::Keyword)
                    && crate::pattern::glob_match(field, name)
                    && !out.iter().any(|(f, _)| f == name)
                {
                    out.push((name.clone(), *boost));
                }
            }
        }
        out
    }

    fn compile_term(&self, t: &TermQuery) -> Result<ExecutableQuery> {
        let field = normalize_field(&t.field);
        if field == ID_FIELD {
            return Ok(ExecutableQuery::Ids {
                values: vec![scalar_string(&t.value)?],
                boost: t.boost,
            });
        }
        Ok(ExecutableQuery::Term {
            field: field.to_string(),
            value: self.typed_value(field, &t.value, None)?,
            boost: t.boost,
        })
    }

    fn compile_terms(&self, t: &TermsQuery) -> Result<ExecutableQuery> {
        let field = normalize_field(&t.field);
        if field == ID_FIELD {
            return Ok(ExecutableQuery::Ids {
                values: t.values.iter().map(scalar_string).collect::<Result<_>>()?,
                boost: t.boost,
            });
        }
        Ok(ExecutableQuery::Terms {
            field: field.to_string(),
            values: t
                .values
                .iter()
                .map(|v| self.typed_value(field, v, None))
                .collect::<Result<_>>()?,
            boost: t.boost,
        })
    }

    fn compile_range(&self, r: &RangeQuery) -> Result<ExecutableQuery> {
        let field = normalize_field(&r.field);
        let format = r.format.as_deref();
        let bound = |inclusive: &Option<Value>, exclusive: &Option<Value>| -> Result<Bound<TermValue>> {
            Ok(match (inclusive, exclusive) {
                (Some(v), _) => Bound::Included(self.typed_value(field, v, format)?),
                (None, Some(v)) => Bound::Excluded(self.typed_value(field, v, format)?),
                (None, None) => Bound::Unbounded,
            })
        };
        Ok(ExecutableQuery::Range {
            field: field.to_string(),
            lower: bound(&r.gte, &r.gt)?,
            upper: bound(&r.lte, &r.lt)?,
            boost: r.boost,
        })
    }

    fn compile_bool(&self, b: &BoolQuery) -> Result<ExecutableQuery> {
        let compile_all = |nodes: &[QueryNode]| -> Result<Vec<ExecutableQuery>> {
            nodes.iter().map(|n| self.compile(n)).collect()
        };
        Ok(ExecutableQuery::Bool {
            must: compile_all(&b.must)?,
            should: compile_all(&b.should)?,
            must_not: compile_all(&b.must_not)?,
            filter: compile_all(&b.filter)?,
            minimum_should_match: b.minimum_should_match.map(|m| m.resolve(b.should.len())),
            boost: b.boost,
        })
    }

    /// A literal typed by the field's mapping; `format` overrides the
    /// mapping's date format.
    fn typed_value(&self, field: &str, value: &Value, format: Option<&str>) -> Result<TermValue> {
        let prop = self.property(field);
        let invalid = |expected: &str| {
            Error::parsing(format!(
                "failed to create query: field [{}] of type [{}] cannot parse value [{}]",
                field, expected, value
            ))
        };
        match prop.map(|p| p.field_type) {
            None | Some(FieldType::Text) | Some(FieldType::Keyword) => Ok(TermValue::Str(scalar_string(value)?)),
            Some(FieldType::Numeric) => match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
            .map(TermValue::Numeric)
            .ok_or_else(|| invalid("numeric")),
            Some(FieldType::Bool) => match value {
                Value::Bool(b) => Some(*b),
                Value::String(s) if s == "true" || s == "false" => Some(s == "true"),
                _ => None,
            }
            .map(TermValue::Bool)
            .ok_or_else(|| invalid("bool")),
            Some(FieldType::Time) => {
                let format = format.or_else(|| prop.and_then(|p| p.format.as_deref()));
                let millis = match value {
                    Value::String(s) if s.starts_with("now") || s.contains("||") => {
                        date_math(s, format, chrono::Utc::now().timestamp_millis())
                    }
                    _ => parse_time(value, format),
                };
                millis.map(TermValue::Time).ok_or_else(|| invalid("time"))
            }
        }
    }
}

fn analyzed_phrase(
    field: &str,
    text: &str,
    analyzer: &ResolvedAnalyzer,
    slop: Option<u32>,
    boost: Option<f32>,
) -> ExecutableQuery {
    let tokens = analyzer.analyzer.analyze(text);
    let base = tokens.first().map_or(0, |t| t.position);
    ExecutableQuery::Phrase {
        field: field.to_string(),
        analyzer: analyzer.name.clone(),
        terms: tokens
            .into_iter()
            .map(|t| (t.position - base, t.text))
            .collect(),
        slop: slop.unwrap_or(0),
        boost,
    }
}

/// `*` and `_all` both address the composite field.
fn normalize_field(field: &str) -> &str {
    match field {
        "*" | "" => ALL_FIELD,
        other => other,
    }
}

/// Wrap a query to apply a boost, leaving it untouched when none is set.
pub(crate) fn with_boost(query: ExecutableQuery, boost: Option<f32>) -> ExecutableQuery {
    match boost {
        None => query,
        Some(boost) => ExecutableQuery::Bool {
            must: vec![query],
            should: Vec::new(),
            must_not: Vec::new(),
            filter: Vec::new(),
            minimum_should_match: None,
            boost: Some(boost),
        },
    }
}

/// Date math: `now`, `<date>||`, followed by `+N<unit>` / `-N<unit>` steps
/// and an optional `/<unit>` rounding down.
fn date_math(expr: &str, format: Option<&str>, now: i64) -> Option<i64> {
    let (anchor, mut rest) = match expr.strip_prefix("now") {
        Some(rest) => (now, rest),
        None => {
            let (date, rest) = expr.split_once("||")?;
            (parse_time(&Value::String(date.to_string()), format)?, rest)
        }
    };
    let mut millis = anchor;
    while !rest.is_empty() {
        let op = rest.chars().next()?;
        if !matches!(op, '+' | '-' | '/') {
            return None;
        }
        rest = &rest[op.len_utf8()..];
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let amount: i64 = if digits == 0 && op == '/' {
            1
        } else {
            rest[..digits].parse().ok()?
        };
        rest = &rest[digits..];
        let unit = rest.chars().next()?;
        rest = &rest[unit.len_utf8()..];
        millis = match op {
            '+' => shift(millis, amount, unit)?,
            '-' => shift(millis, -amount, unit)?,
            '/' => {
                let unit = parse_calendar_unit(&format!("1{}", unit))?;
                date_bucket(millis, DateInterval::Calendar(unit))
            }
            _ => return None,
        };
    }
    Some(millis)
}

fn shift(millis: i64, amount: i64, unit: char) -> Option<i64> {
    use chrono::{DateTime, Months};
    let fixed = |unit_ms: i64| Some(millis + amount * unit_ms);
    match unit {
        's' => fixed(1_000),
        'm' => fixed(60_000),
        'h' | 'H' => fixed(3_600_000),
        'd' => fixed(86_400_000),
        'w' => fixed(7 * 86_400_000),
        'M' | 'y' => {
            let months = if unit == 'y' { amount * 12 } else { amount };
            let dt = DateTime::from_timestamp_millis(millis)?;
            let months_abs = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
            let shifted = if months >= 0 {
                dt.checked_add_months(months_abs)?
            } else {
                dt.checked_sub_months(months_abs)?
            };
            Some(shifted.timestamp_millis())
        }
        _ => None,
    }
}
