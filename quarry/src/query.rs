//! Engine-neutral executable query tree.
//!
//! Text is already analyzed when a tree is built: `Match` and `Phrase`
//! carry final terms, and every field name is a flattened mapping path.
//! A `boost` of `None` leaves scoring at the engine default.

use std::ops::Bound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
}

impl Operator {
    /// Case-insensitive `AND` / `OR`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Some(Operator::And),
            "OR" => Some(Operator::Or),
            _ => None,
        }
    }
}

/// A literal value addressed at a field, typed by the field's mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum TermValue {
    /// Text and keyword terms.
    Str(String),
    Numeric(f64),
    /// Epoch milliseconds.
    Time(i64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutableQuery {
    All {
        boost: Option<f32>,
    },
    Nothing,
    Term {
        field: String,
        value: TermValue,
        boost: Option<f32>,
    },
    /// Constant-score match of any of the values.
    Terms {
        field: String,
        values: Vec<TermValue>,
        boost: Option<f32>,
    },
    Match {
        field: String,
        /// Analyzer the terms were produced with; `None` is the index default.
        analyzer: Option<String>,
        terms: Vec<String>,
        operator: Operator,
        fuzziness: Option<u8>,
        prefix_length: Option<usize>,
        boost: Option<f32>,
    },
    Phrase {
        field: String,
        analyzer: Option<String>,
        /// Terms with their relative positions.
        terms: Vec<(usize, String)>,
        slop: u32,
        boost: Option<f32>,
    },
    Prefix {
        field: String,
        prefix: String,
        boost: Option<f32>,
    },
    /// `*` and `?` glob over the raw term.
    Wildcard {
        field: String,
        pattern: String,
        boost: Option<f32>,
    },
    Regexp {
        field: String,
        pattern: String,
        boost: Option<f32>,
    },
    Fuzzy {
        field: String,
        term: String,
        distance: u8,
        prefix_length: usize,
        transpositions: bool,
        boost: Option<f32>,
    },
    Range {
        field: String,
        lower: Bound<TermValue>,
        upper: Bound<TermValue>,
        boost: Option<f32>,
    },
    Exists {
        field: String,
    },
    Ids {
        values: Vec<String>,
        boost: Option<f32>,
    },
    Bool {
        must: Vec<ExecutableQuery>,
        should: Vec<ExecutableQuery>,
        must_not: Vec<ExecutableQuery>,
        /// Required, non-scoring clauses.
        filter: Vec<ExecutableQuery>,
        minimum_should_match: Option<usize>,
        boost: Option<f32>,
    },
}

impl ExecutableQuery {
    pub fn all() -> Self {
        ExecutableQuery::All { boost: None }
    }

    /// Fields this query reads, in visiting order.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ExecutableQuery::All { .. } | ExecutableQuery::Nothing | ExecutableQuery::Ids { .. } => {}
            ExecutableQuery::Term { field, .. }
            | ExecutableQuery::Terms { field, .. }
            | ExecutableQuery::Match { field, .. }
            | ExecutableQuery::Phrase { field, .. }
            | ExecutableQuery::Prefix { field, .. }
            | ExecutableQuery::Wildcard { field, .. }
            | ExecutableQuery::Regexp { field, .. }
            | ExecutableQuery::Fuzzy { field, .. }
            | ExecutableQuery::Range { field, .. }
            | ExecutableQuery::Exists { field } => out.push(field.as_str()),
            ExecutableQuery::Bool {
                must,
                should,
                must_not,
                filter,
                ..
            } => {
                for q in must.iter().chain(should).chain(must_not).chain(filter) {
                    q.collect_fields(out);
                }
            }
        }
    }

    /// Positive text terms per field, used to pick highlight fragments.
    pub fn highlight_terms(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        self.collect_highlight_terms(&mut out);
        out
    }

    fn collect_highlight_terms<'a>(&'a self, out: &mut Vec<(&'a str, &'a str)>) {
        match self {
            ExecutableQuery::Term {
                field,
                value: TermValue::Str(term),
                ..
            }
            | ExecutableQuery::Prefix {
                field,
                prefix: term,
                ..
            }
            | ExecutableQuery::Fuzzy { field, term, .. } => out.push((field.as_str(), term.as_str())),
            ExecutableQuery::Terms { field, values, .. } => {
                for value in values {
                    if let TermValue::Str(term) = value {
                        out.push((field.as_str(), term.as_str()));
                    }
                }
            }
            ExecutableQuery::Match { field, terms, .. } => {
                out.extend(terms.iter().map(|t| (field.as_str(), t.as_str())));
            }
            ExecutableQuery::Phrase { field, terms, .. } => {
                out.extend(terms.iter().map(|(_, t)| (field.as_str(), t.as_str())));
            }
            ExecutableQuery::Bool {
                must,
                should,
                filter,
                ..
            } => {
                for q in must.iter().chain(should).chain(filter) {
                    q.collect_highlight_terms(out);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_parse() {
        assert_eq!(Operator::parse("and"), Some(Operator::And));
        assert_eq!(Operator::parse("Or"), Some(Operator::Or));
        assert_eq!(Operator::parse("xor"), None);
    }

    #[test]
    fn test_fields_and_highlight_terms() {
        let query = ExecutableQuery::Bool {
            must: vec![ExecutableQuery::Match {
                field: "title".to_string(),
                analyzer: None,
                terms: vec!["quick".to_string(), "fox".to_string()],
                operator: Operator::Or,
                fuzziness: None,
                prefix_length: None,
                boost: None,
            }],
            should: vec![],
            must_not: vec![ExecutableQuery::Term {
                field: "status".to_string(),
                value: TermValue::Str("hidden".to_string()),
                boost: None,
            }],
            filter: vec![ExecutableQuery::Exists {
                field: "body".to_string(),
            }],
            minimum_should_match: None,
            boost: None,
        };
        assert_eq!(query.fields(), vec!["title", "status", "body"]);
        assert_eq!(
            query.highlight_terms(),
            vec![("title", "quick"), ("title", "fox")]
        );
    }
}
