//! ExecutableQuery to tantivy Query lowering.

use super::terms::{f64_sortable, field_end, field_start, i64_sortable, term_key, SEP};
use super::text::SchemaFields;
use crate::query::{ExecutableQuery, Operator, TermValue};
use crate::{Error, Result};
use std::ops::Bound;
use tantivy::query::{
    AllQuery, BooleanQuery, BoostQuery, ConstScoreQuery, EmptyQuery, FuzzyTermQuery, Occur,
    PhraseQuery, Query, RangeQuery, RegexQuery, TermQuery,
};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::Term;

/// Cap on the clause combinations generated for `minimum_should_match`.
const MAX_SHOULD_COMBINATIONS: usize = 256;

/// Stateless lowering of engine-neutral queries onto the physical schema.
pub struct QueryLowering<'a> {
    fields: &'a SchemaFields,
}

impl<'a> QueryLowering<'a> {
    pub fn new(fields: &'a SchemaFields) -> Self {
        Self { fields }
    }

    pub fn lower(&self, query: &ExecutableQuery) -> Result<Box<dyn Query>> {
        match query {
            ExecutableQuery::All { boost } => Ok(boosted(Box::new(AllQuery), *boost)),
            ExecutableQuery::Nothing => Ok(Box::new(EmptyQuery)),
            ExecutableQuery::Term { field, value, boost } => {
                Ok(boosted(self.term_query(field, value), *boost))
            }
            ExecutableQuery::Terms { field, values, boost } => {
                let clauses = values
                    .iter()
                    .map(|v| (Occur::Should, self.term_query(field, v)))
                    .collect();
                Ok(constant(Box::new(BooleanQuery::new(clauses)), *boost))
            }
            ExecutableQuery::Ids { values, boost } => {
                let clauses = values
                    .iter()
                    .map(|id| {
                        let term = Term::from_field_text(self.fields.id, id);
                        let q: Box<dyn Query> =
                            Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                        (Occur::Should, q)
                    })
                    .collect();
                Ok(constant(Box::new(BooleanQuery::new(clauses)), *boost))
            }
            ExecutableQuery::Match {
                field,
                terms,
                operator,
                fuzziness,
                prefix_length,
                boost,
                ..
            } => self.lower_match(field, terms, *operator, *fuzziness, prefix_length.unwrap_or(0), *boost),
            ExecutableQuery::Phrase {
                field,
                terms,
                slop,
                boost,
                ..
            } => Ok(boosted(self.phrase(field, terms, *slop), *boost)),
            ExecutableQuery::Prefix { field, prefix, boost } => {
                let pattern = format!("{}.*", regex::escape(prefix));
                Ok(boosted(self.regex(field, &pattern)?, *boost))
            }
            ExecutableQuery::Wildcard { field, pattern, boost } => {
                Ok(boosted(self.regex(field, &glob_to_regex(pattern))?, *boost))
            }
            ExecutableQuery::Regexp { field, pattern, boost } => {
                Ok(boosted(self.regex(field, &format!("(?:{})", pattern))?, *boost))
            }
            ExecutableQuery::Fuzzy {
                field,
                term,
                distance,
                prefix_length,
                transpositions,
                boost,
            } => Ok(boosted(
                self.fuzzy(field, term, *distance, *prefix_length, *transpositions)?,
                *boost,
            )),
            ExecutableQuery::Range {
                field,
                lower,
                upper,
                boost,
            } => Ok(constant(self.range(field, lower, upper), *boost)),
            ExecutableQuery::Exists { field } => {
                let term = Term::from_field_text(self.fields.exists, field);
                Ok(constant(
                    Box::new(TermQuery::new(term, IndexRecordOption::Basic)),
                    None,
                ))
            }
            ExecutableQuery::Bool {
                must,
                should,
                must_not,
                filter,
                minimum_should_match,
                boost,
            } => Ok(boosted(
                self.lower_bool(must, should, must_not, filter, *minimum_should_match)?,
                *boost,
            )),
        }
    }

    /// Physical field and encoded term of a typed value.
    fn encode(&self, field: &str, value: &TermValue) -> (Field, String) {
        match value {
            TermValue::Str(s) => (self.fields.terms, term_key(field, s)),
            TermValue::Bool(b) => (self.fields.terms, term_key(field, if *b { "true" } else { "false" })),
            TermValue::Numeric(n) => (self.fields.points, term_key(field, &f64_sortable(*n))),
            TermValue::Time(t) => (self.fields.points, term_key(field, &i64_sortable(*t))),
        }
    }

    fn term_query(&self, field: &str, value: &TermValue) -> Box<dyn Query> {
        let (physical, key) = self.encode(field, value);
        let option = if physical == self.fields.terms {
            IndexRecordOption::WithFreqs
        } else {
            IndexRecordOption::Basic
        };
        Box::new(TermQuery::new(Term::from_field_text(physical, &key), option))
    }

    fn text_term(&self, field: &str, token: &str) -> Term {
        Term::from_field_text(self.fields.terms, &term_key(field, token))
    }

    fn lower_match(
        &self,
        field: &str,
        terms: &[String],
        operator: Operator,
        fuzziness: Option<u8>,
        prefix_length: usize,
        boost: Option<f32>,
    ) -> Result<Box<dyn Query>> {
        if terms.is_empty() {
            return Ok(Box::new(EmptyQuery));
        }
        let occur = match operator {
            Operator::And => Occur::Must,
            Operator::Or => Occur::Should,
        };
        let mut clauses = Vec::with_capacity(terms.len());
        for token in terms {
            let q: Box<dyn Query> = match fuzziness {
                Some(distance) if distance > 0 => {
                    self.fuzzy(field, token, distance, prefix_length, true)?
                }
                _ => Box::new(TermQuery::new(
                    self.text_term(field, token),
                    IndexRecordOption::WithFreqs,
                )),
            };
            clauses.push((occur, q));
        }
        let query: Box<dyn Query> = if clauses.len() == 1 {
            clauses.remove(0).1
        } else {
            Box::new(BooleanQuery::new(clauses))
        };
        Ok(boosted(query, boost))
    }

    fn phrase(&self, field: &str, terms: &[(usize, String)], slop: u32) -> Box<dyn Query> {
        match terms {
            [] => Box::new(EmptyQuery),
            [(_, token)] => Box::new(TermQuery::new(
                self.text_term(field, token),
                IndexRecordOption::WithFreqs,
            )),
            _ => {
                let positioned = terms
                    .iter()
                    .map(|(pos, token)| (*pos, self.text_term(field, token)))
                    .collect();
                let mut query = PhraseQuery::new_with_offset(positioned);
                query.set_slop(slop);
                Box::new(query)
            }
        }
    }

    /// Anchored regex over one field's terms.
    fn regex(&self, field: &str, pattern: &str) -> Result<Box<dyn Query>> {
        let full = format!("{}{}{}", regex::escape(field), SEP, pattern);
        let query = RegexQuery::from_pattern(&full, self.fields.terms)
            .map_err(|e| Error::illegal(format!("failed to parse regex [{}]: {}", pattern, e)))?;
        Ok(Box::new(query))
    }

    fn fuzzy(
        &self,
        field: &str,
        token: &str,
        distance: u8,
        prefix_length: usize,
        transpositions: bool,
    ) -> Result<Box<dyn Query>> {
        let distance = distance.min(2);
        let fuzzy: Box<dyn Query> = Box::new(FuzzyTermQuery::new(
            self.text_term(field, token),
            distance,
            transpositions,
        ));
        // Edits must not cross into the field prefix or the fixed prefix.
        let fixed: String = token.chars().take(prefix_length).collect();
        let scope = self.regex(field, &format!("{}.*", regex::escape(&fixed)))?;
        Ok(Box::new(BooleanQuery::new(vec![
            (Occur::Must, fuzzy),
            (Occur::Must, Box::new(ConstScoreQuery::new(scope, 0.0))),
        ])))
    }

    fn range(&self, field: &str, lower: &Bound<TermValue>, upper: &Bound<TermValue>) -> Box<dyn Query> {
        let physical = match (lower, upper) {
            (Bound::Included(v) | Bound::Excluded(v), _)
            | (_, Bound::Included(v) | Bound::Excluded(v)) => self.encode(field, v).0,
            (Bound::Unbounded, Bound::Unbounded) => {
                let term = Term::from_field_text(self.fields.exists, field);
                return Box::new(TermQuery::new(term, IndexRecordOption::Basic));
            }
        };
        let start = field_start(field);
        let end = field_end(field);
        let lo = lower.as_ref().map(|v| self.encode(field, v).1);
        let hi = upper.as_ref().map(|v| self.encode(field, v).1);
        let lo: Bound<&str> = match &lo {
            Bound::Included(k) => Bound::Included(k),
            Bound::Excluded(k) => Bound::Excluded(k),
            Bound::Unbounded => Bound::Included(&start),
        };
        let hi: Bound<&str> = match &hi {
            Bound::Included(k) => Bound::Included(k),
            Bound::Excluded(k) => Bound::Excluded(k),
            Bound::Unbounded => Bound::Excluded(&end),
        };
        let name = if physical == self.fields.points {
            super::text::POINTS_FIELD
        } else {
            super::text::TERMS_FIELD
        };
        Box::new(RangeQuery::new_str_bounds(name.to_string(), lo, hi))
    }

    fn lower_bool(
        &self,
        must: &[ExecutableQuery],
        should: &[ExecutableQuery],
        must_not: &[ExecutableQuery],
        filter: &[ExecutableQuery],
        minimum_should_match: Option<usize>,
    ) -> Result<Box<dyn Query>> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for q in must {
            clauses.push((Occur::Must, self.lower(q)?));
        }
        for q in filter {
            clauses.push((Occur::Must, Box::new(ConstScoreQuery::new(self.lower(q)?, 0.0))));
        }
        let has_required = !clauses.is_empty();

        let shoulds = should
            .iter()
            .map(|q| self.lower(q))
            .collect::<Result<Vec<_>>>()?;
        let k = minimum_should_match.unwrap_or(0);
        let n = shoulds.len();
        if n > 0 {
            if k >= n {
                clauses.extend(shoulds.into_iter().map(|q| (Occur::Must, q)));
            } else if k <= 1 {
                if k == 1 && has_required {
                    let any = shoulds.into_iter().map(|q| (Occur::Should, q)).collect();
                    clauses.push((Occur::Must, Box::new(BooleanQuery::new(any))));
                } else {
                    clauses.extend(shoulds.into_iter().map(|q| (Occur::Should, q)));
                }
            } else {
                clauses.push((Occur::Must, at_least(&shoulds, k)?));
            }
        }

        for q in must_not {
            clauses.push((Occur::MustNot, self.lower(q)?));
        }
        if clauses.iter().all(|(occur, _)| *occur == Occur::MustNot) {
            clauses.push((Occur::Must, Box::new(AllQuery)));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }
}

/// Disjunction over every k-subset of `queries`, each subset a conjunction.
fn at_least(queries: &[Box<dyn Query>], k: usize) -> Result<Box<dyn Query>> {
    let n = queries.len();
    if combinations(n, k) > MAX_SHOULD_COMBINATIONS {
        return Err(Error::illegal(format!(
            "minimum_should_match [{}] over [{}] should clauses is too expensive",
            k, n
        )));
    }
    let mut alternatives: Vec<(Occur, Box<dyn Query>)> = Vec::new();
    let mut picked: Vec<usize> = (0..k).collect();
    loop {
        let conj = picked
            .iter()
            .map(|&i| (Occur::Must, queries[i].box_clone()))
            .collect();
        alternatives.push((Occur::Should, Box::new(BooleanQuery::new(conj))));
        // Advance to the next combination in lexicographic order.
        let Some(i) = (0..k).rev().find(|&i| picked[i] < n - k + i) else {
            break;
        };
        picked[i] += 1;
        for j in i + 1..k {
            picked[j] = picked[j - 1] + 1;
        }
    }
    Ok(Box::new(BooleanQuery::new(alternatives)))
}

fn combinations(n: usize, k: usize) -> usize {
    let k = k.min(n - k);
    let mut acc: usize = 1;
    for i in 0..k {
        acc = acc.saturating_mul(n - i) / (i + 1);
        if acc > MAX_SHOULD_COMBINATIONS {
            return acc;
        }
    }
    acc
}

fn boosted(query: Box<dyn Query>, boost: Option<f32>) -> Box<dyn Query> {
    match boost {
        Some(b) if (b - 1.0).abs() > f32::EPSILON => Box::new(BoostQuery::new(query, b)),
        _ => query,
    }
}

fn constant(query: Box<dyn Query>, boost: Option<f32>) -> Box<dyn Query> {
    Box::new(ConstScoreQuery::new(query, boost.unwrap_or(1.0)))
}

/// `*` and `?` glob to an anchored regex body.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            _ => out.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    out
}
