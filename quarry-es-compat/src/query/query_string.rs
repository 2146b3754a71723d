//! Lucene query syntax for `query_string`.
//!
//! Supported: bare terms, `field:value`, quoted phrases with `~slop`,
//! `*`/`?` wildcards, `term~N` fuzzy terms, `[a TO b]` / `{a TO b}` ranges,
//! `>=x` style comparisons, `+`/`-`/`!`/`NOT` modifiers, `AND`/`OR`
//! (`&&`/`||`), parentheses with an optional field prefix, `^boost`, and
//! backslash escapes. The parse result is an ordinary [`QueryNode`] tree.

use super::dsl::*;
use quarry::mapping::{FieldType, Mappings, ALL_FIELD};
use quarry::query::Operator;
use quarry::{Error, Result};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, digit1, multispace0, multispace1};
use nom::combinator::{all_consuming, map, opt, value, verify};
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::float;
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;
use serde_json::Value;

/// Characters that end a bare term unless escaped.
const SPECIAL: &[char] = &['(', ')', '{', '}', '[', ']', '"', ':', '^', '~', '\\'];

const KEYWORDS: &[&str] = &["AND", "OR", "NOT", "&&", "||"];

/// Parse `query.query` and expand it against the query's default fields.
pub fn parse(query: &QueryStringQuery, mappings: &Mappings) -> Result<QueryNode> {
    let clauses = parse_clauses(&query.query)?;
    if clauses.is_empty() {
        return Ok(QueryNode::MatchNone);
    }
    let builder = NodeBuilder::new(query, mappings);
    builder.combine(&clauses, None)
}

fn parse_clauses(text: &str) -> Result<Vec<Clause>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    all_consuming(clauses)(trimmed)
        .map(|(_, clauses)| clauses)
        .map_err(|e| Error::parsing(format!("Failed to parse query [{}]: {}", text, e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conjunction {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    Required,
    Prohibited,
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    /// Connective written before this clause.
    conjunction: Option<Conjunction>,
    modifier: Option<Modifier>,
    expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
struct Endpoint {
    /// `None` for an open `*` endpoint.
    value: Option<String>,
    inclusive: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Term { field: Option<String>, text: String },
    Phrase { field: Option<String>, text: String, slop: Option<u32> },
    Wildcard { field: Option<String>, pattern: String },
    Fuzzy { field: Option<String>, text: String, edits: Option<u8> },
    Range { field: Option<String>, lower: Endpoint, upper: Endpoint },
    Group { field: Option<String>, clauses: Vec<Clause> },
    Boosted(Box<Expr>, f32),
}

impl Expr {
    fn with_field(self, name: String) -> Expr {
        let field = Some(name);
        match self {
            Expr::Term { text, .. } => Expr::Term { field, text },
            Expr::Phrase { text, slop, .. } => Expr::Phrase { field, text, slop },
            Expr::Wildcard { pattern, .. } => Expr::Wildcard { field, pattern },
            Expr::Fuzzy { text, edits, .. } => Expr::Fuzzy { field, text, edits },
            Expr::Range { lower, upper, .. } => Expr::Range { field, lower, upper },
            Expr::Group { clauses, .. } => Expr::Group { field, clauses },
            Expr::Boosted(inner, boost) => Expr::Boosted(Box::new(inner.with_field(field.unwrap_or_default())), boost),
        }
    }
}

#[derive(Debug)]
struct RawTerm {
    text: String,
    /// Contains an unescaped `*` or `?`.
    wildcard: bool,
}

fn raw_term(input: &str) -> IResult<&str, RawTerm> {
    let mut text = String::new();
    let mut wildcard = false;
    let mut end = input.len();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some((_, escaped)) => {
                    text.push(escaped);
                    continue;
                }
                None => {
                    end = i;
                    break;
                }
            }
        }
        if c.is_whitespace() || SPECIAL.contains(&c) {
            end = i;
            break;
        }
        wildcard |= c == '*' || c == '?';
        text.push(c);
    }
    if text.is_empty() {
        return Err(nom::Err::Error(NomError::new(input, ErrorKind::TakeWhile1)));
    }
    Ok((&input[end..], RawTerm { text, wildcard }))
}

fn quoted(input: &str) -> IResult<&str, String> {
    let (rest, _) = char('"')(input)?;
    let mut text = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    text.push(escaped);
                }
            }
            '"' => return Ok((&rest[i + 1..], text)),
            _ => text.push(c),
        }
    }
    Err(nom::Err::Error(NomError::new(input, ErrorKind::Char)))
}

fn number<T: std::str::FromStr>(input: &str) -> IResult<&str, T> {
    let (rest, digits) = digit1(input)?;
    match digits.parse() {
        Ok(n) => Ok((rest, n)),
        Err(_) => Err(nom::Err::Error(NomError::new(input, ErrorKind::Digit))),
    }
}

fn phrase(input: &str) -> IResult<&str, Expr> {
    let (input, text) = quoted(input)?;
    let (input, slop) = opt(preceded(char('~'), number::<u32>))(input)?;
    Ok((input, Expr::Phrase { field: None, text, slop }))
}

fn endpoint(input: &str) -> IResult<&str, Option<String>> {
    alt((
        map(quoted, Some),
        map(
            take_while1(|c: char| !c.is_whitespace() && c != ']' && c != '}'),
            |t: &str| (t != "*").then(|| t.to_string()),
        ),
    ))(input)
}

fn range(input: &str) -> IResult<&str, Expr> {
    let (input, open) = alt((char('['), char('{')))(input)?;
    let (input, lower) = preceded(multispace0, endpoint)(input)?;
    let (input, _) = tuple((multispace1, tag("TO"), multispace1))(input)?;
    let (input, upper) = endpoint(input)?;
    let (input, close) = preceded(multispace0, alt((char(']'), char('}'))))(input)?;
    Ok((
        input,
        Expr::Range {
            field: None,
            lower: Endpoint {
                value: lower,
                inclusive: open == '[',
            },
            upper: Endpoint {
                value: upper,
                inclusive: close == ']',
            },
        },
    ))
}

fn comparison(input: &str) -> IResult<&str, Expr> {
    let (input, op) = alt((tag(">="), tag("<="), tag(">"), tag("<")))(input)?;
    let (input, v) = alt((quoted, map(raw_term, |t| t.text)))(input)?;
    let bound = Endpoint {
        value: Some(v),
        inclusive: op.len() == 2,
    };
    let open = Endpoint {
        value: None,
        inclusive: true,
    };
    let (lower, upper) = if op.starts_with('>') {
        (bound, open)
    } else {
        (open, bound)
    };
    Ok((input, Expr::Range { field: None, lower, upper }))
}

fn term_like(input: &str) -> IResult<&str, Expr> {
    let (input, term) = verify(raw_term, |t: &RawTerm| !KEYWORDS.contains(&t.text.as_str()))(input)?;
    let (input, fuzzy) = opt(preceded(char('~'), opt(number::<u8>)))(input)?;
    let expr = match fuzzy {
        Some(edits) => Expr::Fuzzy {
            field: None,
            text: term.text,
            edits,
        },
        None if term.wildcard => Expr::Wildcard {
            field: None,
            pattern: term.text,
        },
        None => Expr::Term {
            field: None,
            text: term.text,
        },
    };
    Ok((input, expr))
}

fn value_expr(input: &str) -> IResult<&str, Expr> {
    alt((phrase, range, comparison, term_like))(input)
}

fn group(input: &str) -> IResult<&str, Expr> {
    let (input, clauses) = delimited(
        pair(char('('), multispace0),
        clauses,
        pair(multispace0, char(')')),
    )(input)?;
    Ok((input, Expr::Group { field: None, clauses }))
}

fn field_expr(input: &str) -> IResult<&str, Expr> {
    let (input, field) = terminated(raw_term, char(':'))(input)?;
    let (input, expr) = alt((group, value_expr))(input)?;
    Ok((input, expr.with_field(field.text)))
}

fn boosted(input: &str) -> IResult<&str, Expr> {
    let (input, expr) = alt((group, field_expr, value_expr))(input)?;
    let (input, boost) = opt(preceded(char('^'), float))(input)?;
    Ok((
        input,
        match boost {
            Some(boost) => Expr::Boosted(Box::new(expr), boost),
            None => expr,
        },
    ))
}

fn modifier(input: &str) -> IResult<&str, Modifier> {
    alt((
        value(Modifier::Required, char('+')),
        value(Modifier::Prohibited, char('-')),
        value(Modifier::Prohibited, char('!')),
        value(Modifier::Prohibited, terminated(tag("NOT"), multispace1)),
    ))(input)
}

fn conjunction(input: &str) -> IResult<&str, Conjunction> {
    alt((
        value(Conjunction::And, alt((tag("AND"), tag("&&")))),
        value(Conjunction::Or, alt((tag("OR"), tag("||")))),
    ))(input)
}

fn clause(input: &str) -> IResult<&str, Clause> {
    let (input, modifier) = opt(modifier)(input)?;
    let (input, expr) = boosted(input)?;
    Ok((
        input,
        Clause {
            conjunction: None,
            modifier,
            expr,
        },
    ))
}

fn clauses(input: &str) -> IResult<&str, Vec<Clause>> {
    let (mut input, first) = clause(input)?;
    let mut out = vec![first];
    loop {
        let next = pair(
            preceded(multispace0, opt(terminated(conjunction, multispace1))),
            preceded(multispace0, clause),
        )(input);
        match next {
            Ok((rest, (conjunction, mut clause))) => {
                clause.conjunction = conjunction;
                out.push(clause);
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((input, out))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occur {
    Must,
    Should,
    MustNot,
}

/// Turns parsed clauses into DSL nodes for the query's fields.
struct NodeBuilder<'a> {
    query: &'a QueryStringQuery,
    mappings: &'a Mappings,
    default_fields: Vec<(String, Option<f32>)>,
}

impl<'a> NodeBuilder<'a> {
    fn new(query: &'a QueryStringQuery, mappings: &'a Mappings) -> Self {
        let default_fields = if query.fields.is_empty() {
            let field = match query.default_field.as_deref() {
                None | Some("*") => ALL_FIELD,
                Some(field) => field,
            };
            vec![(field.to_string(), None)]
        } else {
            query.fields.clone()
        };
        Self {
            query,
            mappings,
            default_fields,
        }
    }

    fn default_occur(&self) -> Occur {
        match self.query.default_operator {
            Some(Operator::And) => Occur::Must,
            _ => Occur::Should,
        }
    }

    /// Classic Lucene precedence: `AND` makes both neighbours required,
    /// `OR` makes the right side optional (and the left side too when the
    /// default operator is `AND`); explicit modifiers always win.
    fn combine(&self, clauses: &[Clause], field: Option<&str>) -> Result<QueryNode> {
        let mut occurs: Vec<Occur> = Vec::with_capacity(clauses.len());
        for (i, clause) in clauses.iter().enumerate() {
            let mut occur = match clause.modifier {
                Some(Modifier::Required) => Occur::Must,
                Some(Modifier::Prohibited) => Occur::MustNot,
                None => self.default_occur(),
            };
            let previous_free = i > 0 && clauses[i - 1].modifier.is_none();
            match clause.conjunction {
                Some(Conjunction::And) => {
                    if clause.modifier.is_none() {
                        occur = Occur::Must;
                    }
                    if previous_free {
                        occurs[i - 1] = Occur::Must;
                    }
                }
                Some(Conjunction::Or) => {
                    if clause.modifier.is_none() {
                        occur = Occur::Should;
                    }
                    if previous_free && self.default_occur() == Occur::Must {
                        occurs[i - 1] = Occur::Should;
                    }
                }
                None => {}
            }
            occurs.push(occur);
        }

        if let ([clause], [occur]) = (clauses, occurs.as_slice()) {
            if *occur != Occur::MustNot {
                return self.expr(&clause.expr, field);
            }
        }
        let mut node = BoolQuery::default();
        for (clause, occur) in clauses.iter().zip(occurs) {
            let child = self.expr(&clause.expr, field)?;
            match occur {
                Occur::Must => node.must.push(child),
                Occur::Should => node.should.push(child),
                Occur::MustNot => node.must_not.push(child),
            }
        }
        Ok(QueryNode::Bool(node))
    }

    /// Target fields: the expression's own field, else the inherited group
    /// field, else the defaults.
    fn targets(&self, own: &Option<String>, inherited: Option<&str>) -> Vec<(String, Option<f32>)> {
        match own.as_deref().or(inherited) {
            Some("*") => vec![(ALL_FIELD.to_string(), None)],
            Some(field) => vec![(field.to_string(), None)],
            None => self.default_fields.clone(),
        }
    }

    fn is_text(&self, field: &str) -> bool {
        field == ALL_FIELD
            || self
                .mappings
                .get(field)
                .map_or(true, |p| p.field_type == FieldType::Text)
    }

    fn expr(&self, expr: &Expr, inherited: Option<&str>) -> Result<QueryNode> {
        match expr {
            Expr::Term { field, text } => Ok(self.per_field(field, inherited, |name, boost| {
                QueryNode::Match(MatchQuery {
                    analyzer: self.query.analyzer.clone(),
                    operator: self.query.default_operator,
                    boost,
                    ..MatchQuery::new(name, text.as_str())
                })
            })),
            Expr::Phrase { field, text, slop } => Ok(self.per_field(field, inherited, |name, boost| {
                QueryNode::MatchPhrase(MatchPhraseQuery {
                    field: name.to_string(),
                    query: text.clone(),
                    analyzer: self.query.analyzer.clone(),
                    slop: *slop,
                    boost,
                })
            })),
            Expr::Wildcard { field, pattern } => {
                let own = field.as_deref().or(inherited);
                if pattern == "*" {
                    return Ok(match own {
                        None | Some("*") => QueryNode::MatchAll { boost: None },
                        Some(name) => QueryNode::Exists {
                            field: name.to_string(),
                        },
                    });
                }
                Ok(self.per_field(field, inherited, |name, boost| {
                    QueryNode::Wildcard(PatternQuery {
                        field: name.to_string(),
                        value: self.normalize(name, pattern),
                        boost,
                    })
                }))
            }
            Expr::Fuzzy { field, text, edits } => Ok(self.per_field(field, inherited, |name, boost| {
                QueryNode::Fuzzy(FuzzyQuery {
                    field: name.to_string(),
                    value: self.normalize(name, text),
                    fuzziness: edits.map(|e| Fuzziness::Edits(e.min(2))),
                    prefix_length: None,
                    transpositions: None,
                    boost,
                })
            })),
            Expr::Range { field, lower, upper } => {
                let targets = self.targets(field, inherited);
                let Some((name, boost)) = targets.into_iter().next() else {
                    return Ok(QueryNode::MatchNone);
                };
                let bound = |end: &Endpoint, inclusive_side: bool| {
                    end.value
                        .as_ref()
                        .filter(|_| end.inclusive == inclusive_side)
                        .map(|v| Value::String(v.clone()))
                };
                Ok(QueryNode::Range(RangeQuery {
                    field: name,
                    gte: bound(lower, true),
                    gt: bound(lower, false),
                    lte: bound(upper, true),
                    lt: bound(upper, false),
                    format: None,
                    boost,
                }))
            }
            Expr::Group { field, clauses } => {
                let scope = field.as_deref().or(inherited);
                self.combine(clauses, scope)
            }
            Expr::Boosted(inner, boost) => Ok(boost_node(self.expr(inner, inherited)?, *boost)),
        }
    }

    /// One node per target field; several fields become a disjunction.
    fn per_field(
        &self,
        field: &Option<String>,
        inherited: Option<&str>,
        node: impl Fn(&str, Option<f32>) -> QueryNode,
    ) -> QueryNode {
        let mut nodes: Vec<QueryNode> = self
            .targets(field, inherited)
            .iter()
            .map(|(name, boost)| node(name, *boost))
            .collect();
        if nodes.len() == 1 {
            return nodes.remove(0);
        }
        QueryNode::Bool(BoolQuery {
            should: nodes,
            ..BoolQuery::default()
        })
    }

    /// Text terms are indexed lowercased; raw patterns follow suit.
    fn normalize(&self, field: &str, raw: &str) -> String {
        if self.is_text(field) {
            raw.to_lowercase()
        } else {
            raw.to_string()
        }
    }
}

fn boost_node(node: QueryNode, boost: f32) -> QueryNode {
    let boost = Some(boost);
    match node {
        QueryNode::MatchAll { .. } => QueryNode::MatchAll { boost },
        QueryNode::Match(m) => QueryNode::Match(MatchQuery { boost, ..m }),
        QueryNode::MatchPhrase(m) => QueryNode::MatchPhrase(MatchPhraseQuery { boost, ..m }),
        QueryNode::Wildcard(p) => QueryNode::Wildcard(PatternQuery { boost, ..p }),
        QueryNode::Fuzzy(f) => QueryNode::Fuzzy(FuzzyQuery { boost, ..f }),
        QueryNode::Range(r) => QueryNode::Range(RangeQuery { boost, ..r }),
        QueryNode::Bool(b) => QueryNode::Bool(BoolQuery { boost, ..b }),
        other => QueryNode::Bool(BoolQuery {
            must: vec![other],
            boost,
            ..BoolQuery::default()
        }),
    }
}
