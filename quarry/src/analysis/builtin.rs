//! Analyzers available to every index without configuration.

use super::options::{get_bool, get_str, get_str_list, Options};
use super::token_filter::stop_filters;
use super::{Analyzer, TokenFilter, Tokenizer};
use crate::{Error, Result};
use regex::Regex;

pub const BUILTIN_ANALYZERS: &[&str] = &[
    "standard",
    "simple",
    "keyword",
    "whitespace",
    "stop",
    "web",
    "regexp",
    "pattern",
];

/// Build a typed analyzer (`"type": "stop"` etc.) with its options.
///
/// Returns `None` for a type that is not a built-in analyzer.
pub(crate) fn typed(kind: &str, opts: &Options) -> Result<Option<Analyzer>> {
    const C: &str = "analyzer";
    let stopwords = get_str_list(opts, C, kind, "stopwords")?;
    let stop = |default: Option<&str>| -> Result<Option<TokenFilter>> {
        let words = match (&stopwords, default) {
            (Some(words), _) => words.clone(),
            (None, Some(tag)) => vec![tag.to_string()],
            (None, None) => return Ok(None),
        };
        let filters = stop_filters(&words)?;
        Ok((!filters.is_empty()).then_some(TokenFilter::Stop(filters)))
    };

    let analyzer = match kind {
        "standard" => Analyzer::new(Vec::new(), Tokenizer::Standard, with(TokenFilter::Lowercase, stop(None)?)),
        "simple" => Analyzer::new(Vec::new(), Tokenizer::Letter, vec![TokenFilter::Lowercase]),
        "keyword" => Analyzer::new(Vec::new(), Tokenizer::Keyword, Vec::new()),
        "whitespace" => Analyzer::new(Vec::new(), Tokenizer::Whitespace, Vec::new()),
        "stop" => Analyzer::new(
            Vec::new(),
            Tokenizer::Letter,
            with(TokenFilter::Lowercase, stop(Some("_english_"))?),
        ),
        "web" => {
            let web = Tokenizer::from_options("web", &Options::new())?;
            Analyzer::new(Vec::new(), web, with(TokenFilter::Lowercase, stop(Some("_english_"))?))
        }
        "regexp" | "pattern" => {
            let pattern = get_str(opts, C, kind, "pattern")?.unwrap_or(r"\w+");
            let re = Regex::new(pattern).map_err(|e| {
                Error::parsing(format!("[analyzer] {} option [pattern] is invalid: {}", kind, e))
            })?;
            let mut filters = Vec::new();
            if get_bool(opts, C, kind, "lowercase")?.unwrap_or(true) {
                filters.push(TokenFilter::Lowercase);
            }
            filters.extend(stop(None)?);
            Analyzer::new(Vec::new(), Tokenizer::Pattern(re), filters)
        }
        _ => return Ok(None),
    };
    Ok(Some(analyzer))
}

fn with(first: TokenFilter, rest: Option<TokenFilter>) -> Vec<TokenFilter> {
    std::iter::once(first).chain(rest).collect()
}
