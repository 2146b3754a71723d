//! Character filters applied to raw text before tokenization.

use super::options::{get_str, get_str_list, Options};
use super::replay;
use crate::{Error, Result};
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashSet;
use tantivy::tokenizer::{AsciiFoldingFilter, Token};

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "footer",
    "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol",
    "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

#[derive(Debug, Clone)]
pub enum CharFilter {
    /// Remove HTML markup and decode entities.
    HtmlStrip { escaped_tags: HashSet<String> },
    /// Literal replacements, longest key first.
    Mapping { pairs: Vec<(String, String)> },
    PatternReplace { pattern: Regex, replacement: String },
    AsciiFolding,
}

impl CharFilter {
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "html_strip" => Some(CharFilter::HtmlStrip {
                escaped_tags: HashSet::new(),
            }),
            "asciifolding" | "ascii_folding" => Some(CharFilter::AsciiFolding),
            _ => None,
        }
    }

    /// Build a configured char filter of the given `type`.
    pub(crate) fn from_options(kind: &str, opts: &Options) -> Result<Self> {
        const C: &str = "char_filter";
        match kind {
            "html_strip" | "html" => Ok(CharFilter::HtmlStrip {
                escaped_tags: get_str_list(opts, C, kind, "escaped_tags")?
                    .unwrap_or_default()
                    .into_iter()
                    .map(|t| t.to_lowercase())
                    .collect(),
            }),
            "mapping" => {
                let rules = get_str_list(opts, C, kind, "mappings")?.ok_or_else(|| {
                    Error::parsing("[char_filter] mapping option [mappings] should exists")
                })?;
                let mut pairs = rules
                    .iter()
                    .map(|rule| parse_mapping_rule(rule))
                    .collect::<Result<Vec<_>>>()?;
                pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
                Ok(CharFilter::Mapping { pairs })
            }
            "pattern_replace" | "regexp" => {
                let pattern = get_str(opts, C, kind, "pattern")?.ok_or_else(|| {
                    Error::parsing("[char_filter] pattern_replace option [pattern] should exists")
                })?;
                let pattern = Regex::new(pattern).map_err(|e| {
                    Error::parsing(format!(
                        "[char_filter] pattern_replace option [pattern] is invalid: {}",
                        e
                    ))
                })?;
                let replacement = get_str(opts, C, kind, "replacement")?
                    .unwrap_or_default()
                    .to_string();
                Ok(CharFilter::PatternReplace {
                    pattern,
                    replacement,
                })
            }
            "asciifolding" | "ascii_folding" => Ok(CharFilter::AsciiFolding),
            other => Err(Error::parsing(format!(
                "[char_filter] unknown type [{}]",
                other
            ))),
        }
    }

    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match self {
            CharFilter::HtmlStrip { escaped_tags } => Cow::Owned(strip_html(text, escaped_tags)),
            CharFilter::Mapping { pairs } => Cow::Owned(apply_mapping(text, pairs)),
            CharFilter::PatternReplace {
                pattern,
                replacement,
            } => pattern.replace_all(text, replacement.as_str()),
            CharFilter::AsciiFolding => {
                if text.is_ascii() {
                    return Cow::Borrowed(text);
                }
                let whole = Token {
                    offset_from: 0,
                    offset_to: text.len(),
                    position: 0,
                    text: text.to_string(),
                    position_length: 1,
                };
                let folded = replay::apply(AsciiFoldingFilter, vec![whole]);
                Cow::Owned(folded.into_iter().map(|t| t.text).collect())
            }
        }
    }
}

fn parse_mapping_rule(rule: &str) -> Result<(String, String)> {
    let (from, to) = rule.split_once("=>").ok_or_else(|| {
        Error::parsing(format!(
            "[char_filter] mapping rule [{}] should be in the form [key => value]",
            rule
        ))
    })?;
    let from = unescape(from.trim());
    if from.is_empty() {
        return Err(Error::parsing(format!(
            "[char_filter] mapping rule [{}] has an empty key",
            rule
        )));
    }
    Ok((from, unescape(to.trim())))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn apply_mapping(text: &str, pairs: &[(String, String)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    'outer: while !rest.is_empty() {
        for (from, to) in pairs {
            if let Some(tail) = rest.strip_prefix(from.as_str()) {
                out.push_str(to);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

fn strip_html(text: &str, escaped: &HashSet<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut skip_until: Option<&'static str> = None;

    while let Some(lt) = rest.find('<') {
        let (before, after) = rest.split_at(lt);
        if skip_until.is_none() {
            decode_entities(before, &mut out);
        }
        let Some(gt) = after.find('>') else {
            rest = after;
            break;
        };
        let tag = &after[..=gt];
        rest = &after[gt + 1..];

        let name = tag_name(tag);
        if let Some(end) = skip_until {
            if tag.starts_with("</") && name == end {
                skip_until = None;
            }
            continue;
        }
        if tag.starts_with("<!--") {
            if !tag.ends_with("-->") {
                match rest.find("-->") {
                    Some(close) => rest = &rest[close + 3..],
                    None => rest = "",
                }
            }
            continue;
        }
        if escaped.contains(&name) {
            out.push_str(tag);
            continue;
        }
        match name.as_str() {
            "script" if !tag.starts_with("</") => skip_until = Some("script"),
            "style" if !tag.starts_with("</") => skip_until = Some("style"),
            n if BLOCK_TAGS.contains(&n) => out.push('\n'),
            _ => {}
        }
    }
    if skip_until.is_none() {
        decode_entities(rest, &mut out);
    }
    out
}

fn tag_name(tag: &str) -> String {
    tag.trim_start_matches('<')
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

fn decode_entities(s: &str, out: &mut String) {
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                    u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32)
                }
                _ if entity.starts_with('#') => {
                    entity[1..].parse::<u32>().ok().and_then(char::from_u32)
                }
                _ => None,
            };
            c.map(|c| (c, end))
        });
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts(value: serde_json::Value) -> Options {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_html_strip() {
        let filter = CharFilter::builtin("html_strip").unwrap();
        assert_eq!(
            filter.apply("<p>I&apos;m so <b>happy</b>!</p>").trim(),
            "I'm so happy!"
        );
        assert_eq!(
            filter.apply("a<script>var x = 1;</script>b").as_ref(),
            "ab"
        );
    }

    #[test]
    fn test_html_strip_escaped_tags() -> Result<()> {
        let filter = CharFilter::from_options("html_strip", &opts(json!({"escaped_tags": ["b"]})))?;
        assert_eq!(filter.apply("<p>so <b>happy</b></p>").trim(), "so <b>happy</b>");
        Ok(())
    }

    #[test]
    fn test_mapping_longest_first() -> Result<()> {
        let filter = CharFilter::from_options(
            "mapping",
            &opts(json!({"mappings": [":) => _happy_", ":)) => _very_happy_"]})),
        )?;
        assert_eq!(filter.apply("I'm :)) not :)").as_ref(), "I'm _very_happy_ not _happy_");
        Ok(())
    }

    #[test]
    fn test_mapping_rejects_bad_rule() {
        let err = CharFilter::from_options("mapping", &opts(json!({"mappings": ["oops"]})))
            .unwrap_err();
        assert!(matches!(err, Error::ParsingException(_)));
    }

    #[test]
    fn test_pattern_replace() -> Result<()> {
        let filter = CharFilter::from_options(
            "pattern_replace",
            &opts(json!({"pattern": "(\\d+)-(?=\\d)", "replacement": "${1}_"})),
        );
        // look-around is unsupported by the regex engine
        assert!(filter.is_err());

        let filter = CharFilter::from_options(
            "pattern_replace",
            &opts(json!({"pattern": "(\\d+)-(\\d+)", "replacement": "${1}_${2}"})),
        )?;
        assert_eq!(filter.apply("My credit card is 123-456-789").as_ref(), "My credit card is 123_456-789");
        Ok(())
    }

    #[test]
    fn test_ascii_folding() {
        let filter = CharFilter::AsciiFolding;
        assert_eq!(filter.apply("açaí à la carte").as_ref(), "acai a la carte");
    }
}
