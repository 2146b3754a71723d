//! Tokenizers: split filtered text into positioned tokens.

use super::options::{get_str, get_str_list, get_usize, gram_bounds, Options};
use super::plugin::Segmenter;
use crate::{Error, Result};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tantivy::tokenizer::Token;

/// Character classes accepted by `token_chars` / `tokenize_on_chars`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharClass {
    Letter,
    Digit,
    Whitespace,
    Punctuation,
    Symbol,
}

impl CharClass {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "letter" => Some(CharClass::Letter),
            "digit" => Some(CharClass::Digit),
            "whitespace" => Some(CharClass::Whitespace),
            "punctuation" => Some(CharClass::Punctuation),
            "symbol" => Some(CharClass::Symbol),
            _ => None,
        }
    }

    fn matches(&self, c: char) -> bool {
        match self {
            CharClass::Letter => c.is_alphabetic(),
            CharClass::Digit => c.is_numeric(),
            CharClass::Whitespace => c.is_whitespace(),
            CharClass::Punctuation => {
                (c.is_ascii_punctuation() && !is_symbol(c)) || is_unicode_punct(c)
            }
            CharClass::Symbol => is_symbol(c),
        }
    }
}

fn is_symbol(c: char) -> bool {
    matches!(c, '$' | '+' | '<' | '=' | '>' | '^' | '`' | '|' | '~')
        || ('\u{20a0}'..='\u{20cf}').contains(&c)
        || ('\u{2100}'..='\u{214f}').contains(&c)
        || ('\u{2190}'..='\u{22ff}').contains(&c)
}

fn is_unicode_punct(c: char) -> bool {
    !c.is_ascii()
        && (('\u{2010}'..='\u{2027}').contains(&c)
            || ('\u{3000}'..='\u{303f}').contains(&c)
            || matches!(c, '\u{00a1}' | '\u{00ab}' | '\u{00bb}' | '\u{00bf}'))
}

/// Set of character classes plus literal characters.
#[derive(Debug, Clone, Default)]
pub struct CharSet {
    classes: Vec<CharClass>,
    chars: HashSet<char>,
}

impl CharSet {
    fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.chars.is_empty()
    }

    fn contains(&self, c: char) -> bool {
        self.chars.contains(&c) || self.classes.iter().any(|class| class.matches(c))
    }
}

#[derive(Clone)]
pub enum Tokenizer {
    Standard,
    Letter,
    Lowercase,
    Whitespace,
    Keyword,
    Ngram {
        min: usize,
        max: usize,
        token_chars: CharSet,
    },
    EdgeNgram {
        min: usize,
        max: usize,
        token_chars: CharSet,
    },
    /// Emits every match of the pattern.
    Pattern(Regex),
    PathHierarchy {
        delimiter: char,
        replacement: char,
        skip: usize,
    },
    /// Splits on any character of the set.
    CharGroup(CharSet),
    /// URLs, e-mail addresses, mentions and hashtags stay whole.
    Web(Regex),
    Plugin {
        name: String,
        segmenter: Arc<dyn Segmenter>,
    },
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tokenizer::Pattern(re) => write!(f, "Pattern({})", re.as_str()),
            Tokenizer::Plugin { name, .. } => write!(f, "Plugin({})", name),
            Tokenizer::Ngram { min, max, .. } => write!(f, "Ngram({}..={})", min, max),
            Tokenizer::EdgeNgram { min, max, .. } => write!(f, "EdgeNgram({}..={})", min, max),
            other => f.write_str(other.kind()),
        }
    }
}

const DEFAULT_PATTERN: &str = r"\w+";
const WEB_PATTERN: &str = r#"(?i)\b(?:https?|ftp)://[^\s<>"']+|[\w.+-]+@[\w-]+(?:\.[\w-]+)+|[@#]\w+"#;

impl Tokenizer {
    /// Registered name of the tokenizer kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Tokenizer::Standard => "standard",
            Tokenizer::Letter => "letter",
            Tokenizer::Lowercase => "lowercase",
            Tokenizer::Whitespace => "whitespace",
            Tokenizer::Keyword => "keyword",
            Tokenizer::Ngram { .. } => "ngram",
            Tokenizer::EdgeNgram { .. } => "edge_ngram",
            Tokenizer::Pattern(_) => "pattern",
            Tokenizer::PathHierarchy { .. } => "path_hierarchy",
            Tokenizer::CharGroup(_) => "char_group",
            Tokenizer::Web(_) => "web",
            Tokenizer::Plugin { .. } => "plugin",
        }
    }

    /// Tokenizer by bare name, with default options.
    pub fn builtin(name: &str) -> Option<Self> {
        Self::from_options(name, &Options::new()).ok()
    }

    pub(crate) fn from_options(kind: &str, opts: &Options) -> Result<Self> {
        const C: &str = "tokenizer";
        let tokenizer = match kind {
            "standard" => Tokenizer::Standard,
            "letter" => Tokenizer::Letter,
            "lowercase" => Tokenizer::Lowercase,
            "whitespace" => Tokenizer::Whitespace,
            "keyword" => Tokenizer::Keyword,
            "web" => Tokenizer::Web(Regex::new(WEB_PATTERN).map_err(|e| {
                Error::parsing(format!("[tokenizer] web pattern is invalid: {}", e))
            })?),
            "ngram" | "nGram" => {
                let (min, max) = gram_bounds(opts, C, kind)?;
                Tokenizer::Ngram {
                    min,
                    max,
                    token_chars: char_set(opts, kind, "token_chars")?,
                }
            }
            "edge_ngram" | "edgeNGram" => {
                let (min, max) = gram_bounds(opts, C, kind)?;
                Tokenizer::EdgeNgram {
                    min,
                    max,
                    token_chars: char_set(opts, kind, "token_chars")?,
                }
            }
            "pattern" | "regexp" => {
                let pattern = get_str(opts, C, kind, "pattern")?.unwrap_or(DEFAULT_PATTERN);
                Tokenizer::Pattern(Regex::new(pattern).map_err(|e| {
                    Error::parsing(format!("[tokenizer] {} option [pattern] is invalid: {}", kind, e))
                })?)
            }
            "path_hierarchy" | "PathHierarchy" => {
                let delimiter = single_char(opts, kind, "delimiter")?.unwrap_or('/');
                Tokenizer::PathHierarchy {
                    delimiter,
                    replacement: single_char(opts, kind, "replacement")?.unwrap_or(delimiter),
                    skip: get_usize(opts, C, kind, "skip")?.unwrap_or(0),
                }
            }
            "char_group" => {
                let set = char_set(opts, kind, "tokenize_on_chars")?;
                if set.is_empty() {
                    return Err(Error::parsing(
                        "[tokenizer] char_group option [tokenize_on_chars] should exists",
                    ));
                }
                Tokenizer::CharGroup(set)
            }
            other => {
                return Err(Error::parsing(format!("[tokenizer] unknown type [{}]", other)));
            }
        };
        Ok(tokenizer)
    }

    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut out = Vec::new();
        match self {
            Tokenizer::Standard => standard(text, &mut out),
            Tokenizer::Letter => split_runs(text, char::is_alphabetic, &mut out),
            Tokenizer::Lowercase => {
                split_runs(text, char::is_alphabetic, &mut out);
                for token in &mut out {
                    token.text = token.text.to_lowercase();
                }
            }
            Tokenizer::Whitespace => split_runs(text, |c| !c.is_whitespace(), &mut out),
            Tokenizer::Keyword => {
                if !text.is_empty() {
                    push(&mut out, text, 0, text.len());
                }
            }
            Tokenizer::Ngram {
                min,
                max,
                token_chars,
            } => for_each_run(text, token_chars, |start, run| {
                ngrams(run, start, *min, *max, false, &mut out)
            }),
            Tokenizer::EdgeNgram {
                min,
                max,
                token_chars,
            } => for_each_run(text, token_chars, |start, run| {
                ngrams(run, start, *min, *max, true, &mut out)
            }),
            Tokenizer::Pattern(re) => {
                for m in re.find_iter(text).filter(|m| !m.as_str().is_empty()) {
                    push(&mut out, m.as_str(), m.start(), m.end());
                }
            }
            Tokenizer::PathHierarchy {
                delimiter,
                replacement,
                skip,
            } => path_hierarchy(text, *delimiter, *replacement, *skip, &mut out),
            Tokenizer::CharGroup(set) => split_runs(text, |c| !set.contains(c), &mut out),
            Tokenizer::Web(special) => web(text, special, &mut out),
            Tokenizer::Plugin { segmenter, .. } => {
                for (from, to) in segmenter.segment(text) {
                    if let Some(piece) = text.get(from..to).filter(|p| !p.is_empty()) {
                        push(&mut out, piece, from, to);
                    }
                }
            }
        }
        out
    }
}

fn single_char(opts: &Options, kind: &str, key: &str) -> Result<Option<char>> {
    match get_str(opts, "tokenizer", kind, key)? {
        None => Ok(None),
        Some(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Some(c)),
                _ => Err(Error::parsing(format!(
                    "[tokenizer] {} option [{}] should be a single character",
                    kind, key
                ))),
            }
        }
    }
}

fn char_set(opts: &Options, kind: &str, key: &str) -> Result<CharSet> {
    let mut set = CharSet::default();
    for entry in get_str_list(opts, "tokenizer", kind, key)?.unwrap_or_default() {
        if let Some(class) = CharClass::parse(&entry) {
            set.classes.push(class);
            continue;
        }
        let literal = match entry.as_str() {
            "\\n" => Some('\n'),
            "\\t" => Some('\t'),
            "\\r" => Some('\r'),
            s => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => None,
                }
            }
        };
        match literal {
            Some(c) => {
                set.chars.insert(c);
            }
            None => {
                return Err(Error::parsing(format!(
                    "[tokenizer] {} option [{}] doesn't support [{}]",
                    kind, key, entry
                )))
            }
        }
    }
    Ok(set)
}

fn push(out: &mut Vec<Token>, text: &str, from: usize, to: usize) {
    let position = out.len();
    push_at(out, text, from, to, position);
}

fn push_at(out: &mut Vec<Token>, text: &str, from: usize, to: usize, position: usize) {
    out.push(Token {
        offset_from: from,
        offset_to: to,
        position,
        text: text.to_string(),
        position_length: 1,
    });
}

/// Emit maximal runs of characters satisfying `keep`.
fn split_runs(text: &str, keep: impl Fn(char) -> bool, out: &mut Vec<Token>) {
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (keep(c), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                push(out, &text[s..i], s, i);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        push(out, &text[s..], s, text.len());
    }
}

/// Visit runs of `allowed` characters; an empty set means the whole text.
fn for_each_run(text: &str, allowed: &CharSet, mut f: impl FnMut(usize, &str)) {
    if allowed.is_empty() {
        if !text.is_empty() {
            f(0, text);
        }
        return;
    }
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (allowed.contains(c), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                f(s, &text[s..i]);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        f(s, &text[s..]);
    }
}

/// Grams of `run`, per start position and shortest first.
pub(crate) fn ngrams(
    run: &str,
    base: usize,
    min: usize,
    max: usize,
    edge_only: bool,
    out: &mut Vec<Token>,
) {
    let bounds: Vec<usize> = run
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(run.len()))
        .collect();
    let char_count = bounds.len() - 1;
    let starts = if edge_only { char_count.min(1) } else { char_count };
    for start in 0..starts {
        for len in min..=max {
            let end = start + len;
            if end > char_count {
                break;
            }
            let (from, to) = (bounds[start], bounds[end]);
            push(out, &run[from..to], base + from, base + to);
        }
    }
}

fn path_hierarchy(text: &str, delimiter: char, replacement: char, skip: usize, out: &mut Vec<Token>) {
    let mut parts: Vec<(usize, usize)> = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c == delimiter {
            parts.push((start, i));
            start = i + c.len_utf8();
        }
    }
    parts.push((start, text.len()));

    let mut leading = false;
    if parts.first().is_some_and(|(s, e)| s == e) && parts.len() > 1 {
        parts.remove(0);
        leading = true;
    }
    if parts.last().is_some_and(|(s, e)| s == e) {
        parts.pop();
    }
    if skip >= parts.len() {
        return;
    }
    let parts = &parts[skip..];
    leading = leading || skip > 0;

    let sep = replacement.to_string();
    let mut path = String::new();
    for (i, (s, e)) in parts.iter().enumerate() {
        if leading || i > 0 {
            path.push_str(&sep);
        }
        path.push_str(&text[*s..*e]);
        let from = if leading {
            parts[0].0.saturating_sub(delimiter.len_utf8())
        } else {
            parts[0].0
        };
        push_at(out, &path, from, *e, 0);
    }
}

fn web(text: &str, special: &Regex, out: &mut Vec<Token>) {
    let mut last = 0;
    for m in special.find_iter(text) {
        let matched = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', ')']);
        let end = m.start() + matched.len();
        let mut gap = Vec::new();
        standard(&text[last..m.start()], &mut gap);
        for token in gap {
            let position = out.len();
            push_at(out, &token.text, last + token.offset_from, last + token.offset_to, position);
        }
        push(out, matched, m.start(), end);
        last = end;
    }
    let mut gap = Vec::new();
    standard(&text[last..], &mut gap);
    for token in gap {
        let position = out.len();
        push_at(out, &token.text, last + token.offset_from, last + token.offset_to, position);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum WordClass {
    Word,
    Ideographic,
    Katakana,
    MidLetter,
    MidNum,
    MidNumLet,
    Other,
}

pub(crate) fn is_ideographic(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x309F
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xF900..=0xFAFF
        | 0x20000..=0x2A6DF
        | 0x2A700..=0x2EBEF)
}

pub(crate) fn is_katakana(c: char) -> bool {
    matches!(c as u32, 0x30A0..=0x30FA | 0x30FC..=0x30FF | 0x31F0..=0x31FF | 0xFF66..=0xFF9F)
}

fn word_class(c: char) -> WordClass {
    if is_ideographic(c) {
        WordClass::Ideographic
    } else if is_katakana(c) {
        WordClass::Katakana
    } else if c.is_alphanumeric() || c == '_' || ('\u{0300}'..='\u{036f}').contains(&c) {
        WordClass::Word
    } else if matches!(c, '\'' | '\u{2019}' | ':' | '\u{00b7}') {
        WordClass::MidLetter
    } else if matches!(c, ',' | ';') {
        WordClass::MidNum
    } else if c == '.' {
        WordClass::MidNumLet
    } else {
        WordClass::Other
    }
}

/// Word segmentation close to the Unicode word-boundary rules: letters and
/// digits join into words, apostrophes and dots join letters, commas and dots
/// join digits, ideographs stand alone and katakana runs stay whole.
fn standard(text: &str, out: &mut Vec<Token>) {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let end_of = |idx: usize| chars.get(idx).map(|(b, _)| *b).unwrap_or(text.len());
    let mut i = 0;
    while i < chars.len() {
        match word_class(chars[i].1) {
            WordClass::Ideographic => {
                push(out, &text[chars[i].0..end_of(i + 1)], chars[i].0, end_of(i + 1));
                i += 1;
            }
            WordClass::Katakana => {
                let start = i;
                while i < chars.len() && word_class(chars[i].1) == WordClass::Katakana {
                    i += 1;
                }
                let (from, to) = (chars[start].0, end_of(i));
                push(out, &text[from..to], from, to);
            }
            WordClass::Word => {
                let start = i;
                let mut end = i + 1;
                loop {
                    while end < chars.len() && word_class(chars[end].1) == WordClass::Word {
                        end += 1;
                    }
                    if end + 1 < chars.len() && word_class(chars[end + 1].1) == WordClass::Word {
                        let (prev, next) = (chars[end - 1].1, chars[end + 1].1);
                        let letters = prev.is_alphabetic() && next.is_alphabetic();
                        let digits = prev.is_numeric() && next.is_numeric();
                        let joined = match word_class(chars[end].1) {
                            WordClass::MidLetter => letters,
                            WordClass::MidNum => digits,
                            WordClass::MidNumLet => letters || digits,
                            _ => false,
                        };
                        if joined {
                            end += 2;
                            continue;
                        }
                    }
                    break;
                }
                let (from, to) = (chars[start].0, end_of(end));
                push(out, &text[from..to], from, to);
                i = end;
            }
            _ => i += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SENTENCE: &str = "The 2 QUICK Brown-Foxes jumped over the lazy dog's bone.";

    fn texts(tokenizer: &Tokenizer, text: &str) -> Vec<String> {
        tokenizer.tokenize(text).into_iter().map(|t| t.text).collect()
    }

    fn configured(kind: &str, opts: serde_json::Value) -> Result<Tokenizer> {
        Tokenizer::from_options(kind, opts.as_object().unwrap_or(&Options::new()))
    }

    #[test]
    fn test_standard() {
        assert_eq!(
            texts(&Tokenizer::Standard, SENTENCE),
            vec!["The", "2", "QUICK", "Brown", "Foxes", "jumped", "over", "the", "lazy", "dog's", "bone"]
        );
        assert_eq!(texts(&Tokenizer::Standard, "pi is 3.14, or 1,000"), vec!["pi", "is", "3.14", "or", "1,000"]);
    }

    #[test]
    fn test_standard_cjk() {
        assert_eq!(texts(&Tokenizer::Standard, "東京都は"), vec!["東", "京", "都", "は"]);
        assert_eq!(texts(&Tokenizer::Standard, "ｼｰｻｲﾄﾞﾗｲﾅｰ"), vec!["ｼｰｻｲﾄﾞﾗｲﾅｰ"]);
    }

    #[test]
    fn test_standard_offsets() {
        let tokens = Tokenizer::Standard.tokenize("héllo wörld");
        assert_eq!(tokens[1].offset_from, 7);
        assert_eq!(tokens[1].offset_to, 13);
        assert_eq!(tokens[1].position, 1);
    }

    #[test]
    fn test_letter() {
        assert_eq!(
            texts(&Tokenizer::Letter, SENTENCE),
            vec!["The", "QUICK", "Brown", "Foxes", "jumped", "over", "the", "lazy", "dog", "s", "bone"]
        );
    }

    #[test]
    fn test_whitespace_and_keyword() {
        assert_eq!(texts(&Tokenizer::Whitespace, " a  b\tc "), vec!["a", "b", "c"]);
        assert_eq!(texts(&Tokenizer::Keyword, "New York"), vec!["New York"]);
        assert!(Tokenizer::Keyword.tokenize("").is_empty());
    }

    #[test]
    fn test_ngram_defaults() {
        let tokenizer = Tokenizer::builtin("ngram").unwrap();
        assert_eq!(texts(&tokenizer, "ab"), vec!["a", "ab", "b"]);
        assert_eq!(
            texts(&tokenizer, "Quick Fox"),
            vec!["Q", "Qu", "u", "ui", "i", "ic", "c", "ck", "k", "k ", " ", " F", "F", "Fo", "o", "ox", "x"]
        );
    }

    #[test]
    fn test_ngram_token_chars() -> Result<()> {
        let tokenizer = configured(
            "ngram",
            json!({"min_gram": 3, "max_gram": 3, "token_chars": ["letter", "digit"]}),
        )?;
        assert_eq!(
            texts(&tokenizer, "2 Quick Foxes."),
            vec!["Qui", "uic", "ick", "Fox", "oxe", "xes"]
        );
        Ok(())
    }

    #[test]
    fn test_edge_ngram() -> Result<()> {
        let tokenizer = Tokenizer::builtin("edge_ngram").unwrap();
        assert_eq!(texts(&tokenizer, "Quick Fox"), vec!["Q", "Qu"]);

        let tokenizer = configured(
            "edge_ngram",
            json!({"min_gram": 2, "max_gram": 10, "token_chars": ["letter", "digit"]}),
        )?;
        assert_eq!(
            texts(&tokenizer, "2 Quick Foxes."),
            vec!["Qu", "Qui", "Quic", "Quick", "Fo", "Fox", "Foxe", "Foxes"]
        );
        Ok(())
    }

    #[test]
    fn test_ngram_min_greater_than_max() {
        let err = configured("ngram", json!({"min_gram": 5, "max_gram": 2})).unwrap_err();
        assert!(matches!(err, Error::ParsingException(_)));
    }

    #[test]
    fn test_pattern() -> Result<()> {
        let tokenizer = configured("pattern", json!({"pattern": "[^,]+"}))?;
        assert_eq!(texts(&tokenizer, "comma,separated,values"), vec!["comma", "separated", "values"]);

        let tokenizer = Tokenizer::builtin("regexp").unwrap();
        assert_eq!(
            texts(&tokenizer, "The foo_bar_size's default is 5."),
            vec!["The", "foo_bar_size", "s", "default", "is", "5"]
        );
        Ok(())
    }

    #[test]
    fn test_path_hierarchy() -> Result<()> {
        let tokenizer = Tokenizer::builtin("path_hierarchy").unwrap();
        assert_eq!(
            texts(&tokenizer, "/one/two/three"),
            vec!["/one", "/one/two", "/one/two/three"]
        );

        let tokenizer = configured(
            "path_hierarchy",
            json!({"delimiter": "-", "replacement": "/", "skip": 2}),
        )?;
        assert_eq!(
            texts(&tokenizer, "one-two-three-four-five"),
            vec!["/three", "/three/four", "/three/four/five"]
        );
        Ok(())
    }

    #[test]
    fn test_char_group() -> Result<()> {
        let tokenizer = configured("char_group", json!({"tokenize_on_chars": ["whitespace", "-", "\\n"]}))?;
        assert_eq!(
            texts(&tokenizer, "The QUICK brown-fox"),
            vec!["The", "QUICK", "brown", "fox"]
        );
        assert!(configured("char_group", json!({})).is_err());
        Ok(())
    }

    #[test]
    fn test_web() {
        assert_eq!(
            texts(
                &Tokenizer::builtin("web").unwrap(),
                "Hello info@blugelabs.com, i come from https://docs.zinclabs.io/"
            ),
            vec!["Hello", "info@blugelabs.com", "i", "come", "from", "https://docs.zinclabs.io/"]
        );
    }

    #[test]
    fn test_unknown_type() {
        assert!(configured("thai", json!({})).is_err());
    }
}
