//! Token filters: rewrite, drop or expand the token stream.

use super::options::{get_bool, get_str, get_str_list, get_usize, gram_bounds, Options};
use super::replay;
use super::tokenizer::{is_ideographic, is_katakana, ngrams};
use crate::{Error, Result};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tantivy::tokenizer::{AsciiFoldingFilter, Language, Stemmer, StopWordFilter, Token};

const C: &str = "token_filter";

const FRENCH_ELISIONS: &[&str] = &[
    "l", "m", "t", "qu", "n", "s", "j", "d", "c", "jusqu", "quoiqu", "lorsqu", "puisqu",
];

#[derive(Clone)]
pub enum TokenFilter {
    Lowercase,
    Uppercase,
    /// One tantivy filter per stop-word source; a token is dropped if any matches.
    Stop(Vec<StopWordFilter>),
    Stemmer {
        stemmer: Stemmer,
        protected: Arc<HashSet<String>>,
    },
    /// Shields its words from any stemmer that follows in the chain.
    KeywordMarker(Arc<HashSet<String>>),
    Ngram {
        min: usize,
        max: usize,
    },
    EdgeNgram {
        min: usize,
        max: usize,
    },
    Length {
        min: usize,
        max: usize,
    },
    Dictionary {
        words: HashSet<String>,
        min_word: usize,
        min_subword: usize,
        max_subword: usize,
    },
    Synonym(Arc<HashMap<String, Vec<String>>>),
    PatternReplace {
        pattern: Regex,
        replacement: String,
        all: bool,
    },
    Reverse,
    Trim,
    Truncate(usize),
    Unique {
        same_position_only: bool,
    },
    Shingle {
        min: usize,
        max: usize,
        unigrams: bool,
        separator: String,
    },
    CjkBigram,
    CjkWidth,
    AsciiFolding,
    Apostrophe,
    Elision(HashSet<String>),
}

impl fmt::Debug for TokenFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenFilter::Lowercase => "lowercase",
            TokenFilter::Uppercase => "uppercase",
            TokenFilter::Stop(_) => "stop",
            TokenFilter::Stemmer { .. } => "stemmer",
            TokenFilter::KeywordMarker(_) => "keyword_marker",
            TokenFilter::Ngram { .. } => "ngram",
            TokenFilter::EdgeNgram { .. } => "edge_ngram",
            TokenFilter::Length { .. } => "length",
            TokenFilter::Dictionary { .. } => "dictionary_decompounder",
            TokenFilter::Synonym(_) => "synonym",
            TokenFilter::PatternReplace { .. } => "pattern_replace",
            TokenFilter::Reverse => "reverse",
            TokenFilter::Trim => "trim",
            TokenFilter::Truncate(_) => "truncate",
            TokenFilter::Unique { .. } => "unique",
            TokenFilter::Shingle { .. } => "shingle",
            TokenFilter::CjkBigram => "cjk_bigram",
            TokenFilter::CjkWidth => "cjk_width",
            TokenFilter::AsciiFolding => "asciifolding",
            TokenFilter::Apostrophe => "apostrophe",
            TokenFilter::Elision(_) => "elision",
        };
        f.write_str(name)
    }
}

/// Map an Elasticsearch language name to a tantivy language.
fn language(name: &str) -> Option<Language> {
    let name = name.trim_matches('_').to_lowercase();
    let lang = match name.as_str() {
        "arabic" => Language::Arabic,
        "danish" => Language::Danish,
        "dutch" => Language::Dutch,
        "english" | "light_english" | "minimal_english" | "porter" | "porter2"
        | "possessive_english" => Language::English,
        "finnish" | "light_finnish" => Language::Finnish,
        "french" | "light_french" | "minimal_french" => Language::French,
        "german" | "light_german" | "german2" | "minimal_german" => Language::German,
        "greek" => Language::Greek,
        "hungarian" | "light_hungarian" => Language::Hungarian,
        "italian" | "light_italian" => Language::Italian,
        "norwegian" | "light_norwegian" => Language::Norwegian,
        "portuguese" | "light_portuguese" | "minimal_portuguese" => Language::Portuguese,
        "romanian" => Language::Romanian,
        "russian" | "light_russian" => Language::Russian,
        "spanish" | "light_spanish" => Language::Spanish,
        "swedish" | "light_swedish" => Language::Swedish,
        "tamil" => Language::Tamil,
        "turkish" => Language::Turkish,
        _ => return None,
    };
    Some(lang)
}

/// Stop filters for a list mixing `_language_` tags and literal words.
pub(crate) fn stop_filters(words: &[String]) -> Result<Vec<StopWordFilter>> {
    let mut filters = Vec::new();
    let mut literal = Vec::new();
    for word in words {
        if word == "_none_" {
            continue;
        }
        if word.len() > 2 && word.starts_with('_') && word.ends_with('_') {
            let filter = language(word).and_then(StopWordFilter::new).ok_or_else(|| {
                Error::parsing(format!("[{}] stop doesn't support stopwords [{}]", C, word))
            })?;
            filters.push(filter);
        } else {
            literal.push(word.clone());
        }
    }
    if !literal.is_empty() {
        filters.push(StopWordFilter::remove(literal));
    }
    Ok(filters)
}

fn english_stop() -> Result<TokenFilter> {
    Ok(TokenFilter::Stop(stop_filters(&["_english_".to_string()])?))
}

impl TokenFilter {
    /// Token filter by bare name, with default options.
    pub fn builtin(name: &str) -> Option<Self> {
        Self::from_options(name, &Options::new()).ok()
    }

    pub(crate) fn from_options(kind: &str, opts: &Options) -> Result<Self> {
        let filter = match kind {
            "lowercase" => TokenFilter::Lowercase,
            "uppercase" => TokenFilter::Uppercase,
            "stop" => match get_str_list(opts, C, kind, "stopwords")? {
                Some(words) => TokenFilter::Stop(stop_filters(&words)?),
                None => english_stop()?,
            },
            "stemmer" | "snowball" | "porter_stem" => {
                let name = get_str(opts, C, kind, "language")?
                    .or(get_str(opts, C, kind, "name")?)
                    .unwrap_or("english");
                let lang = language(name).ok_or_else(|| {
                    Error::parsing(format!("[{}] {} doesn't support language [{}]", C, kind, name))
                })?;
                TokenFilter::Stemmer {
                    stemmer: Stemmer::new(lang),
                    protected: Arc::new(HashSet::new()),
                }
            }
            "keyword" | "keyword_marker" => {
                let words = get_str_list(opts, C, kind, "keywords")?.unwrap_or_default();
                TokenFilter::KeywordMarker(Arc::new(words.into_iter().collect()))
            }
            "ngram" | "nGram" => {
                let (min, max) = gram_bounds(opts, C, kind)?;
                TokenFilter::Ngram { min, max }
            }
            "edge_ngram" | "edgeNGram" => {
                let (min, max) = gram_bounds(opts, C, kind)?;
                TokenFilter::EdgeNgram { min, max }
            }
            "length" => {
                let min = get_usize(opts, C, kind, "min")?.unwrap_or(0);
                let max = get_usize(opts, C, kind, "max")?.unwrap_or(usize::MAX);
                if min > max {
                    return Err(Error::parsing(format!(
                        "[{}] length option [min] should be not greater than [max]",
                        C
                    )));
                }
                TokenFilter::Length { min, max }
            }
            "dict" | "dictionary_decompounder" => {
                let words = get_str_list(opts, C, kind, "words")?
                    .or(get_str_list(opts, C, kind, "word_list")?)
                    .ok_or_else(|| {
                        Error::parsing(format!("[{}] {} option [words] should exists", C, kind))
                    })?;
                TokenFilter::Dictionary {
                    words: words.into_iter().collect(),
                    min_word: get_usize(opts, C, kind, "min_word_size")?.unwrap_or(5),
                    min_subword: get_usize(opts, C, kind, "min_subword_size")?.unwrap_or(2),
                    max_subword: get_usize(opts, C, kind, "max_subword_size")?.unwrap_or(15),
                }
            }
            "synonym" | "synonym_graph" => {
                let rules = get_str_list(opts, C, kind, "synonyms")?.ok_or_else(|| {
                    Error::parsing(format!("[{}] {} option [synonyms] should exists", C, kind))
                })?;
                TokenFilter::Synonym(Arc::new(parse_synonyms(&rules)))
            }
            "pattern_replace" | "regexp" => {
                let pattern = get_str(opts, C, kind, "pattern")?.ok_or_else(|| {
                    Error::parsing(format!("[{}] {} option [pattern] should exists", C, kind))
                })?;
                TokenFilter::PatternReplace {
                    pattern: Regex::new(pattern).map_err(|e| {
                        Error::parsing(format!(
                            "[{}] {} option [pattern] is invalid: {}",
                            C, kind, e
                        ))
                    })?,
                    replacement: get_str(opts, C, kind, "replacement")?
                        .unwrap_or_default()
                        .to_string(),
                    all: get_bool(opts, C, kind, "all")?.unwrap_or(true),
                }
            }
            "reverse" => TokenFilter::Reverse,
            "trim" => TokenFilter::Trim,
            "truncate" => TokenFilter::Truncate(
                get_usize(opts, C, kind, "length")?.filter(|l| *l > 0).unwrap_or(10),
            ),
            "unique" => TokenFilter::Unique {
                same_position_only: get_bool(opts, C, kind, "only_on_same_position")?
                    .unwrap_or(false),
            },
            "shingle" => {
                let min = get_usize(opts, C, kind, "min_shingle_size")?.unwrap_or(2);
                let max = get_usize(opts, C, kind, "max_shingle_size")?.unwrap_or(2);
                if min < 2 || min > max {
                    return Err(Error::parsing(format!(
                        "[{}] shingle option [min_shingle_size] should be between 2 and [max_shingle_size]",
                        C
                    )));
                }
                TokenFilter::Shingle {
                    min,
                    max,
                    unigrams: get_bool(opts, C, kind, "output_unigrams")?.unwrap_or(true),
                    separator: get_str(opts, C, kind, "token_separator")?
                        .unwrap_or(" ")
                        .to_string(),
                }
            }
            "cjk_bigram" => TokenFilter::CjkBigram,
            "cjk_width" => TokenFilter::CjkWidth,
            "asciifolding" | "ascii_folding" => TokenFilter::AsciiFolding,
            "apostrophe" => TokenFilter::Apostrophe,
            "elision" => {
                let articles = get_str_list(opts, C, kind, "articles")?.unwrap_or_else(|| {
                    FRENCH_ELISIONS.iter().map(|a| a.to_string()).collect()
                });
                TokenFilter::Elision(articles.into_iter().map(|a| a.to_lowercase()).collect())
            }
            other => {
                return Err(Error::parsing(format!("[{}] unknown type [{}]", C, other)));
            }
        };
        Ok(filter)
    }

    pub fn apply(&self, tokens: Vec<Token>) -> Vec<Token> {
        match self {
            TokenFilter::Lowercase => map_text(tokens, |t| t.to_lowercase()),
            TokenFilter::Uppercase => map_text(tokens, |t| t.to_uppercase()),
            TokenFilter::Stop(filters) => filters
                .iter()
                .fold(tokens, |acc, filter| replay::apply(filter.clone(), acc)),
            TokenFilter::Stemmer { stemmer, protected } => {
                if protected.is_empty() {
                    return replay::apply(stemmer.clone(), tokens);
                }
                let originals: Vec<String> = tokens.iter().map(|t| t.text.clone()).collect();
                let mut stemmed = replay::apply(stemmer.clone(), tokens);
                for (token, original) in stemmed.iter_mut().zip(originals) {
                    if protected.contains(&original) {
                        token.text = original;
                    }
                }
                stemmed
            }
            TokenFilter::KeywordMarker(_) => tokens,
            TokenFilter::Ngram { min, max } => expand_grams(tokens, *min, *max, false),
            TokenFilter::EdgeNgram { min, max } => expand_grams(tokens, *min, *max, true),
            TokenFilter::Length { min, max } => tokens
                .into_iter()
                .filter(|t| {
                    let len = t.text.chars().count();
                    len >= *min && len <= *max
                })
                .collect(),
            TokenFilter::Dictionary {
                words,
                min_word,
                min_subword,
                max_subword,
            } => decompound(tokens, words, *min_word, *min_subword, *max_subword),
            TokenFilter::Synonym(map) => {
                let mut out = Vec::with_capacity(tokens.len());
                for token in tokens {
                    match map.get(&token.text) {
                        Some(replacements) => {
                            for text in replacements {
                                out.push(Token {
                                    text: text.clone(),
                                    ..token.clone()
                                });
                            }
                        }
                        None => out.push(token),
                    }
                }
                out
            }
            TokenFilter::PatternReplace {
                pattern,
                replacement,
                all,
            } => map_text(tokens, |t| {
                if *all {
                    pattern.replace_all(t, replacement.as_str()).into_owned()
                } else {
                    pattern.replace(t, replacement.as_str()).into_owned()
                }
            }),
            TokenFilter::Reverse => map_text(tokens, |t| t.chars().rev().collect()),
            TokenFilter::Trim => map_text(tokens, |t| t.trim().to_string()),
            TokenFilter::Truncate(len) => map_text(tokens, |t| t.chars().take(*len).collect()),
            TokenFilter::Unique { same_position_only } => {
                let mut seen = HashSet::new();
                tokens
                    .into_iter()
                    .filter(|t| {
                        let position = if *same_position_only { t.position } else { 0 };
                        seen.insert((position, t.text.clone()))
                    })
                    .collect()
            }
            TokenFilter::Shingle {
                min,
                max,
                unigrams,
                separator,
            } => shingles(tokens, *min, *max, *unigrams, separator),
            TokenFilter::CjkBigram => cjk_bigram(tokens),
            TokenFilter::CjkWidth => map_text(tokens, normalize_width),
            TokenFilter::AsciiFolding => replay::apply(AsciiFoldingFilter, tokens),
            TokenFilter::Apostrophe => map_text(tokens, |t| {
                match t.find(['\'', '\u{2019}']) {
                    Some(idx) => t[..idx].to_string(),
                    None => t.to_string(),
                }
            }),
            TokenFilter::Elision(articles) => map_text(tokens, |t| {
                if let Some(idx) = t.find(['\'', '\u{2019}']) {
                    if articles.contains(&t[..idx].to_lowercase()) {
                        let skip = t[idx..].chars().next().map(char::len_utf8).unwrap_or(1);
                        return t[idx + skip..].to_string();
                    }
                }
                t.to_string()
            }),
        }
    }
}

/// Pass keyword-marker words on to each stemmer that follows them.
pub(crate) fn link_keyword_markers(filters: &mut [TokenFilter]) {
    let mut protected: HashSet<String> = HashSet::new();
    for filter in filters.iter_mut() {
        match filter {
            TokenFilter::KeywordMarker(words) => protected.extend(words.iter().cloned()),
            TokenFilter::Stemmer {
                protected: stemmer_protected,
                ..
            } if !protected.is_empty() => {
                *stemmer_protected = Arc::new(protected.clone());
            }
            _ => {}
        }
    }
}

fn map_text(mut tokens: Vec<Token>, f: impl Fn(&str) -> String) -> Vec<Token> {
    for token in &mut tokens {
        token.text = f(&token.text);
    }
    tokens.retain(|t| !t.text.is_empty());
    tokens
}

fn expand_grams(tokens: Vec<Token>, min: usize, max: usize, edge_only: bool) -> Vec<Token> {
    let mut out = Vec::new();
    for token in tokens {
        let mut grams = Vec::new();
        ngrams(&token.text, 0, min, max, edge_only, &mut grams);
        out.extend(grams.into_iter().map(|gram| Token {
            text: gram.text,
            ..token.clone()
        }));
    }
    out
}

fn decompound(
    tokens: Vec<Token>,
    words: &HashSet<String>,
    min_word: usize,
    min_subword: usize,
    max_subword: usize,
) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        let bounds: Vec<usize> = token
            .text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(token.text.len()))
            .collect();
        let char_count = bounds.len() - 1;
        let mut parts = Vec::new();
        if char_count >= min_word {
            for start in 0..char_count {
                for len in min_subword..=max_subword {
                    let end = start + len;
                    if end > char_count {
                        break;
                    }
                    let piece = &token.text[bounds[start]..bounds[end]];
                    if words.contains(piece) {
                        parts.push(piece.to_string());
                    }
                }
            }
        }
        let base = token.clone();
        out.push(token);
        out.extend(parts.into_iter().map(|text| Token {
            text,
            ..base.clone()
        }));
    }
    out
}

/// `a, b, c` makes the words equivalent; `a, b => c` rewrites the left side.
fn parse_synonyms(rules: &[String]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    let split = |s: &str| -> Vec<String> {
        s.split(',')
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect()
    };
    for rule in rules {
        let rule = rule.trim();
        if rule.is_empty() || rule.starts_with('#') {
            continue;
        }
        match rule.split_once("=>") {
            Some((lhs, rhs)) => {
                let targets = split(rhs);
                for word in split(lhs) {
                    let entry = map.entry(word).or_default();
                    for target in &targets {
                        if !entry.contains(target) {
                            entry.push(target.clone());
                        }
                    }
                }
            }
            None => {
                let group = split(rule);
                for word in &group {
                    let entry = map.entry(word.clone()).or_default();
                    for other in &group {
                        if !entry.contains(other) {
                            entry.push(other.clone());
                        }
                    }
                }
            }
        }
    }
    map
}

fn shingles(tokens: Vec<Token>, min: usize, max: usize, unigrams: bool, sep: &str) -> Vec<Token> {
    let mut out = Vec::new();
    for i in 0..tokens.len() {
        if unigrams {
            out.push(tokens[i].clone());
        }
        for size in min..=max {
            if i + size > tokens.len() {
                break;
            }
            let window = &tokens[i..i + size];
            let text = window
                .iter()
                .map(|t| t.text.as_str())
                .collect::<Vec<_>>()
                .join(sep);
            out.push(Token {
                offset_from: window[0].offset_from,
                offset_to: window[size - 1].offset_to,
                position: window[0].position,
                text,
                position_length: size,
            });
        }
    }
    out
}

fn is_cjk(c: char) -> bool {
    is_ideographic(c)
        || is_katakana(c)
        || matches!(c as u32, 0x1100..=0x11FF | 0x3130..=0x318F | 0xAC00..=0xD7AF)
}

/// Overlapping bigrams over adjacent CJK characters; an isolated character
/// is kept as a unigram.
fn cjk_bigram(tokens: Vec<Token>) -> Vec<Token> {
    fn flush(run: &mut Vec<(char, usize, usize)>, out: &mut Vec<Token>) {
        if run.len() == 1 {
            let (c, from, to) = run[0];
            let position = out.len();
            out.push(Token {
                offset_from: from,
                offset_to: to,
                position,
                text: c.to_string(),
                position_length: 1,
            });
        }
        for pair in run.windows(2) {
            let position = out.len();
            out.push(Token {
                offset_from: pair[0].1,
                offset_to: pair[1].2,
                position,
                text: [pair[0].0, pair[1].0].iter().collect(),
                position_length: 1,
            });
        }
        run.clear();
    }

    let mut out = Vec::new();
    let mut run: Vec<(char, usize, usize)> = Vec::new();
    let mut last_to = None;
    for token in tokens {
        if !token.text.is_empty() && token.text.chars().all(is_cjk) {
            if last_to != Some(token.offset_from) {
                flush(&mut run, &mut out);
            }
            let mut offset = token.offset_from;
            for c in token.text.chars() {
                let end = offset + c.len_utf8();
                run.push((c, offset, end));
                offset = end;
            }
            last_to = Some(token.offset_to);
        } else {
            flush(&mut run, &mut out);
            last_to = None;
            let position = out.len();
            out.push(Token { position, ..token });
        }
    }
    flush(&mut run, &mut out);
    out
}

/// Half-width katakana U+FF65..=U+FF9D to their full-width forms.
const HALFWIDTH_KATAKANA: [char; 57] = [
    '・', 'ヲ', 'ァ', 'ィ', 'ゥ', 'ェ', 'ォ', 'ャ', 'ュ', 'ョ', 'ッ', 'ー', 'ア', 'イ', 'ウ', 'エ',
    'オ', 'カ', 'キ', 'ク', 'ケ', 'コ', 'サ', 'シ', 'ス', 'セ', 'ソ', 'タ', 'チ', 'ツ', 'テ', 'ト',
    'ナ', 'ニ', 'ヌ', 'ネ', 'ノ', 'ハ', 'ヒ', 'フ', 'ヘ', 'ホ', 'マ', 'ミ', 'ム', 'メ', 'モ', 'ヤ',
    'ユ', 'ヨ', 'ラ', 'リ', 'ル', 'レ', 'ロ', 'ワ', 'ン',
];

fn normalize_width(text: &str) -> String {
    let mut out: Vec<char> = Vec::with_capacity(text.len());
    for c in text.chars() {
        let code = c as u32;
        match code {
            0xFF01..=0xFF5E => out.push(char::from_u32(code - 0xFEE0).unwrap_or(c)),
            0xFF65..=0xFF9D => out.push(HALFWIDTH_KATAKANA[(code - 0xFF65) as usize]),
            0xFF9E | 0xFF9F => {
                let semi = code == 0xFF9F;
                match out.last().copied().and_then(|prev| compose_mark(prev, semi)) {
                    Some(composed) => {
                        out.pop();
                        out.push(composed);
                    }
                    None => out.push(if semi { '\u{309C}' } else { '\u{309B}' }),
                }
            }
            _ => out.push(c),
        }
    }
    out.into_iter().collect()
}

fn compose_mark(base: char, semi: bool) -> Option<char> {
    let code = base as u32;
    let is_h_row = matches!(code, 0x30CF | 0x30D2 | 0x30D5 | 0x30D8 | 0x30DB);
    if semi {
        return is_h_row.then(|| char::from_u32(code + 2)).flatten();
    }
    let voiceable = matches!(
        code,
        0x30AB | 0x30AD | 0x30AF | 0x30B1 | 0x30B3 | 0x30B5 | 0x30B7 | 0x30B9 | 0x30BB
            | 0x30BD | 0x30BF | 0x30C1 | 0x30C4 | 0x30C6 | 0x30C8
    ) || is_h_row;
    if voiceable {
        char::from_u32(code + 1)
    } else if code == 0x30A6 {
        Some('\u{30F4}')
    } else {
        None
    }
}
