//! Text analysis.
//!
//! An [`Analyzer`] is a pipeline of char filters, one tokenizer and a chain
//! of token filters. Every index owns an [`AnalyzerSet`] built by the
//! [`AnalyzerResolver`] from its settings: the built-in analyzers plus any
//! custom ones the settings define.
//!
//! # Example
//!
//! ```rust,ignore
//! use quarry::analysis::AnalyzerResolver;
//!
//! let set = AnalyzerResolver::new().build(None)?;
//! let terms = set.resolve("simple")?.terms("Brown-Foxes");
//! // ["brown", "foxes"]
//! ```

mod builtin;
mod char_filter;
mod options;
mod plugin;
mod replay;
mod resolver;
mod settings;
mod token_filter;
mod tokenizer;

pub use builtin::BUILTIN_ANALYZERS;
pub use char_filter::CharFilter;
pub use plugin::Segmenter;
pub use resolver::AnalyzerResolver;
pub use settings::{AnalysisSettings, IndexSettings};
pub use tantivy::tokenizer::Token;
pub use token_filter::TokenFilter;
pub use tokenizer::Tokenizer;

use crate::{Error, Result};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

/// Analyzer used when a field or query names none.
pub const DEFAULT_ANALYZER: &str = "standard";

#[derive(Debug, Clone)]
pub struct Analyzer {
    char_filters: Vec<CharFilter>,
    tokenizer: Tokenizer,
    filters: Vec<TokenFilter>,
}

impl Analyzer {
    pub fn new(
        char_filters: Vec<CharFilter>,
        tokenizer: Tokenizer,
        mut filters: Vec<TokenFilter>,
    ) -> Self {
        token_filter::link_keyword_markers(&mut filters);
        Self {
            char_filters,
            tokenizer,
            filters,
        }
    }

    /// Standard tokenizer followed by lowercasing.
    pub fn standard() -> Self {
        Self::new(Vec::new(), Tokenizer::Standard, vec![TokenFilter::Lowercase])
    }

    /// Text after the char filters; token offsets refer to this text.
    pub fn filter_text<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut current = Cow::Borrowed(text);
        for filter in &self.char_filters {
            let replaced = match filter.apply(&current) {
                Cow::Borrowed(_) => None,
                Cow::Owned(s) => Some(s),
            };
            if let Some(s) = replaced {
                current = Cow::Owned(s);
            }
        }
        current
    }

    /// Tokens of `text` after the full pipeline.
    pub fn analyze(&self, text: &str) -> Vec<Token> {
        let filtered = self.filter_text(text);
        let tokens = self.tokenizer.tokenize(&filtered);
        self.filters.iter().fold(tokens, |acc, f| f.apply(acc))
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn terms(&self, text: &str) -> Vec<String> {
        self.analyze(text).into_iter().map(|t| t.text).collect()
    }

    pub(crate) fn append(&mut self, char_filters: Vec<CharFilter>, filters: Vec<TokenFilter>) {
        self.char_filters.extend(char_filters);
        self.filters.extend(filters);
        token_filter::link_keyword_markers(&mut self.filters);
    }
}

/// The analyzers an index can reference by name.
#[derive(Debug, Clone)]
pub struct AnalyzerSet {
    analyzers: HashMap<String, Arc<Analyzer>>,
    default: Arc<Analyzer>,
}

impl Default for AnalyzerSet {
    fn default() -> Self {
        Self::from_map(HashMap::new())
    }
}

impl AnalyzerSet {
    pub(crate) fn from_map(analyzers: HashMap<String, Arc<Analyzer>>) -> Self {
        let default = analyzers
            .get("default")
            .or_else(|| analyzers.get(DEFAULT_ANALYZER))
            .cloned()
            .unwrap_or_else(|| Arc::new(Analyzer::standard()));
        Self { analyzers, default }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Analyzer>> {
        self.analyzers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.analyzers.contains_key(name)
    }

    /// Look up an analyzer, reporting an unknown name as an illegal argument.
    pub fn resolve(&self, name: &str) -> Result<Arc<Analyzer>> {
        self.get(name)
            .ok_or_else(|| Error::illegal(format!("analyzer [{}] not found", name)))
    }

    /// Analyzer for an optional name, falling back to the index default.
    pub fn resolve_or_default(&self, name: Option<&str>) -> Result<Arc<Analyzer>> {
        match name {
            Some(name) => self.resolve(name),
            None => Ok(self.default.clone()),
        }
    }

    pub fn default_analyzer(&self) -> Arc<Analyzer> {
        self.default.clone()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.analyzers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_strip_then_standard() {
        let analyzer = Analyzer::new(
            vec![CharFilter::builtin("html_strip").unwrap()],
            Tokenizer::Standard,
            Vec::new(),
        );
        assert_eq!(
            analyzer.terms("<p>I'm so <b>happy</b>!</p>"),
            vec!["I'm", "so", "happy"]
        );
    }

    #[test]
    fn test_offsets_follow_filtered_text() {
        let analyzer = Analyzer::new(
            vec![CharFilter::AsciiFolding],
            Tokenizer::Standard,
            vec![TokenFilter::Lowercase],
        );
        let text = "Café Crème";
        let filtered = analyzer.filter_text(text);
        let tokens = analyzer.analyze(text);
        assert_eq!(&filtered[tokens[1].offset_from..tokens[1].offset_to], "Creme");
        assert_eq!(tokens[1].text, "creme");
    }

    #[test]
    fn test_empty_set_defaults_to_standard() -> Result<()> {
        let set = AnalyzerSet::default();
        assert_eq!(set.default_analyzer().terms("Hello World"), vec!["hello", "world"]);
        assert!(set.resolve("nope").is_err());
        assert_eq!(
            set.resolve_or_default(None)?.terms("A-B"),
            vec!["a", "b"]
        );
        Ok(())
    }
}
