use super::builtin::{self, BUILTIN_ANALYZERS};
use super::options::{get_str, Options};
use super::{
    AnalysisSettings, Analyzer, AnalyzerSet, CharFilter, Segmenter, TokenFilter, Tokenizer,
};
use crate::{Error, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Builds analyzer sets from index analysis settings.
///
/// Holds the registered [`Segmenter`] plugins, which become tokenizers
/// referenceable by name from any index.
#[derive(Default)]
pub struct AnalyzerResolver {
    segmenters: RwLock<HashMap<String, Arc<dyn Segmenter>>>,
}

impl std::fmt::Debug for AnalyzerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.segmenters.read().keys().cloned().collect();
        f.debug_struct("AnalyzerResolver")
            .field("segmenters", &names)
            .finish()
    }
}

impl AnalyzerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a segmenter as tokenizer `name`.
    pub fn register_segmenter(&self, name: impl Into<String>, segmenter: Arc<dyn Segmenter>) {
        let name = name.into();
        tracing::debug!("Registered segmenter tokenizer '{}'", name);
        self.segmenters.write().insert(name, segmenter);
    }

    /// Built-in analyzers plus every analyzer `analysis` defines.
    ///
    /// Each custom definition is validated; the first invalid component
    /// fails the whole build.
    pub fn build(&self, analysis: Option<&AnalysisSettings>) -> Result<AnalyzerSet> {
        let mut analyzers = HashMap::new();
        for name in BUILTIN_ANALYZERS {
            if let Some(analyzer) = builtin::typed(name, &Options::new())? {
                analyzers.insert(name.to_string(), Arc::new(analyzer));
            }
        }
        if let Some(analysis) = analysis {
            for (name, def) in &analysis.analyzer {
                let analyzer = self.analyzer_definition(name, def, Some(analysis))?;
                analyzers.insert(name.clone(), Arc::new(analyzer));
            }
        }
        Ok(AnalyzerSet::from_map(analyzers))
    }

    /// Assemble an unnamed analyzer from component references, as the
    /// analyze API does. References may name components of `analysis`.
    pub fn adhoc(
        &self,
        tokenizer: &Value,
        char_filters: &[Value],
        filters: &[Value],
        analysis: Option<&AnalysisSettings>,
    ) -> Result<Analyzer> {
        let tokenizer = self.tokenizer(tokenizer, analysis)?;
        let char_filters = char_filters
            .iter()
            .map(|r| self.char_filter(r, analysis))
            .collect::<Result<Vec<_>>>()?;
        let filters = filters
            .iter()
            .map(|r| self.token_filter(r, analysis))
            .collect::<Result<Vec<_>>>()?;
        Ok(Analyzer::new(char_filters, tokenizer, filters))
    }

    fn analyzer_definition(
        &self,
        name: &str,
        def: &Value,
        analysis: Option<&AnalysisSettings>,
    ) -> Result<Analyzer> {
        let obj = def.as_object().ok_or_else(|| {
            Error::parsing(format!("[analyzer] {} should be an object", name))
        })?;
        let kind = get_str(obj, "analyzer", name, "type")?.unwrap_or("custom");

        let char_filters = references(obj.get("char_filter"))
            .map(|r| self.char_filter(r, analysis))
            .collect::<Result<Vec<_>>>()?;
        let filters = references(obj.get("token_filter").or_else(|| obj.get("filter")))
            .map(|r| self.token_filter(r, analysis))
            .collect::<Result<Vec<_>>>()?;

        if kind == "custom" {
            let tokenizer = obj.get("tokenizer").ok_or_else(|| {
                Error::parsing(format!("[analyzer] {} is missing tokenizer", name))
            })?;
            let tokenizer = self.tokenizer(tokenizer, analysis)?;
            return Ok(Analyzer::new(char_filters, tokenizer, filters));
        }

        let mut analyzer = builtin::typed(kind, obj)?.ok_or_else(|| {
            Error::parsing(format!("[analyzer] {} doesn't support type [{}]", name, kind))
        })?;
        analyzer.append(char_filters, filters);
        Ok(analyzer)
    }

    fn tokenizer(&self, reference: &Value, analysis: Option<&AnalysisSettings>) -> Result<Tokenizer> {
        let plugin = |kind: &str| {
            self.segmenters
                .read()
                .get(kind)
                .map(|segmenter| Tokenizer::Plugin {
                    name: kind.to_string(),
                    segmenter: segmenter.clone(),
                })
        };
        resolve_component(
            "tokenizer",
            reference,
            analysis.map(|a| &a.tokenizer),
            |kind, opts| match plugin(kind) {
                Some(tokenizer) => Ok(tokenizer),
                None => Tokenizer::from_options(kind, opts),
            },
            |name| plugin(name).or_else(|| Tokenizer::builtin(name)),
        )
    }

    fn char_filter(&self, reference: &Value, analysis: Option<&AnalysisSettings>) -> Result<CharFilter> {
        resolve_component(
            "char_filter",
            reference,
            analysis.map(|a| &a.char_filter),
            CharFilter::from_options,
            CharFilter::builtin,
        )
    }

    fn token_filter(
        &self,
        reference: &Value,
        analysis: Option<&AnalysisSettings>,
    ) -> Result<TokenFilter> {
        resolve_component(
            "token_filter",
            reference,
            analysis.map(|a| &a.token_filter),
            TokenFilter::from_options,
            TokenFilter::builtin,
        )
    }
}

/// A reference list: absent, a single reference, or an array of them.
fn references(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    let items: Vec<&Value> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    };
    items.into_iter()
}

/// Resolve a component reference: a name defined in the settings, a
/// built-in name, or an inline `{"type": ..., options}` object.
fn resolve_component<T>(
    component: &str,
    reference: &Value,
    named: Option<&BTreeMap<String, Value>>,
    configured: impl Fn(&str, &Options) -> Result<T>,
    builtin: impl Fn(&str) -> Option<T>,
) -> Result<T> {
    let inline = |name: &str, obj: &Options| -> Result<T> {
        let kind = obj.get("type").and_then(Value::as_str).ok_or_else(|| {
            Error::parsing(format!("[{}] {} option [type] should exists", component, name))
        })?;
        configured(kind, obj)
    };

    match reference {
        Value::String(name) => {
            if let Some(def) = named.and_then(|n| n.get(name)) {
                let obj = def.as_object().ok_or_else(|| {
                    Error::parsing(format!("[{}] {} should be an object", component, name))
                })?;
                return inline(name, obj);
            }
            builtin(name).ok_or_else(|| {
                Error::parsing(format!("[{}] unknown {} [{}]", component, component, name))
            })
        }
        Value::Object(obj) => inline("inline", obj),
        _ => Err(Error::parsing(format!(
            "[{}] reference should be a string or an object",
            component
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::IndexSettings;
    use serde_json::json;

    const SENTENCE: &str = "The 2 QUICK Brown-Foxes jumped over the lazy dog's bone.";

    fn settings(value: Value) -> Result<AnalysisSettings> {
        Ok(IndexSettings::from_json(&value)?.analysis.unwrap_or_default())
    }

    #[test]
    fn test_builtins_always_present() -> Result<()> {
        let set = AnalyzerResolver::new().build(None)?;
        for name in BUILTIN_ANALYZERS {
            assert!(set.contains(name), "missing {}", name);
        }
        Ok(())
    }

    #[test]
    fn test_typed_analyzer_with_extra_filters() -> Result<()> {
        let analysis = settings(json!({
            "analysis": {
                "analyzer": {
                    "default": {
                        "type": "standard",
                        "stopwords": ["_english_"],
                        "token_filter": ["lowercase", "apostrophe", "short"]
                    }
                },
                "token_filter": {"short": {"type": "length", "min": 2, "max": 10}}
            }
        }))?;
        let set = AnalyzerResolver::new().build(Some(&analysis))?;
        assert_eq!(
            set.resolve("default")?.terms(SENTENCE),
            vec!["quick", "brown", "foxes", "jumped", "lazy", "dog", "bone"]
        );
        assert_eq!(
            set.default_analyzer().terms("Dog's"),
            vec!["dog"]
        );
        Ok(())
    }

    #[test]
    fn test_custom_analyzer_named_components() -> Result<()> {
        let analysis = settings(json!({
            "analysis": {
                "analyzer": {
                    "autocomplete": {
                        "tokenizer": "grams",
                        "char_filter": ["html_strip"],
                        "filter": ["lowercase"]
                    }
                },
                "tokenizer": {
                    "grams": {"type": "edge_ngram", "min_gram": 2, "max_gram": 4, "token_chars": ["letter"]}
                }
            }
        }))?;
        let set = AnalyzerResolver::new().build(Some(&analysis))?;
        assert_eq!(
            set.resolve("autocomplete")?.terms("<b>Quick</b>"),
            vec!["qu", "qui", "quic"]
        );
        Ok(())
    }

    #[test]
    fn test_validation_errors() -> Result<()> {
        let resolver = AnalyzerResolver::new();
        let cases = [
            json!({"analysis": {"analyzer": {"a": {"filter": ["lowercase"]}}}}),
            json!({"analysis": {"analyzer": {"a": {"tokenizer": "nope"}}}}),
            json!({"analysis": {"analyzer": {"a": {"type": "fingerprint"}}}}),
            json!({"analysis": {
                "analyzer": {"a": {"tokenizer": "standard", "filter": ["g"]}},
                "filter": {"g": {"type": "ngram", "min_gram": 3, "max_gram": 1}}
            }}),
        ];
        for case in cases {
            let analysis = settings(case)?;
            let err = resolver.build(Some(&analysis)).unwrap_err();
            assert!(matches!(err, Error::ParsingException(_)), "{}", err);
        }
        Ok(())
    }

    #[test]
    fn test_adhoc_inline_components() -> Result<()> {
        let resolver = AnalyzerResolver::new();
        let analyzer = resolver.adhoc(
            &json!("standard"),
            &[],
            &[json!({"type": "dict", "words": ["Donau", "dampf", "meer", "schiff"]})],
            None,
        )?;
        assert_eq!(
            analyzer.terms("Donaudampfschiff"),
            vec!["Donaudampfschiff", "Donau", "dampf", "schiff"]
        );
        Ok(())
    }

    #[test]
    fn test_registered_segmenter() -> Result<()> {
        let resolver = AnalyzerResolver::new();
        let pairs = |text: &str| {
            (0..text.len())
                .step_by(2)
                .map(|i| (i, (i + 2).min(text.len())))
                .collect::<Vec<_>>()
        };
        resolver.register_segmenter("pairs", Arc::new(pairs));
        let analysis = settings(json!({
            "analysis": {"analyzer": {"p": {"tokenizer": "pairs"}}}
        }))?;
        let set = resolver.build(Some(&analysis))?;
        assert_eq!(set.resolve("p")?.terms("abcde"), vec!["ab", "cd", "e"]);
        Ok(())
    }
}
