use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Index-level settings persisted with the index metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_shards: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_replicas: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisSettings>,
}

/// Named analysis components. Definitions stay as raw JSON and are
/// validated when the analyzer set is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub analyzer: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tokenizer: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub char_filter: BTreeMap<String, Value>,
    #[serde(default, alias = "filter", skip_serializing_if = "BTreeMap::is_empty")]
    pub token_filter: BTreeMap<String, Value>,
}

impl AnalysisSettings {
    pub fn is_empty(&self) -> bool {
        self.analyzer.is_empty()
            && self.tokenizer.is_empty()
            && self.char_filter.is_empty()
            && self.token_filter.is_empty()
    }
}

impl IndexSettings {
    /// Parse a settings body.
    ///
    /// Accepts the bare form, `{"settings": {...}}` and the `index.` nesting
    /// (`{"index": {"analysis": ...}}`).
    pub fn from_json(value: &Value) -> Result<Self> {
        let mut value = value.get("settings").unwrap_or(value);
        if let Some(index) = value.get("index").filter(|v| v.is_object()) {
            value = index;
        }
        if !value.is_object() {
            return Err(Error::parsing("[settings] should be an object"));
        }
        let settings: IndexSettings = serde_json::from_value(value.clone())
            .map_err(|e| Error::parsing(format!("[settings] {}", e)))?;
        Ok(settings.normalized())
    }

    /// Drop an analysis block that names nothing.
    fn normalized(mut self) -> Self {
        if self.analysis.as_ref().is_some_and(AnalysisSettings::is_empty) {
            self.analysis = None;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_alias() -> Result<()> {
        let settings = IndexSettings::from_json(&json!({
            "settings": {
                "number_of_shards": 3,
                "analysis": {
                    "analyzer": {"my": {"tokenizer": "standard", "filter": ["lowercase"]}},
                    "filter": {"short": {"type": "length", "max": 5}}
                }
            }
        }))?;
        assert_eq!(settings.number_of_shards, Some(3));
        let analysis = settings.analysis.expect("analysis");
        assert!(analysis.token_filter.contains_key("short"));
        assert!(analysis.analyzer.contains_key("my"));
        Ok(())
    }

    #[test]
    fn test_index_nesting_and_empty_analysis() -> Result<()> {
        let settings = IndexSettings::from_json(&json!({"index": {"number_of_replicas": 1, "analysis": {}}}))?;
        assert_eq!(settings.number_of_replicas, Some(1));
        assert!(settings.analysis.is_none());
        Ok(())
    }

    #[test]
    fn test_rejects_bad_shape() {
        assert!(IndexSettings::from_json(&json!({"analysis": {"analyzer": []}})).is_err());
        assert!(IndexSettings::from_json(&json!("x")).is_err());
    }
}
