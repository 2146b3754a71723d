//! Index templates
//!
//! A template carries settings and mappings that an index picks up when it
//! is created under a name matching one of the template's patterns.

use crate::analysis::IndexSettings;
use crate::mapping::Mappings;
use crate::{Error, Result};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const TEMPLATES_FILE: &str = "_templates.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexTemplate {
    pub name: String,
    /// Glob patterns over index names (`*` and `?`).
    pub index_patterns: Vec<String>,
    /// Higher wins when several templates match.
    #[serde(default)]
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<IndexSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings: Option<Mappings>,
}

impl IndexTemplate {
    pub fn matches(&self, index: &str) -> bool {
        self.index_patterns.iter().any(|p| matches_pattern(index, p))
    }

    /// Combine with explicit create arguments. Explicit settings replace
    /// the template's; explicit mappings override it field by field.
    pub fn apply(
        &self,
        settings: Option<IndexSettings>,
        mappings: Option<Mappings>,
    ) -> (Option<IndexSettings>, Option<Mappings>) {
        let settings = settings.or_else(|| self.settings.clone());
        let mappings = match (self.mappings.clone(), mappings) {
            (Some(mut base), Some(explicit)) => {
                for (field, property) in explicit.properties {
                    base.insert(field, property);
                }
                Some(base)
            }
            (base, explicit) => explicit.or(base),
        };
        (settings, mappings)
    }
}

fn pattern_to_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let mut out = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    Regex::new(&out)
}

pub fn matches_pattern(index: &str, pattern: &str) -> bool {
    pattern_to_regex(pattern).is_ok_and(|re| re.is_match(index))
}

/// Templates keyed by name, persisted as one JSON file under the catalog
/// root.
pub struct TemplateRegistry {
    path: Option<PathBuf>,
    templates: RwLock<BTreeMap<String, IndexTemplate>>,
}

impl TemplateRegistry {
    /// Load templates saved under `root`, if any.
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(TEMPLATES_FILE);
        let templates = if path.is_file() {
            serde_json::from_slice(&fs::read(&path)?)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: Some(path),
            templates: RwLock::new(templates),
        })
    }

    /// A registry that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            templates: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create or replace a template.
    pub fn put(&self, template: IndexTemplate) -> Result<()> {
        if template.name.is_empty() {
            return Err(Error::illegal("index template name must not be empty"));
        }
        if template.index_patterns.is_empty() {
            return Err(Error::illegal(format!(
                "index template [{}] must have at least one index pattern",
                template.name
            )));
        }
        if let Some(pattern) = template
            .index_patterns
            .iter()
            .find(|p| p.is_empty() || pattern_to_regex(p).is_err())
        {
            return Err(Error::illegal(format!(
                "index template [{}] has invalid index pattern [{}]",
                template.name, pattern
            )));
        }
        let mut templates = self.templates.write();
        let name = template.name.clone();
        let previous = templates.insert(name.clone(), template);
        if let Err(e) = self.persist(&templates) {
            match previous {
                Some(previous) => templates.insert(name, previous),
                None => templates.remove(&name),
            };
            return Err(e);
        }
        tracing::info!("Stored index template '{}'", name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<IndexTemplate> {
        self.templates.read().get(name).cloned()
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let mut templates = self.templates.write();
        let removed = templates
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("index_template [{}] missing", name)))?;
        if let Err(e) = self.persist(&templates) {
            templates.insert(name.to_string(), removed);
            return Err(e);
        }
        tracing::info!("Deleted index template '{}'", name);
        Ok(())
    }

    /// All templates, sorted by name.
    pub fn list(&self) -> Vec<IndexTemplate> {
        self.templates.read().values().cloned().collect()
    }

    /// The highest-priority template matching `index`; name breaks ties.
    pub fn best_match(&self, index: &str) -> Option<IndexTemplate> {
        self.templates
            .read()
            .values()
            .filter(|t| t.matches(index))
            .max_by(|a, b| a.priority.cmp(&b.priority).then_with(|| b.name.cmp(&a.name)))
            .cloned()
    }

    fn persist(&self, templates: &BTreeMap<String, IndexTemplate>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(templates)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FieldType, Property};
    use tempfile::TempDir;

    fn template(name: &str, patterns: &[&str], priority: u32) -> IndexTemplate {
        IndexTemplate {
            name: name.to_string(),
            index_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            priority,
            settings: None,
            mappings: None,
        }
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("logs-2024.01.02", "logs-*"));
        assert!(matches_pattern("logs", "logs"));
        assert!(matches_pattern("log1", "log?"));
        assert!(!matches_pattern("logs", "log"));
        assert!(!matches_pattern("logsX2024", "logs.2024"));
        assert!(matches_pattern("a(b)", "a(*)"));
    }

    #[test]
    fn test_best_match_by_priority() -> Result<()> {
        let registry = TemplateRegistry::in_memory();
        registry.put(template("catch_all", &["*"], 0))?;
        registry.put(template("logs", &["logs-*"], 10))?;
        registry.put(template("metrics", &["metrics-*", "stats-*"], 10))?;

        assert_eq!(registry.best_match("logs-1").map(|t| t.name), Some("logs".to_string()));
        assert_eq!(registry.best_match("stats-1").map(|t| t.name), Some("metrics".to_string()));
        assert_eq!(registry.best_match("other").map(|t| t.name), Some("catch_all".to_string()));
        registry.delete("catch_all")?;
        assert!(registry.best_match("other").is_none());
        assert!(registry.delete("catch_all").unwrap_err().is_not_found());
        Ok(())
    }

    #[test]
    fn test_rejects_empty_patterns() {
        let registry = TemplateRegistry::in_memory();
        assert!(registry.put(template("none", &[], 0)).is_err());
        assert!(registry.put(template("blank", &[""], 0)).is_err());
        assert!(registry.put(template("", &["a*"], 0)).is_err());
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_apply_merges_mappings() {
        let mut base = Mappings::new();
        base.insert("level", Property::new(FieldType::Keyword));
        base.insert("msg", Property::new(FieldType::Text));
        let mut t = template("logs", &["logs-*"], 0);
        t.mappings = Some(base);
        t.settings = Some(IndexSettings {
            number_of_shards: Some(3),
            ..IndexSettings::default()
        });

        let mut explicit = Mappings::new();
        explicit.insert("msg", Property::new(FieldType::Keyword));
        let (settings, mappings) = t.apply(None, Some(explicit));
        assert_eq!(settings.and_then(|s| s.number_of_shards), Some(3));
        let mappings = mappings.unwrap_or_default();
        assert_eq!(mappings.get("level").map(|p| p.field_type), Some(FieldType::Keyword));
        assert_eq!(mappings.get("msg").map(|p| p.field_type), Some(FieldType::Keyword));

        let (settings, _) = t.apply(Some(IndexSettings::default()), None);
        assert_eq!(settings, Some(IndexSettings::default()));
    }

    #[test]
    fn test_persists_across_open() -> Result<()> {
        let dir = TempDir::new()?;
        {
            let registry = TemplateRegistry::open(dir.path())?;
            registry.put(template("logs", &["logs-*"], 5))?;
        }
        let registry = TemplateRegistry::open(dir.path())?;
        assert_eq!(registry.get("logs"), Some(template("logs", &["logs-*"], 5)));
        assert!(!dir.path().join("_templates.json.tmp").exists());
        Ok(())
    }
}
