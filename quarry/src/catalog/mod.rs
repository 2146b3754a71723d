//! Index catalog: the process-wide registry of open indices.
//!
//! Each index lives in `<root>/<name>/` with its engine files and a
//! `meta.json` describing settings and mappings. Indices found on disk are
//! reopened when the catalog opens. Index templates live alongside in
//! `_templates.json`.

mod index;
mod meta;
mod template;

pub use index::{BulkItem, DocumentWrite, IndexHandle};
pub use meta::{IndexMeta, META_FILE};
pub use template::{matches_pattern, IndexTemplate, TemplateRegistry, TEMPLATES_FILE};

use crate::analysis::{AnalyzerResolver, IndexSettings};
use crate::config::Config;
use crate::engine::TextEngine;
use crate::mapping::Mappings;
use crate::storage::{ObjectStorage, StorageKind};
use crate::{metrics, Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Longest accepted index name, in bytes.
const MAX_NAME_BYTES: usize = 255;

const INVALID_NAME_CHARS: &[char] = &['\\', '/', '*', '?', '"', '<', '>', '|', ' ', ',', '#', ':'];

#[derive(Debug, Clone)]
pub struct CatalogOptions {
    pub default_kind: StorageKind,
    pub writer_heap_bytes: usize,
    pub size_refresh: Duration,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            default_kind: StorageKind::Disk,
            writer_heap_bytes: 50 * 1024 * 1024,
            size_refresh: Duration::from_secs(600),
        }
    }
}

impl From<&Config> for CatalogOptions {
    fn from(config: &Config) -> Self {
        Self {
            default_kind: config.storage.default_kind,
            writer_heap_bytes: config.storage.writer_heap_bytes(),
            size_refresh: Duration::from_secs(config.storage.size_refresh_secs),
        }
    }
}

pub struct IndexCatalog {
    root: PathBuf,
    options: CatalogOptions,
    resolver: Arc<AnalyzerResolver>,
    indices: RwLock<HashMap<String, Arc<IndexHandle>>>,
    templates: TemplateRegistry,
    object_storage: Option<Arc<dyn ObjectStorage>>,
}

impl IndexCatalog {
    /// Open the catalog rooted at `root`, loading every index found there.
    pub fn open(root: impl AsRef<Path>, options: CatalogOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let resolver = Arc::new(AnalyzerResolver::new());

        let mut indices = HashMap::new();
        for entry in std::fs::read_dir(&root)? {
            let dir = entry?.path();
            if !dir.is_dir() || !IndexMeta::exists(&dir) {
                continue;
            }
            let meta = IndexMeta::load(&dir)?;
            let name = meta.name.clone();
            let handle = Self::open_handle(meta, dir, &options, &resolver)?;
            tracing::info!("Loaded index '{}' ({} documents)", name, handle.doc_count());
            indices.insert(name, Arc::new(handle));
        }
        metrics::update_indices_count(indices.len());
        let templates = TemplateRegistry::open(&root)?;

        Ok(Self {
            root,
            options,
            resolver,
            indices: RwLock::new(indices),
            templates,
            object_storage: None,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open(config.indices_dir(), CatalogOptions::from(config))
    }

    /// Use `storage` to clean up remote copies of deleted indices.
    pub fn with_object_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.object_storage = Some(storage);
        self
    }

    pub fn resolver(&self) -> &Arc<AnalyzerResolver> {
        &self.resolver
    }

    /// Templates applied to indices created from now on.
    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    fn open_handle(
        meta: IndexMeta,
        dir: PathBuf,
        options: &CatalogOptions,
        resolver: &Arc<AnalyzerResolver>,
    ) -> Result<IndexHandle> {
        let engine = TextEngine::open(&meta.name, &dir.join("data"), options.writer_heap_bytes)?;
        IndexHandle::new(meta, dir, Box::new(engine), resolver.clone(), options.size_refresh)
    }

    pub fn get(&self, name: &str) -> Option<Arc<IndexHandle>> {
        self.indices.read().get(name).cloned()
    }

    /// Like [`get`](Self::get), reporting a missing index as not-found.
    pub fn require(&self, name: &str) -> Result<Arc<IndexHandle>> {
        self.get(name).ok_or_else(|| Error::index_not_found(name))
    }

    /// Names starting with `prefix`, sorted.
    pub fn list(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .indices
            .read()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn create(
        &self,
        name: &str,
        storage_kind: Option<StorageKind>,
        settings: Option<IndexSettings>,
        mappings: Option<Mappings>,
    ) -> Result<Arc<IndexHandle>> {
        validate_name(name)?;
        let mut indices = self.indices.write();
        if indices.contains_key(name) {
            return Err(Error::illegal(format!("index [{}] already exists", name)));
        }
        let handle = self.create_locked(name, storage_kind, settings, mappings)?;
        indices.insert(name.to_string(), handle.clone());
        metrics::update_indices_count(indices.len());
        Ok(handle)
    }

    /// Return the named index, creating it with defaults when absent.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<IndexHandle>> {
        if let Some(handle) = self.get(name) {
            return Ok(handle);
        }
        validate_name(name)?;
        let mut indices = self.indices.write();
        if let Some(handle) = indices.get(name) {
            return Ok(handle.clone());
        }
        let handle = self.create_locked(name, None, None, None)?;
        indices.insert(name.to_string(), handle.clone());
        metrics::update_indices_count(indices.len());
        Ok(handle)
    }

    fn create_locked(
        &self,
        name: &str,
        storage_kind: Option<StorageKind>,
        settings: Option<IndexSettings>,
        mappings: Option<Mappings>,
    ) -> Result<Arc<IndexHandle>> {
        let kind = storage_kind.unwrap_or(self.options.default_kind);
        let (settings, mappings) = match self.templates.best_match(name) {
            Some(template) => {
                tracing::debug!("Index '{}' matches template '{}'", name, template.name);
                template.apply(settings, mappings)
            }
            None => (settings, mappings),
        };
        let meta = IndexMeta::new(
            name,
            kind,
            settings.unwrap_or_default(),
            Mappings::new(),
        );
        let dir = self.root.join(name);
        let handle = Self::open_handle(meta, dir.clone(), &self.options, &self.resolver)
            .and_then(|handle| {
                if let Some(mappings) = mappings.filter(|m| !m.is_empty()) {
                    handle.put_mappings(mappings)?;
                }
                handle.persist()?;
                Ok(handle)
            });
        match handle {
            Ok(handle) => {
                tracing::info!("Created index '{}' (storage: {})", name, kind);
                Ok(Arc::new(handle))
            }
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&dir) {
                    tracing::warn!("Failed to clean up index dir {:?}: {}", dir, cleanup);
                }
                Err(e)
            }
        }
    }

    /// Close and remove an index with all its persisted state.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let handle = {
            let mut indices = self.indices.write();
            let handle = indices.remove(name).ok_or_else(|| Error::index_not_found(name))?;
            metrics::update_indices_count(indices.len());
            handle
        };
        handle.close().await?;
        let dir = handle.dir().to_path_buf();
        tokio::fs::remove_dir_all(&dir).await?;

        if handle.storage_kind().is_remote() {
            if let Some(storage) = &self.object_storage {
                match storage.delete_prefix(name).await {
                    Ok(n) => tracing::debug!("Removed {} remote objects of index '{}'", n, name),
                    Err(e) => tracing::warn!(
                        "Failed to delete {} objects of index '{}': {}",
                        storage.backend_name(),
                        name,
                        e
                    ),
                }
            }
        }
        tracing::info!("Deleted index '{}'", name);
        Ok(())
    }

    /// Close every index; the catalog is unusable afterwards.
    pub async fn close(&self) -> Result<()> {
        let handles: Vec<Arc<IndexHandle>> = self.indices.write().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.close().await?;
        }
        metrics::update_indices_count(0);
        Ok(())
    }
}

/// Index names must be usable as directory names and must not collide with
/// system indices or wildcard patterns.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Err(Error::illegal(format!("Invalid index name [{}], {}", name, reason)));
    if name.is_empty() {
        return invalid("must not be empty");
    }
    if name.starts_with('_') || name.starts_with('-') || name.starts_with('+') {
        return invalid("must not start with '_', '-', or '+'");
    }
    if name == "." || name == ".." {
        return invalid("must not be '.' or '..'");
    }
    if name.len() > MAX_NAME_BYTES {
        return invalid("index name is too long");
    }
    if let Some(c) = name.chars().find(|c| INVALID_NAME_CHARS.contains(c) || c.is_control()) {
        return invalid(&format!("must not contain '{}'", c));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSearch;
    use crate::mapping::{FieldType, Property};
    use crate::query::ExecutableQuery;
    use serde_json::json;
    use tempfile::TempDir;

    fn options() -> CatalogOptions {
        CatalogOptions {
            writer_heap_bytes: 15_000_000,
            ..CatalogOptions::default()
        }
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("logs-2024.01").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("_system").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("logs*").is_err());
        assert!(validate_name("..").is_err());
    }

    #[tokio::test]
    async fn test_create_write_and_reload() -> Result<()> {
        let dir = TempDir::new()?;
        {
            let catalog = IndexCatalog::open(dir.path(), options())?;
            let handle = catalog.get_or_create("books")?;
            let write = handle
                .index_document(Some("1".to_string()), &json!({"title": "Dune", "pages": 412}))
                .await?;
            assert!(write.created);
            let write = handle
                .index_document(Some("1".to_string()), &json!({"title": "Dune Messiah"}))
                .await?;
            assert!(!write.created);
            assert_eq!(handle.doc_count(), 1);
            catalog.close().await?;
        }

        let catalog = IndexCatalog::open(dir.path(), options())?;
        let handle = catalog.require("books")?;
        assert_eq!(handle.doc_count(), 1);
        let mappings = handle.mappings();
        assert_eq!(mappings.get("pages").map(|p| p.field_type), Some(FieldType::Numeric));
        assert!(mappings.contains("_id"));
        assert!(mappings.contains("@timestamp"));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_index() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = IndexCatalog::open(dir.path(), options())?;
        catalog.create("logs", None, None, None)?;
        assert!(catalog.create("logs", None, None, None).is_err());

        catalog.delete("logs").await?;
        assert!(catalog.get("logs").is_none());
        assert!(!dir.path().join("logs").exists());
        assert!(catalog.delete("logs").await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_templates_apply_on_create() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = IndexCatalog::open(dir.path(), options())?;
        let mut mappings = Mappings::new();
        mappings.insert("level", Property::new(FieldType::Keyword));
        mappings.insert("msg", Property::new(FieldType::Text));
        catalog.templates().put(IndexTemplate {
            name: "logs".to_string(),
            index_patterns: vec!["logs-*".to_string()],
            priority: 1,
            settings: Some(IndexSettings {
                number_of_shards: Some(2),
                ..IndexSettings::default()
            }),
            mappings: Some(mappings),
        })?;

        let handle = catalog.get_or_create("logs-1")?;
        assert_eq!(handle.mappings().get("level").map(|p| p.field_type), Some(FieldType::Keyword));
        assert_eq!(handle.settings().number_of_shards, Some(2));

        let mut explicit = Mappings::new();
        explicit.insert("msg", Property::new(FieldType::Keyword));
        let handle = catalog.create("logs-2", None, Some(IndexSettings::default()), Some(explicit))?;
        let mappings = handle.mappings();
        assert_eq!(mappings.get("level").map(|p| p.field_type), Some(FieldType::Keyword));
        assert_eq!(mappings.get("msg").map(|p| p.field_type), Some(FieldType::Keyword));
        assert_eq!(handle.settings().number_of_shards, None);

        let handle = catalog.create("other", None, None, None)?;
        assert!(handle.mappings().get("level").is_none());

        catalog.close().await?;
        let reopened = IndexCatalog::open(dir.path(), options())?;
        assert!(reopened.templates().get("logs").is_some());
        assert_eq!(reopened.list("logs-"), vec!["logs-1", "logs-2"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_by_prefix() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = IndexCatalog::open(dir.path(), options())?;
        for name in ["a_2", "b_1", "a_1"] {
            catalog.create(name, None, None, None)?;
        }
        assert_eq!(catalog.list("a_"), vec!["a_1", "a_2"]);
        assert_eq!(catalog.list("").len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_bulk_reports_items() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = IndexCatalog::open(dir.path(), options())?;
        let handle = catalog.get_or_create("books")?;
        let items = handle
            .bulk(vec![
                (Some("1".to_string()), json!({"year": 1965})),
                (Some("2".to_string()), json!({"year": "unknown"})),
                (None, json!({"year": 1969})),
            ])
            .await?;
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(Error::TypeConflict { .. })));
        assert!(items[2].is_ok());
        assert_eq!(handle.doc_count(), 2);

        let results = handle
            .search(EngineSearch {
                query: ExecutableQuery::all(),
                limit: 10,
                aggregations: vec![],
            })
            .await?;
        assert_eq!(results.total, 2);

        handle.delete_document("1").await?;
        assert!(handle.delete_document("1").await.unwrap_err().is_not_found());
        assert_eq!(handle.doc_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_mapping_and_settings_updates() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = IndexCatalog::open(dir.path(), options())?;
        let settings = IndexSettings::from_json(&json!({
            "analysis": {"analyzer": {"folded": {"tokenizer": "standard", "filter": ["lowercase", "asciifolding"]}}}
        }))?;
        let handle = catalog.create("books", None, Some(settings), None)?;

        let mut mappings = Mappings::new();
        mappings.insert("title", Property::new(FieldType::Text).with_analyzer("folded"));
        handle.put_mappings(mappings)?;

        let mut bad = Mappings::new();
        bad.insert("body", Property::new(FieldType::Text).with_analyzer("missing"));
        assert!(matches!(handle.put_mappings(bad), Err(Error::IllegalArgument(_))));

        let mut retype = Mappings::new();
        retype.insert("title", Property::new(FieldType::Keyword));
        assert!(handle.put_mappings(retype).is_err());

        handle
            .index_document(None, &json!({"title": "Crème Brûlée"}))
            .await?;
        // analysis is locked once documents exist
        assert!(handle.update_settings(IndexSettings::default()).is_err());
        Ok(())
    }
}
