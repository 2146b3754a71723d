use super::meta::IndexMeta;
use crate::analysis::{AnalyzerResolver, AnalyzerSet, IndexSettings};
use crate::document::DocumentBuilder;
use crate::engine::{EngineResults, EngineSearch, IndexEngine, WriteStats};
use crate::mapping::{Mappings, SchemaRegistry};
use crate::storage::StorageKind;
use crate::{metrics, Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of a single document write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentWrite {
    pub id: String,
    /// False when an existing document was replaced.
    pub created: bool,
}

/// Per-item outcome of a bulk write, in request order.
pub type BulkItem = std::result::Result<String, Error>;

/// One open index: schema registry, analyzers, engine and bookkeeping.
pub struct IndexHandle {
    name: String,
    dir: PathBuf,
    storage_kind: StorageKind,
    created_at: DateTime<Utc>,
    registry: SchemaRegistry,
    resolver: Arc<AnalyzerResolver>,
    settings: RwLock<IndexSettings>,
    analyzers: RwLock<Arc<AnalyzerSet>>,
    engine: Box<dyn IndexEngine>,
    doc_count: AtomicU64,
    size: SizeTracker,
    /// Serializes the write path so concurrent inference cannot race.
    write_lock: tokio::sync::Mutex<()>,
    /// Serializes metadata persistence.
    persist_lock: Mutex<()>,
}

struct SizeTracker {
    bytes: AtomicU64,
    next_run: Mutex<Instant>,
    in_flight: AtomicBool,
    interval: Duration,
}

impl IndexHandle {
    pub(crate) fn new(
        meta: IndexMeta,
        dir: PathBuf,
        engine: Box<dyn IndexEngine>,
        resolver: Arc<AnalyzerResolver>,
        size_refresh: Duration,
    ) -> Result<Self> {
        let analyzers = resolver.build(meta.settings.analysis.as_ref())?;
        let doc_count = engine.doc_count()?;
        Ok(Self {
            name: meta.name,
            dir,
            storage_kind: meta.storage_type,
            created_at: meta.created_at,
            registry: SchemaRegistry::with_mappings(meta.mappings),
            resolver,
            settings: RwLock::new(meta.settings),
            analyzers: RwLock::new(Arc::new(analyzers)),
            engine,
            doc_count: AtomicU64::new(doc_count),
            size: SizeTracker {
                bytes: AtomicU64::new(0),
                next_run: Mutex::new(Instant::now()),
                in_flight: AtomicBool::new(false),
                interval: size_refresh,
            },
            write_lock: tokio::sync::Mutex::new(()),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.storage_kind
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn mappings(&self) -> Arc<Mappings> {
        self.registry.get()
    }

    pub fn analyzers(&self) -> Arc<AnalyzerSet> {
        self.analyzers.read().clone()
    }

    pub fn settings(&self) -> IndexSettings {
        self.settings.read().clone()
    }

    pub fn doc_count(&self) -> u64 {
        self.doc_count.load(Ordering::Relaxed)
    }

    pub fn meta(&self) -> IndexMeta {
        IndexMeta {
            name: self.name.clone(),
            storage_type: self.storage_kind,
            settings: self.settings(),
            mappings: (*self.mappings()).clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock();
        self.meta().save(&self.dir)
    }

    /// Index one document, generating an id when none is given.
    pub async fn index_document(&self, id: Option<String>, source: &Value) -> Result<DocumentWrite> {
        let _write = self.write_lock.lock().await;
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let (document, dirty) = self.build(&id, source)?;
        let stats = self.engine.write(vec![document]).await?;
        self.after_write(stats, dirty)?;
        Ok(DocumentWrite {
            id,
            created: stats.inserted > 0,
        })
    }

    /// Index a batch; documents that fail to build are reported per item
    /// and the rest are written together.
    pub async fn bulk(&self, docs: Vec<(Option<String>, Value)>) -> Result<Vec<BulkItem>> {
        let _write = self.write_lock.lock().await;
        let mut items = Vec::with_capacity(docs.len());
        let mut batch = Vec::with_capacity(docs.len());
        let mut dirty = false;
        for (id, source) in docs {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            match self.build(&id, &source) {
                Ok((document, changed)) => {
                    dirty |= changed;
                    batch.push(document);
                    items.push(Ok(id));
                }
                Err(e) => items.push(Err(e)),
            }
        }
        let stats = self.engine.write(batch).await?;
        self.after_write(stats, dirty)?;
        Ok(items)
    }

    fn build(&self, id: &str, source: &Value) -> Result<(crate::engine::EngineDocument, bool)> {
        let mappings = self.registry.get();
        let analyzers = self.analyzers();
        let built = DocumentBuilder::new(&self.name, &mappings, &analyzers).build(id, source)?;
        let dirty = match built.mappings {
            Some(updated) => self.registry.set(updated),
            None => false,
        };
        Ok((built.document, dirty))
    }

    fn after_write(&self, stats: WriteStats, dirty: bool) -> Result<()> {
        self.doc_count.fetch_add(stats.inserted, Ordering::Relaxed);
        metrics::record_documents_written(&self.name, stats.inserted, stats.replaced);
        if dirty {
            self.persist().map_err(|e| {
                Error::EngineFailure(format!(
                    "documents of index [{}] were written but its mappings were not persisted: {}",
                    self.name, e
                ))
            })?;
        }
        Ok(())
    }

    pub async fn delete_document(&self, id: &str) -> Result<()> {
        let _write = self.write_lock.lock().await;
        if !self.engine.delete(id).await? {
            return Err(Error::NotFound(format!(
                "document [{}] not found in index [{}]",
                id, self.name
            )));
        }
        self.doc_count.fetch_sub(1, Ordering::Relaxed);
        metrics::record_document_deleted(&self.name);
        Ok(())
    }

    /// Merge explicit mappings into the current set.
    ///
    /// A field's type cannot change once set, and every referenced analyzer
    /// must exist in the index's analyzer set.
    pub fn put_mappings(&self, update: Mappings) -> Result<()> {
        let analyzers = self.analyzers();
        validate_analyzers(&update, &analyzers)?;
        let mut merged = (*self.registry.get()).clone();
        for (field, prop) in update.properties {
            if let Some(existing) = merged.get(&field) {
                if existing.field_type != prop.field_type {
                    return Err(Error::illegal(format!(
                        "mapper [{}] cannot be changed from type [{}] to [{}]",
                        field, existing.field_type, prop.field_type
                    )));
                }
            }
            merged.insert(field, prop);
        }
        if self.registry.set(merged) {
            self.persist()?;
        }
        Ok(())
    }

    /// Replace index settings, rebuilding the analyzer set.
    pub fn update_settings(&self, settings: IndexSettings) -> Result<()> {
        let current = self.settings();
        if settings.analysis != current.analysis && self.doc_count() > 0 {
            return Err(Error::illegal(format!(
                "Can't update non dynamic settings [[index.analysis]] for open index [{}] holding documents",
                self.name
            )));
        }
        let analyzers = self.resolver.build(settings.analysis.as_ref())?;
        validate_analyzers(&self.registry.get(), &analyzers)?;
        *self.analyzers.write() = Arc::new(analyzers);
        *self.settings.write() = settings;
        self.persist()?;
        tracing::info!("Index '{}': settings updated", self.name);
        Ok(())
    }

    pub async fn search(&self, request: EngineSearch) -> Result<EngineResults> {
        let start = Instant::now();
        let result = self.engine.search(request).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::record_search(&self.name, start.elapsed(), outcome);
        result
    }

    /// Last computed on-disk size; schedules a recomputation on the
    /// blocking pool when the refresh interval has passed.
    pub fn storage_size_bytes(self: &Arc<Self>) -> u64 {
        let due = {
            let mut next = self.size.next_run.lock();
            let now = Instant::now();
            if now >= *next && !self.size.in_flight.swap(true, Ordering::AcqRel) {
                *next = now + self.size.interval;
                true
            } else {
                false
            }
        };
        if due {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let handle = Arc::clone(self);
                    runtime.spawn_blocking(move || handle.refresh_size());
                }
                Err(_) => self.refresh_size(),
            }
        }
        self.size.bytes.load(Ordering::Relaxed)
    }

    fn refresh_size(&self) {
        match dir_size(&self.dir) {
            Ok(bytes) => self.size.bytes.store(bytes, Ordering::Relaxed),
            Err(e) => tracing::warn!("Index '{}': size computation failed: {}", self.name, e),
        }
        self.size.in_flight.store(false, Ordering::Release);
    }

    pub(crate) async fn close(&self) -> Result<()> {
        self.engine.close().await
    }
}

fn validate_analyzers(mappings: &Mappings, analyzers: &AnalyzerSet) -> Result<()> {
    for (field, analyzer) in mappings.analyzer_names() {
        if !analyzers.contains(analyzer) {
            return Err(Error::illegal(format!(
                "analyzer [{}] has not been configured in mappings for field [{}]",
                analyzer, field
            )));
        }
    }
    Ok(())
}

fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        total += if meta.is_dir() {
            dir_size(&entry.path())?
        } else {
            meta.len()
        };
    }
    Ok(total)
}
