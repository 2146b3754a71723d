use crate::analysis::IndexSettings;
use crate::mapping::Mappings;
use crate::storage::StorageKind;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const META_FILE: &str = "meta.json";

/// Persisted description of one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    #[serde(default)]
    pub storage_type: StorageKind,
    #[serde(default)]
    pub settings: IndexSettings,
    #[serde(default)]
    pub mappings: Mappings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexMeta {
    pub fn new(name: &str, storage_type: StorageKind, settings: IndexSettings, mappings: Mappings) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            storage_type,
            settings,
            mappings,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn exists(dir: &Path) -> bool {
        dir.join(META_FILE).is_file()
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let content = fs::read(dir.join(META_FILE))?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Write through a temporary file so readers never see a torn file.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let tmp = dir.join(format!("{}.tmp", META_FILE));
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, dir.join(META_FILE))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FieldType, Property};
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() -> Result<()> {
        let dir = TempDir::new()?;
        let mut mappings = Mappings::new();
        mappings.insert("title", Property::new(FieldType::Text));
        let meta = IndexMeta::new("books", StorageKind::Minio, IndexSettings::default(), mappings);
        meta.save(dir.path())?;

        assert!(IndexMeta::exists(dir.path()));
        assert!(!dir.path().join("meta.json.tmp").exists());
        assert_eq!(IndexMeta::load(dir.path())?, meta);
        Ok(())
    }
}
