//! Configuration management for quarry
//!
//! Default config location: ~/.quarry/config.toml

use crate::storage::StorageKind;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Remote copy of index data for `s3` / `minio` indices.
    #[serde(default)]
    pub object_storage: Option<ObjectStorageConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub default_kind: StorageKind,
    /// Indexing memory budget per index writer
    #[serde(default = "default_writer_memory_mb")]
    pub writer_memory_mb: usize,
    /// Minimum interval between storage size recomputations
    #[serde(default = "default_size_refresh_secs")]
    pub size_refresh_secs: u64,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".quarry")
}

fn default_writer_memory_mb() -> usize {
    50
}

fn default_size_refresh_secs() -> u64 {
    600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_kind: StorageKind::default(),
            writer_memory_mb: default_writer_memory_mb(),
            size_refresh_secs: default_size_refresh_secs(),
        }
    }
}

impl StorageConfig {
    pub fn writer_heap_bytes(&self) -> usize {
        self.writer_memory_mb.max(15) * 1024 * 1024
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_size")]
    pub default_size: usize,
    /// Upper bound on `from + size`
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

fn default_size() -> usize {
    10
}

fn default_max_size() -> usize {
    10_000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_size: default_size(),
            max_size: default_max_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_level() -> String {
    "info,quarry=debug".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObjectStorageConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint (MinIO and other S3-compatible services)
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Expand ~ to home directory in path
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
        Ok(home.join(rest))
    } else if s == "~" {
        dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Config {
    /// Load config from file path, or create default
    pub fn load_or_create(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            toml::from_str(&content)?
        } else {
            let config = Config::default();
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Err(e) = config.save(config_path) {
                tracing::warn!("Could not write default config to {:?}: {}", config_path, e);
            }
            config
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.storage.data_dir = expand_tilde(&config.storage.data_dir)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Apply `QUARRY_DATA_PATH` and `QUARRY_STORAGE_KIND` overrides.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = var("QUARRY_DATA_PATH").filter(|p| !p.is_empty()) {
            self.storage.data_dir = PathBuf::from(path);
        }
        if let Some(kind) = var("QUARRY_STORAGE_KIND").filter(|k| !k.is_empty()) {
            self.storage.default_kind = StorageKind::parse(&kind)
                .ok_or_else(|| anyhow!("Unknown storage kind in QUARRY_STORAGE_KIND: {}", kind))?;
        }
        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.indices_dir())?;
        Ok(())
    }

    /// Directory holding one subdirectory per index
    pub fn indices_dir(&self) -> PathBuf {
        self.storage.data_dir.join("indices")
    }
}
