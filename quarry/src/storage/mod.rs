//! Storage kinds and the object-storage seam.
//!
//! Index data always lives on local disk; remote kinds additionally keep a
//! copy under an object-storage prefix, which the catalog cleans up when
//! an index is deleted.

#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "s3")]
pub use s3::ObjectStoreCleanup;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Disk,
    S3,
    Minio,
}

impl StorageKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "disk" | "local" => Some(StorageKind::Disk),
            "s3" => Some(StorageKind::S3),
            "minio" => Some(StorageKind::Minio),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Disk => "disk",
            StorageKind::S3 => "s3",
            StorageKind::Minio => "minio",
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, StorageKind::Disk)
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote object storage holding index copies.
#[async_trait]
pub trait ObjectStorage: Send + Sync + std::fmt::Debug {
    /// Remove every object under `prefix`; returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_kind_parse() {
        assert_eq!(StorageKind::parse("S3"), Some(StorageKind::S3));
        assert_eq!(StorageKind::parse("local"), Some(StorageKind::Disk));
        assert_eq!(StorageKind::parse("tape"), None);
        assert!(StorageKind::Minio.is_remote());
        assert!(!StorageKind::default().is_remote());
    }

    #[test]
    fn test_storage_kind_serde() -> Result<()> {
        assert_eq!(serde_json::to_string(&StorageKind::Minio)?, "\"minio\"");
        let kind: StorageKind = serde_json::from_str("\"disk\"")?;
        assert_eq!(kind, StorageKind::Disk);
        Ok(())
    }
}
