//! `object_store`-backed cleanup for S3 and MinIO index copies.

use super::ObjectStorage;
use crate::config::ObjectStorageConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct ObjectStoreCleanup {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreCleanup {
    /// Build an S3 client; an `endpoint` selects path-style requests (MinIO).
    pub fn from_config(config: &ObjectStorageConfig) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_allow_http(config.allow_http);

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false);
        }

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder
                .with_access_key_id(key_id)
                .with_secret_access_key(secret);
        }

        let store = builder
            .build()
            .map_err(|e| Error::Config(format!("object storage: {}", e)))?;
        Ok(Self::from_store(Arc::new(store), config.prefix.clone().unwrap_or_default()))
    }

    pub fn from_store(store: Arc<dyn ObjectStore>, prefix: String) -> Self {
        Self { store, prefix }
    }

    fn object_path(&self, name: &str) -> ObjectPath {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            ObjectPath::from(name)
        } else {
            ObjectPath::from(format!("{}/{}", prefix, name))
        }
    }
}

impl std::fmt::Debug for ObjectStoreCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreCleanup")
            .field("prefix", &self.prefix)
            .finish()
    }
}

fn store_error(e: object_store::Error) -> Error {
    Error::EngineFailure(format!("object storage: {}", e))
}

#[async_trait]
impl ObjectStorage for ObjectStoreCleanup {
    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let root = self.object_path(prefix);
        debug!("Deleting objects under {}", root);

        let locations: Vec<ObjectPath> = self
            .store
            .list(Some(&root))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
            .map_err(store_error)?;

        let mut deleted = 0;
        for location in locations {
            match self.store.delete(&location).await {
                Ok(()) => deleted += 1,
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(store_error(e)),
            }
        }
        Ok(deleted)
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use object_store::memory::InMemory;
    use object_store::PutPayload;

    #[tokio::test]
    async fn test_delete_prefix_only_touches_index() -> Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        for path in ["quarry/logs/meta.json", "quarry/logs/seg/1", "quarry/logs2/meta.json"] {
            store
                .put(&ObjectPath::from(path), PutPayload::from(Bytes::from_static(b"x")))
                .await
                .map_err(store_error)?;
        }
        let cleanup = ObjectStoreCleanup::from_store(store.clone(), "quarry".to_string());
        assert_eq!(cleanup.delete_prefix("logs").await?, 2);

        let remaining: Vec<_> = store
            .list(None)
            .try_collect()
            .await
            .map_err(store_error)?;
        assert_eq!(remaining.len(), 1);
        Ok(())
    }
}
