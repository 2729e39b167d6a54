//! Blob store fallback for large raw payloads
//!
//! Documents whose raw payload exceeds the configured threshold store the
//! body in an S3-compatible object store and keep only `raw_key` in the
//! database. Absence of blob-store configuration disables the fallback.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::sync::Arc;

use raged_config::BlobConfig;

use crate::error::{DatabaseError, DatabaseResult};

/// Raw-payload storage/retrieval contract
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a payload under the key, overwriting any previous body
    async fn put(&self, key: &str, data: Bytes) -> DatabaseResult<()>;

    /// Retrieve a payload by key
    async fn get(&self, key: &str) -> DatabaseResult<Bytes>;
}

fn blob_err(context: &str, err: &object_store::Error) -> DatabaseError {
    DatabaseError::BlobStoreUnavailable {
        message: format!("{context}: {err}"),
    }
}

/// S3-compatible blob store
pub struct S3BlobStore {
    store: Arc<dyn ObjectStore>,
}

impl S3BlobStore {
    /// Build the store from blob configuration
    ///
    /// # Errors
    ///
    /// Returns `BlobStoreUnavailable` when the endpoint configuration is
    /// rejected by the client builder.
    pub fn new(config: &BlobConfig) -> DatabaseResult<Self> {
        let store = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(&config.secret_key)
            .with_region(&config.region)
            .with_allow_http(config.endpoint.starts_with("http://"))
            .build()
            .map_err(|e| DatabaseError::BlobStoreUnavailable {
                message: format!("building s3 client: {e}"),
            })?;
        Ok(Self {
            store: Arc::new(store),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, data: Bytes) -> DatabaseResult<()> {
        let path = ObjectPath::from(key);
        self.store
            .put(&path, data.into())
            .await
            .map_err(|e| blob_err("put", &e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> DatabaseResult<Bytes> {
        let path = ObjectPath::from(key);
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| blob_err("get", &e))?;
        result.bytes().await.map_err(|e| blob_err("read", &e))
    }
}

/// In-memory blob store for tests and single-process setups
pub struct MemoryBlobStore {
    store: InMemory,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            store: InMemory::new(),
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: Bytes) -> DatabaseResult<()> {
        let path = ObjectPath::from(key);
        self.store
            .put(&path, data.into())
            .await
            .map_err(|e| blob_err("put", &e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> DatabaseResult<Bytes> {
        let path = ObjectPath::from(key);
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| blob_err("get", &e))?;
        result.bytes().await.map_err(|e| blob_err("read", &e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryBlobStore::new();
        store
            .put("raw/doc-1", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        let body = store.get("raw/doc-1").await.unwrap();
        assert_eq!(&body[..], b"payload");
    }

    #[tokio::test]
    async fn missing_key_is_an_error() {
        let store = MemoryBlobStore::new();
        let err = store.get("raw/absent").await.unwrap_err();
        assert!(matches!(err, DatabaseError::BlobStoreUnavailable { .. }));
    }
}
