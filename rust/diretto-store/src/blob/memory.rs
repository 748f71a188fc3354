use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{BlobStore, resolve};
use crate::DirettoStoreError;

/// A [BlobStore] that keeps every blob in memory. Clones share contents.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryBlobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, path: &str) -> Result<bool, DirettoStoreError> {
        let path = resolve(path)?;
        Ok(self.blobs.read().await.contains_key(&path))
    }

    async fn write(&self, path: &str, body: Bytes) -> Result<(), DirettoStoreError> {
        let path = resolve(path)?;
        match self.blobs.write().await.entry(path) {
            Entry::Occupied(entry) => Err(DirettoStoreError::Conflict(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(body);
                Ok(())
            }
        }
    }

    async fn read(&self, path: &str) -> Result<Bytes, DirettoStoreError> {
        let path = resolve(path)?;
        self.blobs
            .read()
            .await
            .get(&path)
            .cloned()
            .ok_or(DirettoStoreError::NotFound(path))
    }

    async fn len(&self, path: &str) -> Result<u64, DirettoStoreError> {
        Ok(self.read(path).await?.len() as u64)
    }
}
