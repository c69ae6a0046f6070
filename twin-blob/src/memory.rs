use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::store::object_handle;
use crate::{BlobError, BlobResult, BlobStore};

/// In-memory blob store for testing and development.
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Bytes>>>,
    public_base: String,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(RwLock::new(HashMap::new())),
            public_base: "memory://".to_string(),
        }
    }

    pub fn with_public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = base.into();
        self
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save(
        &self,
        bytes: Bytes,
        component_name: &str,
        ext: Option<&str>,
    ) -> BlobResult<String> {
        let handle = object_handle(component_name, ext);
        self.blobs.write().insert(handle.clone(), bytes);
        Ok(handle)
    }

    async fn save_at_path(&self, bytes: Bytes, path: &str) -> BlobResult<String> {
        if path.is_empty() {
            return Err(BlobError::invalid("blob path must not be empty"));
        }
        self.blobs.write().insert(path.to_string(), bytes);
        Ok(path.to_string())
    }

    async fn retrieve(&self, handle: &str) -> BlobResult<Bytes> {
        self.blobs
            .read()
            .get(handle)
            .cloned()
            .ok_or_else(|| BlobError::not_found(handle))
    }

    async fn delete(&self, handle: &str) -> BlobResult<()> {
        self.blobs
            .write()
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| BlobError::not_found(handle))
    }

    async fn delete_batch(&self, handles: &[String]) -> BlobResult<()> {
        let mut blobs = self.blobs.write();
        for handle in handles {
            blobs.remove(handle);
        }
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> BlobResult<usize> {
        let mut blobs = self.blobs.write();
        let before = blobs.len();
        blobs.retain(|handle, _| !handle.starts_with(prefix));
        Ok(before - blobs.len())
    }

    fn public_url(&self, handle: &str) -> String {
        format!("{}{}", self.public_base, handle)
    }
}
