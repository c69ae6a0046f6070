use async_trait::async_trait;
use bytes::Bytes;

use crate::BlobResult;

/// Core blob storage operations - must be implemented by all storage
/// backends. Handles are opaque relative paths returned by the store;
/// callers persist them on records and never inspect their shape.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a payload under a store-chosen handle scoped to the
    /// component. `ext` (without the dot) is appended when given.
    async fn save(
        &self,
        bytes: Bytes,
        component_name: &str,
        ext: Option<&str>,
    ) -> BlobResult<String>;

    /// Store a payload under an exact caller-chosen path.
    async fn save_at_path(&self, bytes: Bytes, path: &str) -> BlobResult<String>;

    /// Fetch a payload by handle.
    async fn retrieve(&self, handle: &str) -> BlobResult<Bytes>;

    /// Delete a single blob.
    async fn delete(&self, handle: &str) -> BlobResult<()>;

    /// Delete many blobs; missing handles are skipped.
    async fn delete_batch(&self, handles: &[String]) -> BlobResult<()>;

    /// Delete every blob whose handle starts with `prefix`.
    /// Returns the number of blobs removed.
    async fn delete_by_prefix(&self, prefix: &str) -> BlobResult<usize>;

    /// Publicly addressable URL for a handle.
    fn public_url(&self, handle: &str) -> String;
}

/// Build the store-chosen handle for [`BlobStore::save`]:
/// `component/uuid[.ext]`.
pub(crate) fn object_handle(component_name: &str, ext: Option<&str>) -> String {
    let id = uuid::Uuid::new_v4();
    match ext {
        Some(ext) => format!("{}/{}.{}", component_name, id, ext),
        None => format!("{}/{}", component_name, id),
    }
}
