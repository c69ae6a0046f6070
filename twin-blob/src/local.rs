use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use crate::store::object_handle;
use crate::{BlobError, BlobResult, BlobStore};

/// Local filesystem blob store. Handles are paths relative to the
/// configured root directory.
pub struct LocalBlobStore {
    root: PathBuf,
    public_base: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base: "/files/".to_string(),
        }
    }

    pub fn with_public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = base.into();
        self
    }

    /// Resolve a handle under the root, refusing path traversal.
    fn resolve(&self, handle: &str) -> BlobResult<PathBuf> {
        if handle.is_empty() || Path::new(handle).is_absolute() {
            return Err(BlobError::invalid(format!("invalid blob handle: {handle}")));
        }
        if handle.split('/').any(|seg| seg == "..") {
            return Err(BlobError::invalid(format!("invalid blob handle: {handle}")));
        }
        Ok(self.root.join(handle))
    }

    async fn write(&self, path: &Path, bytes: &Bytes) -> BlobResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn save(
        &self,
        bytes: Bytes,
        component_name: &str,
        ext: Option<&str>,
    ) -> BlobResult<String> {
        let handle = object_handle(component_name, ext);
        let path = self.resolve(&handle)?;
        self.write(&path, &bytes).await?;
        Ok(handle)
    }

    async fn save_at_path(&self, bytes: Bytes, path: &str) -> BlobResult<String> {
        let full = self.resolve(path)?;
        self.write(&full, &bytes).await?;
        Ok(path.to_string())
    }

    async fn retrieve(&self, handle: &str) -> BlobResult<Bytes> {
        let path = self.resolve(handle)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::not_found(handle))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, handle: &str) -> BlobResult<()> {
        let path = self.resolve(handle)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::not_found(handle))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_batch(&self, handles: &[String]) -> BlobResult<()> {
        for handle in handles {
            let path = self.resolve(handle)?;
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> BlobResult<usize> {
        // Handles are flat relative paths, so a prefix maps onto a
        // directory subtree walk from the deepest fixed directory.
        let mut removed = 0usize;
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let rel = path
                    .strip_prefix(&self.root)
                    .map_err(BlobError::backend)?
                    .to_string_lossy()
                    .replace('\\', "/");
                if rel.starts_with(prefix) {
                    fs::remove_file(&path).await?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    fn public_url(&self, handle: &str) -> String {
        format!("{}{}", self.public_base, handle)
    }
}
