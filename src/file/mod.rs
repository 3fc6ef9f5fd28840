//! Attachment blob storage.
//!
//! Blobs are keyed by request id plus the generated stored name; the original
//! upload name never touches the filesystem.

use async_trait::async_trait;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::fs;
use tokio::io::AsyncRead;
use tracing::debug;
use uuid::Uuid;

use crate::core::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("file not found")]
    NotFound,
    #[error("invalid file key: {0}")]
    InvalidKey(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FileStoreError> for ApiError {
    fn from(err: FileStoreError) -> Self {
        match err {
            FileStoreError::NotFound | FileStoreError::InvalidKey(_) => Self::NotFound("File"),
            FileStoreError::Io(e) => Self::Internal(format!("File storage failed: {e}")),
        }
    }
}

/// Blob contents, read lazily by the download response.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Writes the blob and returns the path recorded on the attachment row.
    async fn put(
        &self,
        request_id: Uuid,
        stored_name: &str,
        bytes: &[u8],
    ) -> Result<String, FileStoreError>;
    async fn open(&self, request_id: Uuid, stored_name: &str)
        -> Result<BlobReader, FileStoreError>;
    async fn delete(&self, request_id: Uuid, stored_name: &str) -> Result<(), FileStoreError>;
}

fn validate_key(stored_name: &str) -> Result<(), FileStoreError> {
    let bad = stored_name.is_empty()
        || stored_name.contains(['/', '\\'])
        || stored_name.contains("..")
        || stored_name.starts_with('.');
    if bad {
        Err(FileStoreError::InvalidKey(stored_name.to_string()))
    } else {
        Ok(())
    }
}

/// Stores blobs under `<root>/<request_id>/<stored_name>`.
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, request_id: Uuid, stored_name: &str) -> Result<PathBuf, FileStoreError> {
        validate_key(stored_name)?;
        Ok(self.root.join(request_id.to_string()).join(stored_name))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn put(
        &self,
        request_id: Uuid,
        stored_name: &str,
        bytes: &[u8],
    ) -> Result<String, FileStoreError> {
        let path = self.path_for(request_id, stored_name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(format!("{request_id}/{stored_name}"))
    }

    async fn open(
        &self,
        request_id: Uuid,
        stored_name: &str,
    ) -> Result<BlobReader, FileStoreError> {
        let path = self.path_for(request_id, stored_name)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FileStoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, request_id: Uuid, stored_name: &str) -> Result<(), FileStoreError> {
        let path = self.path_for(request_id, stored_name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn read_all(store: &LocalFileStore, id: Uuid, name: &str) -> Vec<u8> {
        let mut reader = store.open(id, name).await.unwrap();
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_put_open_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        let request_id = Uuid::new_v4();

        let path = store
            .put(request_id, "abc_policy.pdf", b"%PDF-1.7")
            .await
            .unwrap();
        assert_eq!(path, format!("{request_id}/abc_policy.pdf"));
        assert_eq!(read_all(&store, request_id, "abc_policy.pdf").await, b"%PDF-1.7");

        store.delete(request_id, "abc_policy.pdf").await.unwrap();
        assert!(matches!(
            store.open(request_id, "abc_policy.pdf").await,
            Err(FileStoreError::NotFound)
        ));
        store.delete(request_id, "abc_policy.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        let id = Uuid::new_v4();
        for key in ["../escape", "a/b", ".hidden", ""] {
            assert!(matches!(
                store.put(id, key, b"x").await,
                Err(FileStoreError::InvalidKey(_))
            ));
        }
    }
}
