//! Attachment file storage
//!
//! Files live at `{root}/{owner_id}/{attachment_id}.{ext}`. Only the relative
//! locator (`{owner_id}/{attachment_id}.{ext}`) leaves this module; absolute
//! paths are used internally and by the extraction workers.
//!
//! A successful [`AttachmentStore::save`] guarantees the file exists, is a
//! regular file and has exactly the expected length, so callers may record
//! the attachment as soon as it returns. A failed save leaves nothing at the
//! locator.

use std::path::{Component, Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Attachment storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Size mismatch after write: expected {expected} bytes, found {actual}")]
    Integrity { expected: u64, actual: u64 },

    #[error("File missing after write: {0}")]
    Missing(PathBuf),

    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("Invalid storage locator: {0}")]
    InvalidLocator(String),
}

/// Local filesystem store rooted at one directory.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    /// Open the store, creating the root directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let root = tokio::fs::canonicalize(&root).await?;
        tracing::info!(root = %root.display(), "Attachment store ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist `bytes` and verify the write. Returns the relative locator.
    pub async fn save(
        &self,
        owner_id: Uuid,
        attachment_id: Uuid,
        bytes: &[u8],
        extension: &str,
    ) -> Result<String, StorageError> {
        let locator = locator_for(owner_id, attachment_id, extension);
        let path = self.root.join(&locator);

        tokio::fs::create_dir_all(self.root.join(owner_id.to_string())).await?;

        if let Err(e) = write_verified(&path, bytes).await {
            discard_partial(&path).await;
            return Err(e);
        }

        tracing::debug!(
            owner_id = %owner_id,
            attachment_id = %attachment_id,
            size = bytes.len(),
            "Attachment written"
        );
        Ok(locator)
    }

    pub async fn exists(&self, locator: &str) -> bool {
        match self.resolve_absolute(locator) {
            Ok(path) => tokio::fs::metadata(path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn read(&self, locator: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve_absolute(locator)?;
        Ok(tokio::fs::read(path).await?)
    }

    /// Map a locator to its absolute path. Never expose the result to clients.
    pub fn resolve_absolute(&self, locator: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(locator);
        let well_formed = !locator.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(StorageError::InvalidLocator(locator.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Delete one stored file. Missing files are not an error.
    pub async fn remove(&self, locator: &str) -> Result<(), StorageError> {
        let path = self.resolve_absolute(locator)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every file of one owner. Missing directories are not an error.
    pub async fn remove_owner(&self, owner_id: Uuid) -> Result<(), StorageError> {
        let dir = self.root.join(owner_id.to_string());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// `{owner_id}/{attachment_id}.{ext}`; unusual extensions become `bin`.
pub fn locator_for(owner_id: Uuid, attachment_id: Uuid, extension: &str) -> String {
    let extension = extension.trim_start_matches('.');
    let extension = if !extension.is_empty()
        && extension.len() <= 8
        && extension.chars().all(|c| c.is_ascii_alphanumeric())
    {
        extension.to_ascii_lowercase()
    } else {
        "bin".to_string()
    };
    format!("{owner_id}/{attachment_id}.{extension}")
}

async fn write_verified(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    verify_written(path, bytes.len() as u64).await
}

/// Remove whatever a failed save left at `path`.
async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial attachment");
        }
    }
}

async fn verify_written(path: &Path, expected: u64) -> Result<(), StorageError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::Missing(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
        return Err(StorageError::NotAFile(path.to_path_buf()));
    }
    if metadata.len() != expected {
        return Err(StorageError::Integrity {
            expected,
            actual: metadata.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, AttachmentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::open(dir.path().join("uploads")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_save_and_read_back() {
        let (_dir, store) = store().await;
        let owner = Uuid::new_v4();
        let attachment = Uuid::new_v4();
        let bytes = b"\x89PNG\r\n\x1a\nimage payload".to_vec();

        let locator = store.save(owner, attachment, &bytes, "png").await.unwrap();

        assert_eq!(locator, format!("{owner}/{attachment}.png"));
        assert!(!Path::new(&locator).is_absolute());
        assert!(store.exists(&locator).await);
        assert_eq!(store.read(&locator).await.unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_resolve_rejects_escapes() {
        let (_dir, store) = store().await;
        for bad in ["", "../etc/passwd", "/etc/passwd", "a/../../b", "./x"] {
            assert!(
                matches!(store.resolve_absolute(bad), Err(StorageError::InvalidLocator(_))),
                "accepted {bad:?}"
            );
        }
        let ok = store.resolve_absolute("owner/file.jpg").unwrap();
        assert!(ok.starts_with(store.root()));
    }

    #[tokio::test]
    async fn test_verify_detects_mismatch() {
        let (_dir, store) = store().await;
        let path = store.root().join("sample.bin");
        tokio::fs::write(&path, b"1234").await.unwrap();

        assert!(verify_written(&path, 4).await.is_ok());
        assert!(matches!(
            verify_written(&path, 5).await,
            Err(StorageError::Integrity { expected: 5, actual: 4 })
        ));
        assert!(matches!(
            verify_written(&store.root().join("absent"), 1).await,
            Err(StorageError::Missing(_))
        ));
        assert!(matches!(
            verify_written(store.root(), 0).await,
            Err(StorageError::NotAFile(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_owner() {
        let (_dir, store) = store().await;
        let owner = Uuid::new_v4();
        let locator = store.save(owner, Uuid::new_v4(), b"abc", "mp3").await.unwrap();

        store.remove_owner(owner).await.unwrap();
        assert!(!store.exists(&locator).await);
        // Second removal is a no-op.
        store.remove_owner(owner).await.unwrap();
        store.remove(&locator).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_save_leaves_nothing_behind() {
        let (_dir, store) = store().await;
        let owner = Uuid::new_v4();
        let attachment = Uuid::new_v4();
        let path = store.root().join(locator_for(owner, attachment, "png"));

        // The write itself goes through, but the target is not a regular file.
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::symlink("/dev/null", &path).await.unwrap();

        let err = store
            .save(owner, attachment, b"payload", "png")
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::NotAFile(_) | StorageError::Io(_)));
        assert!(tokio::fs::symlink_metadata(&path).await.is_err());
    }

    #[test]
    fn test_locator_extension_sanitized() {
        let owner = Uuid::nil();
        let att = Uuid::nil();
        assert!(locator_for(owner, att, ".JPG").ends_with(".jpg"));
        assert!(locator_for(owner, att, "../x").ends_with(".bin"));
        assert!(locator_for(owner, att, "").ends_with(".bin"));
    }
}
