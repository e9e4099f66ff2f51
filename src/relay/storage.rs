//! # Transient Audio Storage
//!
//! Every relay call stages its payload in its own file, named
//! `relay-<uuid>.wav`, under the configured directory. Names are never reused
//! and files are opened with create-new semantics, so concurrent relays on any
//! number of connections cannot overwrite or delete each other's audio.
//!
//! ## Lifecycle:
//! 1. [`TransientStorage::store`] writes the payload and returns a guard
//! 2. The transcriber reads from [`TransientAudioFile::path`]
//! 3. [`TransientAudioFile::release`] removes the file and reports failures
//! 4. If the guard is dropped without being released (the relay future was
//!    cancelled, e.g. the client disconnected), `Drop` removes the file instead

use crate::transcription::AudioPayload;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

const FILE_PREFIX: &str = "relay-";
const FILE_EXTENSION: &str = "wav";

/// Failures while staging or removing a transient file.
#[derive(Debug)]
pub enum StorageError {
    Write { path: PathBuf, source: io::Error },
    Remove { path: PathBuf, source: io::Error },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Write { path, source } => {
                write!(f, "Failed to write transient audio {}: {}", path.display(), source)
            }
            StorageError::Remove { path, source } => {
                write!(f, "Failed to remove transient audio {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Write { source, .. } | StorageError::Remove { source, .. } => Some(source),
        }
    }
}

/// Directory that hands out per-call transient files.
#[derive(Debug, Clone)]
pub struct TransientStorage {
    dir: PathBuf,
}

impl TransientStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Stage `payload` in a freshly named file.
    ///
    /// On a partial write the guard is dropped before returning, which removes
    /// whatever was written.
    pub async fn store(&self, payload: &AudioPayload) -> Result<TransientAudioFile, StorageError> {
        let path = self
            .dir
            .join(format!("{}{}.{}", FILE_PREFIX, Uuid::new_v4(), FILE_EXTENSION));

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StorageError::Write { path: path.clone(), source })?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| StorageError::Write { path: path.clone(), source })?;

        // From here on the file exists and the guard owns its removal
        let guard = TransientAudioFile { path, released: false };

        let written = async {
            file.write_all(payload.as_bytes()).await?;
            file.flush().await?;
            file.sync_data().await
        }
        .await;

        if let Err(source) = written {
            return Err(StorageError::Write { path: guard.path.clone(), source });
        }

        debug!(path = %guard.path.display(), bytes = payload.len(), "Staged transient audio");
        Ok(guard)
    }
}

/// A staged payload on disk, removed when released or dropped.
#[derive(Debug)]
pub struct TransientAudioFile {
    path: PathBuf,
    released: bool,
}

impl TransientAudioFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file now. A file that is already gone counts as released.
    pub async fn release(mut self) -> Result<(), StorageError> {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Released transient audio");
                Ok(())
            }
            Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for TransientAudioFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Released abandoned transient audio"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove abandoned transient audio"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_store_then_release() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TransientStorage::new(dir.path());
        let payload = AudioPayload::from(b"audio bytes".to_vec());

        let file = storage.store(&payload).await.unwrap();
        let path = file.path().to_path_buf();
        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::read(&path).unwrap(), b"audio bytes");

        file.release().await.unwrap();
        assert!(!path.exists());
        assert_eq!(entries(dir.path()), 0);
    }

    /// A guard that is never released still cleans up after itself.
    #[tokio::test]
    async fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TransientStorage::new(dir.path());

        let file = storage.store(&AudioPayload::from(vec![1, 2, 3])).await.unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());

        drop(file);
        assert!(!path.exists());
    }

    /// Each call gets its own file, even for identical payloads.
    #[tokio::test]
    async fn test_store_uses_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TransientStorage::new(dir.path());
        let payload = AudioPayload::from(vec![0u8; 16]);

        let first = storage.store(&payload).await.unwrap();
        let second = storage.store(&payload).await.unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(entries(dir.path()), 2);

        let name = first.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(FILE_PREFIX));
        assert!(name.ends_with(".wav"));
    }

    #[tokio::test]
    async fn test_store_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("relay");
        let storage = TransientStorage::new(&nested);

        let file = storage.store(&AudioPayload::from(vec![9])).await.unwrap();
        assert!(file.path().starts_with(&nested));
    }

    #[tokio::test]
    async fn test_store_fails_when_directory_is_a_file() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let storage = TransientStorage::new(blocker.path());

        let err = storage.store(&AudioPayload::from(vec![0])).await.unwrap_err();
        assert!(matches!(err, StorageError::Write { .. }));
    }

    #[tokio::test]
    async fn test_release_reports_removal_failure() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TransientStorage::new(dir.path());

        let file = storage.store(&AudioPayload::from(vec![0])).await.unwrap();
        let path = file.path().to_path_buf();
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), b"x").unwrap();

        let err = file.release().await.unwrap_err();
        assert!(matches!(err, StorageError::Remove { .. }));
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn test_release_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TransientStorage::new(dir.path());

        let file = storage.store(&AudioPayload::from(vec![0])).await.unwrap();
        std::fs::remove_file(file.path()).unwrap();
        assert!(file.release().await.is_ok());
    }
}
