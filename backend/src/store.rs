use std::{
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{Result, ServiceError};

const MAX_KEY_BYTES: usize = 255;

/// A file found under the store root, used when reconciling against the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub key: String,
    pub modified_at: DateTime<Utc>,
}

/// File-bytes repository keyed by sanitized filename.
pub trait ArtifactStore: Send + Sync {
    /// Path of `key` under the store root. Rejects keys that are not a single plain component.
    fn resolve_path(&self, key: &str) -> Result<PathBuf>;

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Removes the file. An already missing file is not an error and yields `false`.
    fn remove(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    fn list_files(&self) -> impl Future<Output = Result<Vec<StoredFile>>> + Send;
}

impl<T: ArtifactStore> ArtifactStore for &T {
    fn resolve_path(&self, key: &str) -> Result<PathBuf> {
        (**self).resolve_path(key)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key).await
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        (**self).remove(key).await
    }

    async fn list_files(&self) -> Result<Vec<StoredFile>> {
        (**self).list_files().await
    }
}

#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|error| {
            ServiceError::storage(format!("creating {}", self.root.display()), error)
        })
    }
}

pub fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_BYTES
        && key != "."
        && key != ".."
        && !key.contains(['/', '\\', '\0']);

    if valid {
        Ok(())
    } else {
        Err(ServiceError::invalid_input(format!(
            "Invalid file name: {key:?}"
        )))
    }
}

impl ArtifactStore for DiskStore {
    fn resolve_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(ServiceError::storage(
                format!("reading metadata of {}", path.display()),
                error,
            )),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let path = self.resolve_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(ServiceError::storage(
                format!("removing {}", path.display()),
                error,
            )),
        }
    }

    async fn list_files(&self) -> Result<Vec<StoredFile>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(ServiceError::storage(
                    format!("opening {}", self.root.display()),
                    error,
                ));
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|error| {
            ServiceError::storage(format!("listing {}", self.root.display()), error)
        })? {
            let path = entry.path();
            let Some(key) = entry.file_name().to_str().map(ToString::to_string) else {
                warn!("Skipping non UTF-8 file name in store: {:?}", path);
                continue;
            };

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!("Could not read metadata of {:?}: {error}", path);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let modified_at = match metadata.modified() {
                Ok(value) => DateTime::<Utc>::from(value),
                Err(error) => {
                    warn!("Could not read modification time of {:?}: {error}", path);
                    continue;
                }
            };

            files.push(StoredFile { key, modified_at });
        }

        Ok(files)
    }
}
