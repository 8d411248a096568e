use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use clipshelf::{
    ArtifactStore, DiskStore, ServiceError,
    store::StoredFile,
};

/// Disk store that refuses to remove the keys listed in `deny_remove`.
#[derive(Debug, Clone)]
pub struct FlakyStore {
    pub inner: DiskStore,
    pub deny_remove: Arc<Mutex<HashSet<String>>>,
}

impl FlakyStore {
    pub fn new(inner: DiskStore) -> Self {
        Self {
            inner,
            deny_remove: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn deny(&self, key: &str) {
        self.deny_remove.lock().unwrap().insert(key.to_string());
    }

    pub fn allow_all(&self) {
        self.deny_remove.lock().unwrap().clear();
    }
}

impl ArtifactStore for FlakyStore {
    fn resolve_path(&self, key: &str) -> Result<PathBuf, ServiceError> {
        self.inner.resolve_path(key)
    }

    async fn exists(&self, key: &str) -> Result<bool, ServiceError> {
        self.inner.exists(key).await
    }

    async fn remove(&self, key: &str) -> Result<bool, ServiceError> {
        let denied = self.deny_remove.lock().unwrap().contains(key);
        if denied {
            return Err(ServiceError::storage(
                format!("removing {key}"),
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied"),
            ));
        }
        self.inner.remove(key).await
    }

    async fn list_files(&self) -> Result<Vec<StoredFile>, ServiceError> {
        self.inner.list_files().await
    }
}
