use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use clipshelf::{ArtifactIndex, ArtifactRecord, JsonIndex, ServiceError};

/// Wraps an in-memory index and fails selected operations on demand.
#[derive(Debug)]
pub struct FlakyIndex {
    pub inner: JsonIndex,
    pub fail_put: AtomicBool,
    pub fail_list: AtomicBool,
    /// Makes `list_all` answer with an empty snapshot while `get` still sees every record.
    pub stale_list: AtomicBool,
}

impl Default for FlakyIndex {
    fn default() -> Self {
        Self {
            inner: JsonIndex::in_memory(),
            fail_put: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
            stale_list: AtomicBool::new(false),
        }
    }
}

fn unavailable(operation: &str) -> ServiceError {
    ServiceError::storage(
        operation,
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "index unavailable"),
    )
}

impl ArtifactIndex for FlakyIndex {
    async fn put(&self, record: &ArtifactRecord, ttl: Duration) -> Result<(), ServiceError> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(unavailable("put"));
        }
        self.inner.put(record, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<ArtifactRecord>, ServiceError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, ServiceError> {
        self.inner.delete(key).await
    }

    async fn list_all(&self) -> Result<Vec<ArtifactRecord>, ServiceError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(unavailable("list"));
        }
        if self.stale_list.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        self.inner.list_all().await
    }
}
