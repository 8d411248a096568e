use std::{
    collections::HashMap,
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    artifact::ArtifactRecord,
    error::{Result, ServiceError},
};

/// Key-value record store with a per-key expiry hint.
///
/// The hint passed to `put` only bounds how long the store itself keeps an entry.
/// Whether an artifact is live is always decided from `ArtifactRecord::expire_at`.
pub trait ArtifactIndex: Send + Sync {
    fn put(&self, record: &ArtifactRecord, ttl: Duration) -> impl Future<Output = Result<()>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<ArtifactRecord>>> + Send;

    /// Returns `false` when nothing was stored under `key`.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Every record still held by the store, live or not, in no particular order.
    fn list_all(&self) -> impl Future<Output = Result<Vec<ArtifactRecord>>> + Send;
}

impl<T: ArtifactIndex> ArtifactIndex for &T {
    async fn put(&self, record: &ArtifactRecord, ttl: Duration) -> Result<()> {
        (**self).put(record, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<ArtifactRecord>> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key).await
    }

    async fn list_all(&self) -> Result<Vec<ArtifactRecord>> {
        (**self).list_all().await
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct IndexEntry {
    record: ArtifactRecord,
    evict_at: DateTime<Utc>,
}

type EntryMap = HashMap<String, IndexEntry>;

/// In-memory index persisted as a JSON snapshot after every mutation.
#[derive(Debug)]
pub struct JsonIndex {
    entries: Mutex<EntryMap>,
    snapshot_path: Option<PathBuf>,
}

impl JsonIndex {
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            snapshot_path: None,
        }
    }

    /// Loads the snapshot at `path`, starting empty when it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut entries = load_snapshot(&path).await?;
        let evicted = evict_due(&mut entries, Utc::now());
        info!(
            "Index loaded from {:?}: {} record(s), {} evicted on load",
            path,
            entries.len(),
            evicted
        );

        Ok(Self {
            entries: Mutex::new(entries),
            snapshot_path: Some(path),
        })
    }

    async fn persist(&self, entries: &EntryMap) -> Result<()> {
        match &self.snapshot_path {
            Some(path) => persist_snapshot(path, entries).await,
            None => Ok(()),
        }
    }

    /// Persists `next` and only then installs it, so a failed write leaves `entries` untouched.
    async fn commit(&self, entries: &mut EntryMap, next: EntryMap) -> Result<()> {
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn evict_expired(&self, entries: &mut EntryMap) -> Result<()> {
        let now = Utc::now();
        if !entries.values().any(|entry| entry.evict_at <= now) {
            return Ok(());
        }

        let mut next = entries.clone();
        evict_due(&mut next, now);
        self.commit(entries, next).await
    }
}

impl ArtifactIndex for JsonIndex {
    async fn put(&self, record: &ArtifactRecord, ttl: Duration) -> Result<()> {
        let evict_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.insert(
            record.key.clone(),
            IndexEntry {
                record: record.clone(),
                evict_at,
            },
        );
        self.commit(&mut entries, next).await
    }

    async fn get(&self, key: &str) -> Result<Option<ArtifactRecord>> {
        let mut entries = self.entries.lock().await;
        self.evict_expired(&mut entries).await?;
        Ok(entries.get(key).map(|entry| entry.record.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(key) {
            return Ok(false);
        }

        let mut next = entries.clone();
        next.remove(key);
        self.commit(&mut entries, next).await?;
        Ok(true)
    }

    async fn list_all(&self) -> Result<Vec<ArtifactRecord>> {
        let mut entries = self.entries.lock().await;
        self.evict_expired(&mut entries).await?;
        Ok(entries.values().map(|entry| entry.record.clone()).collect())
    }
}

fn evict_due(entries: &mut EntryMap, now: DateTime<Utc>) -> usize {
    let before = entries.len();
    entries.retain(|key, entry| {
        let keep = entry.evict_at > now;
        if !keep {
            debug!("Index evicted {:?} past its store-level expiry", key);
        }
        keep
    });
    before - entries.len()
}

async fn load_snapshot(path: &Path) -> Result<EntryMap> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => serde_json::from_str(&contents).map_err(|error| {
            ServiceError::storage(
                format!("parsing index snapshot {}", path.display()),
                std::io::Error::new(ErrorKind::InvalidData, error),
            )
        }),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
        Err(error) => Err(ServiceError::storage(
            format!("reading index snapshot {}", path.display()),
            error,
        )),
    }
}

async fn persist_snapshot(path: &Path, entries: &EntryMap) -> Result<()> {
    let payload = serde_json::to_string_pretty(entries).map_err(|error| {
        ServiceError::storage("serializing index snapshot", std::io::Error::other(error))
    })?;

    let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    tokio::fs::write(&tmp_path, payload).await.map_err(|error| {
        ServiceError::storage(format!("writing {}", tmp_path.display()), error)
    })?;
    tokio::fs::rename(&tmp_path, path).await.map_err(|error| {
        ServiceError::storage(format!("replacing {}", path.display()), error)
    })
}
