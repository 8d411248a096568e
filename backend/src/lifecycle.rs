//! Artifact lifecycle: recording finished downloads, listing what is still live,
//! explicit deletion and the expiry sweep.
//!
//! Index and store are reconciled without locks. Every mutation is an idempotent
//! delete or an overwrite, so overlapping requests and sweeps converge: a pass that
//! fails halfway leaves the record in the index and the next pass picks it up again.

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    artifact::{ARTIFACT_TTL_SECONDS, ArtifactFormat, ArtifactRecord, LiveArtifact},
    error::{Result, ServiceError},
    index::ArtifactIndex,
    store::ArtifactStore,
};

pub const DEFAULT_INDEX_GRACE: Duration = Duration::from_secs(24 * 60 * 60);

/// Source of "now", at whole-second resolution.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
    }
}

/// Clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    pub fn at(timestamp: i64) -> Self {
        Self(Arc::new(AtomicI64::new(timestamp)))
    }

    pub fn set(&self, timestamp: i64) {
        self.0.store(timestamp, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0.load(Ordering::SeqCst), 0).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub index_removed: bool,
    pub file_removed: bool,
}

impl DeleteOutcome {
    pub fn existed(&self) -> bool {
        self.index_removed || self.file_removed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepStage {
    ListIndex,
    ListStore,
    LookupRecord,
    RemoveFile,
    DeleteRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepFailure {
    pub key: Option<String>,
    pub stage: SweepStage,
    pub message: String,
}

/// Outcome of one sweep or reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: Vec<String>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    fn fail(&mut self, key: Option<&str>, stage: SweepStage, error: &ServiceError) {
        warn!(
            "Sweep step {:?} failed for {:?}: {error}",
            stage,
            key.unwrap_or("-")
        );
        self.failures.push(SweepFailure {
            key: key.map(ToString::to_string),
            stage,
            message: error.to_string(),
        });
    }
}

pub struct LifecycleManager<I, S, C = SystemClock> {
    index: I,
    store: S,
    clock: C,
    index_grace: Duration,
}

impl<I, S> LifecycleManager<I, S, SystemClock>
where
    I: ArtifactIndex,
    S: ArtifactStore,
{
    pub fn new(index: I, store: S) -> Self {
        Self::with_clock(index, store, SystemClock)
    }
}

impl<I, S, C> LifecycleManager<I, S, C>
where
    I: ArtifactIndex,
    S: ArtifactStore,
    C: Clock,
{
    pub fn with_clock(index: I, store: S, clock: C) -> Self {
        Self {
            index,
            store,
            clock,
            index_grace: DEFAULT_INDEX_GRACE,
        }
    }

    /// Extra time the index may keep a record past its expiry before evicting it on its own.
    pub fn with_index_grace(mut self, grace: Duration) -> Self {
        self.index_grace = grace;
        self
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Starts tracking a file the store already holds. A same-key record is replaced.
    pub async fn record_download(
        &self,
        key: &str,
        display_title: &str,
        format: ArtifactFormat,
    ) -> Result<ArtifactRecord> {
        let record = ArtifactRecord::new(key, display_title, format, self.clock.now());
        let store_ttl = Duration::from_secs(ARTIFACT_TTL_SECONDS.unsigned_abs()) + self.index_grace;

        self.index
            .put(&record, store_ttl)
            .await
            .inspect_err(|error| {
                error!("Index write failed for {:?}, file is untracked: {error}", key);
            })?;

        info!(
            "Recorded {:?} ({:?}), expires at {}",
            record.key, record.format, record.expire_at
        );
        Ok(record)
    }

    /// Live records, soonest to expire first.
    pub async fn list_live(&self) -> Result<Vec<LiveArtifact>> {
        let now = self.clock.now();
        let mut live = self
            .index
            .list_all()
            .await?
            .into_iter()
            .filter_map(|record| {
                let remaining_seconds = record.remaining_seconds(now);
                (remaining_seconds > 0).then_some(LiveArtifact {
                    record,
                    remaining_seconds,
                })
            })
            .collect::<Vec<_>>();

        live.sort_by(|a, b| {
            a.remaining_seconds
                .cmp(&b.remaining_seconds)
                .then_with(|| a.record.key.cmp(&b.record.key))
        });
        Ok(live)
    }

    /// Removes record then file. Deleting something already gone succeeds.
    pub async fn delete_artifact(&self, key: &str) -> Result<DeleteOutcome> {
        self.store.resolve_path(key)?;

        let index_removed = self.index.delete(key).await?;
        let file_removed = self.store.remove(key).await?;

        info!(
            "Deleted {:?} (record: {}, file: {})",
            key, index_removed, file_removed
        );
        Ok(DeleteOutcome {
            index_removed,
            file_removed,
        })
    }

    /// Path of `key` for serving, after re-checking liveness.
    ///
    /// A file without a record is still served: index writes are best-effort and
    /// such files are left to orphan reconciliation.
    pub async fn live_path(&self, key: &str) -> Result<PathBuf> {
        let path = self.store.resolve_path(key)?;
        let now = self.clock.now();

        if let Some(record) = self.index.get(key).await?
            && !record.is_live(now)
        {
            return Err(ServiceError::NotFound(key.to_string()));
        }

        if !self.store.exists(key).await? {
            return Err(ServiceError::NotFound(key.to_string()));
        }

        Ok(path)
    }

    /// One expiry pass: file first, then record, for every record at or past `expire_at`.
    pub async fn sweep_expired(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let records = match self.index.list_all().await {
            Ok(records) => records,
            Err(error) => {
                report.fail(None, SweepStage::ListIndex, &error);
                return report;
            }
        };
        report.scanned = records.len();

        for record in records.into_iter().filter(|record| !record.is_live(now)) {
            let key = record.key.as_str();

            match self.store.remove(key).await {
                Ok(removed) => debug!("Expired file {:?} removed: {}", key, removed),
                Err(ServiceError::InvalidInput(message)) => {
                    warn!("Expired record {:?} names no valid file ({message}), dropping it", key);
                }
                Err(error) => {
                    report.fail(Some(key), SweepStage::RemoveFile, &error);
                    continue;
                }
            }

            match self.index.delete(key).await {
                Ok(_) => report.removed.push(record.key),
                Err(error) => report.fail(Some(key), SweepStage::DeleteRecord, &error),
            }
        }

        report
    }

    /// Removes store files that have no record and are older than the artifact TTL.
    pub async fn reconcile_orphans(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let files = match self.store.list_files().await {
            Ok(files) => files,
            Err(error) => {
                report.fail(None, SweepStage::ListStore, &error);
                return report;
            }
        };
        let tracked = match self.index.list_all().await {
            Ok(records) => records
                .into_iter()
                .map(|record| record.key)
                .collect::<HashSet<_>>(),
            Err(error) => {
                report.fail(None, SweepStage::ListIndex, &error);
                return report;
            }
        };
        report.scanned = files.len();

        for file in files {
            if tracked.contains(&file.key) {
                continue;
            }
            if (now - file.modified_at).num_seconds() < ARTIFACT_TTL_SECONDS {
                continue;
            }

            // A download may have been recorded since the index was listed.
            match self.index.get(&file.key).await {
                Ok(None) => {}
                Ok(Some(_)) => {
                    debug!("{:?} was recorded during reconciliation, keeping it", file.key);
                    continue;
                }
                Err(error) => {
                    report.fail(Some(&file.key), SweepStage::LookupRecord, &error);
                    continue;
                }
            }

            match self.store.remove(&file.key).await {
                Ok(_) => {
                    info!("Removed untracked file {:?}", file.key);
                    report.removed.push(file.key);
                }
                Err(error) => report.fail(Some(&file.key), SweepStage::RemoveFile, &error),
            }
        }

        report
    }
}
