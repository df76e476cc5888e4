//! Local backup of progress records, with restore and reconciliation.
//!
//! Each session is mirrored to `<dir>/<session_id>.json`. A cache entry is
//! only ever a copy: on restore it is reconciled against the remote store
//! per step, and the later `updated_at` wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::progress::{ProgressRecord, ProgressStore};
use crate::progress::model::validate_id;

/// On-disk cache entry for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub records: Vec<ProgressRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreSource {
    Cache,
    Remote,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestoreOutcome {
    pub records: Vec<ProgressRecord>,
    pub source: RestoreSource,
    /// A cache entry existed but could not be parsed and was deleted.
    pub discarded_corrupt: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub records: Vec<ProgressRecord>,
    /// Cache records written back because they were newer.
    pub pushed: usize,
    /// Steps where the remote copy replaced the cached one.
    pub pulled: usize,
}

#[derive(Clone)]
pub struct LocalBackup {
    dir: PathBuf,
    progress: ProgressStore,
}

impl LocalBackup {
    pub fn new(dir: impl Into<PathBuf>, progress: ProgressStore) -> Self {
        Self {
            dir: dir.into(),
            progress,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, session_id: &str) -> Result<PathBuf> {
        validate_id("session_id", session_id)?;
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    /// Copy the session's current remote records into the cache.
    pub async fn mirror(&self, session_id: &str) -> Result<CacheEntry> {
        let records = self.progress.list_records(session_id).await?;
        self.write_entry(session_id, records).await
    }

    async fn write_entry(&self, session_id: &str, records: Vec<ProgressRecord>) -> Result<CacheEntry> {
        let path = self.entry_path(session_id)?;
        let entry = CacheEntry {
            session_id: session_id.to_string(),
            saved_at: Utc::now(),
            records,
        };
        let bytes = serde_json::to_vec_pretty(&entry)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        fs::create_dir_all(&self.dir).await.map_err(CacheError::Io)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await.map_err(CacheError::Io)?;
        fs::rename(&tmp, &path).await.map_err(CacheError::Io)?;

        debug!(session_id, records = entry.records.len(), "Progress mirrored to cache");
        Ok(entry)
    }

    /// Read the cached records, falling back to the remote store when the
    /// cache is missing or corrupt. A corrupt entry is deleted.
    pub async fn restore(&self, session_id: &str) -> Result<RestoreOutcome> {
        let path = self.entry_path(session_id)?;

        let mut discarded_corrupt = false;
        match fs::read(&path).await {
            Ok(bytes) => match parse_entry(&bytes, session_id) {
                Ok(entry) => {
                    debug!(session_id, records = entry.records.len(), "Restored from cache");
                    return Ok(RestoreOutcome {
                        records: entry.records,
                        source: RestoreSource::Cache,
                        discarded_corrupt: false,
                    });
                }
                Err(e) => {
                    warn!(session_id, error = %e, "Discarding corrupt cache entry");
                    if let Err(e) = fs::remove_file(&path).await {
                        warn!(session_id, error = %e, "Failed to delete corrupt cache entry");
                    }
                    discarded_corrupt = true;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(session_id, error = %e, "Cache unreadable; using remote store");
            }
        }

        let records = self.progress.list_records(session_id).await?;
        Ok(RestoreOutcome {
            records,
            source: RestoreSource::Remote,
            discarded_corrupt,
        })
    }

    /// Reconcile cached records with the remote store, per step.
    ///
    /// The later `updated_at` wins and ties go to the remote copy. Newer
    /// cached records are written back conditionally; the merged set is
    /// mirrored again.
    pub async fn sync(&self, session_id: &str, cached: Vec<ProgressRecord>) -> Result<SyncReport> {
        let remote = self.progress.list_records(session_id).await?;
        let mut cached_by_step: HashMap<String, ProgressRecord> = cached
            .into_iter()
            .filter(|r| r.session_id == session_id)
            .map(|r| (r.step_id.clone(), r))
            .collect();

        let mut merged = Vec::with_capacity(remote.len() + cached_by_step.len());
        let mut pushed = 0;
        let mut pulled = 0;

        for remote_record in remote {
            match cached_by_step.remove(&remote_record.step_id) {
                Some(local) if local.updated_at > remote_record.updated_at => {
                    if self.progress.restore_record(&local).await? {
                        pushed += 1;
                        merged.push(local);
                    } else {
                        merged.push(reload(&self.progress, remote_record).await?);
                    }
                }
                Some(local) => {
                    if local != remote_record {
                        pulled += 1;
                    }
                    merged.push(remote_record);
                }
                None => merged.push(remote_record),
            }
        }

        // Steps only the cache knows about.
        let mut local_only: Vec<ProgressRecord> = cached_by_step.into_values().collect();
        local_only.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        for local in local_only {
            if self.progress.restore_record(&local).await? {
                pushed += 1;
                merged.push(local);
            } else if let Some(current) = self.progress.get_record(session_id, &local.step_id).await? {
                merged.push(current);
            }
        }

        self.write_entry(session_id, merged.clone()).await?;
        info!(session_id, pushed, pulled, "Cache reconciled with remote store");
        Ok(SyncReport {
            records: merged,
            pushed,
            pulled,
        })
    }

    /// Restore, then reconcile when the records came from the cache.
    pub async fn restore_and_sync(&self, session_id: &str) -> Result<SyncReport> {
        let outcome = self.restore(session_id).await?;
        match outcome.source {
            RestoreSource::Cache => self.sync(session_id, outcome.records).await,
            RestoreSource::Remote => {
                let entry = self.write_entry(session_id, outcome.records).await?;
                Ok(SyncReport {
                    records: entry.records,
                    pushed: 0,
                    pulled: 0,
                })
            }
        }
    }
}

fn parse_entry(bytes: &[u8], session_id: &str) -> std::result::Result<CacheEntry, CacheError> {
    let entry: CacheEntry =
        serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))?;
    if entry.session_id != session_id {
        return Err(CacheError::Serialization(format!(
            "entry belongs to session {}",
            entry.session_id
        )));
    }
    Ok(entry)
}

/// The stored copy of a record after a lost conditional write.
async fn reload(progress: &ProgressStore, fallback: ProgressRecord) -> Result<ProgressRecord> {
    Ok(progress
        .get_record(&fallback.session_id, &fallback.step_id)
        .await?
        .unwrap_or(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::paths::model::fixtures::{path, step};
    use crate::paths::{PathContext, StaticPathSource};
    use crate::progress::{StepStatus, StepUpdate};
    use crate::store::{Database, LibSqlBackend};

    struct Fixture {
        backup: LocalBackup,
        progress: ProgressStore,
        session_id: String,
        _dir: tempfile::TempDir,
    }

    async fn setup() -> Fixture {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.init_schema().await.unwrap();
        let source = StaticPathSource::new(vec![path(
            "p",
            None,
            vec![step("a", 1, true, &[]), step("b", 2, true, &[])],
        )])
        .unwrap();
        let progress = ProgressStore::new(Arc::new(db), Arc::new(source), &EngineConfig::default());
        let session = progress
            .start_session("u1", "p", PathContext::default())
            .await
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        Fixture {
            backup: LocalBackup::new(dir.path().join("cache"), progress.clone()),
            progress,
            session_id: session.session_id,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn mirror_then_restore_reads_cache() {
        let f = setup().await;
        f.progress
            .track_step_progress(&f.session_id, "a", StepUpdate::new(StepStatus::InProgress))
            .await
            .unwrap();
        f.backup.mirror(&f.session_id).await.unwrap();

        let outcome = f.backup.restore(&f.session_id).await.unwrap();
        assert_eq!(outcome.source, RestoreSource::Cache);
        assert_eq!(outcome.records.len(), 1);
        assert!(!f.backup.dir().join(format!("{}.json.tmp", f.session_id)).exists());
    }

    #[tokio::test]
    async fn missing_cache_falls_back_to_remote() {
        let f = setup().await;
        let outcome = f.backup.restore(&f.session_id).await.unwrap();
        assert_eq!(outcome.source, RestoreSource::Remote);
        assert!(!outcome.discarded_corrupt);
    }

    #[tokio::test]
    async fn corrupt_cache_is_discarded() {
        let f = setup().await;
        f.progress
            .track_step_progress(&f.session_id, "a", StepUpdate::new(StepStatus::InProgress))
            .await
            .unwrap();
        let entry = f.backup.dir().join(format!("{}.json", f.session_id));
        std::fs::create_dir_all(f.backup.dir()).unwrap();
        std::fs::write(&entry, b"{ not json").unwrap();

        let outcome = f.backup.restore(&f.session_id).await.unwrap();
        assert_eq!(outcome.source, RestoreSource::Remote);
        assert!(outcome.discarded_corrupt);
        assert_eq!(outcome.records.len(), 1);
        assert!(!entry.exists());
    }

    #[tokio::test]
    async fn newer_remote_wins_over_stale_cache() {
        let f = setup().await;
        let sid = f.session_id.as_str();
        f.progress
            .track_step_progress(sid, "a", StepUpdate::new(StepStatus::InProgress).with_time(5))
            .await
            .unwrap();
        f.backup.mirror(sid).await.unwrap();

        let remote = f
            .progress
            .track_step_progress(sid, "a", StepUpdate::new(StepStatus::Completed).with_time(5))
            .await
            .unwrap();

        let report = f.backup.restore_and_sync(sid).await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(report.pulled, 1);
        assert_eq!(report.records, vec![remote.clone()]);
        assert_eq!(f.progress.get_record(sid, "a").await.unwrap().unwrap(), remote);
    }

    #[tokio::test]
    async fn newer_cache_is_pushed_to_remote() {
        let f = setup().await;
        let sid = f.session_id.as_str();
        let remote = f
            .progress
            .track_step_progress(sid, "a", StepUpdate::new(StepStatus::InProgress))
            .await
            .unwrap();

        let mut newer = remote.clone();
        newer.time_spent = 90;
        newer.updated_at = remote.updated_at + chrono::Duration::seconds(30);
        let mut local_only = ProgressRecord::new(sid, "b", remote.updated_at);
        local_only.status = StepStatus::InProgress;

        let report = f.backup.sync(sid, vec![newer.clone(), local_only]).await.unwrap();
        assert_eq!(report.pushed, 2);
        assert_eq!(f.progress.get_record(sid, "a").await.unwrap().unwrap().time_spent, 90);
        assert!(f.progress.get_record(sid, "b").await.unwrap().is_some());

        let cached = f.backup.restore(sid).await.unwrap();
        assert_eq!(cached.source, RestoreSource::Cache);
        assert_eq!(cached.records.len(), 2);
    }

    #[tokio::test]
    async fn rejects_path_like_session_ids() {
        let f = setup().await;
        assert!(f.backup.restore("../escape").await.is_err());
    }
}
