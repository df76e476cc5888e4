//! ProgressStore: sessions, per-step records and progress aggregates.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{OnboardingError, Result};
use crate::milestones::Achievement;
use crate::paths::{Path, PathContext, PathSource};
use crate::store::{self, Database, Filter, RecordKey, Table};

use super::model::{
    OverallProgress, ProgressRecord, ProgressSnapshot, Session, SessionStatus, StepStatus,
    StepUpdate, validate_id,
};

/// Persists sessions and step progress through the [`Database`] adapter.
///
/// Holds no session state in memory; every call reads and writes through
/// the store, so concurrent writers see last-write-wins per record.
#[derive(Clone)]
pub struct ProgressStore {
    db: Arc<dyn Database>,
    paths: Arc<dyn PathSource>,
    max_history: usize,
}

impl ProgressStore {
    pub fn new(db: Arc<dyn Database>, paths: Arc<dyn PathSource>, config: &EngineConfig) -> Self {
        Self {
            db,
            paths,
            max_history: config.max_history_entries,
        }
    }

    pub fn db(&self) -> &dyn Database {
        self.db.as_ref()
    }

    pub fn paths(&self) -> &dyn PathSource {
        self.paths.as_ref()
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Create an active session for a user on a path.
    pub async fn start_session(
        &self,
        user_id: &str,
        path_id: &str,
        context: PathContext,
    ) -> Result<Session> {
        validate_id("user_id", user_id)?;
        if self.paths.get(path_id).is_none() {
            return Err(OnboardingError::not_found("Path", path_id));
        }

        let session = Session::new(user_id, path_id, context);
        store::save(
            self.db(),
            Table::Sessions,
            &RecordKey::new(&session.session_id),
            &session,
        )
        .await?;

        info!(session_id = %session.session_id, user_id, path_id, "Session started");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        validate_id("session_id", session_id)?;
        store::load(self.db(), Table::Sessions, &RecordKey::new(session_id))
            .await?
            .ok_or_else(|| OnboardingError::not_found("Session", session_id))
    }

    /// The session together with the path template it follows.
    pub async fn session_with_path(&self, session_id: &str) -> Result<(Session, Path)> {
        let session = self.get_session(session_id).await?;
        let path = self
            .paths
            .get(&session.path_id)
            .cloned()
            .ok_or_else(|| OnboardingError::not_found("Path", &session.path_id))?;
        Ok((session, path))
    }

    pub async fn sessions_for_path(&self, path_id: &str) -> Result<Vec<Session>> {
        let filter = Filter::all().field_eq("path_id", path_id);
        Ok(store::list(self.db(), Table::Sessions, &filter).await?)
    }

    pub async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let filter = Filter::all().field_eq("user_id", user_id);
        Ok(store::list(self.db(), Table::Sessions, &filter).await?)
    }

    /// Mark a session completed. Every required step must be completed.
    pub async fn complete_session(&self, session_id: &str) -> Result<Session> {
        let (mut session, path) = self.session_with_path(session_id).await?;
        ensure_active(&session)?;

        let progress = self.aggregate(&session, &path).await?;
        if !progress.all_required_completed() {
            return Err(OnboardingError::validation(format!(
                "session {session_id} has {} of {} required steps completed",
                progress.completed_required_steps, progress.total_required_steps
            )));
        }

        let now = Utc::now();
        session.status = SessionStatus::Completed;
        session.completed_at = Some(now);
        session.updated_at = now;
        self.write_session(&session).await?;

        info!(session_id, "Session completed");
        Ok(session)
    }

    pub async fn abandon_session(&self, session_id: &str) -> Result<Session> {
        let mut session = self.get_session(session_id).await?;
        ensure_active(&session)?;

        session.status = SessionStatus::Abandoned;
        session.updated_at = Utc::now();
        self.write_session(&session).await?;

        info!(session_id, "Session abandoned");
        Ok(session)
    }

    async fn write_session(&self, session: &Session) -> Result<()> {
        store::save(
            self.db(),
            Table::Sessions,
            &RecordKey::new(&session.session_id),
            session,
        )
        .await?;
        Ok(())
    }

    // ── Step progress ───────────────────────────────────────────────

    /// Record a status change for one step of an active session.
    pub async fn track_step_progress(
        &self,
        session_id: &str,
        step_id: &str,
        update: StepUpdate,
    ) -> Result<ProgressRecord> {
        validate_id("session_id", session_id)?;
        validate_id("step_id", step_id)?;
        update.validate()?;

        let (session, path) = self.session_with_path(session_id).await?;
        ensure_active(&session)?;
        if path.step(step_id).is_none() {
            return Err(OnboardingError::not_found("Step", step_id));
        }

        let now = Utc::now();
        let key = RecordKey::pair(session_id, step_id);
        let mut record = store::load::<ProgressRecord>(self.db(), Table::Progress, &key)
            .await?
            .unwrap_or_else(|| ProgressRecord::new(session_id, step_id, now));
        record.apply(&update, now, self.max_history)?;

        store::save(self.db(), Table::Progress, &key, &record).await?;

        debug!(
            session_id,
            step_id,
            status = %record.status,
            attempts = record.attempts,
            "Step progress recorded"
        );
        Ok(record)
    }

    pub async fn get_record(&self, session_id: &str, step_id: &str) -> Result<Option<ProgressRecord>> {
        let key = RecordKey::pair(session_id, step_id);
        Ok(store::load(self.db(), Table::Progress, &key).await?)
    }

    /// Every progress record of a session, in first-write order.
    pub async fn list_records(&self, session_id: &str) -> Result<Vec<ProgressRecord>> {
        let filter = Filter::all().field_eq("session_id", session_id);
        Ok(store::list(self.db(), Table::Progress, &filter).await?)
    }

    /// Write a record back unless the stored copy is at least as new. The
    /// comparison happens inside the adapter's write, so a concurrent
    /// `track_step_progress` is never overwritten by an older copy.
    ///
    /// Returns whether the record was written.
    pub async fn restore_record(&self, record: &ProgressRecord) -> Result<bool> {
        validate_id("session_id", &record.session_id)?;
        validate_id("step_id", &record.step_id)?;
        let key = RecordKey::pair(&record.session_id, &record.step_id);
        let written =
            store::save_if_newer(self.db(), Table::Progress, &key, record, "updated_at").await?;
        if !written {
            return Ok(false);
        }
        debug!(
            session_id = %record.session_id,
            step_id = %record.step_id,
            "Progress record restored from cache"
        );
        Ok(true)
    }

    // ── Aggregates ──────────────────────────────────────────────────

    pub async fn get_overall_progress(&self, session_id: &str) -> Result<OverallProgress> {
        let (session, path) = self.session_with_path(session_id).await?;
        self.aggregate(&session, &path).await
    }

    /// Recompute the aggregate and persist a snapshot of it.
    pub async fn recompute_progress(&self, session_id: &str) -> Result<OverallProgress> {
        let (session, path) = self.session_with_path(session_id).await?;
        let progress = self.aggregate(&session, &path).await?;

        let snapshot = ProgressSnapshot {
            snapshot_id: Uuid::new_v4(),
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            path_id: session.path_id.clone(),
            completion_percentage: progress.completion_percentage,
            completed_steps: progress.completed_steps,
            recorded_at: Utc::now(),
        };
        store::save(
            self.db(),
            Table::Snapshots,
            &RecordKey::new(snapshot.snapshot_id.to_string()),
            &snapshot,
        )
        .await?;

        debug!(
            session_id,
            completion = progress.completion_percentage,
            "Progress snapshot recorded"
        );
        Ok(progress)
    }

    /// Snapshots whose top-level fields match `filter`.
    pub async fn snapshots(&self, filter: &Filter) -> Result<Vec<ProgressSnapshot>> {
        Ok(store::list(self.db(), Table::Snapshots, filter).await?)
    }

    async fn aggregate(&self, session: &Session, path: &Path) -> Result<OverallProgress> {
        let records = self.list_records(&session.session_id).await?;
        let filter = Filter::all().field_eq("session_id", session.session_id.as_str());
        let achievements: Vec<Achievement> =
            store::list(self.db(), Table::Achievements, &filter).await?;

        let mut progress = summarize(&session.session_id, path, &records);
        progress.achievements = achievements;
        Ok(progress)
    }
}

/// Aggregate records against a path. Records for steps the path does not
/// define are ignored.
pub fn summarize(session_id: &str, path: &Path, records: &[ProgressRecord]) -> OverallProgress {
    let mut progress = OverallProgress::empty(session_id);
    progress.total_steps = path.steps.len();
    progress.total_required_steps = path.required_steps().count();

    for record in records {
        let Some(step) = path.step(&record.step_id) else {
            continue;
        };
        progress.total_time_spent = progress.total_time_spent.saturating_add(record.time_spent);
        match record.status {
            StepStatus::Completed => {
                progress.completed_steps += 1;
                if step.is_required {
                    progress.completed_required_steps += 1;
                }
            }
            StepStatus::InProgress => progress.in_progress_steps += 1,
            StepStatus::Failed => progress.failed_steps += 1,
            StepStatus::NotStarted => {}
        }
    }

    if progress.total_required_steps > 0 {
        progress.completion_percentage = progress.completed_required_steps as f64
            / progress.total_required_steps as f64
            * 100.0;
    }
    progress
}

fn ensure_active(session: &Session) -> Result<()> {
    if session.status.is_terminal() {
        return Err(OnboardingError::validation(format!(
            "session {} is {} and no longer accepts changes",
            session.session_id, session.status
        )));
    }
    Ok(())
}
