//! OnboardingEngine: facade wiring every component over one store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::analytics::{AnalyticsSink, emit_best_effort, events};
use crate::backup::{LocalBackup, SyncReport};
use crate::blockers::{Blocker, BlockerAnalyzer};
use crate::certificate::{Certificate, CertificateGenerator};
use crate::config::EngineConfig;
use crate::error::{OnboardingError, Result, SideEffect, SideEffectWarning};
use crate::milestones::{Achievement, BadgeStatus, MilestoneCatalog, MilestoneEngine, Subject};
use crate::paths::{PathContext, PathEngine, PathSource, PathStep, PersonalizedPath};
use crate::progress::{
    OverallProgress, ProgressRecord, ProgressStore, Session, StepStatus, StepUpdate,
};
use crate::reports::{ProgressReport, ReportGenerator, ReportScope};
use crate::store::Database;

/// Outcome of one step attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Seconds spent on this attempt.
    #[serde(default)]
    pub time_spent: u64,
}

impl StepResult {
    pub fn success(time_spent: u64) -> Self {
        Self {
            success: true,
            error: None,
            time_spent,
        }
    }

    pub fn failure(error: impl Into<String>, time_spent: u64) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            time_spent,
        }
    }
}

/// The primary write of a step completion plus whatever its side effects
/// produced. A failed side effect leaves its field empty and adds a warning.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionOutcome {
    pub record: ProgressRecord,
    pub blockers: Vec<Blocker>,
    pub awarded: Vec<Achievement>,
    pub progress: Option<OverallProgress>,
    pub warnings: Vec<SideEffectWarning>,
}

impl CompletionOutcome {
    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Turn side-effect warnings into a `PartialFailure` error.
    pub fn strict(self) -> Result<Self> {
        if self.warnings.is_empty() {
            Ok(self)
        } else {
            Err(OnboardingError::PartialFailure {
                warnings: self.warnings,
            })
        }
    }
}

/// A tracked step write. Warnings report a failed cache mirror.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackOutcome {
    #[serde(flatten)]
    pub record: ProgressRecord,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<SideEffectWarning>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Onboarding {
    pub session: Session,
    pub path: PersonalizedPath,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionCompletion {
    pub session: Session,
    pub awarded: Vec<Achievement>,
    pub warnings: Vec<SideEffectWarning>,
}

#[derive(Clone)]
pub struct OnboardingEngine {
    config: Arc<EngineConfig>,
    analytics: Arc<dyn AnalyticsSink>,
    progress: ProgressStore,
    paths: PathEngine,
    blockers: BlockerAnalyzer,
    milestones: MilestoneEngine,
    certificates: CertificateGenerator,
    reports: ReportGenerator,
    backup: LocalBackup,
}

impl OnboardingEngine {
    pub fn new(
        db: Arc<dyn Database>,
        paths: Arc<dyn PathSource>,
        catalog: MilestoneCatalog,
        analytics: Arc<dyn AnalyticsSink>,
        config: EngineConfig,
    ) -> Self {
        let config = Arc::new(config);
        let progress = ProgressStore::new(db, Arc::clone(&paths), &config);
        let milestones =
            MilestoneEngine::new(progress.clone(), Arc::new(catalog), Arc::clone(&analytics));
        let blockers = BlockerAnalyzer::new(progress.clone(), Arc::clone(&config));

        Self {
            paths: PathEngine::new(paths, progress.clone()),
            certificates: CertificateGenerator::new(progress.clone(), milestones.clone()),
            reports: ReportGenerator::new(progress.clone(), blockers.clone(), Arc::clone(&config)),
            backup: LocalBackup::new(config.cache_dir.clone(), progress.clone()),
            blockers,
            milestones,
            progress,
            analytics,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    pub fn paths(&self) -> &PathEngine {
        &self.paths
    }

    pub fn blockers(&self) -> &BlockerAnalyzer {
        &self.blockers
    }

    pub fn milestones(&self) -> &MilestoneEngine {
        &self.milestones
    }

    pub fn backup(&self) -> &LocalBackup {
        &self.backup
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Personalize a path for the user and start a session on it.
    pub async fn begin_onboarding(&self, user_id: &str, context: PathContext) -> Result<Onboarding> {
        let path = self.paths.generate_personalized_path(user_id, &context)?;
        let session = self
            .progress
            .start_session(user_id, &path.path_id, context)
            .await?;

        emit_best_effort(
            self.analytics.as_ref(),
            events::SESSION_STARTED,
            json!({
                "session_id": session.session_id,
                "user_id": session.user_id,
                "path_id": session.path_id,
            }),
        )
        .await;
        Ok(Onboarding { session, path })
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.progress.get_session(session_id).await
    }

    /// Complete the session, then award any milestones that completion
    /// unlocks. Milestone failures are reported as warnings.
    pub async fn complete_session(&self, session_id: &str) -> Result<SessionCompletion> {
        let session = self.progress.complete_session(session_id).await?;

        let mut warnings = Vec::new();
        let awarded = match self.milestones.check_session(session_id).await {
            Ok(awarded) => awarded,
            Err(e) => {
                warn!(session_id, error = %e, "Milestone check after completion failed");
                warnings.push(SideEffectWarning::new(SideEffect::MilestoneCheck, &e));
                Vec::new()
            }
        };
        if let Err(e) = self.progress.recompute_progress(session_id).await {
            warn!(session_id, error = %e, "Progress recompute after completion failed");
            warnings.push(SideEffectWarning::new(SideEffect::ProgressRecompute, &e));
        }

        emit_best_effort(
            self.analytics.as_ref(),
            events::SESSION_COMPLETED,
            json!({ "session_id": session.session_id, "user_id": session.user_id }),
        )
        .await;
        Ok(SessionCompletion {
            session,
            awarded,
            warnings,
        })
    }

    pub async fn abandon_session(&self, session_id: &str) -> Result<Session> {
        let session = self.progress.abandon_session(session_id).await?;
        emit_best_effort(
            self.analytics.as_ref(),
            events::SESSION_ABANDONED,
            json!({ "session_id": session.session_id, "user_id": session.user_id }),
        )
        .await;
        Ok(session)
    }

    // ── Steps ───────────────────────────────────────────────────────

    /// Record a status change, then mirror the session to the local cache.
    pub async fn track_step_progress(
        &self,
        session_id: &str,
        step_id: &str,
        update: StepUpdate,
    ) -> Result<TrackOutcome> {
        let record = self
            .progress
            .track_step_progress(session_id, step_id, update)
            .await?;

        let mut warnings = Vec::new();
        self.mirror_best_effort(session_id, &mut warnings).await;
        Ok(TrackOutcome { record, warnings })
    }

    async fn mirror_best_effort(&self, session_id: &str, warnings: &mut Vec<SideEffectWarning>) {
        if let Err(e) = self.backup.mirror(session_id).await {
            warn!(session_id, error = %e, "Cache mirror failed");
            warnings.push(SideEffectWarning::new(SideEffect::CacheMirror, &e));
        }
    }

    /// Reconcile the session's local cache with the store and refresh it.
    pub async fn restore_and_sync(&self, session_id: &str) -> Result<SyncReport> {
        self.progress.get_session(session_id).await?;
        self.backup.restore_and_sync(session_id).await
    }

    /// Record the outcome of a step attempt.
    ///
    /// The step write is the only step that can fail the call. Blocker
    /// analysis (on failure, or once attempts reach the low-progress
    /// threshold), the milestone check, the progress recompute and the cache
    /// mirror run independently afterwards; each failure becomes a warning.
    pub async fn record_step_completion(
        &self,
        session_id: &str,
        step_id: &str,
        result: StepResult,
    ) -> Result<CompletionOutcome> {
        let update = if result.success {
            StepUpdate::new(StepStatus::Completed).with_time(result.time_spent)
        } else {
            let mut update = StepUpdate::new(StepStatus::Failed).with_time(result.time_spent);
            update.error = result.error;
            update
        };
        let record = self
            .progress
            .track_step_progress(session_id, step_id, update)
            .await?;

        let event = if result.success {
            events::STEP_COMPLETED
        } else {
            events::STEP_FAILED
        };
        emit_best_effort(
            self.analytics.as_ref(),
            event,
            json!({
                "session_id": session_id,
                "step_id": step_id,
                "attempts": record.attempts,
                "time_spent": record.time_spent,
                "error": record.last_error,
            }),
        )
        .await;

        let mut warnings = Vec::new();

        let mut blockers = Vec::new();
        if record.status == StepStatus::Failed || record.attempts >= self.config.low_progress_attempts {
            match self.blockers.identify_blockers(session_id).await {
                Ok(found) => {
                    if !found.is_empty() {
                        info!(session_id, step_id, count = found.len(), "Blockers detected");
                        emit_best_effort(
                            self.analytics.as_ref(),
                            events::BLOCKERS_DETECTED,
                            json!({ "session_id": session_id, "blockers": found }),
                        )
                        .await;
                    }
                    blockers = found;
                }
                Err(e) => {
                    warn!(session_id, step_id, error = %e, "Blocker analysis failed");
                    warnings.push(SideEffectWarning::new(SideEffect::BlockerAnalysis, &e));
                }
            }
        }

        let awarded = match self.milestones.check_session(session_id).await {
            Ok(awarded) => awarded,
            Err(e) => {
                warn!(session_id, step_id, error = %e, "Milestone check failed");
                warnings.push(SideEffectWarning::new(SideEffect::MilestoneCheck, &e));
                Vec::new()
            }
        };

        let progress = match self.progress.recompute_progress(session_id).await {
            Ok(progress) => Some(progress),
            Err(e) => {
                warn!(session_id, step_id, error = %e, "Progress recompute failed");
                warnings.push(SideEffectWarning::new(SideEffect::ProgressRecompute, &e));
                None
            }
        };

        self.mirror_best_effort(session_id, &mut warnings).await;

        Ok(CompletionOutcome {
            record,
            blockers,
            awarded,
            progress,
            warnings,
        })
    }

    pub async fn get_next_step(&self, session_id: &str) -> Result<Option<PathStep>> {
        self.paths.get_next_step(session_id).await
    }

    // ── Read models ─────────────────────────────────────────────────

    pub async fn get_overall_progress(&self, session_id: &str) -> Result<OverallProgress> {
        self.progress.get_overall_progress(session_id).await
    }

    pub async fn identify_blockers(&self, session_id: &str) -> Result<Vec<Blocker>> {
        self.blockers.identify_blockers(session_id).await
    }

    pub async fn award_milestone(&self, subject: &Subject, milestone_key: &str) -> Result<Achievement> {
        self.milestones.award_milestone(subject, milestone_key).await
    }

    pub async fn get_available_badges(&self, subject: &Subject) -> Result<Vec<BadgeStatus>> {
        self.milestones.get_available_badges(subject).await
    }

    pub async fn generate_completion_certificate(&self, session_id: &str) -> Result<Certificate> {
        self.certificates
            .generate_completion_certificate(session_id)
            .await
    }

    pub async fn generate_progress_report(&self, scope: ReportScope) -> Result<ProgressReport> {
        self.reports.generate_progress_report(scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    use crate::analytics::BroadcastSink;
    use crate::blockers::BlockerCategory;
    use crate::error::DatabaseError;
    use crate::paths::StaticPathSource;
    use crate::progress::SessionStatus;
    use crate::store::{Filter, LibSqlBackend, RecordKey, Table};

    /// Delegates to an in-memory backend, failing chosen operations.
    struct FlakyDb {
        inner: LibSqlBackend,
        fail_query: Option<Table>,
        fail_upsert: Option<Table>,
        fail_insert: bool,
    }

    impl FlakyDb {
        async fn new() -> Self {
            let inner = LibSqlBackend::new_memory().await.unwrap();
            Self {
                inner,
                fail_query: None,
                fail_upsert: None,
                fail_insert: false,
            }
        }

        fn injected(op: &str, table: Table) -> DatabaseError {
            DatabaseError::Query(format!("injected {op} failure on {table}"))
        }
    }

    #[async_trait]
    impl Database for FlakyDb {
        async fn init_schema(&self) -> std::result::Result<(), DatabaseError> {
            self.inner.init_schema().await
        }

        async fn upsert(
            &self,
            table: Table,
            key: &RecordKey,
            record: &Value,
        ) -> std::result::Result<Value, DatabaseError> {
            if self.fail_upsert == Some(table) {
                return Err(Self::injected("upsert", table));
            }
            self.inner.upsert(table, key, record).await
        }

        async fn insert_if_absent(
            &self,
            table: Table,
            key: &RecordKey,
            record: &Value,
        ) -> std::result::Result<(Value, bool), DatabaseError> {
            if self.fail_insert {
                return Err(Self::injected("insert", table));
            }
            self.inner.insert_if_absent(table, key, record).await
        }

        async fn upsert_if_newer(
            &self,
            table: Table,
            key: &RecordKey,
            record: &Value,
            field: &str,
        ) -> std::result::Result<bool, DatabaseError> {
            if self.fail_upsert == Some(table) {
                return Err(Self::injected("upsert", table));
            }
            self.inner.upsert_if_newer(table, key, record, field).await
        }

        async fn get(
            &self,
            table: Table,
            key: &RecordKey,
        ) -> std::result::Result<Option<Value>, DatabaseError> {
            self.inner.get(table, key).await
        }

        async fn query(
            &self,
            table: Table,
            filter: &Filter,
        ) -> std::result::Result<Vec<Value>, DatabaseError> {
            if self.fail_query == Some(table) {
                return Err(Self::injected("query", table));
            }
            self.inner.query(table, filter).await
        }
    }

    fn engine_with(db: Arc<dyn Database>) -> (OnboardingEngine, Arc<BroadcastSink>) {
        let dir = std::env::temp_dir().join(format!("onboarding-engine-{}", uuid::Uuid::new_v4()));
        engine_in(db, dir)
    }

    fn engine_in(db: Arc<dyn Database>, cache_dir: std::path::PathBuf) -> (OnboardingEngine, Arc<BroadcastSink>) {
        let sink = Arc::new(BroadcastSink::new());
        let config = EngineConfig {
            cache_dir,
            ..Default::default()
        };
        let engine = OnboardingEngine::new(
            db,
            Arc::new(StaticPathSource::builtin()),
            MilestoneCatalog::builtin(),
            sink.clone(),
            config,
        );
        (engine, sink)
    }

    async fn memory_engine() -> (OnboardingEngine, Arc<BroadcastSink>) {
        let db = LibSqlBackend::new_memory().await.unwrap();
        engine_with(Arc::new(db))
    }

    #[tokio::test]
    async fn begin_onboarding_personalizes_and_starts() {
        let (engine, sink) = memory_engine().await;
        let mut rx = sink.subscribe();

        let started = engine
            .begin_onboarding("u1", PathContext::for_role("developer"))
            .await
            .unwrap();
        assert_eq!(started.path.path_id, "developer-v1");
        assert_eq!(started.session.status, SessionStatus::Active);
        assert_eq!(rx.recv().await.unwrap().name, events::SESSION_STARTED);
    }

    #[tokio::test]
    async fn required_steps_drive_percentage_and_completion() {
        let (engine, _) = memory_engine().await;
        let started = engine
            .begin_onboarding("u1", PathContext::for_role("designer"))
            .await
            .unwrap();
        let sid = started.session.session_id.as_str();
        assert_eq!(started.path.path_id, "default-v1");

        for step in ["welcome", "profile", "review"] {
            let outcome = engine
                .record_step_completion(sid, step, StepResult::success(30))
                .await
                .unwrap();
            assert!(!outcome.is_partial());
        }

        let progress = engine.get_overall_progress(sid).await.unwrap();
        assert_eq!(progress.completion_percentage, 100.0);
        assert_eq!(progress.completed_steps, 3);
        assert_eq!(progress.total_steps, 4);
        assert!(engine.get_next_step(sid).await.unwrap().is_none());

        let done = engine.complete_session(sid).await.unwrap();
        assert!(done.warnings.is_empty());
        assert!(done.awarded.iter().any(|a| a.milestone_key == "onboarding_complete"));

        let cert = engine.generate_completion_certificate(sid).await.unwrap();
        assert_eq!(cert.completed_steps.len(), 3);
    }

    #[tokio::test]
    async fn three_validation_failures_surface_a_blocker() {
        let (engine, sink) = memory_engine().await;
        let mut rx = sink.subscribe();
        let sid = engine
            .begin_onboarding("u1", PathContext::default())
            .await
            .unwrap()
            .session
            .session_id;

        let mut last = None;
        for _ in 0..3 {
            last = Some(
                engine
                    .record_step_completion(&sid, "profile", StepResult::failure("invalid phone number", 10))
                    .await
                    .unwrap(),
            );
        }
        let outcome = last.unwrap();
        assert!(
            outcome
                .blockers
                .iter()
                .any(|b| b.category == BlockerCategory::Validation
                    && b.related_step_id.as_deref() == Some("profile"))
        );

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name);
        }
        assert!(names.iter().any(|n| n == events::STEP_FAILED));
        assert!(names.iter().any(|n| n == events::BLOCKERS_DETECTED));
    }

    #[tokio::test]
    async fn certificate_for_active_session_is_not_complete() {
        let (engine, _) = memory_engine().await;
        let sid = engine
            .begin_onboarding("u1", PathContext::default())
            .await
            .unwrap()
            .session
            .session_id;
        let err = engine.generate_completion_certificate(&sid).await.unwrap_err();
        assert!(matches!(err, OnboardingError::SessionNotComplete { .. }));
    }

    #[tokio::test]
    async fn recompute_failure_is_a_warning_not_an_error() {
        let mut db = FlakyDb::new().await;
        db.fail_upsert = Some(Table::Snapshots);
        let (engine, _) = engine_with(Arc::new(db));
        let sid = engine
            .begin_onboarding("u1", PathContext::default())
            .await
            .unwrap()
            .session
            .session_id;

        let outcome = engine
            .record_step_completion(&sid, "welcome", StepResult::success(5))
            .await
            .unwrap();
        assert_eq!(outcome.record.status, StepStatus::Completed);
        assert!(outcome.progress.is_none());
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].effect, SideEffect::ProgressRecompute);
        assert!(!outcome.awarded.is_empty());

        let err = outcome.strict().unwrap_err();
        assert!(matches!(err, OnboardingError::PartialFailure { ref warnings } if warnings.len() == 1));
    }

    #[tokio::test]
    async fn milestone_failure_leaves_other_side_effects_intact() {
        let mut db = FlakyDb::new().await;
        db.fail_insert = true;
        let (engine, _) = engine_with(Arc::new(db));
        let sid = engine
            .begin_onboarding("u1", PathContext::default())
            .await
            .unwrap()
            .session
            .session_id;

        let outcome = engine
            .record_step_completion(&sid, "welcome", StepResult::success(5))
            .await
            .unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].effect, SideEffect::MilestoneCheck);
        assert!(outcome.progress.is_some());
    }

    #[tokio::test]
    async fn every_side_effect_failing_still_persists_the_step() {
        let mut db = FlakyDb::new().await;
        db.fail_query = Some(Table::Progress);
        let (engine, _) = engine_with(Arc::new(db));
        let sid = engine
            .begin_onboarding("u1", PathContext::default())
            .await
            .unwrap()
            .session
            .session_id;

        let outcome = engine
            .record_step_completion(&sid, "welcome", StepResult::failure("gateway timeout", 5))
            .await
            .unwrap();
        let effects: Vec<SideEffect> = outcome.warnings.iter().map(|w| w.effect).collect();
        assert_eq!(
            effects,
            vec![
                SideEffect::BlockerAnalysis,
                SideEffect::MilestoneCheck,
                SideEffect::ProgressRecompute,
                SideEffect::CacheMirror
            ]
        );
        let stored = engine.progress().get_record(&sid, "welcome").await.unwrap().unwrap();
        assert_eq!(stored.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn primary_write_failure_is_an_error() {
        let mut db = FlakyDb::new().await;
        db.fail_upsert = Some(Table::Progress);
        let (engine, _) = engine_with(Arc::new(db));
        let sid = engine
            .begin_onboarding("u1", PathContext::default())
            .await
            .unwrap()
            .session
            .session_id;

        let err = engine
            .record_step_completion(&sid, "welcome", StepResult::success(5))
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::Storage(_)));
    }

    #[tokio::test]
    async fn abandoned_session_rejects_steps() {
        let (engine, sink) = memory_engine().await;
        let sid = engine
            .begin_onboarding("u1", PathContext::default())
            .await
            .unwrap()
            .session
            .session_id;
        let mut rx = sink.subscribe();

        let abandoned = engine.abandon_session(&sid).await.unwrap();
        assert_eq!(abandoned.status, SessionStatus::Abandoned);
        assert_eq!(rx.recv().await.unwrap().name, events::SESSION_ABANDONED);

        let err = engine
            .record_step_completion(&sid, "welcome", StepResult::success(5))
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::Validation(_)));
    }

    #[tokio::test]
    async fn user_badges_after_completion() {
        let (engine, _) = memory_engine().await;
        let sid = engine
            .begin_onboarding("u7", PathContext::default())
            .await
            .unwrap()
            .session
            .session_id;
        for step in ["welcome", "profile", "review"] {
            engine
                .record_step_completion(&sid, step, StepResult::success(1))
                .await
                .unwrap();
        }
        engine.complete_session(&sid).await.unwrap();

        let session_badges = engine
            .get_available_badges(&Subject::Session(sid.clone()))
            .await
            .unwrap();
        let graduate = session_badges.iter().find(|b| b.badge_key == "graduate").unwrap();
        assert!(graduate.earned);
        assert_eq!(graduate.progress, 100.0);

        let user = engine
            .get_available_badges(&Subject::User("u7".into()))
            .await
            .unwrap();
        let graduate = user.iter().find(|b| b.badge_key == "graduate").unwrap();
        assert!(graduate.earned);
        assert_eq!(graduate.achieved_milestones, 2);
    }

    #[tokio::test]
    async fn step_writes_are_mirrored_and_resync() {
        let dir = tempfile::tempdir().unwrap();
        let db = LibSqlBackend::new_memory().await.unwrap();
        let (engine, _) = engine_in(Arc::new(db), dir.path().join("cache"));
        let sid = engine
            .begin_onboarding("u1", PathContext::default())
            .await
            .unwrap()
            .session
            .session_id;

        let tracked = engine
            .track_step_progress(&sid, "welcome", StepUpdate::new(StepStatus::InProgress).with_time(4))
            .await
            .unwrap();
        assert!(tracked.warnings.is_empty());
        let entry = dir.path().join("cache").join(format!("{sid}.json"));
        assert!(entry.exists());

        let outcome = engine
            .record_step_completion(&sid, "welcome", StepResult::success(6))
            .await
            .unwrap();
        assert!(!outcome.is_partial());

        let cached = engine.backup().restore(&sid).await.unwrap();
        assert_eq!(cached.records, vec![outcome.record.clone()]);

        let report = engine.restore_and_sync(&sid).await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(report.records, vec![outcome.record]);

        let err = engine.restore_and_sync("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn mirror_failure_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the cache directory should be.
        let blocked = dir.path().join("cache");
        std::fs::write(&blocked, b"not a directory").unwrap();
        let db = LibSqlBackend::new_memory().await.unwrap();
        let (engine, _) = engine_in(Arc::new(db), blocked);
        let sid = engine
            .begin_onboarding("u1", PathContext::default())
            .await
            .unwrap()
            .session
            .session_id;

        let tracked = engine
            .track_step_progress(&sid, "welcome", StepUpdate::new(StepStatus::InProgress))
            .await
            .unwrap();
        assert_eq!(tracked.warnings.len(), 1);
        assert_eq!(tracked.warnings[0].effect, SideEffect::CacheMirror);

        let outcome = engine
            .record_step_completion(&sid, "welcome", StepResult::success(1))
            .await
            .unwrap();
        assert_eq!(outcome.record.status, StepStatus::Completed);
        let effects: Vec<SideEffect> = outcome.warnings.iter().map(|w| w.effect).collect();
        assert_eq!(effects, vec![SideEffect::CacheMirror]);
        assert!(outcome.progress.is_some());
    }
}
