//! Completion certificates for finished sessions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OnboardingError, Result};
use crate::milestones::{Achievement, MilestoneEngine};
use crate::progress::{ProgressStore, SessionStatus, StepStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertifiedStep {
    pub step_id: String,
    pub title: String,
    pub time_spent: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Immutable record of a completed onboarding session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    /// Derived from the session id; identical across regenerations.
    pub certificate_id: Uuid,
    pub session_id: String,
    pub user_id: String,
    pub path_id: String,
    pub path_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// In personalized path order.
    pub completed_steps: Vec<CertifiedStep>,
    pub total_time_spent: u64,
    pub achievements: Vec<Achievement>,
}

#[derive(Clone)]
pub struct CertificateGenerator {
    progress: ProgressStore,
    milestones: MilestoneEngine,
}

impl CertificateGenerator {
    pub fn new(progress: ProgressStore, milestones: MilestoneEngine) -> Self {
        Self {
            progress,
            milestones,
        }
    }

    /// Assemble the certificate of a completed session. Read-only.
    pub async fn generate_completion_certificate(&self, session_id: &str) -> Result<Certificate> {
        let (session, path) = self.progress.session_with_path(session_id).await?;
        let completed_at = match (session.status, session.completed_at) {
            (SessionStatus::Completed, Some(at)) => at,
            (status, _) => {
                return Err(OnboardingError::SessionNotComplete {
                    session_id: session_id.to_string(),
                    status: status.to_string(),
                });
            }
        };

        let records = self.progress.list_records(session_id).await?;
        let by_step: HashMap<&str, _> = records
            .iter()
            .filter(|r| r.status == StepStatus::Completed)
            .map(|r| (r.step_id.as_str(), r))
            .collect();

        let completed_steps: Vec<CertifiedStep> = path
            .ordered_steps()?
            .into_iter()
            .filter_map(|step| {
                by_step.get(step.step_id.as_str()).map(|record| CertifiedStep {
                    step_id: step.step_id.clone(),
                    title: step.title.clone(),
                    time_spent: record.time_spent,
                    completed_at: record.completed_at,
                })
            })
            .collect();

        let achievements = self.milestones.achievements_for_session(session_id).await?;

        Ok(Certificate {
            certificate_id: Uuid::new_v5(&Uuid::NAMESPACE_OID, session.session_id.as_bytes()),
            total_time_spent: completed_steps
                .iter()
                .fold(0u64, |total, s| total.saturating_add(s.time_spent)),
            session_id: session.session_id,
            user_id: session.user_id,
            path_id: path.path_id,
            path_name: path.name,
            started_at: session.started_at,
            completed_at,
            completed_steps,
            achievements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::analytics::TracingSink;
    use crate::config::EngineConfig;
    use crate::milestones::MilestoneCatalog;
    use crate::paths::model::fixtures::{path, step};
    use crate::paths::{PathContext, StaticPathSource};
    use crate::progress::StepUpdate;
    use crate::store::{Database, LibSqlBackend};

    async fn setup() -> (CertificateGenerator, ProgressStore, MilestoneEngine) {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.init_schema().await.unwrap();
        let source = StaticPathSource::new(vec![path(
            "p",
            None,
            vec![
                step("a", 1, true, &["b"]),
                step("b", 2, true, &[]),
                step("c", 3, false, &[]),
            ],
        )])
        .unwrap();
        let progress = ProgressStore::new(Arc::new(db), Arc::new(source), &EngineConfig::default());
        let milestones = MilestoneEngine::new(
            progress.clone(),
            Arc::new(MilestoneCatalog::builtin()),
            Arc::new(TracingSink),
        );
        (
            CertificateGenerator::new(progress.clone(), milestones.clone()),
            progress,
            milestones,
        )
    }

    #[tokio::test]
    async fn active_session_is_not_complete() {
        let (certs, progress, _) = setup().await;
        let session = progress
            .start_session("u1", "p", PathContext::default())
            .await
            .unwrap();

        let err = certs
            .generate_completion_certificate(&session.session_id)
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::SessionNotComplete { .. }));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn missing_session_is_plain_not_found() {
        let (certs, _, _) = setup().await;
        let err = certs.generate_completion_certificate("missing").await.unwrap_err();
        assert!(matches!(err, OnboardingError::NotFound { entity: "Session", .. }));
    }

    #[tokio::test]
    async fn certificate_lists_steps_in_path_order_and_is_stable() {
        let (certs, progress, milestones) = setup().await;
        let session = progress
            .start_session("u1", "p", PathContext::default())
            .await
            .unwrap();
        let sid = session.session_id.as_str();

        for step_id in ["b", "a"] {
            progress
                .track_step_progress(sid, step_id, StepUpdate::new(StepStatus::Completed).with_time(30))
                .await
                .unwrap();
        }
        progress.complete_session(sid).await.unwrap();
        milestones.check_session(sid).await.unwrap();

        let first = certs.generate_completion_certificate(sid).await.unwrap();
        let second = certs.generate_completion_certificate(sid).await.unwrap();
        assert_eq!(first, second);

        let ids: Vec<&str> = first.completed_steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(first.total_time_spent, 60);
        assert!(
            first
                .achievements
                .iter()
                .any(|a| a.milestone_key == "onboarding_complete")
        );
    }

    #[tokio::test]
    async fn huge_step_times_saturate_the_total() {
        let (certs, progress, _) = setup().await;
        let session = progress
            .start_session("u1", "p", PathContext::default())
            .await
            .unwrap();
        let sid = session.session_id.as_str();

        for step_id in ["b", "a"] {
            progress
                .track_step_progress(sid, step_id, StepUpdate::new(StepStatus::Completed).with_time(u64::MAX))
                .await
                .unwrap();
        }
        progress.complete_session(sid).await.unwrap();

        let cert = certs.generate_completion_certificate(sid).await.unwrap();
        assert_eq!(cert.total_time_spent, u64::MAX);
    }
}
