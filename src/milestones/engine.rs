//! MilestoneEngine: idempotent awards and badge progress.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::analytics::{AnalyticsSink, emit_best_effort, events};
use crate::error::{OnboardingError, Result};
use crate::progress::store::summarize;
use crate::progress::ProgressStore;
use crate::progress::model::validate_id;
use crate::store::{self, Filter, RecordKey, Table};

use super::catalog::{Milestone, MilestoneCatalog, MilestoneScope, SessionFacts};

/// Whoever holds an achievement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Subject {
    Session(String),
    User(String),
}

impl Subject {
    /// Stable key used for uniqueness and lookup.
    pub fn key(&self) -> String {
        match self {
            Self::Session(id) => format!("session:{id}"),
            Self::User(id) => format!("user:{id}"),
        }
    }
}

/// An awarded milestone. At most one exists per `(subject, milestone_key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub achievement_id: Uuid,
    pub subject: Subject,
    pub subject_key: String,
    pub user_id: String,
    /// Session that earned it, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub milestone_key: String,
    pub awarded_at: DateTime<Utc>,
}

/// Earned state of one badge for a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeStatus {
    pub badge_key: String,
    pub name: String,
    pub description: String,
    pub earned: bool,
    /// Percentage of the badge's milestones achieved, in [0, 100].
    pub progress: f64,
    pub achieved_milestones: usize,
    pub total_milestones: usize,
}

#[derive(Clone)]
pub struct MilestoneEngine {
    progress: ProgressStore,
    catalog: Arc<MilestoneCatalog>,
    analytics: Arc<dyn AnalyticsSink>,
}

impl MilestoneEngine {
    pub fn new(
        progress: ProgressStore,
        catalog: Arc<MilestoneCatalog>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self {
            progress,
            catalog,
            analytics,
        }
    }

    pub fn catalog(&self) -> &MilestoneCatalog {
        &self.catalog
    }

    /// Award a milestone to a subject.
    ///
    /// Repeated calls return the first stored achievement unchanged and do
    /// not emit analytics again.
    pub async fn award_milestone(&self, subject: &Subject, milestone_key: &str) -> Result<Achievement> {
        let milestone = self.catalog.milestone(milestone_key).ok_or_else(|| {
            OnboardingError::validation(format!("unknown milestone key '{milestone_key}'"))
        })?;

        let (user_id, session_id) = match subject {
            Subject::Session(id) => {
                let session = self.progress.get_session(id).await?;
                (session.user_id, Some(session.session_id))
            }
            Subject::User(id) => {
                validate_id("user_id", id)?;
                (id.clone(), None)
            }
        };

        let (achievement, _) = self
            .award(subject.clone(), user_id, session_id, milestone)
            .await?;
        Ok(achievement)
    }

    /// Evaluate every milestone against a session and award those whose
    /// criteria all hold. Returns only achievements created by this call.
    pub async fn check_session(&self, session_id: &str) -> Result<Vec<Achievement>> {
        let (session, path) = self.progress.session_with_path(session_id).await?;
        let records = self.progress.list_records(session_id).await?;
        let progress = summarize(session_id, &path, &records);
        let facts = SessionFacts {
            session: &session,
            records: &records,
            progress: &progress,
        };

        let mut awarded = Vec::new();
        for milestone in &self.catalog.milestones {
            if !milestone.criteria.iter().all(|c| c.is_met(&facts)) {
                continue;
            }
            let subject = match milestone.scope {
                MilestoneScope::Session => Subject::Session(session.session_id.clone()),
                MilestoneScope::User => Subject::User(session.user_id.clone()),
            };
            let (achievement, inserted) = self
                .award(
                    subject,
                    session.user_id.clone(),
                    Some(session.session_id.clone()),
                    milestone,
                )
                .await?;
            if inserted {
                awarded.push(achievement);
            }
        }

        debug!(session_id, awarded = awarded.len(), "Milestones checked");
        Ok(awarded)
    }

    async fn award(
        &self,
        subject: Subject,
        user_id: String,
        session_id: Option<String>,
        milestone: &Milestone,
    ) -> Result<(Achievement, bool)> {
        let subject_key = subject.key();
        let candidate = Achievement {
            achievement_id: Uuid::new_v4(),
            subject,
            subject_key: subject_key.clone(),
            user_id,
            session_id,
            milestone_key: milestone.key.clone(),
            awarded_at: Utc::now(),
        };

        let key = RecordKey::pair(&subject_key, &milestone.key);
        let (stored, inserted) =
            store::create_if_absent(self.progress.db(), Table::Achievements, &key, &candidate).await?;

        if inserted {
            info!(subject = %subject_key, milestone = %milestone.key, "Milestone awarded");
            emit_best_effort(
                self.analytics.as_ref(),
                events::MILESTONE_AWARDED,
                serde_json::json!({
                    "subject": subject_key,
                    "user_id": stored.user_id,
                    "session_id": stored.session_id,
                    "milestone": milestone.key,
                }),
            )
            .await;
        }
        Ok((stored, inserted))
    }

    pub async fn achievements_for(&self, subject: &Subject) -> Result<Vec<Achievement>> {
        let filter = Filter::all().field_eq("subject_key", subject.key());
        Ok(store::list(self.progress.db(), Table::Achievements, &filter).await?)
    }

    /// Achievements earned during a session, user-scoped ones included.
    pub async fn achievements_for_session(&self, session_id: &str) -> Result<Vec<Achievement>> {
        let filter = Filter::all().field_eq("session_id", session_id);
        Ok(store::list(self.progress.db(), Table::Achievements, &filter).await?)
    }

    /// Achievements that count toward a subject's badges: for a user every
    /// award made to them or in one of their sessions, for a session every
    /// award that session earned.
    async fn badge_evidence(&self, subject: &Subject) -> Result<Vec<Achievement>> {
        let filter = match subject {
            Subject::Session(id) => Filter::all().field_eq("session_id", id.as_str()),
            Subject::User(id) => Filter::all().field_eq("user_id", id.as_str()),
        };
        Ok(store::list(self.progress.db(), Table::Achievements, &filter).await?)
    }

    /// Every catalog badge with its earned state and progress for a subject.
    pub async fn get_available_badges(&self, subject: &Subject) -> Result<Vec<BadgeStatus>> {
        let achievements = self.badge_evidence(subject).await?;
        let achieved: HashSet<&str> = achievements
            .iter()
            .map(|a| a.milestone_key.as_str())
            .collect();

        let statuses = self
            .catalog
            .badges
            .iter()
            .map(|badge| {
                let total = badge.milestones.len();
                let done = badge
                    .milestones
                    .iter()
                    .filter(|m| achieved.contains(m.as_str()))
                    .count();
                let earned = achieved.contains(badge.key.as_str()) || done == total;
                let progress = if earned || total == 0 {
                    100.0
                } else {
                    (done as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
                };
                BadgeStatus {
                    badge_key: badge.key.clone(),
                    name: badge.name.clone(),
                    description: badge.description.clone(),
                    earned,
                    progress,
                    achieved_milestones: done,
                    total_milestones: total,
                }
            })
            .collect();
        Ok(statuses)
    }
}
