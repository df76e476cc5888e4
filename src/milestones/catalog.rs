//! Milestone and badge definitions, injected as configuration.

use std::collections::HashSet;
use std::path::Path as FsPath;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, OnboardingError, Result};
use crate::progress::model::validate_id;
use crate::progress::{OverallProgress, ProgressRecord, Session, SessionStatus, StepStatus};

/// Who a milestone is awarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneScope {
    Session,
    User,
}

/// A single condition a session must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Criterion {
    StepsCompleted { count: usize },
    StepCompleted { step_id: String },
    CompletionPercentage { percent: f64 },
    SessionCompleted,
    /// Steps completed without any failed attempt.
    FirstTryCompletions { count: usize },
    /// Session completed within this many seconds of starting.
    CompletedWithin { seconds: i64 },
}

/// The facts about one session that criteria are evaluated against.
pub struct SessionFacts<'a> {
    pub session: &'a Session,
    pub records: &'a [ProgressRecord],
    pub progress: &'a OverallProgress,
}

impl Criterion {
    pub fn is_met(&self, facts: &SessionFacts<'_>) -> bool {
        match self {
            Self::StepsCompleted { count } => facts.progress.completed_steps >= *count,
            Self::StepCompleted { step_id } => facts
                .records
                .iter()
                .any(|r| &r.step_id == step_id && r.status == StepStatus::Completed),
            Self::CompletionPercentage { percent } => {
                facts.progress.completion_percentage >= *percent
            }
            Self::SessionCompleted => facts.session.status == SessionStatus::Completed,
            Self::FirstTryCompletions { count } => {
                let first_try = facts
                    .records
                    .iter()
                    .filter(|r| r.status == StepStatus::Completed && r.attempts == 1)
                    .count();
                first_try >= *count
            }
            Self::CompletedWithin { seconds } => match facts.session.completed_at {
                Some(done) => (done - facts.session.started_at).num_seconds() <= *seconds,
                None => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub scope: MilestoneScope,
    /// All must hold for the milestone to be awarded.
    pub criteria: Vec<Criterion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Milestone keys that together earn the badge.
    #[serde(default)]
    pub milestones: Vec<String>,
}

/// The full set of milestone and badge rules the engine evaluates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MilestoneCatalog {
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    #[serde(default)]
    pub badges: Vec<Badge>,
}

impl MilestoneCatalog {
    pub fn new(milestones: Vec<Milestone>, badges: Vec<Badge>) -> Result<Self> {
        let catalog = Self { milestones, badges };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let catalog: Self = serde_json::from_str(json)
            .map_err(|e| ConfigError::ParseError(format!("milestone catalog: {e}")))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_file(path: &FsPath) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&json)
    }

    pub fn milestone(&self, key: &str) -> Option<&Milestone> {
        self.milestones.iter().find(|m| m.key == key)
    }

    pub fn badge(&self, key: &str) -> Option<&Badge> {
        self.badges.iter().find(|b| b.key == key)
    }

    /// Reject malformed or duplicate keys, empty criteria and badges that
    /// name milestones the catalog does not define.
    pub fn validate(&self) -> Result<()> {
        let mut keys = HashSet::new();
        for milestone in &self.milestones {
            validate_id("milestone key", &milestone.key)?;
            if !keys.insert(milestone.key.as_str()) {
                return Err(OnboardingError::validation(format!(
                    "duplicate milestone key '{}'",
                    milestone.key
                )));
            }
            if milestone.criteria.is_empty() {
                return Err(OnboardingError::validation(format!(
                    "milestone '{}' has no criteria",
                    milestone.key
                )));
            }
        }

        let mut badge_keys = HashSet::new();
        for badge in &self.badges {
            validate_id("badge key", &badge.key)?;
            if !badge_keys.insert(badge.key.as_str()) {
                return Err(OnboardingError::validation(format!(
                    "duplicate badge key '{}'",
                    badge.key
                )));
            }
            if let Some(unknown) = badge.milestones.iter().find(|m| !keys.contains(m.as_str())) {
                return Err(OnboardingError::validation(format!(
                    "badge '{}' references unknown milestone '{unknown}'",
                    badge.key
                )));
            }
        }
        Ok(())
    }

    /// The catalog shipped with the engine.
    pub fn builtin() -> Self {
        Self {
            milestones: vec![
                milestone(
                    "first_step",
                    "First step",
                    MilestoneScope::Session,
                    vec![Criterion::StepsCompleted { count: 1 }],
                ),
                milestone(
                    "halfway",
                    "Halfway there",
                    MilestoneScope::Session,
                    vec![Criterion::CompletionPercentage { percent: 50.0 }],
                ),
                milestone(
                    "onboarding_complete",
                    "Onboarding complete",
                    MilestoneScope::Session,
                    vec![Criterion::SessionCompleted],
                ),
                milestone(
                    "flawless",
                    "Flawless",
                    MilestoneScope::Session,
                    vec![Criterion::FirstTryCompletions { count: 3 }],
                ),
                milestone(
                    "speed_run",
                    "Speed run",
                    MilestoneScope::Session,
                    vec![
                        Criterion::SessionCompleted,
                        Criterion::CompletedWithin { seconds: 3600 },
                    ],
                ),
                milestone(
                    "first_onboarding",
                    "First onboarding finished",
                    MilestoneScope::User,
                    vec![Criterion::SessionCompleted],
                ),
            ],
            badges: vec![
                badge("getting_started", "Getting started", &["first_step", "halfway"]),
                badge("graduate", "Graduate", &["onboarding_complete", "first_onboarding"]),
                badge("ace", "Ace", &["flawless", "speed_run"]),
            ],
        }
    }
}

fn milestone(key: &str, name: &str, scope: MilestoneScope, criteria: Vec<Criterion>) -> Milestone {
    Milestone {
        key: key.to_string(),
        name: name.to_string(),
        description: String::new(),
        scope,
        criteria,
    }
}

fn badge(key: &str, name: &str, milestones: &[&str]) -> Badge {
    Badge {
        key: key.to_string(),
        name: name.to_string(),
        description: String::new(),
        milestones: milestones.iter().map(|m| m.to_string()).collect(),
    }
}
