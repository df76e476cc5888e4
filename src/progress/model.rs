//! Session and per-step progress data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OnboardingError, Result};
use crate::milestones::Achievement;
use crate::paths::PathContext;

/// Lifecycle of one onboarding attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Abandoned,
}

impl SessionStatus {
    /// Terminal sessions are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{s}")
    }
}

/// One user's attempt at an onboarding path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub path_id: String,
    pub context: PathContext,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, path_id: impl Into<String>, context: PathContext) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            path_id: path_id.into(),
            context,
            status: SessionStatus::Active,
            started_at: now,
            completed_at: None,
            updated_at: now,
        }
    }
}

/// Status of one step within a session.
///
/// not_started → in_progress → {completed | failed}; failed may be retried.
/// Completed is terminal for the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    /// Check if a transition from `self` to `target` is valid.
    ///
    /// Writing `completed` or `failed` straight from `not_started` or
    /// `failed` is accepted as an implicit start or retry.
    pub fn can_transition_to(&self, target: StepStatus) -> bool {
        use StepStatus::*;
        match self {
            NotStarted => true,
            InProgress | Failed => target != NotStarted,
            Completed => false,
        }
    }

    /// Whether writing this status resolves an attempt.
    pub fn is_outcome(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Data written by one `track_step_progress` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepUpdate {
    pub status: StepStatus,
    /// Seconds spent since the previous write.
    #[serde(default)]
    pub time_spent: u64,
    /// Error reported by the step; only valid with `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepUpdate {
    pub fn new(status: StepStatus) -> Self {
        Self {
            status,
            time_spent: 0,
            error: None,
        }
    }

    /// Builder: add time spent.
    pub fn with_time(mut self, seconds: u64) -> Self {
        self.time_spent = seconds;
        self
    }

    /// Builder: attach an error.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(err) = &self.error {
            if self.status != StepStatus::Failed {
                return Err(OnboardingError::validation(format!(
                    "an error can only be reported with status 'failed', got '{}'",
                    self.status
                )));
            }
            if err.trim().is_empty() {
                return Err(OnboardingError::validation("error message must not be empty"));
            }
        }
        Ok(())
    }
}

/// One write in a record's attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub status: StepStatus,
    /// Cumulative time spent at this point, in seconds.
    pub time_spent: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// The mutable fact of a session's interaction with one step.
///
/// At most one record exists per `(session_id, step_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub session_id: String,
    pub step_id: String,
    pub status: StepStatus,
    /// Total seconds spent on the step.
    pub time_spent: u64,
    /// Resolved attempts (writes ending in completed or failed).
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Oldest first, capped at the configured history length.
    #[serde(default)]
    pub history: Vec<ProgressEntry>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    /// A fresh record for a step with no prior interaction.
    pub fn new(session_id: &str, step_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            step_id: step_id.to_string(),
            status: StepStatus::NotStarted,
            time_spent: 0,
            attempts: 0,
            last_error: None,
            history: Vec::new(),
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Apply an update in place, enforcing the step state machine.
    pub fn apply(
        &mut self,
        update: &StepUpdate,
        now: DateTime<Utc>,
        max_history: usize,
    ) -> Result<()> {
        if self.status == StepStatus::Completed {
            return Err(OnboardingError::validation(format!(
                "step already completed: {}",
                self.step_id
            )));
        }
        if !self.status.can_transition_to(update.status) {
            return Err(OnboardingError::validation(format!(
                "invalid transition for step {}: {} -> {}",
                self.step_id, self.status, update.status
            )));
        }

        self.status = update.status;
        self.time_spent = self.time_spent.saturating_add(update.time_spent);
        if update.status.is_outcome() {
            self.attempts += 1;
        }
        match update.status {
            StepStatus::Failed => self.last_error = update.error.clone(),
            StepStatus::Completed => self.completed_at = Some(now),
            StepStatus::NotStarted | StepStatus::InProgress => {}
        }
        self.updated_at = now;

        self.history.push(ProgressEntry {
            status: update.status,
            time_spent: self.time_spent,
            error: update.error.clone(),
            recorded_at: now,
        });
        if self.history.len() > max_history {
            let excess = self.history.len() - max_history;
            self.history.drain(..excess);
        }
        Ok(())
    }
}

/// Aggregate progress of one session against its path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallProgress {
    pub session_id: String,
    /// completed required / total required × 100.
    pub completion_percentage: f64,
    pub completed_required_steps: usize,
    pub total_required_steps: usize,
    /// Counts over every step, optional ones included.
    pub completed_steps: usize,
    pub total_steps: usize,
    pub in_progress_steps: usize,
    pub failed_steps: usize,
    pub total_time_spent: u64,
    pub achievements: Vec<Achievement>,
}

impl OverallProgress {
    /// Zeroed aggregate for a session with nothing recorded.
    pub fn empty(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            completion_percentage: 0.0,
            completed_required_steps: 0,
            total_required_steps: 0,
            completed_steps: 0,
            total_steps: 0,
            in_progress_steps: 0,
            failed_steps: 0,
            total_time_spent: 0,
            achievements: Vec::new(),
        }
    }

    pub fn all_required_completed(&self) -> bool {
        self.completed_required_steps == self.total_required_steps
    }
}

/// Completion percentage of a session at a point in time. Feeds trends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub snapshot_id: Uuid,
    pub session_id: String,
    pub user_id: String,
    pub path_id: String,
    pub completion_percentage: f64,
    pub completed_steps: usize,
    pub recorded_at: DateTime<Utc>,
}

/// Maximum identifier length accepted by the engine.
pub const MAX_ID_LEN: usize = 128;

/// Validate a session, step, or user identifier.
pub fn validate_id(label: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(OnboardingError::validation(format!("{label} must not be empty")));
    }
    if id.len() > MAX_ID_LEN {
        return Err(OnboardingError::validation(format!(
            "{label} exceeds {MAX_ID_LEN} characters"
        )));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':');
    if id.starts_with('.') || !id.chars().all(allowed) {
        return Err(OnboardingError::validation(format!(
            "{label} '{id}' contains invalid characters"
        )));
    }
    Ok(())
}
