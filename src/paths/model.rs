//! Path templates, step definitions, and personalization context.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{OnboardingError, Result};

/// What kind of interaction a step asks of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Welcome,
    Profile,
    Tutorial,
    Configuration,
    Integration,
    Quiz,
    Review,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Welcome => "welcome",
            Self::Profile => "profile",
            Self::Tutorial => "tutorial",
            Self::Configuration => "configuration",
            Self::Integration => "integration",
            Self::Quiz => "quiz",
            Self::Review => "review",
        };
        write!(f, "{s}")
    }
}

/// A single step definition within a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub step_id: String,
    pub title: String,
    /// Position within the path. Unique per path.
    pub order: u32,
    pub step_type: StepType,
    pub is_required: bool,
    /// Steps that must be completed before this one.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Expected time to complete, in seconds.
    pub estimated_time: u64,
}

/// An ordered template of steps for a role and context.
///
/// Templates are immutable once published; a change ships as a new `path_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub path_id: String,
    pub name: String,
    /// Role this template targets. `None` marks the default template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_tier: Option<String>,
    pub steps: Vec<PathStep>,
}

impl Path {
    pub fn step(&self, step_id: &str) -> Option<&PathStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn required_steps(&self) -> impl Iterator<Item = &PathStep> {
        self.steps.iter().filter(|s| s.is_required)
    }

    /// Check structural invariants: unique ids and orders, known
    /// dependencies, and no dependency cycles.
    pub fn validate(&self) -> Result<()> {
        if self.path_id.trim().is_empty() {
            return Err(OnboardingError::validation("path_id must not be empty"));
        }

        let mut ids = HashSet::new();
        let mut orders = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.step_id.as_str()) {
                return Err(OnboardingError::validation(format!(
                    "path {}: duplicate step id '{}'",
                    self.path_id, step.step_id
                )));
            }
            if !orders.insert(step.order) {
                return Err(OnboardingError::validation(format!(
                    "path {}: duplicate step order {}",
                    self.path_id, step.order
                )));
            }
        }

        for step in &self.steps {
            if let Some(missing) = step.dependencies.iter().find(|d| !ids.contains(d.as_str())) {
                return Err(OnboardingError::validation(format!(
                    "path {}: step '{}' depends on unknown step '{}'",
                    self.path_id, step.step_id, missing
                )));
            }
        }

        self.ordered_steps().map(|_| ())
    }

    /// Steps in template order, with any step deferred until after its
    /// dependencies. Independent steps keep their template order.
    pub fn ordered_steps(&self) -> Result<Vec<&PathStep>> {
        let mut pending: Vec<&PathStep> = self.steps.iter().collect();
        pending.sort_by_key(|s| s.order);

        let mut placed: HashSet<&str> = HashSet::new();
        let mut ordered = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            let ready = pending
                .iter()
                .position(|s| s.dependencies.iter().all(|d| placed.contains(d.as_str())));
            match ready {
                Some(idx) => {
                    let step = pending.remove(idx);
                    placed.insert(step.step_id.as_str());
                    ordered.push(step);
                }
                None => {
                    let stuck: Vec<&str> = pending.iter().map(|s| s.step_id.as_str()).collect();
                    return Err(OnboardingError::validation(format!(
                        "path {}: dependency cycle among steps {:?}",
                        self.path_id, stuck
                    )));
                }
            }
        }

        Ok(ordered)
    }

    /// How specifically this template matches a context, or `None` when it
    /// does not apply. Higher is more specific.
    pub fn specificity(&self, context: &PathContext) -> Option<u8> {
        let mut score = 0;

        match &self.target_role {
            Some(role) if role.eq_ignore_ascii_case(&context.role) => score += 4,
            Some(_) => return None,
            None => {}
        }

        match (&self.organization, &context.organization) {
            (Some(org), Some(ctx_org)) if org.eq_ignore_ascii_case(ctx_org) => score += 2,
            (Some(_), _) => return None,
            (None, _) => {}
        }

        match (&self.subscription_tier, &context.subscription_tier) {
            (Some(tier), Some(ctx_tier)) if tier.eq_ignore_ascii_case(ctx_tier) => score += 1,
            (Some(_), _) => return None,
            (None, _) => {}
        }

        Some(score)
    }
}

/// Who is being onboarded, used to pick a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathContext {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_tier: Option<String>,
}

impl PathContext {
    pub fn for_role(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Default::default()
        }
    }

    /// Builder: set organization.
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    /// Builder: set subscription tier.
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.subscription_tier = Some(tier.into());
        self
    }
}

/// A path template resolved and ordered for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalizedPath {
    pub user_id: String,
    pub path_id: String,
    pub name: String,
    pub steps: Vec<PathStep>,
    pub required_steps: usize,
    /// Sum of step estimates, in seconds.
    pub total_estimated_time: u64,
}
