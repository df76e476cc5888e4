//! Read-only sources of path templates.

use std::collections::BTreeSet;
use std::path::Path as FsPath;

use crate::error::{ConfigError, OnboardingError, Result};

use super::model::{Path, PathStep, StepType};

/// Read-only access to published path templates.
pub trait PathSource: Send + Sync {
    /// All templates, in declaration order.
    fn templates(&self) -> &[Path];

    fn get(&self, path_id: &str) -> Option<&Path> {
        self.templates().iter().find(|p| p.path_id == path_id)
    }
}

/// Templates held in memory, validated on construction.
#[derive(Debug, Clone)]
pub struct StaticPathSource {
    paths: Vec<Path>,
}

impl StaticPathSource {
    /// Build a source from templates, rejecting invalid or duplicate ones.
    pub fn new(paths: Vec<Path>) -> Result<Self> {
        let mut ids = BTreeSet::new();
        for path in &paths {
            path.validate()?;
            if !ids.insert(path.path_id.as_str()) {
                return Err(OnboardingError::validation(format!(
                    "duplicate path id '{}'",
                    path.path_id
                )));
            }
        }
        Ok(Self { paths })
    }

    /// Parse a JSON array of templates.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let paths: Vec<Path> = serde_json::from_str(json)
            .map_err(|e| ConfigError::ParseError(format!("path templates: {e}")))?;
        Self::new(paths)
    }

    /// Load templates from a JSON file.
    pub fn from_file(path: &FsPath) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&json)
    }

    /// The templates shipped with the engine: a default path plus
    /// developer and administrator variants.
    pub fn builtin() -> Self {
        let default = Path {
            path_id: "default-v1".to_string(),
            name: "Getting started".to_string(),
            target_role: None,
            organization: None,
            subscription_tier: None,
            steps: vec![
                step("welcome", "Welcome", 1, StepType::Welcome, true, &[], 60),
                step("profile", "Complete your profile", 2, StepType::Profile, true, &["welcome"], 180),
                step("tour", "Product tour", 3, StepType::Tutorial, false, &["welcome"], 300),
                step("review", "Review and finish", 4, StepType::Review, true, &["profile"], 60),
            ],
        };

        let developer = Path {
            path_id: "developer-v1".to_string(),
            name: "Developer onboarding".to_string(),
            target_role: Some("developer".to_string()),
            organization: None,
            subscription_tier: None,
            steps: vec![
                step("welcome", "Welcome", 1, StepType::Welcome, true, &[], 60),
                step("profile", "Complete your profile", 2, StepType::Profile, true, &["welcome"], 180),
                step("api_key", "Create an API key", 3, StepType::Configuration, true, &["profile"], 120),
                step("first_request", "Send a first request", 4, StepType::Integration, true, &["api_key"], 600),
                step("sdk_tour", "SDK walkthrough", 5, StepType::Tutorial, false, &["welcome"], 900),
                step("quiz", "Concepts check", 6, StepType::Quiz, false, &["sdk_tour"], 300),
            ],
        };

        let admin = Path {
            path_id: "admin-v1".to_string(),
            name: "Administrator onboarding".to_string(),
            target_role: Some("admin".to_string()),
            organization: None,
            subscription_tier: None,
            steps: vec![
                step("welcome", "Welcome", 1, StepType::Welcome, true, &[], 60),
                step("workspace", "Configure the workspace", 2, StepType::Configuration, true, &["welcome"], 600),
                step("invite_team", "Invite your team", 3, StepType::Configuration, true, &["workspace"], 300),
                step("sso", "Connect single sign-on", 4, StepType::Integration, false, &["workspace"], 1200),
                step("review", "Review and finish", 5, StepType::Review, true, &["invite_team"], 60),
            ],
        };

        Self {
            paths: vec![default, developer, admin],
        }
    }
}

fn step(
    id: &str,
    title: &str,
    order: u32,
    step_type: StepType,
    is_required: bool,
    deps: &[&str],
    estimated_time: u64,
) -> PathStep {
    PathStep {
        step_id: id.to_string(),
        title: title.to_string(),
        order,
        step_type,
        is_required,
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        estimated_time,
    }
}

impl PathSource for StaticPathSource {
    fn templates(&self) -> &[Path] {
        &self.paths
    }
}
