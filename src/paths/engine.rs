//! PathEngine picks a template for a user and walks it.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::{OnboardingError, Result};
use crate::progress::{ProgressStore, StepStatus};
use crate::progress::model::validate_id;

use super::model::{PathContext, PathStep, PersonalizedPath};
use super::source::PathSource;

#[derive(Clone)]
pub struct PathEngine {
    source: Arc<dyn PathSource>,
    progress: ProgressStore,
}

impl PathEngine {
    pub fn new(source: Arc<dyn PathSource>, progress: ProgressStore) -> Self {
        Self { source, progress }
    }

    /// Resolve the most specific template for a context.
    ///
    /// Role and organization outrank role alone, which outranks the default
    /// template; a subscription tier match breaks ties. Among equally
    /// specific templates the first declared wins.
    pub fn generate_personalized_path(
        &self,
        user_id: &str,
        context: &PathContext,
    ) -> Result<PersonalizedPath> {
        validate_id("user_id", user_id)?;

        let mut best: Option<(u8, &super::Path)> = None;
        for path in self.source.templates() {
            let Some(score) = path.specificity(context) else {
                continue;
            };
            if best.is_none_or(|(top, _)| score > top) {
                best = Some((score, path));
            }
        }
        let (_, path) = best.ok_or_else(|| OnboardingError::not_found("Path", &context.role))?;

        let steps: Vec<PathStep> = path.ordered_steps()?.into_iter().cloned().collect();
        let personalized = PersonalizedPath {
            user_id: user_id.to_string(),
            path_id: path.path_id.clone(),
            name: path.name.clone(),
            required_steps: steps.iter().filter(|s| s.is_required).count(),
            total_estimated_time: steps.iter().map(|s| s.estimated_time).sum(),
            steps,
        };

        debug!(user_id, path_id = %personalized.path_id, role = %context.role, "Path personalized");
        Ok(personalized)
    }

    /// The first step, in path order, whose dependencies are all completed
    /// and which is not itself completed. `None` once every required step
    /// is done.
    pub async fn get_next_step(&self, session_id: &str) -> Result<Option<PathStep>> {
        let (_, path) = self.progress.session_with_path(session_id).await?;
        let records = self.progress.list_records(session_id).await?;

        let completed: HashSet<&str> = records
            .iter()
            .filter(|r| r.status == StepStatus::Completed)
            .map(|r| r.step_id.as_str())
            .collect();

        if path.required_steps().all(|s| completed.contains(s.step_id.as_str())) {
            return Ok(None);
        }

        let next = path.ordered_steps()?.into_iter().find(|step| {
            !completed.contains(step.step_id.as_str())
                && step.dependencies.iter().all(|d| completed.contains(d.as_str()))
        });
        Ok(next.cloned())
    }
}
