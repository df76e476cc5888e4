//! Blocker detection over progress history.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::paths::Path;
use crate::progress::{ProgressRecord, ProgressStore, StepStatus};

use super::classify::{ErrorClass, ErrorClassifier};
use super::model::{Blocker, BlockerCategory, Severity};

/// Detects blockers for a session from its stored progress records.
#[derive(Clone)]
pub struct BlockerAnalyzer {
    progress: ProgressStore,
    config: Arc<EngineConfig>,
    classifier: Arc<ErrorClassifier>,
}

impl BlockerAnalyzer {
    pub fn new(progress: ProgressStore, config: Arc<EngineConfig>) -> Self {
        Self::with_classifier(progress, config, ErrorClassifier::default_rules())
    }

    pub fn with_classifier(
        progress: ProgressStore,
        config: Arc<EngineConfig>,
        classifier: ErrorClassifier,
    ) -> Self {
        Self {
            progress,
            config,
            classifier: Arc::new(classifier),
        }
    }

    /// Current blockers for a session, most severe first. An empty list
    /// means nothing is in the way.
    pub async fn identify_blockers(&self, session_id: &str) -> Result<Vec<Blocker>> {
        let (_, path) = self.progress.session_with_path(session_id).await?;
        let records = self.progress.list_records(session_id).await?;
        let blockers = self.analyze_records(&records, &path);
        debug!(session_id, count = blockers.len(), "Blockers identified");
        Ok(blockers)
    }

    /// Blockers for already-loaded records, as of now.
    pub fn analyze_records(&self, records: &[ProgressRecord], path: &Path) -> Vec<Blocker> {
        analyze(records, path, &self.config, &self.classifier, Utc::now())
    }
}

/// Derive blockers from records. Completed steps carry no open blocker.
pub fn analyze(
    records: &[ProgressRecord],
    path: &Path,
    config: &EngineConfig,
    classifier: &ErrorClassifier,
    now: DateTime<Utc>,
) -> Vec<Blocker> {
    let mut blockers = Vec::new();

    for record in records {
        if record.status == StepStatus::Completed {
            continue;
        }
        let Some(step) = path.step(&record.step_id) else {
            continue;
        };

        if let Some(b) = validation_blocker(record, config, classifier) {
            blockers.push(b);
        }
        if let Some(b) = technical_blocker(record, classifier) {
            blockers.push(b);
        }
        // A zero estimate means the step has no expected duration.
        if record.status == StepStatus::InProgress && step.estimated_time > 0 {
            let limit = config.engagement_multiplier * step.estimated_time as f64;
            if record.time_spent as f64 > limit {
                blockers.push(step_blocker(
                    BlockerCategory::Engagement,
                    record,
                    json!({
                        "time_spent": record.time_spent,
                        "estimated_time": step.estimated_time,
                        "multiplier": config.engagement_multiplier,
                    }),
                    record.updated_at,
                ));
            }
        }
    }

    blockers.extend(pattern_blockers(&blockers, config));

    for blocker in &mut blockers {
        blocker.severity = match blocker.category {
            BlockerCategory::Pattern => blocker.severity,
            category => config.severity.base(category),
        };
        if now - blocker.detected_at <= config.recency_window {
            blocker.severity = blocker.severity.raise();
        }
    }

    blockers.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.detected_at.cmp(&a.detected_at))
            .then_with(|| a.category.cmp(&b.category))
            .then_with(|| a.related_step_id.cmp(&b.related_step_id))
    });
    blockers
}

/// A trailing run of validation-class failures at or above the threshold.
/// In-progress writes between failures do not break the run.
fn validation_blocker(
    record: &ProgressRecord,
    config: &EngineConfig,
    classifier: &ErrorClassifier,
) -> Option<Blocker> {
    let mut run = 0u32;
    let mut latest: Option<(&str, DateTime<Utc>)> = None;

    for entry in record.history.iter().rev() {
        match entry.status {
            StepStatus::InProgress | StepStatus::NotStarted => continue,
            StepStatus::Failed => {
                let error = entry.error.as_deref().unwrap_or_default();
                if classifier.classify(error) != ErrorClass::Validation {
                    break;
                }
                run += 1;
                latest.get_or_insert((error, entry.recorded_at));
            }
            StepStatus::Completed => break,
        }
    }

    let (last_error, at) = latest?;
    if run < config.validation_failure_threshold {
        return None;
    }
    Some(step_blocker(
        BlockerCategory::Validation,
        record,
        json!({ "consecutive_failures": run, "last_error": last_error }),
        at,
    ))
}

/// Any technical-class failure since the step last succeeded.
fn technical_blocker(record: &ProgressRecord, classifier: &ErrorClassifier) -> Option<Blocker> {
    let mut failures = 0u32;
    let mut latest: Option<(&str, DateTime<Utc>)> = None;

    for entry in record.history.iter().rev() {
        if entry.status == StepStatus::Completed {
            break;
        }
        let Some(error) = entry.error.as_deref() else {
            continue;
        };
        if entry.status == StepStatus::Failed
            && classifier.classify(error) == ErrorClass::Technical
        {
            failures += 1;
            latest.get_or_insert((error, entry.recorded_at));
        }
    }

    let (last_error, at) = latest?;
    Some(step_blocker(
        BlockerCategory::Technical,
        record,
        json!({ "failures": failures, "last_error": last_error }),
        at,
    ))
}

/// One pattern blocker per category seen on enough distinct steps.
fn pattern_blockers(step_blockers: &[Blocker], config: &EngineConfig) -> Vec<Blocker> {
    let mut by_category: BTreeMap<BlockerCategory, Vec<&Blocker>> = BTreeMap::new();
    for blocker in step_blockers {
        by_category.entry(blocker.category).or_default().push(blocker);
    }

    by_category
        .into_iter()
        .filter(|(_, members)| members.len() >= config.pattern_step_threshold)
        .filter_map(|(category, members)| {
            let detected_at = members.iter().map(|b| b.detected_at).max()?;
            let mut steps: Vec<&str> = members
                .iter()
                .filter_map(|b| b.related_step_id.as_deref())
                .collect();
            steps.sort_unstable();
            Some(Blocker {
                category: BlockerCategory::Pattern,
                severity: config.severity.pattern(category),
                related_step_id: None,
                evidence: json!({ "category": category, "steps": steps }),
                detected_at,
            })
        })
        .collect()
}

fn step_blocker(
    category: BlockerCategory,
    record: &ProgressRecord,
    evidence: serde_json::Value,
    detected_at: DateTime<Utc>,
) -> Blocker {
    Blocker {
        category,
        severity: Severity::Low,
        related_step_id: Some(record.step_id.clone()),
        evidence,
        detected_at,
    }
}
