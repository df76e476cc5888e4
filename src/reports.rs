//! Progress reports for a session, a path or a user.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::blockers::{Blocker, BlockerAnalyzer, BlockerCategory, Severity};
use crate::config::{EngineConfig, TrendBucket};
use crate::error::{OnboardingError, Result};
use crate::paths::Path;
use crate::progress::store::summarize;
use crate::progress::{ProgressSnapshot, ProgressStore, SessionStatus, StepStatus};
use crate::store::Filter;

/// What a report covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ReportScope {
    Session(String),
    Path(String),
    User(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTimeStat {
    pub step_id: String,
    pub avg_time_spent: f64,
    pub avg_attempts: f64,
    /// Percentage of in-scope sessions that completed the step.
    pub completion_rate: f64,
    pub estimated_time: u64,
    /// Average time spent over the estimate; 0 when there is no estimate.
    pub overrun_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub bucket_start: NaiveDate,
    pub completion_percentage: f64,
    /// Sessions contributing to this bucket.
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Flat,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub category: BlockerCategory,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub scope: ReportScope,
    pub generated_at: DateTime<Utc>,
    pub session_count: usize,
    pub completed_sessions: usize,
    /// Mean completion percentage across in-scope sessions.
    pub completion_percentage: f64,
    pub step_stats: Vec<StepTimeStat>,
    pub trend: Vec<TrendPoint>,
    pub trend_direction: TrendDirection,
    pub recommendations: Vec<Recommendation>,
}

/// Change in percentage points between the first and last trend point
/// that counts as movement.
const TREND_THRESHOLD: f64 = 1.0;

#[derive(Clone)]
pub struct ReportGenerator {
    progress: ProgressStore,
    blockers: BlockerAnalyzer,
    config: Arc<EngineConfig>,
}

#[derive(Default)]
struct StepAccumulator {
    sessions: usize,
    records: usize,
    completed: usize,
    time_spent: u64,
    attempts: u64,
    estimated_time: u64,
}

impl ReportGenerator {
    pub fn new(progress: ProgressStore, blockers: BlockerAnalyzer, config: Arc<EngineConfig>) -> Self {
        Self {
            progress,
            blockers,
            config,
        }
    }

    /// Build a report. A scope with no history yields an empty trend and
    /// zeroed figures, not an error.
    pub async fn generate_progress_report(&self, scope: ReportScope) -> Result<ProgressReport> {
        let (sessions, snapshot_filter) = match &scope {
            ReportScope::Session(id) => (
                vec![self.progress.get_session(id).await?],
                Filter::all().field_eq("session_id", id.as_str()),
            ),
            ReportScope::Path(id) => {
                if self.progress.paths().get(id).is_none() {
                    return Err(OnboardingError::not_found("Path", id));
                }
                (
                    self.progress.sessions_for_path(id).await?,
                    Filter::all().field_eq("path_id", id.as_str()),
                )
            }
            ReportScope::User(id) => (
                self.progress.sessions_for_user(id).await?,
                Filter::all().field_eq("user_id", id.as_str()),
            ),
        };

        let mut percentages = Vec::with_capacity(sessions.len());
        let mut steps: Vec<String> = Vec::new();
        let mut stats: HashMap<String, StepAccumulator> = HashMap::new();
        let mut open_blockers: Vec<(Blocker, Path)> = Vec::new();

        for session in &sessions {
            let Some(path) = self.progress.paths().get(&session.path_id).cloned() else {
                warn!(
                    session_id = %session.session_id,
                    path_id = %session.path_id,
                    "Session references unknown path; skipped in report"
                );
                continue;
            };
            let records = self.progress.list_records(&session.session_id).await?;
            percentages.push(summarize(&session.session_id, &path, &records).completion_percentage);

            for step in path.ordered_steps()? {
                let acc = stats.entry(step.step_id.clone()).or_insert_with(|| {
                    steps.push(step.step_id.clone());
                    StepAccumulator {
                        estimated_time: step.estimated_time,
                        ..Default::default()
                    }
                });
                acc.sessions += 1;
                if let Some(record) = records.iter().find(|r| r.step_id == step.step_id) {
                    acc.records += 1;
                    acc.time_spent = acc.time_spent.saturating_add(record.time_spent);
                    acc.attempts += u64::from(record.attempts);
                    if record.status == StepStatus::Completed {
                        acc.completed += 1;
                    }
                }
            }

            if session.status == SessionStatus::Active {
                for blocker in self.blockers.analyze_records(&records, &path) {
                    open_blockers.push((blocker, path.clone()));
                }
            }
        }

        let step_stats = steps
            .iter()
            .filter_map(|id| stats.get(id).map(|acc| step_stat(id, acc)))
            .collect();

        let snapshots = self.progress.snapshots(&snapshot_filter).await?;
        let trend = trend_series(&snapshots, self.config.trend_bucket);
        let trend_direction = direction(&trend);
        let recommendations = recommend(open_blockers, self.config.recommendation_limit);

        let report = ProgressReport {
            session_count: sessions.len(),
            completed_sessions: sessions
                .iter()
                .filter(|s| s.status == SessionStatus::Completed)
                .count(),
            completion_percentage: mean(&percentages),
            step_stats,
            trend,
            trend_direction,
            recommendations,
            scope,
            generated_at: Utc::now(),
        };
        debug!(
            sessions = report.session_count,
            trend_points = report.trend.len(),
            "Progress report generated"
        );
        Ok(report)
    }
}

fn step_stat(step_id: &str, acc: &StepAccumulator) -> StepTimeStat {
    let (avg_time_spent, avg_attempts) = if acc.records == 0 {
        (0.0, 0.0)
    } else {
        (
            acc.time_spent as f64 / acc.records as f64,
            acc.attempts as f64 / acc.records as f64,
        )
    };
    let completion_rate = if acc.sessions == 0 {
        0.0
    } else {
        acc.completed as f64 / acc.sessions as f64 * 100.0
    };
    let overrun_ratio = if acc.estimated_time == 0 {
        0.0
    } else {
        avg_time_spent / acc.estimated_time as f64
    };
    StepTimeStat {
        step_id: step_id.to_string(),
        avg_time_spent,
        avg_attempts,
        completion_rate,
        estimated_time: acc.estimated_time,
        overrun_ratio,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn bucket_start(at: DateTime<Utc>, bucket: TrendBucket) -> NaiveDate {
    let day = at.date_naive();
    match bucket {
        TrendBucket::Daily => day,
        TrendBucket::Weekly => day - Duration::days(i64::from(day.weekday().num_days_from_monday())),
    }
}

/// Average of the latest snapshot per session in each bucket, oldest first.
pub fn trend_series(snapshots: &[ProgressSnapshot], bucket: TrendBucket) -> Vec<TrendPoint> {
    let mut latest: BTreeMap<NaiveDate, HashMap<&str, &ProgressSnapshot>> = BTreeMap::new();
    for snapshot in snapshots {
        let per_session = latest
            .entry(bucket_start(snapshot.recorded_at, bucket))
            .or_default();
        per_session
            .entry(snapshot.session_id.as_str())
            .and_modify(|current| {
                if snapshot.recorded_at >= current.recorded_at {
                    *current = snapshot;
                }
            })
            .or_insert(snapshot);
    }

    latest
        .into_iter()
        .map(|(bucket_start, per_session)| {
            let values: Vec<f64> = per_session
                .values()
                .map(|s| s.completion_percentage)
                .collect();
            TrendPoint {
                bucket_start,
                completion_percentage: mean(&values),
                samples: values.len(),
            }
        })
        .collect()
}

pub fn direction(trend: &[TrendPoint]) -> TrendDirection {
    match (trend.first(), trend.last()) {
        (Some(first), Some(last)) if trend.len() >= 2 => {
            let delta = last.completion_percentage - first.completion_percentage;
            if delta > TREND_THRESHOLD {
                TrendDirection::Improving
            } else if delta < -TREND_THRESHOLD {
                TrendDirection::Declining
            } else {
                TrendDirection::Flat
            }
        }
        _ => TrendDirection::InsufficientData,
    }
}

/// Guidance for the most severe open blockers, one per category and step.
fn recommend(mut blockers: Vec<(Blocker, Path)>, limit: usize) -> Vec<Recommendation> {
    blockers.sort_by(|(a, _), (b, _)| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.detected_at.cmp(&a.detected_at))
    });

    let mut seen = Vec::new();
    let mut out = Vec::new();
    for (blocker, path) in blockers {
        if out.len() >= limit {
            break;
        }
        let key = (blocker.category, blocker.related_step_id.clone());
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(Recommendation {
            message: guidance(&blocker, &path),
            step_id: blocker.related_step_id,
            category: blocker.category,
            severity: blocker.severity,
        });
    }
    out
}

fn guidance(blocker: &Blocker, path: &Path) -> String {
    let title = blocker
        .related_step_id
        .as_deref()
        .map(|id| path.step(id).map_or(id, |s| s.title.as_str()))
        .unwrap_or("this path");
    match blocker.category {
        BlockerCategory::Validation => format!(
            "Users keep entering input that '{title}' rejects; clarify its requirements and error messages."
        ),
        BlockerCategory::Technical => format!(
            "'{title}' is failing for technical reasons; check the service or integration it depends on."
        ),
        BlockerCategory::Engagement => format!(
            "Users spend far longer than expected on '{title}'; consider splitting it or adding guidance."
        ),
        BlockerCategory::Pattern => {
            let category = blocker.evidence["category"].as_str().unwrap_or("similar");
            format!("{category} problems recur across several steps of '{}'; look for a shared cause.", path.name)
        }
    }
}
