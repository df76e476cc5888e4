//! Configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::blockers::{BlockerCategory, Severity};
use crate::error::ConfigError;

/// Bucket width for report trend series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendBucket {
    Daily,
    Weekly,
}

impl std::str::FromStr for TrendBucket {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Self::Daily),
            "weekly" | "week" => Ok(Self::Weekly),
            other => Err(ConfigError::InvalidValue {
                key: "ONBOARDING_TREND_BUCKET".to_string(),
                message: format!("expected 'daily' or 'weekly', got '{other}'"),
            }),
        }
    }
}

/// Base severity assigned to each blocker category before recency is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityPolicy {
    pub technical: Severity,
    pub validation: Severity,
    pub engagement: Severity,
}

impl SeverityPolicy {
    pub fn base(&self, category: BlockerCategory) -> Severity {
        match category {
            BlockerCategory::Technical | BlockerCategory::Pattern => self.technical,
            BlockerCategory::Validation => self.validation,
            BlockerCategory::Engagement => self.engagement,
        }
    }

    /// Pattern blockers sit one level above the category they aggregate.
    pub fn pattern(&self, underlying: BlockerCategory) -> Severity {
        self.base(underlying).raise()
    }
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            technical: Severity::High,
            validation: Severity::Medium,
            engagement: Severity::Low,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// An in-progress step overruns when time spent exceeds this multiple of its estimate.
    pub engagement_multiplier: f64,
    /// Consecutive validation failures on one step that make a validation blocker.
    pub validation_failure_threshold: u32,
    /// Distinct steps sharing a category that make a pattern blocker.
    pub pattern_step_threshold: usize,
    /// Evidence newer than this raises blocker severity by one level.
    pub recency_window: chrono::Duration,
    /// Attempts on a successful step that still trigger blocker analysis.
    pub low_progress_attempts: u32,
    /// Attempt history entries kept on each progress record.
    pub max_history_entries: usize,
    pub trend_bucket: TrendBucket,
    /// Maximum recommendations in a progress report.
    pub recommendation_limit: usize,
    /// Directory of the local progress cache.
    pub cache_dir: PathBuf,
    pub severity: SeverityPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engagement_multiplier: 3.0,
            validation_failure_threshold: 3,
            pattern_step_threshold: 2,
            recency_window: chrono::Duration::hours(24),
            low_progress_attempts: 3,
            max_history_entries: 50,
            trend_bucket: TrendBucket::Daily,
            recommendation_limit: 3,
            cache_dir: PathBuf::from("./data/cache"),
            severity: SeverityPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Build config from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let engagement_multiplier = env_parse("ONBOARDING_ENGAGEMENT_MULTIPLIER")
            .filter(|m: &f64| *m > 0.0)
            .unwrap_or(defaults.engagement_multiplier);

        let validation_failure_threshold = env_parse("ONBOARDING_VALIDATION_THRESHOLD")
            .filter(|n: &u32| *n > 0)
            .unwrap_or(defaults.validation_failure_threshold);

        let pattern_step_threshold = env_parse("ONBOARDING_PATTERN_THRESHOLD")
            .filter(|n: &usize| *n > 1)
            .unwrap_or(defaults.pattern_step_threshold);

        let recency_window = env_parse("ONBOARDING_RECENCY_HOURS")
            .map(chrono::Duration::hours)
            .unwrap_or(defaults.recency_window);

        let low_progress_attempts =
            env_parse("ONBOARDING_LOW_PROGRESS_ATTEMPTS").unwrap_or(defaults.low_progress_attempts);

        let max_history_entries = env_parse("ONBOARDING_MAX_HISTORY")
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.max_history_entries);

        let trend_bucket = std::env::var("ONBOARDING_TREND_BUCKET")
            .ok()
            .and_then(|s| match s.parse() {
                Ok(bucket) => Some(bucket),
                Err(e) => {
                    tracing::warn!("{e}; using default trend bucket");
                    None
                }
            })
            .unwrap_or(defaults.trend_bucket);

        let recommendation_limit =
            env_parse("ONBOARDING_RECOMMENDATION_LIMIT").unwrap_or(defaults.recommendation_limit);

        let cache_dir = std::env::var("ONBOARDING_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        Self {
            engagement_multiplier,
            validation_failure_threshold,
            pattern_step_threshold,
            recency_window,
            low_progress_attempts,
            max_history_entries,
            trend_bucket,
            recommendation_limit,
            cache_dir,
            severity: defaults.severity,
        }
    }
}

/// Settings for the HTTP binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// JSON file of path templates; built-in templates when unset.
    pub paths_file: Option<PathBuf>,
    /// JSON milestone/badge catalog; built-in catalog when unset.
    pub catalog_file: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("ONBOARDING_PORT").unwrap_or(8080),
            db_path: std::env::var("ONBOARDING_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/onboarding.db")),
            paths_file: std::env::var("ONBOARDING_PATHS_FILE").ok().map(PathBuf::from),
            catalog_file: std::env::var("ONBOARDING_CATALOG_FILE").ok().map(PathBuf::from),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
