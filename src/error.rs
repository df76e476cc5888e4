//! Error types for the onboarding engine.

use serde::Serialize;

/// Top-level error type returned by every engine operation.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    /// Bad input shape or an illegal state transition. Caller-fixable.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The session exists but has not reached the completed state.
    #[error("Session {session_id} is not complete (status: {status})")]
    SessionNotComplete { session_id: String, status: String },

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    /// The primary write succeeded but at least one side effect failed.
    #[error("Partial failure: {} side effect(s) failed", .warnings.len())]
    PartialFailure { warnings: Vec<SideEffectWarning> },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl OnboardingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// True for a missing entity and for a session that is not yet complete.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::SessionNotComplete { .. })
    }

    /// Short machine-readable kind, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::SessionNotComplete { .. } => "session_not_complete",
            Self::Storage(_) => "storage",
            Self::PartialFailure { .. } => "partial_failure",
            Self::Config(_) => "config",
            Self::Cache(_) => "cache",
        }
    }
}

/// Persistence adapter faults.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Analytics sink errors. Never propagated past the sink boundary.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("Analytics sink unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to serialize analytics payload: {0}")]
    Serialization(String),
}

/// Local cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Which best-effort side effect of a step completion failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    BlockerAnalysis,
    MilestoneCheck,
    ProgressRecompute,
    CacheMirror,
}

impl std::fmt::Display for SideEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BlockerAnalysis => "blocker_analysis",
            Self::MilestoneCheck => "milestone_check",
            Self::ProgressRecompute => "progress_recompute",
            Self::CacheMirror => "cache_mirror",
        };
        write!(f, "{s}")
    }
}

/// A side-effect failure reported next to a successful primary result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SideEffectWarning {
    pub effect: SideEffect,
    pub message: String,
}

impl SideEffectWarning {
    pub fn new(effect: SideEffect, err: &OnboardingError) -> Self {
        Self {
            effect,
            message: err.to_string(),
        }
    }
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, OnboardingError>;
