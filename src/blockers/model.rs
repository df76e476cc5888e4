use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a user is stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerCategory {
    Validation,
    Technical,
    Engagement,
    /// The same category recurring across several steps.
    Pattern,
}

impl std::fmt::Display for BlockerCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Technical => "technical",
            Self::Engagement => "engagement",
            Self::Pattern => "pattern",
        };
        write!(f, "{s}")
    }
}

/// Blocker severity, ordered low to critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One level up, capped at critical.
    pub fn raise(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// A detected obstacle, derived from progress history. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocker {
    pub category: BlockerCategory,
    pub severity: Severity,
    /// `None` for pattern blockers spanning several steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_step_id: Option<String>,
    pub evidence: serde_json::Value,
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_and_caps() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::Low.raise(), Severity::Medium);
        assert_eq!(Severity::Critical.raise(), Severity::Critical);
    }
}
