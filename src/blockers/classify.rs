//! Error classification for failed step attempts.
//!
//! An error is treated as validation-class (the user entered something the
//! step rejects) or technical-class (infrastructure got in the way). An
//! explicit `validation:` or `technical:` prefix always wins; otherwise the
//! message is matched against the rule sets, validation first.

use regex::Regex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Technical,
    Unknown,
}

const VALIDATION_PATTERNS: &[&str] = &[
    r"(?i)\b(invalid|malformed|required|missing|mismatch|incorrect)\b",
    r"(?i)\bmust (be|not|contain|match)\b",
    r"(?i)\btoo (short|long|many|few)\b",
    r"(?i)\b(does not match|not allowed|out of range|bad format|wrong format)\b",
];

const TECHNICAL_PATTERNS: &[&str] = &[
    r"(?i)\b(time ?out|timed out|unreachable|unavailable|refused|reset by peer)\b",
    r"(?i)\b(network|connection|dns|tls|ssl|socket)\b.*\b(error|fail(ed|ure)?|lost|closed)\b",
    r"(?i)\b(internal server error|server error|bad gateway|service unavailable)\b",
    r"(?i)\b(http|status)\s*5\d\d\b",
    r"(?i)\b(rate limit(ed)?|too many requests|crash(ed)?|panic(ked)?|exception)\b",
];

/// Rule-based classifier for step error messages.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    validation: Vec<Regex>,
    technical: Vec<Regex>,
}

impl ErrorClassifier {
    /// Classifier with the built-in rule sets.
    pub fn default_rules() -> Self {
        Self {
            validation: compile(VALIDATION_PATTERNS),
            technical: compile(TECHNICAL_PATTERNS),
        }
    }

    /// Classifier with no rules; only explicit prefixes are recognised.
    pub fn empty() -> Self {
        Self {
            validation: Vec::new(),
            technical: Vec::new(),
        }
    }

    pub fn add_validation_rule(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.validation.push(Regex::new(pattern)?);
        Ok(())
    }

    pub fn add_technical_rule(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.technical.push(Regex::new(pattern)?);
        Ok(())
    }

    pub fn classify(&self, error: &str) -> ErrorClass {
        let trimmed = error.trim_start();
        if has_prefix(trimmed, "validation:") {
            return ErrorClass::Validation;
        }
        if has_prefix(trimmed, "technical:") {
            return ErrorClass::Technical;
        }

        if self.validation.iter().any(|r| r.is_match(trimmed)) {
            ErrorClass::Validation
        } else if self.technical.iter().any(|r| r.is_match(trimmed)) {
            ErrorClass::Technical
        } else {
            ErrorClass::Unknown
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::default_rules()
    }
}

fn has_prefix(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(pattern = %p, error = %e, "Skipping invalid classifier rule");
                None
            }
        })
        .collect()
}
