//! Blocker analysis: why a user is stuck on their onboarding path.

pub mod analyzer;
pub mod classify;
pub mod model;

pub use analyzer::{BlockerAnalyzer, analyze};
pub use classify::{ErrorClass, ErrorClassifier};
pub use model::{Blocker, BlockerCategory, Severity};
