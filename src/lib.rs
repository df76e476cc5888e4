//! Onboarding engine: progress tracking, path personalization, blocker
//! analysis, milestones and reports over a pluggable store.

pub mod analytics;
pub mod backup;
pub mod blockers;
pub mod certificate;
pub mod config;
pub mod engine;
pub mod error;
pub mod milestones;
pub mod paths;
pub mod progress;
pub mod reports;
pub mod routes;
pub mod store;

pub use engine::{CompletionOutcome, OnboardingEngine, StepResult, TrackOutcome};
pub use error::{OnboardingError, Result};
