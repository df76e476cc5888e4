//! Progress tracking for sessions and their steps.

pub mod model;
pub mod store;

pub use model::{
    OverallProgress, ProgressEntry, ProgressRecord, ProgressSnapshot, Session, SessionStatus,
    StepStatus, StepUpdate,
};
pub use store::ProgressStore;
