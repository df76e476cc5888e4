//! Milestones, achievements and badges.

pub mod catalog;
pub mod engine;

pub use catalog::{Badge, Criterion, Milestone, MilestoneCatalog, MilestoneScope};
pub use engine::{Achievement, BadgeStatus, MilestoneEngine, Subject};
