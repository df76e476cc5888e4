//! Path templates, personalization and next-step selection.

pub mod engine;
pub mod model;
pub mod source;

pub use engine::PathEngine;
pub use model::{Path, PathContext, PathStep, PersonalizedPath, StepType};
pub use source::{PathSource, StaticPathSource};
