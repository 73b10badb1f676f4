//! Shared types for the cellar formula runtime.

pub mod formula;
pub mod hash;
pub mod types;
pub mod version;

// Re-exports
pub use formula::{Dependency, DependencyKind, Formula, SourceRef, Step, TestStep};
pub use hash::*;
pub use types::*;
