//! Terminal output.
//!
//! Commands talk to an [`Output`] handle, which forwards events to a single
//! rendering thread so lines from concurrent build workers never interleave.
//!
//! ```text
//! ┌─────────────┐
//! │   Commands  │  install, uninstall, test, ...
//! └──────┬──────┘
//!        │ Reporter calls
//!        ▼
//! ┌─────────────┐
//! │   Output    │  cloneable handle
//! └──────┬──────┘
//!        │ UiEvent
//!        ▼
//! ┌─────────────┐
//! │    Actor    │  one thread, renders lines with the Theme
//! └─────────────┘
//! ```

pub mod actor;
pub mod output;
pub mod theme;

pub use output::Output;
