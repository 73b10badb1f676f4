//! Command implementations.
//!
//! Each command returns the process exit code; errors bubble up as
//! `anyhow::Error` and exit with `1`.

pub mod clean;
pub mod completions;
pub mod formula;
pub mod history;
pub mod info;
pub mod install;
pub mod list;
pub mod plan;
pub mod uninstall;
