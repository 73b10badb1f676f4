//! Core library for cellar.
//!
//! cellar builds packages from declarative formulae. This crate holds every
//! runtime piece; the `cellar` binary only parses arguments and renders
//! progress.
//!
//! ```text
//! formula    TOML recipes -> Formula, FormulaSet, FormulaLookup
//! resolver   Formula graph + receipts -> BuildPlan
//! cache      checksum-addressed source archives (io::fetch downloads)
//! builder    scratch dir -> install steps -> keg
//! tester     self-test steps against a keg
//! receipt    per-package install state on disk
//! pipeline   Installer: runs a BuildPlan with bounded parallelism
//! lock       cellar lock and per-keg locks shared between processes
//! ```
//!
//! Progress is reported through the [`Reporter`] trait so library code
//! never prints.

pub mod builder;
pub mod cache;
pub mod config;
pub mod formula;
pub mod io;
pub mod lock;
pub mod paths;
pub mod pipeline;
pub mod process;
pub mod receipt;
pub mod resolver;
pub mod tester;

pub mod reporter;

pub use config::Config;
pub use formula::{FormulaLookup, FormulaSet};
pub use paths::*;
pub use pipeline::{InstallError, InstallOptions, InstallReport, Installer, Outcome};
pub use reporter::{NullReporter, Reporter};

/// User Agent string for source downloads
pub const USER_AGENT: &str = concat!("cellar/", env!("CARGO_PKG_VERSION"));
