//! cellar - build packages from source formulae
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! Installs packages by resolving their formula dependency graph, fetching
//! verified sources, running install steps into versioned kegs, and running
//! each package's self-test.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.cellar/
//! ├── cellar/       # Kegs: <name>/<version>
//! ├── receipts/     # One TOML receipt per installed package
//! ├── cache/        # Verified sources by checksum
//! ├── formulae/     # Default formula directory
//! ├── logs/         # Build and test logs
//! ├── tmp/          # Build scratch (failed builds are kept here)
//! ├── config.toml   # Optional configuration
//! └── state.db      # SQLite history
//! ```

pub mod cmd;
pub mod ops;
pub mod store;
pub mod ui;

pub use crate::store::DbHandle;
pub use crate::store::db;
pub use cellar_core::paths::*;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "cellar")]
#[command(author, version, about = "cellar - build packages from source formulae")]
pub struct Cli {
    /// Show what would happen without making changes
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Formula directory (defaults to the configured one)
    #[arg(long, global = true, env = "CELLAR_FORMULAE")]
    pub formulae: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build and install packages with their dependencies
    Install {
        /// Package name(s)
        #[arg(required = true)]
        packages: Vec<String>,
        #[command(flatten)]
        args: InstallArgs,
    },
    /// Remove installed packages
    Uninstall {
        /// Package name(s)
        #[arg(required = true)]
        packages: Vec<String>,
        /// Remove even if other installed packages depend on it
        #[arg(long, short = 'f')]
        force: bool,
    },
    /// Run the self-test of an installed package
    Test {
        /// Package name
        package: String,
    },
    /// Print the resolved build plan without building anything
    Plan {
        /// Package name
        package: String,
        /// Follow optional dependencies
        #[arg(long)]
        with_optional: bool,
        /// Follow test dependencies
        #[arg(long)]
        with_test_deps: bool,
    },
    /// List installed packages
    List,
    /// Show formula and install details
    Info {
        /// Package name
        package: String,
    },
    /// View install history
    History {
        /// Package name (all packages when omitted)
        package: Option<String>,
    },
    /// Remove partial downloads and preserved build directories
    Clean,
    /// Formula authoring commands
    Formula {
        #[command(subcommand)]
        command: FormulaCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Flags of `cellar install`.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct InstallArgs {
    /// Follow optional dependencies
    #[arg(long)]
    pub with_optional: bool,
    /// Follow test dependencies
    #[arg(long)]
    pub with_test_deps: bool,
    /// Rebuild the requested packages even if already installed
    #[arg(long)]
    pub reinstall: bool,
    /// Skip self-tests
    #[arg(long, conflicts_with = "strict_tests")]
    pub no_test: bool,
    /// Treat a failing self-test as a fatal error
    #[arg(long)]
    pub strict_tests: bool,
    /// Keep building unrelated packages after a failure
    #[arg(long)]
    pub keep_going: bool,
    /// Packages built concurrently
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Debug, Subcommand)]
pub enum FormulaCommands {
    /// Validate a formula file
    Check {
        /// Path to the formula
        path: PathBuf,
    },
}
