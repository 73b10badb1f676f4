//! Reporter trait for dependency injection
//!
//! This trait allows the install pipeline to report progress and status
//! without being coupled to a specific terminal implementation. Calls may
//! arrive concurrently from several workers.

use cellar_schema::{PackageName, Version};

pub trait Reporter: Send + Sync {
    /// Indicates a new section or phase has started (e.g. "Planning", "Installing").
    fn section(&self, title: &str);

    /// Updates the progress of a source fetch.
    fn fetching(&self, name: &PackageName, version: &Version, current: u64, total: Option<u64>);

    /// A package entered its build phase at install step `step` of `total`.
    fn building(&self, name: &PackageName, version: &Version, step: usize, total: usize);

    /// A package's self-test started.
    fn testing(&self, name: &PackageName, version: &Version);

    /// Updates the state of a package to 'removing'.
    fn removing(&self, name: &PackageName, version: &Version);

    /// A plan entry was satisfied without work.
    fn skipped(&self, name: &PackageName, version: &Version, reason: &str);

    /// Marks a package operation as successfully completed.
    fn done(&self, name: &PackageName, version: &Version, detail: &str);

    /// Marks a package operation as failed with a specific reason.
    fn failed(&self, name: &PackageName, version: &Version, reason: &str);

    /// A package was never started because the run was cancelled.
    fn cancelled(&self, name: &PackageName, version: &Version);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);

    /// Display a final summary of multiple operations.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn fetching(&self, name: &PackageName, version: &Version, current: u64, total: Option<u64>) {
        (**self).fetching(name, version, current, total);
    }
    fn building(&self, name: &PackageName, version: &Version, step: usize, total: usize) {
        (**self).building(name, version, step, total);
    }
    fn testing(&self, name: &PackageName, version: &Version) {
        (**self).testing(name, version);
    }
    fn removing(&self, name: &PackageName, version: &Version) {
        (**self).removing(name, version);
    }
    fn skipped(&self, name: &PackageName, version: &Version, reason: &str) {
        (**self).skipped(name, version, reason);
    }
    fn done(&self, name: &PackageName, version: &Version, detail: &str) {
        (**self).done(name, version, detail);
    }
    fn failed(&self, name: &PackageName, version: &Version, reason: &str) {
        (**self).failed(name, version, reason);
    }
    fn cancelled(&self, name: &PackageName, version: &Version) {
        (**self).cancelled(name, version);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn success(&self, msg: &str) {
        (**self).success(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn fetching(&self, _: &PackageName, _: &Version, _: u64, _: Option<u64>) {}
    fn building(&self, _: &PackageName, _: &Version, _: usize, _: usize) {}
    fn testing(&self, _: &PackageName, _: &Version) {}
    fn removing(&self, _: &PackageName, _: &Version) {}
    fn skipped(&self, _: &PackageName, _: &Version, _: &str) {}
    fn done(&self, _: &PackageName, _: &Version, _: &str) {}
    fn failed(&self, _: &PackageName, _: &Version, _: &str) {}
    fn cancelled(&self, _: &PackageName, _: &Version) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}
