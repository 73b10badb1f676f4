//! Durable install receipts.
//!
//! One human-readable TOML file per installed package lives in the receipt
//! directory. Transitional states are tracked by a small marker file next
//! to it, so the per-package state machine
//!
//! ```text
//! absent -> building -> installed -> upgrading -> installed
//!                                 \-> removing  -> absent
//! ```
//!
//! survives process restarts. A receipt is only ever written once a build
//! has completed, and always via temp file plus rename.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use cellar_schema::{Checksum, DependencyKind, PackageName, Version};

use crate::resolver::installed_dependents;

/// Installed receipts keyed by package name.
pub type InstalledSet = BTreeMap<PackageName, Receipt>;

const RECEIPT_EXT: &str = "toml";
const MARKER_EXT: &str = "state";

/// Where the installed bits came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptSource {
    /// Source URL or VCS locator (`url#revision`).
    pub url: String,
    /// Verified checksum, absent for VCS checkouts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
}

/// A dependency as it was installed when this package was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDependency {
    /// Dependency name.
    pub name: PackageName,
    /// Strongest edge kind (runtime wins over build).
    pub kind: DependencyKind,
    /// Installed version at build time.
    pub version: Version,
}

/// Result of the most recent self-test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TestStatus {
    /// Every test step exited zero.
    Passed,
    /// Test steps (1-based) that failed or timed out.
    Failed {
        /// Failing step indices.
        steps: Vec<usize>,
    },
    /// Tests were not run.
    Skipped,
}

impl TestStatus {
    /// Whether this status flags the package.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => f.write_str("passed"),
            Self::Skipped => f.write_str("skipped"),
            Self::Failed { steps } if steps.is_empty() => f.write_str("failed"),
            Self::Failed { steps } => {
                let steps: Vec<String> = steps.iter().map(ToString::to_string).collect();
                write!(f, "failed (steps {})", steps.join(", "))
            }
        }
    }
}

/// Persisted record of one installed package.
///
/// Field order matters for TOML output: plain values first, tables last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Package name.
    pub name: PackageName,
    /// Installed version.
    pub version: Version,
    /// Install completion time.
    pub installed_at: DateTime<Utc>,
    /// Keg directory holding the installed files.
    pub keg: PathBuf,
    /// Post-install message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub caveats: String,
    /// Source provenance.
    pub source: ReceiptSource,
    /// Self-test result.
    pub test: TestStatus,
    /// Dependency closure with installed versions.
    #[serde(default)]
    pub dependencies: Vec<ReceiptDependency>,
}

/// Lifecycle state of one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    /// Nothing recorded.
    Absent,
    /// First build in progress.
    Building,
    /// Receipt present, no transition pending.
    Installed,
    /// A replacement build is in progress; the old receipt stays valid.
    Upgrading,
    /// Uninstall in progress.
    Removing,
}

impl PackageState {
    fn marker(self) -> Option<&'static str> {
        match self {
            Self::Building => Some("building"),
            Self::Upgrading => Some("upgrading"),
            Self::Removing => Some("removing"),
            Self::Absent | Self::Installed => None,
        }
    }
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Building => "building",
            Self::Installed => "installed",
            Self::Upgrading => "upgrading",
            Self::Removing => "removing",
        };
        f.write_str(s)
    }
}

/// Receipt store failures.
#[derive(Error, Debug)]
pub enum ReceiptError {
    /// Filesystem failure.
    #[error("receipt I/O error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A receipt or marker could not be decoded.
    #[error("corrupt receipt {path}: {message}")]
    Corrupt {
        /// File involved.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// A receipt could not be encoded.
    #[error("failed to encode receipt for '{package}': {message}")]
    Encode {
        /// Package name.
        package: PackageName,
        /// Encoder message.
        message: String,
    },

    /// The requested transition is not allowed from the current state.
    #[error("cannot move '{package}' from {from} to {to}")]
    InvalidTransition {
        /// Package name.
        package: PackageName,
        /// Current state.
        from: PackageState,
        /// Requested state.
        to: PackageState,
    },

    /// Installed packages still need this one at runtime.
    #[error("'{package}' is required by: {}", .dependents.iter().map(PackageName::as_str).collect::<Vec<_>>().join(", "))]
    InUse {
        /// Package to remove.
        package: PackageName,
        /// Installed runtime dependents.
        dependents: Vec<PackageName>,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ReceiptError + '_ {
    move |source| ReceiptError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// File-backed receipt store.
#[derive(Debug, Clone)]
pub struct ReceiptStore {
    dir: PathBuf,
}

impl ReceiptStore {
    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::Io`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ReceiptError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        Ok(Self { dir })
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn receipt_path(&self, name: &PackageName) -> PathBuf {
        self.dir.join(format!("{name}.{RECEIPT_EXT}"))
    }

    fn marker_path(&self, name: &PackageName) -> PathBuf {
        self.dir.join(format!("{name}.{MARKER_EXT}"))
    }

    /// Current lifecycle state of `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker file is unreadable or unknown.
    pub fn state(&self, name: &PackageName) -> Result<PackageState, ReceiptError> {
        let marker = self.marker_path(name);
        let has_receipt = self.receipt_path(name).is_file();

        let text = match fs::read_to_string(&marker) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(if has_receipt {
                    PackageState::Installed
                } else {
                    PackageState::Absent
                });
            }
            Err(e) => return Err(io_err(&marker)(e)),
        };

        match text.trim() {
            "building" => Ok(PackageState::Building),
            "upgrading" => Ok(PackageState::Upgrading),
            "removing" => Ok(PackageState::Removing),
            other => Err(ReceiptError::Corrupt {
                path: marker,
                message: format!("unknown state '{other}'"),
            }),
        }
    }

    /// Read the receipt for `name`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the receipt exists but cannot be read or decoded.
    pub fn get(&self, name: &PackageName) -> Result<Option<Receipt>, ReceiptError> {
        let path = self.receipt_path(name);
        match fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text)
                .map(Some)
                .map_err(|e| ReceiptError::Corrupt {
                    path,
                    message: e.message().to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Every receipt, sorted by name.
    ///
    /// # Errors
    ///
    /// Fails on the first unreadable receipt.
    pub fn list(&self) -> Result<Vec<Receipt>, ReceiptError> {
        let entries = fs::read_dir(&self.dir).map_err(io_err(&self.dir))?;
        let mut receipts = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_err(&self.dir))?.path();
            if path.extension().is_none_or(|ext| ext != RECEIPT_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(receipt) = self.get(&PackageName::new(stem))? {
                receipts.push(receipt);
            }
        }
        receipts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(receipts)
    }

    /// Receipts keyed by name, as consumed by the resolver.
    ///
    /// # Errors
    ///
    /// See [`ReceiptStore::list`].
    pub fn installed(&self) -> Result<InstalledSet, ReceiptError> {
        Ok(self
            .list()?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect())
    }

    /// `absent -> building` or `installed -> upgrading`.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::InvalidTransition`] from any other state.
    pub fn begin_build(&self, name: &PackageName) -> Result<PackageState, ReceiptError> {
        let next = match self.state(name)? {
            PackageState::Absent => PackageState::Building,
            PackageState::Installed => PackageState::Upgrading,
            from => {
                return Err(ReceiptError::InvalidTransition {
                    package: name.clone(),
                    from,
                    to: PackageState::Building,
                });
            }
        };
        self.write_marker(name, next)?;
        debug!(package = %name, state = %next, "receipt transition");
        Ok(next)
    }

    /// `building | upgrading -> installed`, writing the new receipt.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::InvalidTransition`] if no build is in progress.
    pub fn complete_build(&self, receipt: &Receipt) -> Result<(), ReceiptError> {
        let name = &receipt.name;
        let from = self.state(name)?;
        if !matches!(from, PackageState::Building | PackageState::Upgrading) {
            return Err(ReceiptError::InvalidTransition {
                package: name.clone(),
                from,
                to: PackageState::Installed,
            });
        }

        let text = toml::to_string_pretty(receipt).map_err(|e| ReceiptError::Encode {
            package: name.clone(),
            message: e.to_string(),
        })?;
        self.write_atomic(&self.receipt_path(name), text.as_bytes())?;
        self.clear_marker(name)?;
        info!(package = %name, version = %receipt.version, "receipt written");
        Ok(())
    }

    /// `building -> absent` or `upgrading -> installed` (old receipt kept).
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::InvalidTransition`] if no build is in progress.
    pub fn abort_build(&self, name: &PackageName) -> Result<PackageState, ReceiptError> {
        let next = match self.state(name)? {
            PackageState::Building => PackageState::Absent,
            PackageState::Upgrading => PackageState::Installed,
            from => {
                return Err(ReceiptError::InvalidTransition {
                    package: name.clone(),
                    from,
                    to: PackageState::Absent,
                });
            }
        };
        self.clear_marker(name)?;
        debug!(package = %name, state = %next, "build aborted");
        Ok(next)
    }

    /// `installed -> removing`.
    ///
    /// Unless `force` is set, refuses while another installed package
    /// declares `name` as a runtime dependency.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::InUse`] or [`ReceiptError::InvalidTransition`].
    pub fn begin_removal(&self, name: &PackageName, force: bool) -> Result<Receipt, ReceiptError> {
        let from = self.state(name)?;
        let receipt = match (from, self.get(name)?) {
            (PackageState::Installed, Some(receipt)) => receipt,
            _ => {
                return Err(ReceiptError::InvalidTransition {
                    package: name.clone(),
                    from,
                    to: PackageState::Removing,
                });
            }
        };

        let dependents = installed_dependents(name, &self.installed()?);
        if !dependents.is_empty() {
            if !force {
                return Err(ReceiptError::InUse {
                    package: name.clone(),
                    dependents,
                });
            }
            warn!(package = %name, ?dependents, "forcing removal of a runtime dependency");
        }

        self.write_marker(name, PackageState::Removing)?;
        Ok(receipt)
    }

    /// `removing -> absent`, deleting the receipt.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::InvalidTransition`] if no removal is in progress.
    pub fn complete_removal(&self, name: &PackageName) -> Result<(), ReceiptError> {
        let from = self.state(name)?;
        if from != PackageState::Removing {
            return Err(ReceiptError::InvalidTransition {
                package: name.clone(),
                from,
                to: PackageState::Absent,
            });
        }
        let path = self.receipt_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&path)(e)),
        }
        self.clear_marker(name)?;
        info!(package = %name, "receipt removed");
        Ok(())
    }

    /// `removing -> installed` when the keg could not be deleted.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::InvalidTransition`] if no removal is in progress.
    pub fn cancel_removal(&self, name: &PackageName) -> Result<(), ReceiptError> {
        let from = self.state(name)?;
        if from != PackageState::Removing {
            return Err(ReceiptError::InvalidTransition {
                package: name.clone(),
                from,
                to: PackageState::Installed,
            });
        }
        self.clear_marker(name)
    }

    /// Replace the recorded test result of an installed package.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::InvalidTransition`] if the package is not installed.
    pub fn record_test(&self, name: &PackageName, status: TestStatus) -> Result<(), ReceiptError> {
        let from = self.state(name)?;
        let Some(mut receipt) = self.get(name)?.filter(|_| from == PackageState::Installed) else {
            return Err(ReceiptError::InvalidTransition {
                package: name.clone(),
                from,
                to: PackageState::Installed,
            });
        };
        receipt.test = status;
        let text = toml::to_string_pretty(&receipt).map_err(|e| ReceiptError::Encode {
            package: name.clone(),
            message: e.to_string(),
        })?;
        self.write_atomic(&self.receipt_path(name), text.as_bytes())
    }

    /// Clear markers left by an interrupted run, returning the affected
    /// packages. Builds revert to their pre-build state; removals revert to
    /// installed so they can be retried.
    ///
    /// # Errors
    ///
    /// Fails on unreadable store entries.
    pub fn recover_interrupted(&self) -> Result<Vec<(PackageName, PackageState)>, ReceiptError> {
        let entries = fs::read_dir(&self.dir).map_err(io_err(&self.dir))?;
        let mut recovered = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_err(&self.dir))?.path();
            if path.extension().is_none_or(|ext| ext != MARKER_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let name = PackageName::new(stem);
            let state = self.state(&name)?;
            self.clear_marker(&name)?;
            warn!(package = %name, %state, "cleared interrupted transition");
            recovered.push((name, state));
        }
        recovered.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(recovered)
    }

    fn write_marker(&self, name: &PackageName, state: PackageState) -> Result<(), ReceiptError> {
        let Some(marker) = state.marker() else {
            return self.clear_marker(name);
        };
        self.write_atomic(&self.marker_path(name), marker.as_bytes())
    }

    fn clear_marker(&self, name: &PackageName) -> Result<(), ReceiptError> {
        let path = self.marker_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), ReceiptError> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err(&self.dir))?;
        tmp.write_all(bytes).map_err(io_err(path))?;
        tmp.as_file().sync_all().map_err(io_err(path))?;
        tmp.persist(path).map_err(|e| io_err(path)(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn receipt(name: &str, version: &str, runtime_deps: &[&str]) -> Receipt {
        Receipt {
            name: PackageName::new(name),
            version: Version::new(version),
            installed_at: Utc::now(),
            keg: PathBuf::from(format!("/cellar/{name}/{version}")),
            caveats: String::new(),
            source: ReceiptSource {
                url: format!("https://example.com/{name}.tar.gz"),
                checksum: Some(Checksum::of_bytes(
                    cellar_schema::ChecksumAlgorithm::Sha256,
                    name.as_bytes(),
                )),
            },
            test: TestStatus::Passed,
            dependencies: runtime_deps
                .iter()
                .map(|d| ReceiptDependency {
                    name: PackageName::new(d),
                    kind: DependencyKind::Runtime,
                    version: Version::new("1.0"),
                })
                .collect(),
        }
    }

    fn store() -> (TempDir, ReceiptStore) {
        let tmp = TempDir::new().unwrap();
        let store = ReceiptStore::open(tmp.path().join("receipts")).unwrap();
        (tmp, store)
    }

    fn install(store: &ReceiptStore, r: &Receipt) {
        store.begin_build(&r.name).unwrap();
        store.complete_build(r).unwrap();
    }

    #[test]
    fn test_build_lifecycle() {
        let (_tmp, store) = store();
        let name = PackageName::new("jq");
        assert_eq!(store.state(&name).unwrap(), PackageState::Absent);

        assert_eq!(store.begin_build(&name).unwrap(), PackageState::Building);
        assert_eq!(store.state(&name).unwrap(), PackageState::Building);
        assert!(store.get(&name).unwrap().is_none());

        let r = receipt("jq", "1.7.1", &[]);
        store.complete_build(&r).unwrap();
        assert_eq!(store.state(&name).unwrap(), PackageState::Installed);
        assert_eq!(store.get(&name).unwrap(), Some(r));
    }

    #[test]
    fn test_failed_build_leaves_no_receipt() {
        let (_tmp, store) = store();
        let name = PackageName::new("broken");
        store.begin_build(&name).unwrap();
        assert_eq!(store.abort_build(&name).unwrap(), PackageState::Absent);
        assert_eq!(store.state(&name).unwrap(), PackageState::Absent);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_failed_upgrade_keeps_old_receipt() {
        let (_tmp, store) = store();
        let old = receipt("jq", "1.6", &[]);
        install(&store, &old);

        assert_eq!(store.begin_build(&old.name).unwrap(), PackageState::Upgrading);
        assert_eq!(store.abort_build(&old.name).unwrap(), PackageState::Installed);
        assert_eq!(store.get(&old.name).unwrap(), Some(old));
    }

    #[test]
    fn test_cannot_build_twice_concurrently() {
        let (_tmp, store) = store();
        let name = PackageName::new("jq");
        store.begin_build(&name).unwrap();
        assert!(matches!(
            store.begin_build(&name),
            Err(ReceiptError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_removal_blocked_by_runtime_dependent() {
        let (_tmp, store) = store();
        install(&store, &receipt("bar", "1.0", &[]));
        install(&store, &receipt("foo", "1.0", &["bar"]));

        let bar = PackageName::new("bar");
        match store.begin_removal(&bar, false) {
            Err(ReceiptError::InUse { dependents, .. }) => {
                assert_eq!(dependents, vec![PackageName::new("foo")]);
            }
            other => panic!("expected InUse, got {other:?}"),
        }
        assert_eq!(store.state(&bar).unwrap(), PackageState::Installed);

        store.begin_removal(&bar, true).unwrap();
        assert_eq!(store.state(&bar).unwrap(), PackageState::Removing);
        store.complete_removal(&bar).unwrap();
        assert_eq!(store.state(&bar).unwrap(), PackageState::Absent);
    }

    #[test]
    fn test_receipt_file_is_human_readable() {
        let (_tmp, store) = store();
        let r = receipt("foo", "2.0", &["bar"]);
        install(&store, &r);
        let text = fs::read_to_string(store.dir().join("foo.toml")).unwrap();
        assert!(text.contains("name = \"foo\""));
        assert!(text.contains("version = \"2.0\""));
        assert!(text.contains("[[dependencies]]"));
        assert!(text.contains("status = \"passed\""));
    }

    #[test]
    fn test_record_test_updates_status() {
        let (_tmp, store) = store();
        let r = receipt("foo", "2.0", &[]);
        install(&store, &r);
        store
            .record_test(&r.name, TestStatus::Failed { steps: vec![1] })
            .unwrap();
        assert!(store.get(&r.name).unwrap().unwrap().test.is_failed());
    }

    #[test]
    fn test_recover_interrupted_clears_markers() {
        let (_tmp, store) = store();
        install(&store, &receipt("old", "1.0", &[]));
        store.begin_build(&PackageName::new("new")).unwrap();
        store.begin_build(&PackageName::new("old")).unwrap();

        let recovered = store.recover_interrupted().unwrap();
        assert_eq!(
            recovered,
            vec![
                (PackageName::new("new"), PackageState::Building),
                (PackageName::new("old"), PackageState::Upgrading),
            ]
        );
        assert_eq!(store.state(&PackageName::new("new")).unwrap(), PackageState::Absent);
        assert_eq!(
            store.state(&PackageName::new("old")).unwrap(),
            PackageState::Installed
        );
    }
}
