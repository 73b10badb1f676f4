//! Post-install self-tests.
//!
//! Test steps run against the installed keg from a throwaway working
//! directory, with the same sanitised environment as builds plus the keg's
//! own `bin/` first on `PATH`. Whether a failure blocks anything is decided
//! by the caller's [`TestPolicy`], not here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cellar_schema::{Formula, PackageName, Version};

use crate::builder::{DependencyKeg, build_env};
use crate::process::{StepStatus, log_len, read_last_lines, run_shell};
use crate::receipt::TestStatus;

/// Lines of output kept per failing test step.
const OUTPUT_TAIL_LINES: usize = 40;

/// What a failing self-test means for the rest of the plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestPolicy {
    /// The package stays installed and is flagged; the plan continues.
    #[default]
    Flag,
    /// A failing test is fatal, like a build failure.
    Strict,
}

/// Result of one test step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    /// 1-based step index.
    pub index: usize,
    pub command: String,
    pub passed: bool,
    pub timed_out: bool,
    /// Tail of the step output (empty when it passed).
    pub output: String,
}

/// Results of every test step of one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub package: PackageName,
    pub version: Version,
    pub outcomes: Vec<TestOutcome>,
    pub log: PathBuf,
}

impl TestReport {
    /// Whether every step passed.
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    /// 1-based indices of failing steps.
    pub fn failed_steps(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.index)
            .collect()
    }

    /// Receipt form of this report.
    pub fn status(&self) -> TestStatus {
        if self.outcomes.is_empty() {
            TestStatus::Skipped
        } else if self.passed() {
            TestStatus::Passed
        } else {
            TestStatus::Failed {
                steps: self.failed_steps(),
            }
        }
    }
}

/// Runs formula test steps.
#[derive(Debug, Clone)]
pub struct TestRunner {
    scratch_root: PathBuf,
    timeout: Duration,
    jobs: usize,
}

impl TestRunner {
    /// Create a runner with a per-step `timeout`.
    pub fn new(scratch_root: impl Into<PathBuf>, timeout: Duration, jobs: usize) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            timeout,
            jobs: jobs.max(1),
        }
    }

    /// Run every test step of `formula` against `keg`. All steps run even
    /// after a failure so the report is complete.
    ///
    /// # Errors
    ///
    /// Returns an error only if the working directory or log cannot be set
    /// up; failing steps are reported in the [`TestReport`].
    pub fn run(
        &self,
        formula: &Formula,
        keg: &Path,
        dependencies: &[DependencyKeg],
        log: &Path,
    ) -> std::io::Result<TestReport> {
        std::fs::create_dir_all(&self.scratch_root)?;
        if let Some(parent) = log.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let work = tempfile::Builder::new()
            .prefix(&format!("test-{}-", formula.name))
            .tempdir_in(&self.scratch_root)?;
        let home = work.path().join("home");
        std::fs::create_dir_all(&home)?;

        let mut env = build_env(formula, &home, keg, work.path(), dependencies, self.jobs);
        let keg_bin = keg.join("bin");
        if keg_bin.is_dir() {
            if let Some((_, path)) = env.iter_mut().find(|(k, _)| k == "PATH") {
                *path = format!("{}:{path}", keg_bin.display());
            }
        }

        let mut outcomes = Vec::with_capacity(formula.test.len());
        for (i, step) in formula.test.iter().enumerate() {
            let offset = log_len(log);
            let status = run_shell(&step.command, work.path(), &env, log, self.timeout)?;
            let passed = status.success();
            let output = if passed {
                String::new()
            } else {
                read_last_lines(log, offset, OUTPUT_TAIL_LINES).unwrap_or_default()
            };
            if !passed {
                warn!(package = %formula.name, step = i + 1, %status, "test step failed");
            }
            outcomes.push(TestOutcome {
                index: i + 1,
                command: step.command.clone(),
                passed,
                timed_out: matches!(status, StepStatus::TimedOut(_)),
                output,
            });
        }

        let report = TestReport {
            package: formula.name.clone(),
            version: formula.version.clone(),
            outcomes,
            log: log.to_path_buf(),
        };
        info!(package = %formula.name, passed = report.passed(), "tests finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_schema::{Checksum, ChecksumAlgorithm, SourceRef, Step, TestStep};

    fn formula(tests: &[&str]) -> Formula {
        Formula {
            name: PackageName::new("hello"),
            version: Version::new("1.0"),
            description: String::new(),
            homepage: String::new(),
            license: String::new(),
            caveats: String::new(),
            sources: vec![SourceRef::Archive {
                name: None,
                url: "https://example.com/hello.tar.gz".into(),
                checksum: Checksum::of_bytes(ChecksumAlgorithm::Sha256, b""),
            }],
            dependencies: vec![],
            install: vec![Step::Shell {
                command: "true".into(),
            }],
            test: tests
                .iter()
                .map(|c| TestStep {
                    command: (*c).to_string(),
                })
                .collect(),
        }
    }

    fn keg(root: &Path) -> PathBuf {
        let keg = root.join("cellar/hello/1.0");
        std::fs::create_dir_all(keg.join("bin")).unwrap();
        let bin = keg.join("bin/hello");
        std::fs::write(&bin, "#!/bin/sh\necho \"Hello, world\"\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        keg
    }

    #[test]
    fn test_passing_steps_use_keg_bin() {
        let tmp = tempfile::tempdir().unwrap();
        let keg = keg(tmp.path());
        let runner = TestRunner::new(tmp.path().join("tmp"), Duration::from_secs(10), 1);
        let report = runner
            .run(
                &formula(&["hello | grep -q world", "test -x \"$PREFIX/bin/hello\""]),
                &keg,
                &[],
                &tmp.path().join("test.log"),
            )
            .unwrap();
        assert!(report.passed());
        assert_eq!(report.status(), TestStatus::Passed);
    }

    #[test]
    fn test_failure_is_reported_per_step() {
        let tmp = tempfile::tempdir().unwrap();
        let keg = keg(tmp.path());
        let runner = TestRunner::new(tmp.path().join("tmp"), Duration::from_secs(10), 1);
        let report = runner
            .run(
                &formula(&["echo bad output; exit 1", "true"]),
                &keg,
                &[],
                &tmp.path().join("test.log"),
            )
            .unwrap();
        assert!(!report.passed());
        assert_eq!(report.failed_steps(), vec![1]);
        assert_eq!(report.outcomes.len(), 2);
        assert!(report.outcomes[0].output.contains("bad output"));
        assert_eq!(report.status(), TestStatus::Failed { steps: vec![1] });
    }

    #[test]
    fn test_timeout_counts_as_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let keg = keg(tmp.path());
        let runner = TestRunner::new(tmp.path().join("tmp"), Duration::from_millis(200), 1);
        let report = runner
            .run(&formula(&["sleep 5"]), &keg, &[], &tmp.path().join("test.log"))
            .unwrap();
        assert!(report.outcomes[0].timed_out);
        assert!(!report.passed());
    }

    #[test]
    fn test_no_steps_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let keg = keg(tmp.path());
        let runner = TestRunner::new(tmp.path().join("tmp"), Duration::from_secs(1), 1);
        let report = runner
            .run(&formula(&[]), &keg, &[], &tmp.path().join("test.log"))
            .unwrap();
        assert_eq!(report.status(), TestStatus::Skipped);
    }
}
