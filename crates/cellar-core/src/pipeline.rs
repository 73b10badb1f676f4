//! Plan execution.
//!
//! [`Installer::install`] resolves a target and then drives the resulting
//! [`BuildPlan`] to completion:
//!
//! ```text
//! resolve -> for each ready node: fetch -> build -> test -> receipt
//! ```
//!
//! A node becomes ready once every plan dependency that needed building has
//! been installed. Ready nodes run concurrently, bounded by a semaphore
//! sized to the configured worker count. A failed node either cancels every
//! node that has not started yet (the default) or, with `keep_going`, only
//! the nodes that depend on it. Nodes already running always finish, and
//! completed installs are never rolled back.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cellar_schema::{DependencyKind, Formula, PackageName, SourceRef, Version};

use crate::builder::{BuildError, BuildExecutor, BuildRequest, DependencyKeg};
use crate::cache::{CachedSource, FetchCache};
use crate::config::{Config, ConfigError};
use crate::formula::{FormulaLookup, LoadError};
use crate::io::fetch::FetchError;
use crate::lock::{FileLock, KegLocks};
use crate::paths::Layout;
use crate::receipt::{
    Receipt, ReceiptDependency, ReceiptError, ReceiptSource, ReceiptStore, TestStatus,
};
use crate::reporter::Reporter;
use crate::resolver::{self, BuildPlan, PlanAction, PlanEdge, ResolveError, ResolveOptions};
use crate::tester::{TestPolicy, TestReport, TestRunner};

/// Everything completed (tests passed or were not run).
pub const EXIT_SUCCESS: i32 = 0;
/// A fatal error stopped at least one package.
pub const EXIT_FAILURE: i32 = 1;
/// Everything installed, but at least one self-test failed.
pub const EXIT_TEST_FAILED: i32 = 3;

#[derive(Error, Debug)]
pub enum InstallError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("{package}: {source}")]
    Fetch {
        package: PackageName,
        #[source]
        source: FetchError,
    },

    /// Cache failures not tied to one package.
    #[error(transparent)]
    Cache(FetchError),

    #[error(transparent)]
    Build(#[from] BuildError),

    /// A self-test failed under [`TestPolicy::Strict`]. The package stays
    /// installed.
    #[error("{package}: self-test {status}")]
    TestFailed {
        package: PackageName,
        status: TestStatus,
        log: PathBuf,
    },

    #[error(transparent)]
    Receipt(#[from] ReceiptError),

    #[error("'{0}' is not installed")]
    NotInstalled(PackageName),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker task failed: {0}")]
    Task(String),
}

/// How a plan is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOptions {
    pub resolve: ResolveOptions,
    /// Run self-tests after each build.
    pub run_tests: bool,
    pub tests: TestPolicy,
    /// Cancel only dependents of a failed node instead of everything pending.
    pub keep_going: bool,
    /// Concurrently running nodes.
    pub workers: usize,
}

impl InstallOptions {
    /// Options taken from the user configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            resolve: ResolveOptions::default(),
            run_tests: true,
            tests: config.tests,
            keep_going: config.keep_going,
            workers: config.workers,
        }
    }
}

/// What happened to one plan entry.
#[derive(Debug)]
pub enum Outcome {
    /// Built and recorded.
    Installed {
        keg: PathBuf,
        /// Previously installed version, for upgrades.
        upgraded_from: Option<Version>,
        test: TestStatus,
    },
    /// Already satisfied; nothing was done.
    Skipped { installed: Version },
    Failed(InstallError),
    /// Never started because of another node's failure.
    Cancelled,
}

impl Outcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed { .. })
    }

    /// Whether the package is installed with a failing self-test.
    pub fn test_failed(&self) -> bool {
        matches!(self, Self::Installed { test, .. } if test.is_failed())
    }
}

/// One line of an [`InstallReport`].
#[derive(Debug)]
pub struct PackageReport {
    pub name: PackageName,
    pub version: Version,
    pub outcome: Outcome,
}

/// Result of executing a plan, in plan order.
#[derive(Debug)]
pub struct InstallReport {
    pub plan: BuildPlan,
    pub packages: Vec<PackageReport>,
    pub elapsed: Duration,
}

impl InstallReport {
    pub fn outcome(&self, name: &PackageName) -> Option<&Outcome> {
        self.packages
            .iter()
            .find(|p| &p.name == name)
            .map(|p| &p.outcome)
    }

    /// Errors of failed nodes.
    pub fn failures(&self) -> impl Iterator<Item = (&PackageName, &InstallError)> {
        self.packages.iter().filter_map(|p| match &p.outcome {
            Outcome::Failed(e) => Some((&p.name, e)),
            _ => None,
        })
    }

    pub fn installed_count(&self) -> usize {
        self.packages
            .iter()
            .filter(|p| p.outcome.is_installed())
            .count()
    }

    /// `0` success, `1` fatal error, `3` installed but a self-test failed.
    pub fn exit_code(&self) -> i32 {
        if self
            .packages
            .iter()
            .any(|p| matches!(p.outcome, Outcome::Failed(_) | Outcome::Cancelled))
        {
            EXIT_FAILURE
        } else if self.packages.iter().any(|p| p.outcome.test_failed()) {
            EXIT_TEST_FAILED
        } else {
            EXIT_SUCCESS
        }
    }
}

/// Everything one node needs, owned so it can move into a task.
#[derive(Debug, Clone)]
struct NodeJob {
    formula: Arc<Formula>,
    action: PlanAction,
    dependencies: Vec<DependencyKeg>,
    receipt_dependencies: Vec<ReceiptDependency>,
}

struct Inner {
    layout: Layout,
    cache: FetchCache,
    builder: BuildExecutor,
    tester: TestRunner,
    receipts: ReceiptStore,
    reporter: Arc<dyn Reporter>,
}

/// Installs, tests, and removes packages in one cellar.
#[derive(Clone)]
pub struct Installer {
    inner: Arc<Inner>,
}

impl fmt::Debug for Installer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Installer")
            .field("root", &self.inner.layout.root())
            .finish_non_exhaustive()
    }
}

impl Installer {
    /// Open the cellar at `layout`, creating its directories.
    ///
    /// Opening never touches package state. Commands that change the cellar
    /// take [`Installer::lock`] first.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout cannot be created or the receipt
    /// store is unreadable.
    pub fn new(
        layout: Layout,
        config: &Config,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, InstallError> {
        layout.ensure().map_err(|source| InstallError::Io {
            path: layout.root().to_path_buf(),
            source,
        })?;
        let cache = FetchCache::open(layout.cache(), config.retry_policy())
            .map_err(InstallError::Cache)?;
        let jobs = num_cpus::get();
        let builder = BuildExecutor::new(
            layout.scratch(),
            KegLocks::new(layout.locks()),
            config.step_timeout(),
            jobs,
        );
        let tester = TestRunner::new(layout.scratch(), config.test_timeout(), jobs);
        let receipts = ReceiptStore::open(layout.receipts())?;

        Ok(Self {
            inner: Arc::new(Inner {
                layout,
                cache,
                builder,
                tester,
                receipts,
                reporter,
            }),
        })
    }

    /// Take the cellar lock, waiting for any other process that holds it,
    /// then clear transitions left behind by an interrupted run.
    ///
    /// Only the lock holder may change receipts, kegs or scratch
    /// directories, so any transition still marked once the lock is held
    /// belongs to a process that died.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be locked or the receipt
    /// store cannot be repaired.
    pub async fn lock(&self) -> Result<FileLock, InstallError> {
        let path = self.inner.layout.lock_file();
        let io_err = |source: std::io::Error| InstallError::Io {
            path: path.clone(),
            source,
        };

        let lock = match FileLock::try_acquire(&path).map_err(io_err)? {
            Some(lock) => lock,
            None => {
                self.inner
                    .reporter
                    .info("Waiting for another cellar process to finish");
                let blocking = path.clone();
                tokio::task::spawn_blocking(move || FileLock::acquire(blocking))
                    .await
                    .map_err(|e| InstallError::Task(e.to_string()))?
                    .map_err(io_err)?
            }
        };

        for (name, state) in self.inner.receipts.recover_interrupted()? {
            self.inner
                .reporter
                .warning(&format!("{name}: cleared interrupted {state} state"));
        }
        Ok(lock)
    }

    pub fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    pub fn receipts(&self) -> &ReceiptStore {
        &self.inner.receipts
    }

    pub fn cache(&self) -> &FetchCache {
        &self.inner.cache
    }

    /// Resolve `target` against the current receipts.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Resolve`] or a receipt read failure.
    pub fn plan(
        &self,
        target: &PackageName,
        lookup: &dyn FormulaLookup,
        options: ResolveOptions,
    ) -> Result<BuildPlan, InstallError> {
        let installed = self.inner.receipts.installed()?;
        Ok(resolver::resolve(target, lookup, &installed, options)?)
    }

    /// Resolve and install `target`.
    ///
    /// Resolution failures are returned before any work starts. Per-node
    /// failures are reported in the [`InstallReport`].
    ///
    /// # Errors
    ///
    /// Returns an error only for resolution failures or a crashed worker.
    pub async fn install(
        &self,
        target: &PackageName,
        lookup: &dyn FormulaLookup,
        options: InstallOptions,
    ) -> Result<InstallReport, InstallError> {
        let plan = self.plan(target, lookup, options.resolve)?;
        let mut formulas = HashMap::with_capacity(plan.packages.len());
        for pkg in &plan.packages {
            let formula = lookup
                .lookup(&pkg.name)
                .ok_or_else(|| ResolveError::UnknownTarget(pkg.name.clone()))?;
            formulas.insert(pkg.name.clone(), Arc::new(formula.clone()));
        }
        self.execute(plan, &formulas, options).await
    }

    /// Run a resolved plan.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Task`] if a worker task panicked.
    pub async fn execute(
        &self,
        plan: BuildPlan,
        formulas: &HashMap<PackageName, Arc<Formula>>,
        options: InstallOptions,
    ) -> Result<InstallReport, InstallError> {
        let started = Instant::now();
        let reporter = &self.inner.reporter;
        reporter.section("Installing");

        // Version each plan entry will have once this run succeeds.
        let versions: HashMap<&PackageName, &Version> = plan
            .packages
            .iter()
            .map(|p| match &p.action {
                PlanAction::Skip { installed } => (&p.name, installed),
                _ => (&p.name, &p.version),
            })
            .collect();

        let mut outcomes: HashMap<PackageName, Outcome> = HashMap::new();
        let mut jobs: HashMap<PackageName, NodeJob> = HashMap::new();
        let mut waiting: HashMap<PackageName, usize> = HashMap::new();
        let mut dependents: HashMap<PackageName, Vec<PackageName>> = HashMap::new();
        let mut ready: VecDeque<PackageName> = VecDeque::new();

        for pkg in &plan.packages {
            if let PlanAction::Skip { installed } = &pkg.action {
                reporter.skipped(&pkg.name, installed, "already installed");
                outcomes.insert(
                    pkg.name.clone(),
                    Outcome::Skipped {
                        installed: installed.clone(),
                    },
                );
                continue;
            }
            let Some(formula) = formulas.get(&pkg.name) else {
                return Err(ResolveError::UnknownTarget(pkg.name.clone()).into());
            };

            let mut pending = 0;
            for edge in &pkg.dependencies {
                if plan.get(&edge.name).is_some_and(|d| d.action.needs_build()) {
                    dependents
                        .entry(edge.name.clone())
                        .or_default()
                        .push(pkg.name.clone());
                    pending += 1;
                }
            }
            if pending == 0 {
                ready.push_back(pkg.name.clone());
            } else {
                waiting.insert(pkg.name.clone(), pending);
            }

            let dependency_versions = |edge: &PlanEdge| {
                versions
                    .get(&edge.name)
                    .map(|v| (edge.name.clone(), (*v).clone()))
            };
            jobs.insert(
                pkg.name.clone(),
                NodeJob {
                    formula: Arc::clone(formula),
                    action: pkg.action.clone(),
                    dependencies: pkg
                        .dependencies
                        .iter()
                        .filter_map(dependency_versions)
                        .map(|(name, version)| DependencyKeg {
                            keg: self.inner.layout.keg(&name, &version),
                            name,
                        })
                        .collect(),
                    receipt_dependencies: pkg
                        .dependencies
                        .iter()
                        .filter_map(|edge| {
                            let (name, version) = dependency_versions(edge)?;
                            Some(ReceiptDependency {
                                name,
                                kind: strongest_kind(edge),
                                version,
                            })
                        })
                        .collect(),
                },
            );
        }

        let semaphore = Arc::new(Semaphore::new(options.workers.max(1)));
        let token = CancellationToken::new();
        let mut tasks: JoinSet<(PackageName, Option<Outcome>)> = JoinSet::new();
        let mut task_error = None;

        loop {
            while !token.is_cancelled() {
                let Some(name) = ready.pop_front() else { break };
                let Some(job) = jobs.remove(&name) else { continue };
                let inner = Arc::clone(&self.inner);
                let semaphore = Arc::clone(&semaphore);
                let token = token.clone();
                debug!(package = %name, "node ready");

                tasks.spawn(async move {
                    let permit = tokio::select! {
                        biased;
                        () = token.cancelled() => None,
                        permit = semaphore.acquire_owned() => permit.ok(),
                    };
                    let Some(_permit) = permit else {
                        return (name, None);
                    };
                    let outcome = inner.run_node(&job, options).await;
                    // Cancel before the permit is released so no waiting
                    // node can slip in.
                    if matches!(outcome, Outcome::Failed(_)) && !options.keep_going {
                        token.cancel();
                    }
                    (name, Some(outcome))
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (name, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "worker task failed");
                    token.cancel();
                    task_error = Some(e.to_string());
                    continue;
                }
            };
            let Some(outcome) = outcome else {
                continue;
            };

            if outcome.is_installed() {
                for dependent in dependents.get(&name).into_iter().flatten() {
                    if let Some(count) = waiting.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            waiting.remove(dependent);
                            ready.push_back(dependent.clone());
                        }
                    }
                }
            }
            outcomes.insert(name, outcome);
        }

        if let Some(message) = task_error {
            return Err(InstallError::Task(message));
        }

        let mut packages = Vec::with_capacity(plan.packages.len());
        for pkg in &plan.packages {
            let outcome = outcomes.remove(&pkg.name).unwrap_or(Outcome::Cancelled);
            if matches!(outcome, Outcome::Cancelled) {
                reporter.cancelled(&pkg.name, &pkg.version);
            }
            packages.push(PackageReport {
                name: pkg.name.clone(),
                version: pkg.version.clone(),
                outcome,
            });
        }

        let report = InstallReport {
            plan,
            packages,
            elapsed: started.elapsed(),
        };
        let installed = report.installed_count();
        if installed > 0 {
            reporter.summary(installed, "installed", report.elapsed.as_secs_f64());
        }
        info!(
            target = %report.plan.target,
            installed,
            exit_code = report.exit_code(),
            "plan finished"
        );
        Ok(report)
    }

    /// Re-run the self-test of an installed package and record the result.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::NotInstalled`] when there is no receipt, or
    /// a setup failure of the test run.
    pub async fn test_installed(
        &self,
        name: &PackageName,
        lookup: &dyn FormulaLookup,
    ) -> Result<TestReport, InstallError> {
        let inner = Arc::clone(&self.inner);
        let receipt = inner
            .receipts
            .get(name)?
            .ok_or_else(|| InstallError::NotInstalled(name.clone()))?;
        let formula = lookup
            .lookup(name)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownTarget(name.clone()))?;

        let dependencies: Vec<DependencyKeg> = receipt
            .dependencies
            .iter()
            .map(|d| DependencyKeg {
                name: d.name.clone(),
                keg: inner.layout.keg(&d.name, &d.version),
            })
            .collect();
        let log = inner.layout.test_log(name, &receipt.version);
        inner.reporter.testing(name, &receipt.version);

        let keg = receipt.keg.clone();
        let runner = Arc::clone(&inner);
        let report = tokio::task::spawn_blocking(move || {
            runner.tester.run(&formula, &keg, &dependencies, &log)
        })
        .await
        .map_err(|e| InstallError::Task(e.to_string()))?
        .map_err(|source| InstallError::Io {
            path: receipt.keg.clone(),
            source,
        })?;

        let status = report.status();
        inner.receipts.record_test(name, status.clone())?;
        if status.is_failed() {
            inner
                .reporter
                .failed(name, &receipt.version, &format!("self-test {status}"));
        } else {
            inner.reporter.done(name, &receipt.version, "tests passed");
        }
        Ok(report)
    }

    /// Remove an installed package's keg and receipt.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::InUse`] (wrapped) while installed packages
    /// still need `name` at runtime, unless `force` is set.
    pub fn uninstall(&self, name: &PackageName, force: bool) -> Result<Receipt, InstallError> {
        let inner = &self.inner;
        let receipt = inner.receipts.begin_removal(name, force)?;
        inner.reporter.removing(name, &receipt.version);

        if let Err(source) = remove_keg(&receipt.keg) {
            if let Err(e) = inner.receipts.cancel_removal(name) {
                warn!(package = %name, error = %e, "failed to restore receipt state");
            }
            return Err(InstallError::Io {
                path: receipt.keg.clone(),
                source,
            });
        }

        inner.receipts.complete_removal(name)?;
        inner.reporter.done(name, &receipt.version, "removed");
        info!(package = %name, version = %receipt.version, "uninstalled");
        Ok(receipt)
    }
}

impl Inner {
    async fn run_node(self: Arc<Self>, job: &NodeJob, options: InstallOptions) -> Outcome {
        let formula = &job.formula;
        match self.install_node(job, options).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.reporter
                    .failed(&formula.name, &formula.version, &e.to_string());
                Outcome::Failed(e)
            }
        }
    }

    async fn install_node(
        self: &Arc<Self>,
        job: &NodeJob,
        options: InstallOptions,
    ) -> Result<Outcome, InstallError> {
        let formula = &job.formula;
        let name = &formula.name;
        let version = &formula.version;
        let upgraded_from = match &job.action {
            PlanAction::Upgrade { from } => Some(from.clone()),
            _ => None,
        };

        let sources = self.fetch_sources(formula).await?;

        self.receipts.begin_build(name)?;
        let keg = self.layout.keg(name, version);
        let log = self.layout.build_log(name, version);

        let built = {
            let inner = Arc::clone(self);
            let job = job.clone();
            let keg = keg.clone();
            let log = log.clone();
            tokio::task::spawn_blocking(move || {
                let reporter = Arc::clone(&inner.reporter);
                let (n, v) = (job.formula.name.clone(), job.formula.version.clone());
                let on_step = move |step: usize, total: usize| reporter.building(&n, &v, step, total);
                inner.builder.build(&BuildRequest {
                    formula: &job.formula,
                    sources: &sources,
                    dependencies: &job.dependencies,
                    keg: &keg,
                    log: &log,
                    on_step: &on_step,
                })
            })
            .await
        };
        let output = match built {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                self.abort_build(name);
                return Err(e.into());
            }
            Err(e) => {
                self.abort_build(name);
                return Err(InstallError::Task(e.to_string()));
            }
        };

        let (test, test_log) = if options.run_tests && !formula.test.is_empty() {
            let log = self.layout.test_log(name, version);
            (self.run_tests(job, &output.keg, &log).await, Some(log))
        } else {
            (TestStatus::Skipped, None)
        };

        let receipt = Receipt {
            name: name.clone(),
            version: version.clone(),
            installed_at: Utc::now(),
            keg: output.keg.clone(),
            caveats: formula.caveats.clone(),
            source: receipt_source(formula),
            test: test.clone(),
            dependencies: job.receipt_dependencies.clone(),
        };
        if let Err(e) = self.receipts.complete_build(&receipt) {
            self.abort_build(name);
            if upgraded_from.as_ref() != Some(version) {
                if let Err(err) = remove_keg(&output.keg) {
                    warn!(package = %name, error = %err, "failed to remove unrecorded keg");
                }
            }
            return Err(e.into());
        }

        if let Some(from) = upgraded_from.as_ref().filter(|from| *from != version) {
            let old = self.layout.keg(name, from);
            if let Err(e) = remove_keg(&old) {
                warn!(package = %name, keg = %old.display(), error = %e, "failed to remove previous keg");
            }
        }

        if test.is_failed() {
            if options.tests == TestPolicy::Strict {
                return Err(InstallError::TestFailed {
                    package: name.clone(),
                    status: test,
                    log: test_log.unwrap_or_else(|| self.layout.logs()),
                });
            }
            self.reporter
                .done(name, version, &format!("installed, self-test {test}"));
        } else {
            let detail = match &upgraded_from {
                Some(from) => format!("upgraded from {from}"),
                None => "installed".to_string(),
            };
            self.reporter.done(name, version, &detail);
        }
        if !formula.caveats.is_empty() {
            self.reporter.info(&format!("{name}: {}", formula.caveats));
        }

        Ok(Outcome::Installed {
            keg: output.keg,
            upgraded_from,
            test,
        })
    }

    async fn fetch_sources(
        &self,
        formula: &Formula,
    ) -> Result<Vec<Option<CachedSource>>, InstallError> {
        let reporter = &self.reporter;
        let (name, version) = (&formula.name, &formula.version);
        let progress = |current: u64, total: Option<u64>| {
            reporter.fetching(name, version, current, total);
        };

        let mut fetched = Vec::with_capacity(formula.sources.len());
        for source in &formula.sources {
            match source {
                SourceRef::Archive { url, checksum, .. } => {
                    let entry = self
                        .cache
                        .fetch(url, checksum, &progress)
                        .await
                        .map_err(|source| InstallError::Fetch {
                            package: name.clone(),
                            source,
                        })?;
                    fetched.push(Some(entry));
                }
                SourceRef::Vcs { .. } => fetched.push(None),
            }
        }
        Ok(fetched)
    }

    async fn run_tests(self: &Arc<Self>, job: &NodeJob, keg: &Path, log: &Path) -> TestStatus {
        let formula = Arc::clone(&job.formula);
        self.reporter.testing(&formula.name, &formula.version);
        let log = log.to_path_buf();

        let inner = Arc::clone(self);
        let dependencies = job.dependencies.clone();
        let keg = keg.to_path_buf();
        let runner_formula = Arc::clone(&formula);
        let result = tokio::task::spawn_blocking(move || {
            inner.tester.run(&runner_formula, &keg, &dependencies, &log)
        })
        .await;

        match result {
            Ok(Ok(report)) => {
                for outcome in report.outcomes.iter().filter(|o| !o.passed) {
                    self.reporter.warning(&format!(
                        "{}: test step {} failed: {}\n{}",
                        formula.name, outcome.index, outcome.command, outcome.output
                    ));
                }
                report.status()
            }
            Ok(Err(e)) => {
                warn!(package = %formula.name, error = %e, "could not run self-test");
                TestStatus::Failed { steps: Vec::new() }
            }
            Err(e) => {
                warn!(package = %formula.name, error = %e, "self-test task failed");
                TestStatus::Failed { steps: Vec::new() }
            }
        }
    }

    fn abort_build(&self, name: &PackageName) {
        if let Err(e) = self.receipts.abort_build(name) {
            warn!(package = %name, error = %e, "failed to reset receipt state");
        }
    }
}

/// Runtime wins over build, build over the soft kinds.
fn strongest_kind(edge: &PlanEdge) -> DependencyKind {
    [DependencyKind::Runtime, DependencyKind::Build]
        .into_iter()
        .find(|k| edge.kinds.contains(k))
        .or_else(|| edge.kinds.iter().next().copied())
        .unwrap_or(DependencyKind::Runtime)
}

fn receipt_source(formula: &Formula) -> ReceiptSource {
    match formula.primary_source() {
        Some(source) => ReceiptSource {
            url: source.locator(),
            checksum: source.checksum().cloned(),
        },
        None => ReceiptSource {
            url: String::new(),
            checksum: None,
        },
    }
}

/// Delete a keg and its version directory's parent when that is now empty.
fn remove_keg(keg: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(keg) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if let Some(parent) = keg.parent() {
        // Fails while other versions remain.
        let _ = std::fs::remove_dir(parent);
    }
    Ok(())
}
