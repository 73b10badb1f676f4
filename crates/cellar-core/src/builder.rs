//! Isolated formula builds.
//!
//! Each build gets a fresh scratch directory under the cellar's tmp dir:
//!
//! ```text
//! <scratch>/src                 primary source, single top-level dir stripped
//! <scratch>/resources/<name>    secondary sources
//! <scratch>/prefix              staging install prefix ($PREFIX)
//! <scratch>/home                $HOME, so host dotfiles are never read
//! ```
//!
//! Install steps run in declaration order and the first failure ends the
//! build. A failed build keeps its scratch directory for inspection; a
//! successful one is reclaimed once the staged prefix has been moved into
//! the keg.
//!
//! ## Environment contract
//!
//! Shell steps receive exactly these variables (nothing more):
//!
//! | Variable | Value |
//! |---|---|
//! | `PATH` | dependency `bin/` dirs, then `/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin` |
//! | `HOME` | `<scratch>/home` |
//! | `TERM` / `LANG` | `dumb` / `C.UTF-8` |
//! | `PREFIX` | `<scratch>/prefix` |
//! | `CELLAR_NAME` / `CELLAR_VERSION` | formula name and version |
//! | `RESOURCES` | `<scratch>/resources` |
//! | `JOBS` | configured parallelism |
//! | `DEP_<NAME>` | keg path of each dependency |
//! | `CFLAGS` / `CPPFLAGS` | `-I` flags for each dependency's `include/` |
//! | `LDFLAGS` | `-L` flags for each dependency's `lib/` |
//! | `PKG_CONFIG_PATH` | colon-separated `lib/pkgconfig` paths |
//! | `SOURCE_DATE_EPOCH` | `0` |

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use cellar_schema::{Formula, PackageName, SourceRef, Step};

use crate::cache::CachedSource;
use crate::io::extract;
use crate::io::fetch::FetchError;
use crate::lock::KegLocks;
use crate::paths::filename_from_url;
use crate::process::{StepStatus, log_len, read_last_lines, run_shell};

/// Fixed epoch for reproducible timestamps.
const SOURCE_DATE_EPOCH: &str = "0";

/// Lines of step output kept in a failure report.
const FAILURE_TAIL_LINES: usize = 20;

#[derive(Error, Debug)]
pub enum BuildError {
    /// A source could not be staged into the scratch directory.
    #[error("{package}: failed to stage source {url}: {message}")]
    Source {
        package: PackageName,
        url: String,
        message: String,
    },

    /// A repository checkout failed.
    #[error("{package}: {source}")]
    Checkout {
        package: PackageName,
        #[source]
        source: FetchError,
    },

    /// An install step failed. The scratch directory is preserved.
    #[error("{package}: install step {step} ({description}) {status}")]
    StepFailed {
        package: PackageName,
        /// 1-based step index.
        step: usize,
        description: String,
        status: StepStatus,
        /// Tail of the step output.
        output: String,
        scratch: PathBuf,
        log: PathBuf,
    },

    /// A built-in step addressed a path outside its allowed root.
    #[error("{package}: install step {step} escapes the install prefix: {path}")]
    Confinement {
        package: PackageName,
        step: usize,
        path: String,
        scratch: PathBuf,
    },

    #[error("{package}: I/O error at {path}: {source}")]
    Io {
        package: PackageName,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// The preserved scratch directory, if the build got that far.
    pub fn scratch(&self) -> Option<&Path> {
        match self {
            Self::StepFailed { scratch, .. } | Self::Confinement { scratch, .. } => Some(scratch),
            _ => None,
        }
    }
}

/// A dependency keg visible to the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyKeg {
    /// Dependency name.
    pub name: PackageName,
    /// Installed keg directory.
    pub keg: PathBuf,
}

/// Everything one build needs.
pub struct BuildRequest<'a> {
    pub formula: &'a Formula,
    /// Cached archives, parallel to `formula.sources` (`None` for VCS sources).
    pub sources: &'a [Option<CachedSource>],
    pub dependencies: &'a [DependencyKeg],
    /// Final keg directory.
    pub keg: &'a Path,
    pub log: &'a Path,
    /// Called with (step, total) before each install step.
    pub on_step: &'a (dyn Fn(usize, usize) + Send + Sync),
}

/// A completed build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub keg: PathBuf,
    pub log: PathBuf,
}

/// Runs formula install steps in isolated scratch directories.
#[derive(Debug, Clone)]
pub struct BuildExecutor {
    scratch_root: PathBuf,
    step_timeout: Duration,
    jobs: usize,
    locks: KegLocks,
}

impl BuildExecutor {
    /// Create an executor placing scratch dirs under `scratch_root` and
    /// taking keg locks from `locks`.
    pub fn new(
        scratch_root: impl Into<PathBuf>,
        locks: KegLocks,
        step_timeout: Duration,
        jobs: usize,
    ) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            step_timeout,
            jobs: jobs.max(1),
            locks,
        }
    }

    /// Build one formula and move the result into `request.keg`.
    ///
    /// This blocks; async callers should use `spawn_blocking`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] on the first failing phase. Step failures
    /// preserve the scratch directory and name it in the error.
    pub fn build(&self, request: &BuildRequest<'_>) -> Result<BuildOutput, BuildError> {
        let formula = request.formula;
        let package = &formula.name;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| BuildError::Io {
                package: package.clone(),
                path,
                source,
            }
        };

        fs::create_dir_all(&self.scratch_root).map_err(io_err(&self.scratch_root))?;
        if let Some(parent) = request.log.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let scratch = tempfile::Builder::new()
            .prefix(&format!("{package}-{}-", formula.version))
            .tempdir_in(&self.scratch_root)
            .map_err(io_err(&self.scratch_root))?;
        let root = scratch.path().to_path_buf();
        let src = root.join("src");
        let resources = root.join("resources");
        let prefix = root.join("prefix");
        let home = root.join("home");
        for dir in [&src, &resources, &prefix, &home] {
            fs::create_dir_all(dir).map_err(io_err(dir))?;
        }

        info!(package = %package, version = %formula.version, scratch = %root.display(), "building");

        for (index, source) in formula.sources.iter().enumerate() {
            let dest = match source.name() {
                Some(name) => resources.join(name),
                None => src.clone(),
            };
            fs::create_dir_all(&dest).map_err(io_err(&dest))?;
            let cached = request.sources.get(index).and_then(Option::as_ref);
            stage_source(package, source, cached, &dest)?;
        }

        let env = build_env(
            formula,
            &home,
            &prefix,
            &resources,
            request.dependencies,
            self.jobs,
        );

        let total = formula.install.len();
        for (index, step) in formula.install.iter().enumerate() {
            let number = index + 1;
            (request.on_step)(number, total);
            append_log(request.log, &format!("==> [{number}/{total}] {}\n", step.describe()));

            let offset = log_len(request.log);
            let status = match self.run_step(formula, step, &src, &prefix, request.keg, &env, request.log) {
                Ok(status) => status,
                Err(StepError::Escapes(path)) => {
                    let kept = scratch.keep();
                    warn!(package = %package, step = number, scratch = %kept.display(), "step escaped prefix, scratch preserved");
                    return Err(BuildError::Confinement {
                        package: package.clone(),
                        step: number,
                        path,
                        scratch: kept,
                    });
                }
                Err(StepError::Io(e)) => StepStatus::Failed(e.to_string()),
            };

            if !status.success() {
                let output = read_last_lines(request.log, offset, FAILURE_TAIL_LINES).unwrap_or_default();
                let kept = scratch.keep();
                warn!(package = %package, step = number, %status, scratch = %kept.display(), "install step failed, scratch preserved");
                return Err(BuildError::StepFailed {
                    package: package.clone(),
                    step: number,
                    description: step.describe(),
                    status,
                    output,
                    scratch: kept,
                    log: request.log.to_path_buf(),
                });
            }
        }

        self.install_into_keg(package, &prefix, request.keg)?;
        drop(scratch);

        Ok(BuildOutput {
            keg: request.keg.to_path_buf(),
            log: request.log.to_path_buf(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_step(
        &self,
        formula: &Formula,
        step: &Step,
        src: &Path,
        prefix: &Path,
        keg: &Path,
        env: &[(String, String)],
        log: &Path,
    ) -> Result<StepStatus, StepError> {
        match step {
            Step::Shell { command } => {
                Ok(run_shell(command, src, env, log, self.step_timeout)?)
            }
            Step::Copy { from, to } => {
                let from_path = confine(src, from)?;
                let to_path = confine(prefix, to)?;
                refuse_symlinks(prefix, &to_path, to)?;
                if let Some(parent) = to_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                if from_path.is_dir() {
                    copy_tree(&from_path, &to_path)?;
                } else {
                    fs::copy(&from_path, &to_path)?;
                }
                Ok(StepStatus::Success)
            }
            Step::Symlink { target, link } => {
                let link_path = confine(prefix, link)?;
                if let Some(parent) = link_path.parent() {
                    refuse_symlinks(prefix, parent, link)?;
                    fs::create_dir_all(parent)?;
                }
                if link_path.symlink_metadata().is_ok() {
                    fs::remove_file(&link_path)?;
                }
                #[cfg(unix)]
                std::os::unix::fs::symlink(target, &link_path)?;
                Ok(StepStatus::Success)
            }
            Step::Template { path, contents } => {
                let dest = confine(prefix, path)?;
                refuse_symlinks(prefix, &dest, path)?;
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let expanded = contents
                    .replace("{{name}}", formula.name.as_str())
                    .replace("{{version}}", formula.version.as_str())
                    .replace("{{prefix}}", &keg.to_string_lossy());
                fs::write(&dest, expanded)?;
                Ok(StepStatus::Success)
            }
        }
    }

    /// Move the staged prefix into the keg under the per-name lock.
    fn install_into_keg(&self, package: &PackageName, staged: &Path, keg: &Path) -> Result<(), BuildError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| BuildError::Io {
                package: package.clone(),
                path,
                source,
            }
        };

        let _lock = self
            .locks
            .acquire(package)
            .map_err(io_err(&self.locks.path(package)))?;
        debug!(package = %package, keg = %keg.display(), "installing into keg");

        if keg.exists() {
            fs::remove_dir_all(keg).map_err(io_err(keg))?;
        }
        if let Some(parent) = keg.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        // Rename within the volume; copy across volumes.
        if fs::rename(staged, keg).is_err() {
            copy_tree(staged, keg).map_err(io::Error::from).map_err(io_err(keg))?;
        }

        let relinked = relink_into_keg(staged, keg).map_err(io_err(keg))?;
        if relinked > 0 {
            debug!(package = %package, relinked, "rewrote staging-prefix symlinks");
        }
        Ok(())
    }
}

enum StepError {
    Escapes(String),
    Io(io::Error),
}

impl From<io::Error> for StepError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<StepError> for io::Error {
    fn from(e: StepError) -> Self {
        match e {
            StepError::Io(e) => e,
            StepError::Escapes(path) => {
                io::Error::other(format!("refusing to write through symlink at {path}"))
            }
        }
    }
}

/// Resolve `relative` under `root`, rejecting absolute paths and `..`
/// segments that climb above `root`.
fn confine(root: &Path, relative: &str) -> Result<PathBuf, StepError> {
    let mut out = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => {
                out.pop();
                depth -= 1;
            }
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StepError::Escapes(relative.to_string()));
            }
        }
    }
    if depth == 0 {
        return Err(StepError::Escapes(relative.to_string()));
    }
    Ok(out)
}

/// Fail when an existing component of `path` below `root` is a symlink.
///
/// `confine` only checks the spelling of a path; a symlink made by an
/// earlier step could still send the write somewhere else.
fn refuse_symlinks(root: &Path, path: &Path, relative: &str) -> Result<(), StepError> {
    let Ok(rest) = path.strip_prefix(root) else {
        return Err(StepError::Escapes(relative.to_string()));
    };
    let mut current = root.to_path_buf();
    for part in rest.components() {
        current.push(part);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(StepError::Escapes(relative.to_string()));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn stage_source(
    package: &PackageName,
    source: &SourceRef,
    cached: Option<&CachedSource>,
    dest: &Path,
) -> Result<(), BuildError> {
    match source {
        SourceRef::Archive { url, .. } => {
            let Some(cached) = cached else {
                return Err(BuildError::Source {
                    package: package.clone(),
                    url: url.clone(),
                    message: "source was not fetched".to_string(),
                });
            };
            extract::extract(&cached.path, dest, filename_from_url(url)).map_err(|e| {
                BuildError::Source {
                    package: package.clone(),
                    url: url.clone(),
                    message: e.to_string(),
                }
            })?;
            Ok(())
        }
        SourceRef::Vcs { url, revision, .. } => {
            checkout(url, revision.as_deref(), dest).map_err(|source| BuildError::Checkout {
                package: package.clone(),
                source,
            })
        }
    }
}

/// Clone a repository into `dest` (which must be empty).
fn checkout(url: &str, revision: Option<&str>, dest: &Path) -> Result<(), FetchError> {
    let vcs_err = |message: String| FetchError::Vcs {
        url: url.to_string(),
        message,
    };
    let git = which::which("git").map_err(|e| vcs_err(format!("git not found: {e}")))?;

    let mut clone = Command::new(&git);
    clone.args(["clone", "--quiet"]);
    if revision.is_none() {
        clone.args(["--depth", "1"]);
    }
    let output = clone
        .arg(url)
        .arg(dest)
        .output()
        .map_err(|e| vcs_err(e.to_string()))?;
    if !output.status.success() {
        return Err(vcs_err(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }

    if let Some(rev) = revision {
        let output = Command::new(&git)
            .arg("-C")
            .arg(dest)
            .args(["checkout", "--quiet", rev])
            .output()
            .map_err(|e| vcs_err(e.to_string()))?;
        if !output.status.success() {
            return Err(vcs_err(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
    }
    debug!(url, ?revision, "checked out repository");
    Ok(())
}

/// Sanitised environment for install and test steps.
pub(crate) fn build_env(
    formula: &Formula,
    home: &Path,
    prefix: &Path,
    resources: &Path,
    dependencies: &[DependencyKeg],
    jobs: usize,
) -> Vec<(String, String)> {
    let mut path_dirs: Vec<String> = dependencies
        .iter()
        .map(|d| d.keg.join("bin"))
        .filter(|p| p.is_dir())
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    path_dirs.extend(
        ["/usr/local/bin", "/usr/bin", "/bin", "/usr/sbin", "/sbin"]
            .iter()
            .map(ToString::to_string),
    );

    let mut env = vec![
        ("PATH".to_string(), path_dirs.join(":")),
        ("HOME".to_string(), home.to_string_lossy().into_owned()),
        ("TERM".to_string(), "dumb".to_string()),
        ("LANG".to_string(), "C.UTF-8".to_string()),
        ("PREFIX".to_string(), prefix.to_string_lossy().into_owned()),
        ("CELLAR_NAME".to_string(), formula.name.to_string()),
        ("CELLAR_VERSION".to_string(), formula.version.to_string()),
        ("RESOURCES".to_string(), resources.to_string_lossy().into_owned()),
        ("JOBS".to_string(), jobs.to_string()),
        ("SOURCE_DATE_EPOCH".to_string(), SOURCE_DATE_EPOCH.to_string()),
    ];

    let mut cflags = Vec::new();
    let mut ldflags = Vec::new();
    let mut pkg_config = Vec::new();
    for dep in dependencies {
        env.push((
            format!("DEP_{}", dep.name.env_key()),
            dep.keg.to_string_lossy().into_owned(),
        ));
        let include = dep.keg.join("include");
        if include.is_dir() {
            cflags.push(format!("-I{}", include.display()));
        }
        let lib = dep.keg.join("lib");
        if lib.is_dir() {
            ldflags.push(format!("-L{}", lib.display()));
        }
        let pc = lib.join("pkgconfig");
        if pc.is_dir() {
            pkg_config.push(pc.to_string_lossy().into_owned());
        }
    }
    if !cflags.is_empty() {
        let flags = cflags.join(" ");
        env.push(("CFLAGS".to_string(), flags.clone()));
        env.push(("CPPFLAGS".to_string(), flags));
    }
    if !ldflags.is_empty() {
        env.push(("LDFLAGS".to_string(), ldflags.join(" ")));
    }
    if !pkg_config.is_empty() {
        env.push(("PKG_CONFIG_PATH".to_string(), pkg_config.join(":")));
    }
    env
}

fn append_log(log: &Path, line: &str) {
    use std::io::Write;
    let result = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .and_then(|mut f| f.write_all(line.as_bytes()));
    if let Err(e) = result {
        warn!(log = %log.display(), error = %e, "failed to write build log");
    }
}

/// Point symlinks that target the staging prefix at the same place inside
/// the keg, as links relative to the keg. Returns the number rewritten.
///
/// `make install` often records `$PREFIX` in absolute links, and `$PREFIX`
/// was the scratch directory that is about to disappear.
///
/// # Errors
///
/// Returns an error if the keg cannot be walked or a link cannot be replaced.
pub fn relink_into_keg(staged: &Path, keg: &Path) -> io::Result<usize> {
    let mut relinked = 0;
    for entry in walkdir::WalkDir::new(keg).min_depth(1) {
        let entry = entry?;
        if !entry.path_is_symlink() {
            continue;
        }
        let target = fs::read_link(entry.path())?;
        let Ok(inside) = target.strip_prefix(staged) else {
            continue;
        };

        // A link at depth d sits d - 1 directories below the keg root.
        let mut relative: PathBuf =
            std::iter::repeat_n(Component::ParentDir, entry.depth() - 1).collect();
        relative.push(inside);
        if relative.as_os_str().is_empty() {
            relative.push(Component::CurDir);
        }

        fs::remove_file(entry.path())?;
        #[cfg(unix)]
        std::os::unix::fs::symlink(&relative, entry.path())?;
        relinked += 1;
    }
    Ok(relinked)
}

/// Copy the contents of `src` into `dst`, recreating symlinks rather than
/// following them.
///
/// Existing files are overwritten, but an existing symlink in `dst` is never
/// written through.
fn copy_tree(src: &Path, dst: &Path) -> Result<(), StepError> {
    fs::create_dir_all(dst)?;
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let dest = dst.join(relative);
        if fs::symlink_metadata(&dest).is_ok_and(|m| m.file_type().is_symlink()) {
            return Err(StepError::Escapes(dest.display().to_string()));
        }

        let kind = entry.file_type();
        if kind.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if kind.is_symlink() {
            let target = fs::read_link(entry.path())?;
            if fs::symlink_metadata(&dest).is_ok() {
                fs::remove_file(&dest)?;
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(target, &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
