//! Cross-process advisory locks.
//!
//! Two locks exist:
//!
//! - **Cellar lock**: `<home>/cellar.lock`, held by every command that
//!   changes receipts, kegs or scratch directories for its whole run.
//! - **Keg locks**: `<home>/locks/<name>.lock`, held only while a finished
//!   build is moved into its keg.
//!
//! Both are `flock(LOCK_EX)` locks on an open file, so they are released
//! when the holder exits, even if it crashes.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use cellar_schema::PackageName;

/// An exclusive lock on a file, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock, blocking while another holder has it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created or locked.
    pub fn acquire(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_lock_file(&path)?;
        file.lock_exclusive()?;
        debug!(path = %path.display(), "acquired lock");
        Ok(Self { file, path })
    }

    /// Acquire the lock if nobody holds it.
    ///
    /// Returns `Ok(None)` when another holder has it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created or locked.
    pub fn try_acquire(path: impl AsRef<Path>) -> io::Result<Option<Self>> {
        let path = path.as_ref().to_path_buf();
        let file = open_lock_file(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "acquired lock");
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "released lock");
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
}

/// Per-package-name locks serializing the "install into keg" phase across
/// threads and processes.
#[derive(Debug, Clone)]
pub struct KegLocks {
    dir: PathBuf,
}

impl KegLocks {
    /// Keep lock files in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Lock file of `name`.
    pub fn path(&self, name: &PackageName) -> PathBuf {
        self.dir.join(format!("{name}.lock"))
    }

    /// Block until the keg lock of `name` is held.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created or locked.
    pub fn acquire(&self, name: &PackageName) -> io::Result<FileLock> {
        FileLock::acquire(self.path(name))
    }
}
