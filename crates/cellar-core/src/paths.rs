use dirs::home_dir;
use std::path::{Path, PathBuf};

use cellar_schema::{PackageName, Version};

/// Environment variable that overrides the cellar home directory.
pub const HOME_ENV: &str = "CELLAR_HOME";

/// Returns the cellar home directory, or None if the user's home cannot be resolved.
pub fn try_cellar_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var(HOME_ENV) {
        if !val.is_empty() {
            return Some(PathBuf::from(val));
        }
    }
    home_dir().map(|h| h.join(".cellar"))
}

/// On-disk layout rooted at the cellar home.
///
/// Every directory lives on the same volume so kegs can be moved into place
/// with a rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Layout rooted at an explicit directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout rooted at `CELLAR_HOME` or `~/.cellar`.
    pub fn from_env() -> Option<Self> {
        try_cellar_home().map(Self::new)
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Installed kegs: `<home>/cellar/<name>/<version>`
    pub fn cellar(&self) -> PathBuf {
        self.root.join("cellar")
    }

    /// Install receipts: `<home>/receipts`
    pub fn receipts(&self) -> PathBuf {
        self.root.join("receipts")
    }

    /// Content-addressed fetch cache: `<home>/cache`
    pub fn cache(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Build scratch directories: `<home>/tmp`
    pub fn scratch(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Build and test logs: `<home>/logs`
    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Default formula directory: `<home>/formulae`
    pub fn formulae(&self) -> PathBuf {
        self.root.join("formulae")
    }

    /// User configuration: `<home>/config.toml`
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Lock held by commands that change the cellar: `<home>/cellar.lock`
    pub fn lock_file(&self) -> PathBuf {
        self.root.join("cellar.lock")
    }

    /// Per-package keg locks: `<home>/locks`
    pub fn locks(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// `SQLite` history database: `<home>/state.db`
    pub fn db_path(&self) -> PathBuf {
        self.root.join("state.db")
    }

    /// Keg directory of one installed version.
    pub fn keg(&self, name: &PackageName, version: &Version) -> PathBuf {
        self.cellar().join(name.as_str()).join(version.as_str())
    }

    /// Generate a build log path for a package.
    pub fn build_log(&self, name: &PackageName, version: &Version) -> PathBuf {
        let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        self.logs()
            .join(format!("build-{name}-{version}-{timestamp}.log"))
    }

    /// Generate a test log path for a package.
    pub fn test_log(&self, name: &PackageName, version: &Version) -> PathBuf {
        let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        self.logs()
            .join(format!("test-{name}-{version}-{timestamp}.log"))
    }

    /// Create every directory of the layout.
    ///
    /// # Errors
    ///
    /// Returns the first directory creation failure.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [
            self.cellar(),
            self.receipts(),
            self.cache(),
            self.scratch(),
            self.logs(),
            self.locks(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.split('/').next_back().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keg_path() {
        let layout = Layout::new("/opt/cellar-home");
        assert_eq!(
            layout.keg(&PackageName::new("jq"), &Version::new("1.7.1")),
            PathBuf::from("/opt/cellar-home/cellar/jq/1.7.1")
        );
    }

    #[test]
    fn test_filename_from_url_strips_query() {
        assert_eq!(
            filename_from_url("https://example.com/a/jq-1.7.tar.gz?raw=1"),
            "jq-1.7.tar.gz"
        );
        assert_eq!(filename_from_url("file:///tmp/src.zip"), "src.zip");
    }

    #[test]
    fn test_ensure_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path().join("home"));
        layout.ensure().unwrap();
        assert!(layout.receipts().is_dir());
        assert!(layout.cellar().is_dir());
        assert!(layout.logs().is_dir());
        assert!(layout.locks().is_dir());
    }
}
