//! Runtime configuration with validation and defaults.
//!
//! Read from `<home>/config.toml` when present. Every field is optional in
//! the file; missing ones take the defaults below. `CELLAR_JOBS` overrides
//! the worker count after the file is read, and CLI flags override both.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cache::RetryPolicy;
use crate::paths::Layout;
use crate::tester::TestPolicy;

/// Environment variable overriding [`Config::workers`].
pub const JOBS_ENV: &str = "CELLAR_JOBS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Packages built concurrently.
    pub workers: usize,

    /// Per install step time limit.
    pub step_timeout_secs: u64,

    /// Per test step time limit.
    pub test_timeout_secs: u64,

    /// What a failing self-test means.
    pub tests: TestPolicy,

    /// Keep building unrelated branches after a failure.
    pub keep_going: bool,

    /// Formula directory; `<home>/formulae` when unset.
    pub formula_dir: Option<PathBuf>,

    pub fetch: FetchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            step_timeout_secs: 3600,
            test_timeout_secs: 300,
            tests: TestPolicy::Flag,
            keep_going: false,
            formula_dir: None,
            fetch: FetchConfig::default(),
        }
    }
}

/// Download retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Attempts per source, including the first.
    pub max_attempts: u32,
    /// Backoff base; attempt `n` waits `base * 2^n`.
    pub base_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl Config {
    /// Load the config for `layout`, falling back to defaults when the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is unreadable, malformed, or
    /// fails validation.
    pub fn load(layout: &Layout) -> Result<Self, ConfigError> {
        let path = layout.config_file();
        let mut config = match fs::read_to_string(&path) {
            Ok(text) => {
                debug!(path = %path.display(), "loading config");
                Self::parse(&text).map_err(|message| ConfigError::Parse {
                    path: path.clone(),
                    message,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        if let Some(jobs) = std::env::var(JOBS_ENV).ok().and_then(|v| v.parse().ok()) {
            config.workers = jobs;
        }
        config.validate()?;
        Ok(config)
    }

    fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.message().to_string())
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.step_timeout_secs == 0 || self.test_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be at least 1 second".into()));
        }
        if self.fetch.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "fetch.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch.max_attempts,
            base_delay: Duration::from_millis(self.fetch.base_delay_ms),
        }
    }

    /// Effective formula directory.
    pub fn formula_dir(&self, layout: &Layout) -> PathBuf {
        self.formula_dir
            .clone()
            .unwrap_or_else(|| layout.formulae())
    }
}
