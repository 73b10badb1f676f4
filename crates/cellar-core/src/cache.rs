//! Content-addressed fetch cache.
//!
//! Verified source archives are stored by checksum, not URL:
//! `<cache>/<algorithm>/<ab>/<abcdef...>`. Two formulae that reference the
//! same bytes share one entry. Entries are immutable once renamed into
//! place, so a hit is served without re-hashing and concurrent writers of
//! the same key can only ever race to install identical content.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};

use cellar_schema::{Checksum, ChecksumAlgorithm};

use crate::io::fetch::{self, FetchError};

const PARTIAL_PREFIX: &str = ".partial-";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Whole-request limit, body included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Bounded exponential backoff for transient fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each time.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (0-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Read-only handle to a verified cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSource {
    /// Entry path; never modify it.
    pub path: PathBuf,
    /// Checksum the entry is keyed by.
    pub checksum: Checksum,
    /// Size in bytes.
    pub size: u64,
}

/// Checksum-keyed store of verified source material.
#[derive(Debug, Clone)]
pub struct FetchCache {
    root: PathBuf,
    client: Client,
    retry: RetryPolicy,
}

impl FetchCache {
    /// Open (creating if needed) a cache at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] if the directory cannot be created, or
    /// [`FetchError::Client`] if the HTTP client cannot be set up.
    pub fn open(root: impl Into<PathBuf>, retry: RetryPolicy) -> Result<Self, FetchError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(FetchError::io(&root))?;
        Ok(Self {
            root,
            client: http_client(REQUEST_TIMEOUT)?,
            retry,
        })
    }

    /// Replace the per-request time limit.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be set up.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, FetchError> {
        self.client = http_client(timeout)?;
        Ok(self)
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an entry with `checksum` lives at.
    pub fn entry_path(&self, checksum: &Checksum) -> PathBuf {
        let hex = checksum.hex();
        self.root
            .join(checksum.algorithm().as_str())
            .join(&hex[..2])
            .join(hex)
    }

    /// Return the entry for `checksum` if cached.
    pub fn lookup(&self, checksum: &Checksum) -> Option<CachedSource> {
        let path = self.entry_path(checksum);
        let meta = fs::metadata(&path).ok()?;
        meta.is_file().then(|| CachedSource {
            path,
            checksum: checksum.clone(),
            size: meta.len(),
        })
    }

    /// Read a cached entry into memory.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] if the entry exists but cannot be read.
    pub fn read(&self, checksum: &Checksum) -> Result<Option<Vec<u8>>, FetchError> {
        match self.lookup(checksum) {
            Some(entry) => fs::read(&entry.path)
                .map(Some)
                .map_err(FetchError::io(&entry.path)),
            None => Ok(None),
        }
    }

    /// Verify `bytes` against `checksum` and store them.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ChecksumMismatch`] when the content does not
    /// hash to `checksum`, or [`FetchError::Io`] on write failure.
    pub fn store(&self, bytes: &[u8], checksum: &Checksum) -> Result<CachedSource, FetchError> {
        let actual = Checksum::of_bytes(checksum.algorithm(), bytes);
        if &actual != checksum {
            return Err(FetchError::ChecksumMismatch {
                url: "<memory>".to_string(),
                expected: checksum.clone(),
                actual,
            });
        }
        if let Some(hit) = self.lookup(checksum) {
            return Ok(hit);
        }

        let mut tmp = self.partial_file(checksum)?;
        let tmp_path = tmp.path().to_path_buf();
        tmp.write_all(bytes).map_err(FetchError::io(&tmp_path))?;
        tmp.as_file().sync_all().map_err(FetchError::io(&tmp_path))?;
        self.commit(tmp, checksum)
    }

    /// Return the verified entry for `checksum`, downloading from `url` on a
    /// miss. Transport failures are retried per the cache's [`RetryPolicy`];
    /// a checksum mismatch is returned immediately.
    ///
    /// # Errors
    ///
    /// Returns the last [`FetchError`] once retries are exhausted, or the
    /// first non-retryable one.
    pub async fn fetch(
        &self,
        url: &str,
        checksum: &Checksum,
        progress: &(dyn Fn(u64, Option<u64>) + Send + Sync),
    ) -> Result<CachedSource, FetchError> {
        if let Some(hit) = self.lookup(checksum) {
            debug!(%checksum, "fetch cache hit");
            return Ok(hit);
        }

        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.download_once(url, checksum, progress).await {
                Ok(entry) => return Ok(entry),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(url, attempt = attempt + 1, ?delay, error = %e, "fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn download_once(
        &self,
        url: &str,
        checksum: &Checksum,
        progress: &(dyn Fn(u64, Option<u64>) + Send + Sync),
    ) -> Result<CachedSource, FetchError> {
        let tmp = self.partial_file(checksum)?;
        let actual = fetch::download(
            &self.client,
            url,
            tmp.path(),
            checksum.algorithm(),
            progress,
        )
        .await?;

        if &actual != checksum {
            // Dropping `tmp` deletes the partial download.
            return Err(FetchError::ChecksumMismatch {
                url: url.to_string(),
                expected: checksum.clone(),
                actual,
            });
        }

        let entry = self.commit(tmp, checksum)?;
        info!(url, %checksum, size = entry.size, "cached source");
        Ok(entry)
    }

    fn partial_file(&self, checksum: &Checksum) -> Result<tempfile::NamedTempFile, FetchError> {
        let dir = self.root.join(checksum.algorithm().as_str());
        fs::create_dir_all(&dir).map_err(FetchError::io(&dir))?;
        tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .tempfile_in(&dir)
            .map_err(FetchError::io(&dir))
    }

    fn commit(
        &self,
        tmp: tempfile::NamedTempFile,
        checksum: &Checksum,
    ) -> Result<CachedSource, FetchError> {
        let path = self.entry_path(checksum);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(FetchError::io(parent))?;
        }
        tmp.persist(&path)
            .map_err(|e| FetchError::io(&path)(e.error))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o444))
                .map_err(FetchError::io(&path))?;
        }

        let size = fs::metadata(&path).map_err(FetchError::io(&path))?.len();
        Ok(CachedSource {
            path,
            checksum: checksum.clone(),
            size,
        })
    }

    /// Every cached entry, sorted by path.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] if the cache cannot be walked.
    pub fn entries(&self) -> Result<Vec<CachedSource>, FetchError> {
        let mut entries = Vec::new();
        for algorithm in [ChecksumAlgorithm::Sha256, ChecksumAlgorithm::Blake3] {
            let dir = self.root.join(algorithm.as_str());
            if !dir.is_dir() {
                continue;
            }
            for entry in walkdir::WalkDir::new(&dir).min_depth(2).max_depth(2) {
                let entry = entry.map_err(|e| FetchError::Io {
                    path: dir.clone(),
                    source: e.into(),
                })?;
                let Some(hex) = entry.file_name().to_str() else {
                    continue;
                };
                let Ok(checksum) = Checksum::new(algorithm, hex) else {
                    continue;
                };
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                entries.push(CachedSource {
                    path: entry.into_path(),
                    checksum,
                    size,
                });
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Delete partial downloads left behind by interrupted runs.
    /// Returns the number of bytes reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] on removal failure.
    pub fn prune(&self) -> Result<u64, FetchError> {
        let mut reclaimed = 0;
        for algorithm in [ChecksumAlgorithm::Sha256, ChecksumAlgorithm::Blake3] {
            let dir = self.root.join(algorithm.as_str());
            let Ok(read) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in read.flatten() {
                if !entry.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX) {
                    continue;
                }
                let path = entry.path();
                reclaimed += entry.metadata().map(|m| m.len()).unwrap_or(0);
                fs::remove_file(&path).map_err(FetchError::io(&path))?;
                debug!(path = %path.display(), "removed partial download");
            }
        }
        Ok(reclaimed)
    }
}

fn http_client(timeout: Duration) -> Result<Client, FetchError> {
    Client::builder()
        .user_agent(crate::USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .build()
        .map_err(|e| FetchError::Client(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn cache(root: &Path) -> FetchCache {
        FetchCache::open(
            root.join("cache"),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        )
        .unwrap()
    }

    fn sha(bytes: &[u8]) -> Checksum {
        Checksum::of_bytes(ChecksumAlgorithm::Sha256, bytes)
    }

    #[test]
    fn test_store_then_read_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let content = b"source tarball bytes";

        let entry = cache.store(content, &sha(content)).unwrap();
        assert_eq!(entry.size, content.len() as u64);
        assert_eq!(cache.read(&sha(content)).unwrap().unwrap(), content);
        assert!(entry.path.starts_with(tmp.path().join("cache/sha256")));
    }

    #[test]
    fn test_store_rejects_wrong_checksum() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let err = cache.store(b"abc", &sha(b"def")).unwrap_err();
        assert!(matches!(err, FetchError::ChecksumMismatch { .. }));
        assert!(cache.entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_downloads_once() {
        let mut server = mockito::Server::new_async().await;
        let body = b"release archive";
        let mock = server
            .mock("GET", "/pkg-1.0.tar.gz")
            .with_body(body)
            .expect(1)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let url = format!("{}/pkg-1.0.tar.gz", server.url());
        let seen = AtomicU64::new(0);
        let progress = |current: u64, _total: Option<u64>| seen.store(current, Ordering::SeqCst);

        let first = cache.fetch(&url, &sha(body), &progress).await.unwrap();
        let second = cache.fetch(&url, &sha(body), &progress).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read(&first.path).unwrap(), body);
        assert_eq!(seen.load(Ordering::SeqCst), body.len() as u64);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tampered.tar.gz")
            .with_body("def456")
            .expect(1)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let url = format!("{}/tampered.tar.gz", server.url());
        let err = cache
            .fetch(&url, &sha(b"abc123"), &|_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::ChecksumMismatch { .. }));
        assert!(cache.entries().unwrap().is_empty());
        assert_eq!(cache.prune().unwrap(), 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Connections complete from the backlog but nothing ever answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/stalled.tar.gz", listener.local_addr().unwrap());

        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path())
            .with_timeout(Duration::from_millis(200))
            .unwrap();
        let started = std::time::Instant::now();
        let err = cache
            .fetch(&url, &sha(b"x"), &|_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Transport { .. }), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(cache.prune().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_until_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky.tar.gz")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let url = format!("{}/flaky.tar.gz", server.url());
        let err = cache
            .fetch(&url, &sha(b"x"), &|_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 503, .. }));
        mock.assert_async().await;
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_prune_removes_partials() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let dir = cache.root().join("sha256");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(".partial-abc"), b"12345").unwrap();
        assert_eq!(cache.prune().unwrap(), 5);
        assert!(!dir.join(".partial-abc").exists());
    }
}
