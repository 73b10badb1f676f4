//! Streaming download with on-the-fly checksum verification.
//!
//! Sources are `http(s)://` URLs, `file://` URLs, or bare local paths.
//! Bytes are hashed while they are written, so the content is read once.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use cellar_schema::{Checksum, ChecksumAlgorithm};

#[derive(Error, Debug)]
pub enum FetchError {
    /// Network or server-side failure; worth retrying.
    #[error("failed to fetch {url}: {message}")]
    Transport { url: String, message: String },

    /// The server answered with a non-success status.
    #[error("failed to fetch {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    /// Content does not match the declared checksum. Never retried.
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: Checksum,
        actual: Checksum,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A repository checkout failed.
    #[error("failed to check out {url}: {message}")]
    Vcs { url: String, message: String },

    #[error("failed to set up HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    /// Whether another attempt may succeed: transport failures, 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::ChecksumMismatch { .. }
            | Self::Io { .. }
            | Self::Vcs { .. }
            | Self::Client(_) => false,
        }
    }

    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Where a source URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// Fetched over HTTP(S).
    Remote(String),
    /// Read from the local filesystem.
    Local(PathBuf),
}

impl SourceLocation {
    /// Classify a source URL.
    pub fn parse(url: &str) -> Self {
        if let Some(path) = url.strip_prefix("file://") {
            Self::Local(PathBuf::from(path))
        } else if url.starts_with("http://") || url.starts_with("https://") {
            Self::Remote(url.to_string())
        } else {
            Self::Local(PathBuf::from(url))
        }
    }
}

/// Stream `url` into `dest`, hashing with `algorithm` as bytes arrive.
///
/// `progress` receives the running byte count and the expected total when
/// known. The caller compares the returned checksum and owns cleanup of
/// `dest`.
///
/// # Errors
///
/// Returns [`FetchError::Transport`] / [`FetchError::Status`] for network
/// failures and [`FetchError::Io`] for local read or write failures.
pub async fn download(
    client: &Client,
    url: &str,
    dest: &Path,
    algorithm: ChecksumAlgorithm,
    progress: &(dyn Fn(u64, Option<u64>) + Send + Sync),
) -> Result<Checksum, FetchError> {
    match SourceLocation::parse(url) {
        SourceLocation::Remote(url) => {
            let response = client
                .get(&url)
                .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
                .send()
                .await
                .map_err(|e| transport(&url, &e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    url,
                    status: status.as_u16(),
                });
            }

            let total = response.content_length();
            let stream = response
                .bytes_stream()
                .map_err(|e| transport(&url, &e));
            write_hashing(stream, dest, algorithm, total, progress).await
        }
        SourceLocation::Local(path) => {
            let file = File::open(&path).await.map_err(FetchError::io(&path))?;
            let total = file.metadata().await.ok().map(|m| m.len());
            let stream = ReaderStream::new(file).map_err(|e| FetchError::Io {
                path: path.clone(),
                source: e,
            });
            write_hashing(stream, dest, algorithm, total, progress).await
        }
    }
}

fn transport(url: &str, err: &reqwest::Error) -> FetchError {
    FetchError::Transport {
        url: url.to_string(),
        message: err.to_string(),
    }
}

async fn write_hashing(
    stream: impl Stream<Item = Result<Bytes, FetchError>>,
    dest: &Path,
    algorithm: ChecksumAlgorithm,
    total: Option<u64>,
    progress: &(dyn Fn(u64, Option<u64>) + Send + Sync),
) -> Result<Checksum, FetchError> {
    let mut file = File::create(dest).await.map_err(FetchError::io(dest))?;
    let mut hasher = algorithm.hasher();
    let mut written: u64 = 0;

    progress(0, total);
    let mut stream = std::pin::pin!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(FetchError::io(dest))?;
        hasher.update(&chunk);
        written += chunk.len() as u64;
        progress(written, total);
    }

    file.flush().await.map_err(FetchError::io(dest))?;
    file.sync_all().await.map_err(FetchError::io(dest))?;
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location() {
        assert_eq!(
            SourceLocation::parse("https://example.com/a.tar.gz"),
            SourceLocation::Remote("https://example.com/a.tar.gz".into())
        );
        assert_eq!(
            SourceLocation::parse("file:///tmp/a.tar.gz"),
            SourceLocation::Local(PathBuf::from("/tmp/a.tar.gz"))
        );
        assert_eq!(
            SourceLocation::parse("./vendor/a.tar.gz"),
            SourceLocation::Local(PathBuf::from("./vendor/a.tar.gz"))
        );
    }

    #[test]
    fn test_retry_classification() {
        let status = |status| FetchError::Status {
            url: String::new(),
            status,
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(
            !FetchError::ChecksumMismatch {
                url: String::new(),
                expected: Checksum::of_bytes(ChecksumAlgorithm::Sha256, b"a"),
                actual: Checksum::of_bytes(ChecksumAlgorithm::Sha256, b"b"),
            }
            .is_retryable()
        );
    }

    #[tokio::test]
    async fn test_local_download_hashes_content() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src.txt");
        std::fs::write(&src, b"hello world").unwrap();
        let dest = tmp.path().join("out");

        let checksum = download(
            &Client::new(),
            &format!("file://{}", src.display()),
            &dest,
            ChecksumAlgorithm::Sha256,
            &|_, _| {},
        )
        .await
        .unwrap();

        assert_eq!(
            checksum,
            Checksum::of_bytes(ChecksumAlgorithm::Sha256, b"hello world")
        );
        assert_eq!(std::fs::read(dest).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_http_status_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.tar.gz")
            .with_status(404)
            .create_async()
            .await;
        let tmp = tempfile::tempdir().unwrap();

        let err = download(
            &Client::new(),
            &format!("{}/missing.tar.gz", server.url()),
            &tmp.path().join("out"),
            ChecksumAlgorithm::Sha256,
            &|_, _| {},
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        mock.assert_async().await;
    }
}
