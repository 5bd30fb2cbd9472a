//! Binary Downloader
//!
//! Streams a download URL into a staging file next to its cache target.
//! The staging file is removed automatically unless the cache commits it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use tempfile::NamedTempFile;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use super::errors::ContentError;
use crate::config::ResolverConfig;

/// Prefix of staging files, skipped by directory scans
pub const STAGING_PREFIX: &str = ".bincache-";

/// Suffix of staging files
pub const STAGING_SUFFIX: &str = ".tmp";

/// Downloaded content waiting to be committed to its cache path
#[derive(Debug)]
pub struct StagedDownload {
    file: NamedTempFile,
    len: u64,
}

impl StagedDownload {
    /// Create an empty staging file in the directory of `target`
    pub fn create(target: &Path) -> Result<Self, ContentError> {
        let parent = target
            .parent()
            .ok_or_else(|| ContentError::InvalidPath(target.display().to_string()))?;
        fs::create_dir_all(parent).map_err(|e| ContentError::io(parent, e))?;

        let file = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(parent)
            .map_err(|e| ContentError::io(parent, e))?;

        Ok(Self { file, len: 0 })
    }

    /// Stage in-memory content for `target`
    pub fn from_bytes(target: &Path, data: &[u8]) -> Result<Self, ContentError> {
        let mut staged = Self::create(target)?;
        staged.write(data)?;
        Ok(staged)
    }

    /// Append a chunk to the staging file
    pub fn write(&mut self, chunk: &[u8]) -> Result<(), ContentError> {
        self.file
            .write_all(chunk)
            .map_err(|e| ContentError::io(self.file.path(), e))?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    /// Number of bytes staged
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Location of the staging file
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Flush and atomically rename onto `target`
    pub(crate) fn persist(mut self, target: &Path) -> Result<fs::File, ContentError> {
        let staging: PathBuf = self.file.path().to_path_buf();
        self.file
            .flush()
            .map_err(|e| ContentError::io(&staging, e))?;
        self.file
            .persist(target)
            .map_err(|e| ContentError::io(target, e.error))
    }
}

/// Fetches the bytes behind a download URL
pub trait Downloader: Send + Sync {
    /// Download `url` into a staging file for `target`. On failure nothing
    /// is left on disk.
    fn download_content(&self, target: &Path, url: &str) -> Result<StagedDownload, ContentError>;
}

/// HTTP implementation of [`Downloader`]
#[derive(Clone)]
pub struct HttpDownloader {
    http_client: Client,
    access_token: Option<String>,
    runtime: Handle,
}

impl HttpDownloader {
    pub fn new(config: &ResolverConfig, runtime: Handle) -> Result<Self, ContentError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ContentError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            access_token: config.access_token.clone(),
            runtime,
        })
    }

    async fn fetch(&self, target: &Path, url: &str) -> Result<StagedDownload, ContentError> {
        debug!(url = url, target = %target.display(), "Downloading binary");

        let mut request = self.http_client.get(url);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let mut response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!(status = status, url = url, "Binary download failed");
            return Err(ContentError::from_status(
                status,
                &format!("downloading '{}': {}", url, body),
            ));
        }

        let mut staged = StagedDownload::create(target)?;
        while let Some(chunk) = response.chunk().await? {
            staged.write(&chunk)?;
        }

        info!(url = url, size = staged.len(), "Downloaded binary");
        Ok(staged)
    }
}

impl Downloader for HttpDownloader {
    fn download_content(&self, target: &Path, url: &str) -> Result<StagedDownload, ContentError> {
        self.runtime.block_on(self.fetch(target, url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use tempfile::TempDir;
    use tokio::runtime::Runtime;

    fn downloader(runtime: &Runtime) -> HttpDownloader {
        let config = ResolverConfig::for_endpoint("http://unused.invalid/graphql");
        HttpDownloader::new(&config, runtime.handle().clone()).unwrap()
    }

    #[test]
    fn test_download_stages_next_to_target() {
        let runtime = Runtime::new().unwrap();
        let mut server = Server::new();
        server
            .mock("GET", "/y.png")
            .with_status(200)
            .with_body("png-bytes")
            .create();

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("media").join("y.png");
        let staged = downloader(&runtime)
            .download_content(&target, &format!("{}/y.png", server.url()))
            .unwrap();

        assert_eq!(staged.len(), 9);
        assert_eq!(staged.path().parent(), target.parent());
        assert!(!target.exists());

        staged.persist(&target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"png-bytes");
    }

    #[test]
    fn test_failed_download_leaves_nothing_behind() {
        let runtime = Runtime::new().unwrap();
        let mut server = Server::new();
        server.mock("GET", "/gone.png").with_status(503).create();

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("gone.png");
        let err = downloader(&runtime)
            .download_content(&target, &format!("{}/gone.png", server.url()))
            .unwrap_err();

        assert!(matches!(err, ContentError::InternalServerError { status: 503, .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_dropped_stage_is_removed() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.bin");
        let staged = StagedDownload::from_bytes(&target, b"abc").unwrap();
        let staging_path = staged.path().to_path_buf();
        assert!(staging_path.exists());
        drop(staged);
        assert!(!staging_path.exists());
    }
}
