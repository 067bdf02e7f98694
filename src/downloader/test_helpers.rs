//! Shared test helpers for creating MediaDownloader instances in tests.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use crate::artifact::list_files;
use crate::config::Config;
use crate::downloader::MediaDownloader;
use crate::error::{DownloadError, Result};
use crate::retrieval::{MediaRetriever, RetrievalJob, RetrievalOutcome};
use crate::types::{DownloadRequest, MediaInfo, MediaKind, RequesterId};

/// Retriever that writes canned files instead of running yt-dlp
///
/// Records how many runs overlap so tests can check the admission bound.
#[derive(Default)]
pub(crate) struct FakeRetriever {
    /// (file name, size in bytes) written into the destination on every run
    files: Vec<(String, usize)>,
    /// Simulated run time; exceeding the job timeout yields `Timeout`
    delay: Duration,
    /// Exit code of a failing run (files are still written first)
    exit_code: Option<i32>,
    info: MediaInfo,
    /// Names reported as already downloaded
    reused: Vec<String>,
    running: AtomicUsize,
    pub(crate) peak: AtomicUsize,
    pub(crate) calls: AtomicUsize,
}

impl FakeRetriever {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_file(mut self, name: &str, size: usize) -> Self {
        self.files.push((name.to_string(), size));
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn failing(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    pub(crate) fn reusing(mut self, name: &str) -> Self {
        self.reused.push(name.to_string());
        self
    }

    pub(crate) fn with_info(mut self, info: MediaInfo) -> Self {
        self.info = info;
        self
    }

    async fn simulate(&self, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _running = RunningGuard(&self.running);

        tokio::select! {
            _ = cancel.cancelled() => Err(DownloadError::Cancelled.into()),
            _ = tokio::time::sleep(timeout), if self.delay > timeout => {
                Err(DownloadError::Timeout { timeout }.into())
            }
            _ = tokio::time::sleep(self.delay), if self.delay <= timeout => Ok(()),
        }
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaRetriever for FakeRetriever {
    async fn retrieve(
        &self,
        job: &RetrievalJob,
        cancel: &CancellationToken,
    ) -> Result<RetrievalOutcome> {
        for (name, size) in &self.files {
            tokio::fs::write(job.destination.join(name), vec![0u8; *size]).await?;
        }

        self.simulate(job.timeout, cancel).await?;

        if let Some(code) = self.exit_code {
            return Err(DownloadError::ProcessFailed {
                exit_code: Some(code),
                stderr: "ERROR: simulated failure".to_string(),
            }
            .into());
        }

        Ok(RetrievalOutcome {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            files: list_files(&job.destination).await?,
            reused: self
                .reused
                .iter()
                .map(|name| job.destination.join(name))
                .collect(),
        })
    }

    async fn probe(
        &self,
        _url: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<MediaInfo> {
        self.simulate(timeout, cancel).await?;
        Ok(self.info.clone())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Test configuration rooted in `root`
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = root.join("downloads");
    config.download.max_concurrent_downloads = 3;
    config.download.timeout = Duration::from_secs(5);
    config.tools.search_path = false;
    config
}

/// Helper to create a test MediaDownloader around `retriever`.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) fn create_test_downloader(
    retriever: Arc<dyn MediaRetriever>,
) -> (MediaDownloader, tempfile::TempDir) {
    create_test_downloader_with(retriever, |_| {})
}

/// Like [`create_test_downloader`], with a chance to adjust the configuration
pub(crate) fn create_test_downloader_with(
    retriever: Arc<dyn MediaRetriever>,
    adjust: impl FnOnce(&mut Config),
) -> (MediaDownloader, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    adjust(&mut config);
    std::fs::create_dir_all(config.download_dir()).unwrap();

    let downloader = MediaDownloader::with_retriever(config, retriever).unwrap();
    (downloader, temp_dir)
}

/// Video request for `requester` with the usual per-requester destination
pub(crate) fn video_request(downloader: &MediaDownloader, requester: i64) -> DownloadRequest {
    downloader
        .request(
            RequesterId(requester),
            "https://www.youtube.com/watch?v=abc",
            MediaKind::Video,
        )
        .unwrap()
}

/// Playlist request for `requester`
pub(crate) fn playlist_request(downloader: &MediaDownloader, requester: i64) -> DownloadRequest {
    downloader
        .request(
            RequesterId(requester),
            "https://www.youtube.com/playlist?list=PLabc",
            MediaKind::Video,
        )
        .unwrap()
}
