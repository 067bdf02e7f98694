//! Traits and types for media retrieval backends

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::format::DownloadMode;
use super::process::RetrievalOutcome;
use crate::types::{MediaInfo, MediaKind};

/// Everything a backend needs to perform one download run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalJob {
    /// Source URL
    pub url: String,
    /// Directory the produced files must land in (already created)
    pub destination: PathBuf,
    /// Requested media kind
    pub kind: MediaKind,
    /// Single item or playlist
    pub mode: DownloadMode,
    /// Time budget for the run
    pub timeout: Duration,
}

/// Backend that fetches media into a directory
///
/// The downloader only talks to this trait; the production implementation is
/// [`YtDlpRetriever`](super::YtDlpRetriever). Tests plug in fakes.
///
/// Implementations must honour `job.timeout` and `cancel`, and must not leave a
/// process running once they return.
///
/// # Examples
///
/// ```no_run
/// use media_dl::retrieval::{MediaRetriever, YtDlpRetriever};
/// use media_dl::config::FormatConfig;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let retriever = YtDlpRetriever::from_path(FormatConfig::default())
///     .expect("yt-dlp not found");
///
/// let info = retriever
///     .probe("https://youtu.be/dQw4w9WgXcQ", Duration::from_secs(60), &CancellationToken::new())
///     .await?;
/// println!("{}", info.title);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait MediaRetriever: Send + Sync {
    /// Download into `job.destination`
    ///
    /// # Errors
    ///
    /// `DownloadError::Timeout`, `DownloadError::Cancelled` and
    /// `DownloadError::ProcessFailed` for the corresponding outcomes; anything else for
    /// failures to run at all.
    async fn retrieve(
        &self,
        job: &RetrievalJob,
        cancel: &CancellationToken,
    ) -> crate::Result<RetrievalOutcome>;

    /// Fetch metadata for `url` without downloading
    async fn probe(
        &self,
        url: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> crate::Result<MediaInfo>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}
