//! Download orchestration split into focused submodules.
//!
//! The `MediaDownloader` struct and its methods are organized by concern:
//! - [`single`] - One item, one selected artifact
//! - [`playlist`] - Every finished entry of a playlist
//! - [`info`] - Metadata-only lookups
//! - [`tracker`] - Request table and state transitions
//! - [`lifecycle`] - Rate-limit sweeper and shutdown coordination

mod info;
mod lifecycle;
mod playlist;
mod single;
mod tracker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::admission::{AdmissionGate, AdmissionPermit};
use crate::artifact::list_files;
use crate::cleanup;
use crate::config::Config;
use crate::error::{DownloadError, Error, Result};
use crate::rate_limiter::RateLimiter;
use crate::retrieval::{DownloadMode, MediaRetriever, RetrievalJob, YtDlpRetriever};
use crate::source::{is_playlist_url, validate_url};
use crate::types::{
    DownloadRequest, DownloadResult, Event, MediaKind, RequestState, RequesterId,
};

use tracker::{RequestTable, TrackedRequest};

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
///
/// Owns the rate limiter, the admission gate and the request table; independent
/// instances share nothing.
#[derive(Clone)]
pub struct MediaDownloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Per-requester cooldown
    pub(crate) rate_limiter: Arc<RateLimiter>,
    /// Bound on concurrent retrieval tool runs
    pub(crate) gate: AdmissionGate,
    /// Backend that actually fetches media (yt-dlp in production)
    pub(crate) retriever: Arc<dyn MediaRetriever>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// In-flight requests by id
    pub(crate) requests: RequestTable,
    /// Next request id
    pub(crate) next_request_id: Arc<AtomicU64>,
    /// Flag to indicate whether new requests are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Parent of every request's cancellation token
    pub(crate) shutdown_token: CancellationToken,
}

impl std::fmt::Debug for MediaDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaDownloader")
            .field("retriever", &self.retriever.name())
            .field("capacity", &self.gate.capacity())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

/// A request that passed the rate limiter and holds an admission slot
pub(crate) struct Admission {
    pub(crate) tracked: TrackedRequest,
    pub(crate) token: CancellationToken,
    /// Files that were already in the destination before this request ran
    pub(crate) baseline: HashSet<PathBuf>,
    _permit: AdmissionPermit,
    _cancel_on_exit: DropGuard,
}

impl MediaDownloader {
    /// Create a new MediaDownloader backed by yt-dlp
    ///
    /// Validates the configuration, locates yt-dlp and creates the destination root.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for invalid settings, [`Error::NotSupported`] when yt-dlp cannot
    /// be found, [`Error::Io`] when the destination root cannot be created.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let retriever = YtDlpRetriever::from_config(&config.tools, config.format.clone())?;
        tracing::info!(command = ?retriever.command(), "using yt-dlp");

        tokio::fs::create_dir_all(config.download_dir())
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download_dir().display(),
                        e
                    ),
                ))
            })?;

        Self::with_retriever(config, Arc::new(retriever))
    }

    /// Create a downloader around any [`MediaRetriever`]
    ///
    /// The rate-limit sweeper is started when called inside a tokio runtime.
    pub fn with_retriever(config: Config, retriever: Arc<dyn MediaRetriever>) -> Result<Self> {
        config.validate()?;

        // Buffer of 1000 events; slow subscribers see `Lagged` rather than blocking anyone
        let (event_tx, _rx) = broadcast::channel(1000);

        let downloader = Self {
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.cooldown)),
            gate: AdmissionGate::new(config.download.max_concurrent_downloads),
            retriever,
            event_tx,
            requests: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: Arc::new(AtomicU64::new(1)),
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown_token: CancellationToken::new(),
            config: Arc::new(config),
        };
        downloader.start_sweeper();
        Ok(downloader)
    }

    /// Build a request whose destination is scoped to `requester`
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUrl`] unless `url` is an absolute http(s) URL.
    pub fn request(
        &self,
        requester: RequesterId,
        url: &str,
        kind: MediaKind,
    ) -> Result<DownloadRequest> {
        let url = validate_url(url)?;
        Ok(DownloadRequest::new(
            requester,
            url.as_str(),
            kind,
            self.config.download_dir().join(requester.to_string()),
        ))
    }

    /// Download a playlist or a single item depending on what the URL points at
    pub async fn download(&self, request: &DownloadRequest) -> Result<DownloadResult> {
        if is_playlist_url(request.url()) {
            self.download_playlist(request)
                .await
                .map(DownloadResult::Playlist)
        } else {
            self.download_single(request)
                .await
                .map(DownloadResult::Single)
        }
    }

    /// Time until `requester` is admitted again (zero if they would be admitted now)
    pub fn remaining_cooldown(&self, requester: RequesterId) -> Duration {
        self.rate_limiter.remaining_cooldown(requester)
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Free admission slots right now
    pub fn available_slots(&self) -> usize {
        self.gate.available()
    }

    /// Rate limit, admission and directory setup shared by every download mode
    ///
    /// On success the request is `Running`.
    pub(crate) async fn admit(
        &self,
        request: &DownloadRequest,
        caller: Option<&CancellationToken>,
    ) -> Result<Admission> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let mut tracked = self.track(request);
        tracked.advance(RequestState::RateLimitCheck);
        if let Err(remaining) = self.rate_limiter.try_admit(request.requester()) {
            tracing::info!(
                requester = %request.requester(),
                remaining_ms = remaining.as_millis() as u64,
                "request rate limited"
            );
            self.event_tx
                .send(Event::RateLimited {
                    requester: request.requester(),
                    remaining,
                })
                .ok();
            tracked.settle(RequestState::Rejected);
            return Err(DownloadError::RateLimited { remaining }.into());
        }
        tracked.advance(RequestState::Admitted);

        let token = self.request_token(caller);
        let cancel_on_exit = token.clone().drop_guard();

        let permit = match self.gate.acquire(&token).await {
            Ok(permit) => permit,
            Err(e) => {
                tracked.settle(RequestState::Cancelled);
                return Err(e);
            }
        };

        let destination = request.destination();
        if let Err(e) = tokio::fs::create_dir_all(destination).await {
            tracing::warn!(request_id = %tracked.id(), ?destination, error = %e, "failed to create destination");
            tracked.settle(RequestState::Failed);
            return Err(e.into());
        }
        let baseline: HashSet<PathBuf> = match list_files(destination).await {
            Ok(files) => files.into_iter().collect(),
            Err(e) => {
                tracked.settle(RequestState::Failed);
                return Err(e);
            }
        };
        tracked.watch_directory(destination.clone(), baseline.clone());

        tracked.advance(RequestState::Running);
        Ok(Admission {
            tracked,
            token,
            baseline,
            _permit: permit,
            _cancel_on_exit: cancel_on_exit,
        })
    }

    /// Child of the shutdown token, also cancelled when `caller` is
    fn request_token(&self, caller: Option<&CancellationToken>) -> CancellationToken {
        let token = self.shutdown_token.child_token();
        if let Some(caller) = caller {
            if caller.is_cancelled() {
                token.cancel();
                return token;
            }
            let caller = caller.clone();
            let linked = token.clone();
            // Ends with the request: the admission's drop guard cancels `linked`
            tokio::spawn(async move {
                tokio::select! {
                    _ = caller.cancelled() => linked.cancel(),
                    _ = linked.cancelled() => {}
                }
            });
        }
        token
    }

    pub(crate) fn job(&self, request: &DownloadRequest, mode: DownloadMode) -> RetrievalJob {
        RetrievalJob {
            url: request.url().to_string(),
            destination: request.destination().clone(),
            kind: request.kind(),
            mode,
            timeout: self.config.download.timeout,
        }
    }

    /// Settle a request that ended in `error`, leaving its destination as it found it
    pub(crate) async fn fail(&self, admission: Admission, destination: &Path, error: &Error) {
        let id = admission.tracked.id();
        match error.as_download() {
            Some(DownloadError::ProcessFailed { exit_code, stderr }) => {
                tracing::error!(request_id = %id, ?exit_code, stderr = %stderr, "retrieval tool failed");
            }
            Some(DownloadError::Timeout { timeout }) => {
                tracing::warn!(request_id = %id, timeout_secs = timeout.as_secs(), "download timed out");
            }
            Some(DownloadError::Cancelled) => {
                tracing::info!(request_id = %id, "download cancelled");
            }
            _ => {
                tracing::warn!(request_id = %id, error = %error, "download failed");
            }
        }

        discard_new_files(destination, &admission.baseline).await;
        admission.tracked.settle(failure_state(error));
    }
}

/// Terminal state for a request that failed with `error`
pub(crate) fn failure_state(error: &Error) -> RequestState {
    match error {
        Error::Download(DownloadError::Timeout { .. }) => RequestState::TimedOut,
        Error::Download(DownloadError::Cancelled) | Error::ShuttingDown => RequestState::Cancelled,
        _ => RequestState::Failed,
    }
}

/// Files in `listing` that were not there before the request ran
pub(crate) fn produced_files(listing: Vec<PathBuf>, baseline: &HashSet<PathBuf>) -> Vec<PathBuf> {
    listing
        .into_iter()
        .filter(|p| !baseline.contains(p))
        .collect()
}

/// Delete what this request produced, then the directory if nothing else is left
pub(crate) async fn discard_new_files(destination: &Path, baseline: &HashSet<PathBuf>) {
    let listing = list_files(destination).await.unwrap_or_default();
    let produced = produced_files(listing, baseline);
    if !produced.is_empty() {
        let removed = cleanup::remove_files(&produced).await;
        tracing::debug!(?destination, removed, "discarded partial output");
    }
    cleanup::remove_dir_if_empty(destination).await;
}
