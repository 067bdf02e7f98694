//! Core types for media-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Opaque identity of whoever issued a request (e.g., a chat user id)
///
/// Only used for rate limiting and for keying destination directories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterId(pub i64);

impl RequesterId {
    /// Create a new RequesterId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for RequesterId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RequesterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-unique identifier of an admitted request
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to extract from the source
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Video with merged audio
    #[default]
    Video,
    /// Audio only
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => f.write_str("video"),
            MediaKind::Audio => f.write_str("audio"),
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            other => Err(format!("unknown media kind: {other}")),
        }
    }
}

/// A request to fetch remote media
///
/// Immutable once constructed. Built by the front-end, usually through
/// [`MediaDownloader::request`](crate::MediaDownloader::request) so the destination is
/// scoped to the requester.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    requester: RequesterId,
    url: String,
    kind: MediaKind,
    destination: PathBuf,
}

impl DownloadRequest {
    /// Create a request with an explicit destination directory
    pub fn new(
        requester: RequesterId,
        url: impl Into<String>,
        kind: MediaKind,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            requester,
            url: url.into(),
            kind,
            destination: destination.into(),
        }
    }

    /// Who issued the request
    pub fn requester(&self) -> RequesterId {
        self.requester
    }

    /// Source URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Requested media kind
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Directory the retrieval tool writes into
    pub fn destination(&self) -> &PathBuf {
        &self.destination
    }
}

/// Lifecycle state of a request
///
/// `Pending → RateLimitCheck → (Rejected | Admitted) → Running →
/// (Succeeded | TimedOut | Failed) → Selected → HandedOff → CleanedUp`,
/// with `Cancelled` reachable from any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Received, not yet checked
    Pending,
    /// Being checked against the requester's cooldown
    RateLimitCheck,
    /// Denied by the rate limiter
    Rejected,
    /// Passed the rate limiter, waiting for an admission slot
    Admitted,
    /// Retrieval tool is running
    Running,
    /// Retrieval tool exited successfully, or a playlist run failed after finishing
    /// some entries
    Succeeded,
    /// Retrieval tool exceeded its time budget
    TimedOut,
    /// Retrieval or selection failed
    Failed,
    /// Cancelled by the caller or by shutdown
    Cancelled,
    /// Artifact(s) chosen
    Selected,
    /// Artifact(s) returned to the caller
    HandedOff,
    /// Artifact(s) deleted after consumption
    CleanedUp,
}

impl RequestState {
    /// Whether no further transitions can happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Rejected
                | RequestState::TimedOut
                | RequestState::Failed
                | RequestState::Cancelled
                | RequestState::CleanedUp
        )
    }
}

/// Snapshot of an in-flight request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActiveRequest {
    /// Request identifier
    pub id: RequestId,
    /// Who issued it
    pub requester: RequesterId,
    /// Source URL
    pub url: String,
    /// Requested media kind
    pub kind: MediaKind,
    /// Current lifecycle state
    pub state: RequestState,
    /// When the request entered the downloader
    pub started_at: DateTime<Utc>,
}

/// Metadata reported by the retrieval tool's metadata-only mode
///
/// Only the fields the downloader cares about are modelled; everything else in the
/// tool's JSON is ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Source-specific media id
    #[serde(default)]
    pub id: String,
    /// Title
    #[serde(default)]
    pub title: String,
    /// Duration in seconds
    #[serde(default)]
    pub duration: Option<f64>,
    /// Uploader or channel name
    #[serde(default)]
    pub uploader: Option<String>,
    /// Extractor that handled the URL (e.g., "youtube")
    #[serde(default)]
    pub extractor: Option<String>,
    /// Canonical page URL
    #[serde(default)]
    pub webpage_url: Option<String>,
    /// Thumbnail URL
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Exact size of the selected format in bytes, when known
    #[serde(default)]
    pub filesize: Option<u64>,
    /// Estimated size in bytes, when the exact size is unknown
    #[serde(default)]
    pub filesize_approx: Option<u64>,
    /// Number of entries when the URL is a playlist
    #[serde(default)]
    pub playlist_count: Option<u64>,
}

impl MediaInfo {
    /// Best known size estimate in bytes
    pub fn estimated_size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }
}

/// Event emitted by the downloader
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A request moved to a new lifecycle state
    StateChanged {
        /// Request identifier
        id: RequestId,
        /// Who issued it
        requester: RequesterId,
        /// New state
        state: RequestState,
    },
    /// A requester was denied by the rate limiter
    RateLimited {
        /// Who was denied
        requester: RequesterId,
        /// Time until they are admitted again
        #[serde(with = "millis_serde")]
        remaining: Duration,
    },
    /// Downloader is shutting down
    Shutdown,
}

mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Outcome of [`MediaDownloader::download`](crate::MediaDownloader::download)
#[derive(Debug)]
pub enum DownloadResult {
    /// A single item was requested
    Single(crate::artifact::Artifact),
    /// A playlist was requested; may be empty on total failure
    Playlist(Vec<crate::artifact::Artifact>),
}

impl DownloadResult {
    /// All artifacts, in order
    pub fn into_artifacts(self) -> Vec<crate::artifact::Artifact> {
        match self {
            DownloadResult::Single(a) => vec![a],
            DownloadResult::Playlist(v) => v,
        }
    }
}
