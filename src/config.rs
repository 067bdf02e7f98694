//! Configuration types for media-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Transport limit of the messaging front-end (50 MiB)
pub const TRANSPORT_LIMIT_BYTES: u64 = 50 * 1024 * 1024;

const MIB: u64 = 1024 * 1024;

/// Download behavior configuration (directories, concurrency, time and size budgets)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Destination root; each requester gets a subdirectory (default: "downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum concurrent retrieval tool invocations (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Time budget for one retrieval tool invocation (default: 600 seconds)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Largest artifact handed to a caller, in bytes (default: 50 MiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            timeout: default_download_timeout(),
            max_file_size: default_max_file_size(),
        }
    }
}

/// Per-requester rate limiting
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum time between two admitted requests of the same requester (default: 10 seconds)
    #[serde(default = "default_cooldown", with = "duration_serde")]
    pub cooldown: Duration,

    /// Entries idle for longer than `eviction_multiplier × cooldown` are swept (default: 6)
    #[serde(default = "default_eviction_multiplier")]
    pub eviction_multiplier: u32,

    /// How often the sweeper runs (default: 60 seconds)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown: default_cooldown(),
            eviction_multiplier: default_eviction_multiplier(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Quality and size ceilings expressed in the retrieval tool's format grammar
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormatConfig {
    /// Maximum video height in pixels (default: 480)
    #[serde(default = "default_max_height")]
    pub max_height: u32,

    /// Size ceiling for the video stream, and for audio-only downloads (default: 45 MiB)
    #[serde(default = "default_video_stream_max_bytes")]
    pub video_stream_max_bytes: u64,

    /// Size ceiling for the audio stream merged into a video (default: 10 MiB)
    #[serde(default = "default_audio_stream_max_bytes")]
    pub audio_stream_max_bytes: u64,

    /// Container used when merging separate video and audio streams (default: "mp4")
    #[serde(default = "default_merge_output_format")]
    pub merge_output_format: String,

    /// Extension preferred when selecting an audio artifact (default: "m4a")
    #[serde(default = "default_audio_extension")]
    pub audio_extension: String,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            max_height: default_max_height(),
            video_stream_max_bytes: default_video_stream_max_bytes(),
            audio_stream_max_bytes: default_audio_stream_max_bytes(),
            merge_output_format: default_merge_output_format(),
            audio_extension: default_audio_extension(),
        }
    }
}

/// Retrieval tool location
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Whether to search PATH for yt-dlp (then `python -m yt_dlp`) if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            search_path: true,
        }
    }
}

/// Main configuration for [`MediaDownloader`](crate::MediaDownloader)
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) — directories, concurrency, time and size budgets
/// - [`rate_limit`](RateLimitConfig) — per-requester cooldown
/// - [`format`](FormatConfig) — format selector ceilings
/// - [`tools`](ToolsConfig) — retrieval tool discovery
///
/// Sub-configs are flattened, so the serialized form is a single flat object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Per-requester rate limiting
    #[serde(flatten)]
    pub rate_limit: RateLimitConfig,

    /// Format selector ceilings
    #[serde(flatten)]
    pub format: FormatConfig,

    /// Retrieval tool location
    #[serde(flatten)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Destination root
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Build a configuration from defaults overlaid with process environment variables
    ///
    /// Recognised variables: `MAX_CONCURRENT_DOWNLOADS`, `USER_COOLDOWN_SECONDS`,
    /// `DOWNLOAD_TIMEOUT_SECONDS`, `MAX_FILE_SIZE_BYTES`, `DOWNLOADS_DIR`, `YTDLP_PATH`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values produced by `lookup` onto this configuration
    ///
    /// `lookup` receives a variable name and returns its value, if set.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAX_CONCURRENT_DOWNLOADS") {
            self.download.max_concurrent_downloads = parse_env("MAX_CONCURRENT_DOWNLOADS", &v)?;
        }
        if let Some(v) = lookup("USER_COOLDOWN_SECONDS") {
            self.rate_limit.cooldown =
                Duration::from_secs(parse_env("USER_COOLDOWN_SECONDS", &v)?);
        }
        if let Some(v) = lookup("DOWNLOAD_TIMEOUT_SECONDS") {
            self.download.timeout = Duration::from_secs(parse_env("DOWNLOAD_TIMEOUT_SECONDS", &v)?);
        }
        if let Some(v) = lookup("MAX_FILE_SIZE_BYTES") {
            self.download.max_file_size = parse_env("MAX_FILE_SIZE_BYTES", &v)?;
        }
        if let Some(v) = lookup("DOWNLOADS_DIR") {
            self.download.download_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("YTDLP_PATH") {
            self.tools.ytdlp_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Reject settings the downloader cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::config(
                "max_concurrent_downloads",
                "must be at least 1",
            ));
        }
        if self.download.timeout.is_zero() {
            return Err(Error::config("timeout", "must be greater than zero"));
        }
        if self.download.max_file_size == 0 {
            return Err(Error::config("max_file_size", "must be greater than zero"));
        }
        if self.rate_limit.sweep_interval.is_zero() {
            return Err(Error::config("sweep_interval", "must be greater than zero"));
        }
        if self.format.merge_output_format.trim().is_empty() {
            return Err(Error::config("merge_output_format", "must not be empty"));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(key, format!("invalid value {value:?}")))
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(600) // 10 minutes
}

fn default_max_file_size() -> u64 {
    TRANSPORT_LIMIT_BYTES
}

fn default_cooldown() -> Duration {
    Duration::from_secs(10)
}

fn default_eviction_multiplier() -> u32 {
    6
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_height() -> u32 {
    480
}

// Leaves headroom under the transport limit once audio is merged in
fn default_video_stream_max_bytes() -> u64 {
    45 * MIB
}

fn default_audio_stream_max_bytes() -> u64 {
    10 * MIB
}

fn default_merge_output_format() -> String {
    "mp4".to_string()
}

fn default_audio_extension() -> String {
    "m4a".to_string()
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
