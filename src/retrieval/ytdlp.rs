//! yt-dlp backend

use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::format::{download_args, info_args};
use super::process::{Invocation, RetrievalOutcome, RetrievalProcess};
use super::traits::{MediaRetriever, RetrievalJob};
use crate::config::{FormatConfig, ToolsConfig};
use crate::error::{Error, Result};
use crate::types::MediaInfo;

// yt-dlp skips a download whose output file already exists and says so on stdout
#[allow(clippy::expect_used)]
static ALREADY_DOWNLOADED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\[download\] (.+?) has already been downloaded")
        .expect("already-downloaded pattern is a valid literal")
});

/// Output files yt-dlp reported as already present, resolved against `destination`
pub fn already_downloaded(stdout: &str, destination: &Path) -> Vec<PathBuf> {
    ALREADY_DOWNLOADED
        .captures_iter(stdout)
        .filter_map(|c| c.get(1))
        .map(|m| destination.join(m.as_str().trim()))
        .collect()
}

/// How to start yt-dlp: a program plus arguments that precede the real ones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Executable
    pub program: PathBuf,
    /// Leading arguments (e.g. `-m yt_dlp` when running through Python)
    pub prefix_args: Vec<String>,
}

impl ToolCommand {
    /// Run `program` directly
    pub fn direct(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Run the `yt_dlp` module through a Python interpreter
    pub fn python_module(python: impl Into<PathBuf>) -> Self {
        Self {
            program: python.into(),
            prefix_args: vec!["-m".to_string(), "yt_dlp".to_string()],
        }
    }

    /// Locate yt-dlp according to `tools`
    ///
    /// Order: explicit `ytdlp_path`, then `yt-dlp` on PATH, then `python3`/`python` on
    /// PATH running the module. PATH is only searched when `search_path` is set.
    pub fn resolve(tools: &ToolsConfig) -> Option<Self> {
        if let Some(path) = &tools.ytdlp_path {
            return Some(Self::direct(path.clone()));
        }
        if !tools.search_path {
            return None;
        }
        if let Ok(path) = which::which("yt-dlp") {
            return Some(Self::direct(path));
        }
        ["python3", "python"]
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(Self::python_module)
    }

    fn invocation(&self, working_dir: &Path) -> Invocation {
        Invocation::new(&self.program, working_dir).args(self.prefix_args.iter())
    }
}

/// Retriever that shells out to yt-dlp
///
/// # Examples
///
/// ```no_run
/// use media_dl::retrieval::YtDlpRetriever;
/// use media_dl::config::FormatConfig;
/// use std::path::PathBuf;
///
/// // Explicit binary
/// let retriever = YtDlpRetriever::new(PathBuf::from("/usr/local/bin/yt-dlp"), FormatConfig::default());
///
/// // Or auto-discover from PATH
/// let retriever = YtDlpRetriever::from_path(FormatConfig::default())
///     .expect("yt-dlp not found in PATH");
/// ```
#[derive(Debug, Clone)]
pub struct YtDlpRetriever {
    command: ToolCommand,
    format: FormatConfig,
}

impl YtDlpRetriever {
    /// Create a retriever with an explicit binary path
    pub fn new(binary_path: PathBuf, format: FormatConfig) -> Self {
        Self::with_command(ToolCommand::direct(binary_path), format)
    }

    /// Create a retriever from a resolved command
    pub fn with_command(command: ToolCommand, format: FormatConfig) -> Self {
        Self { command, format }
    }

    /// Attempt to find yt-dlp (or a Python able to run it) in PATH
    pub fn from_path(format: FormatConfig) -> Option<Self> {
        ToolCommand::resolve(&ToolsConfig::default()).map(|c| Self::with_command(c, format))
    }

    /// Build from the tools and format sections of the configuration
    ///
    /// # Errors
    ///
    /// [`Error::NotSupported`] when no way to run yt-dlp was found.
    pub fn from_config(tools: &ToolsConfig, format: FormatConfig) -> Result<Self> {
        ToolCommand::resolve(tools)
            .map(|c| Self::with_command(c, format))
            .ok_or_else(|| {
                Error::NotSupported(
                    "yt-dlp not found: set ytdlp_path or install yt-dlp in PATH".to_string(),
                )
            })
    }

    /// The command used to start yt-dlp
    pub fn command(&self) -> &ToolCommand {
        &self.command
    }
}

#[async_trait]
impl MediaRetriever for YtDlpRetriever {
    async fn retrieve(
        &self,
        job: &RetrievalJob,
        cancel: &CancellationToken,
    ) -> Result<RetrievalOutcome> {
        let invocation = self.command.invocation(&job.destination).args(download_args(
            &job.url,
            &job.destination,
            job.kind,
            job.mode,
            &self.format,
        ));
        tracing::info!(
            url = %job.url,
            kind = %job.kind,
            mode = ?job.mode,
            "starting yt-dlp download"
        );
        let mut outcome = RetrievalProcess::run(&invocation, job.timeout, cancel).await?;
        outcome.reused = already_downloaded(&outcome.stdout, &job.destination);
        if !outcome.reused.is_empty() {
            tracing::debug!(reused = ?outcome.reused, "yt-dlp reused existing output");
        }
        Ok(outcome)
    }

    async fn probe(
        &self,
        url: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<MediaInfo> {
        let invocation = self
            .command
            .invocation(&std::env::temp_dir())
            .args(info_args(url))
            .without_outputs();
        let outcome = RetrievalProcess::run(&invocation, timeout, cancel).await?;

        // One JSON object per line; metadata mode with --no-playlist prints exactly one
        let line = outcome
            .stdout
            .lines()
            .find(|l| l.trim_start().starts_with('{'))
            .unwrap_or_default();
        Ok(serde_json::from_str(line)?)
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}
