//! Retrieval tool argument construction
//!
//! The format selector and output template are a fixed external protocol. They are
//! built here from typed configuration so the grammar lives in one place and can be
//! checked without running a process.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;

use crate::config::FormatConfig;
use crate::types::MediaKind;

const MIB: u64 = 1024 * 1024;

/// Single item or whole playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMode {
    /// Only the item the URL points at, even if it is part of a playlist
    Single,
    /// Every entry of the playlist
    Playlist,
}

/// A format selector expression, e.g. `bestaudio[filesize<45MiB]/best`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSelector(String);

impl FormatSelector {
    /// Selector biased toward the configured resolution and size ceilings
    ///
    /// Video prefers a capped video stream merged with a capped audio stream, then a
    /// capped pre-merged stream, then anything. Audio prefers a capped audio stream.
    pub fn for_kind(kind: MediaKind, config: &FormatConfig) -> Self {
        let video_max = size_token(config.video_stream_max_bytes);
        match kind {
            MediaKind::Video => {
                let height = config.max_height;
                let audio_max = size_token(config.audio_stream_max_bytes);
                Self(format!(
                    "bestvideo[height<={height}][filesize<{video_max}]+bestaudio[filesize<{audio_max}]\
                     /best[height<={height}][filesize<{video_max}]/best"
                ))
            }
            MediaKind::Audio => Self(format!("bestaudio[filesize<{video_max}]/best")),
        }
    }

    /// The selector string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormatSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Byte count in the tool's filesize syntax (`45MiB`, or plain bytes)
fn size_token(bytes: u64) -> String {
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MiB", bytes / MIB)
    } else {
        bytes.to_string()
    }
}

/// Output path template; playlist names embed the entry index to avoid collisions
pub fn output_template(dir: &Path, mode: DownloadMode) -> OsString {
    let name = match mode {
        DownloadMode::Single => "%(title)s.%(ext)s",
        DownloadMode::Playlist => "%(playlist_index)s - %(title)s.%(ext)s",
    };
    dir.join(name).into_os_string()
}

/// Extension the selector should favour for `kind`
pub fn preferred_extension(kind: MediaKind, config: &FormatConfig) -> &str {
    match kind {
        MediaKind::Video => &config.merge_output_format,
        MediaKind::Audio => &config.audio_extension,
    }
}

/// Arguments for a download run (without the program itself)
pub fn download_args(
    url: &str,
    dir: &Path,
    kind: MediaKind,
    mode: DownloadMode,
    config: &FormatConfig,
) -> Vec<OsString> {
    let selector = FormatSelector::for_kind(kind, config);
    let mut args: Vec<OsString> = vec![
        "-f".into(),
        selector.as_str().into(),
        "--merge-output-format".into(),
        config.merge_output_format.as_str().into(),
        "-o".into(),
        output_template(dir, mode),
    ];

    match mode {
        DownloadMode::Single => args.push("--no-playlist".into()),
        DownloadMode::Playlist => {
            args.push("--yes-playlist".into());
            // One broken entry must not abort the rest
            args.push("--ignore-errors".into());
        }
    }
    args.push("--no-warnings".into());
    // The URL is user input; never let it be parsed as an option
    args.push("--".into());
    args.push(url.into());
    args
}

/// Arguments for metadata-only mode: one JSON object on stdout, nothing downloaded
pub fn info_args(url: &str) -> Vec<OsString> {
    vec![
        "--dump-json".into(),
        "--no-playlist".into(),
        "--no-warnings".into(),
        "--".into(),
        url.into(),
    ]
}
