//! Source URL validation and classification

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Platforms the front-end advertises; yt-dlp itself supports many more
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourcePlatform {
    /// youtube.com, youtu.be
    YouTube,
    /// instagram.com
    Instagram,
    /// pinterest.com
    Pinterest,
    /// Anything else
    Other,
}

#[allow(clippy::expect_used)]
static PLATFORM_PATTERNS: LazyLock<Vec<(SourcePlatform, Regex)>> = LazyLock::new(|| {
    [
        (
            SourcePlatform::YouTube,
            r"(?i)^(https?://)?(www\.|m\.|music\.)?(youtube\.com|youtu\.be)/.+",
        ),
        (
            SourcePlatform::Instagram,
            r"(?i)^(https?://)?(www\.)?instagram\.com/.+",
        ),
        (
            SourcePlatform::Pinterest,
            r"(?i)^(https?://)?(www\.|[a-z]{2}\.)?pinterest\.com/.+",
        ),
    ]
    .into_iter()
    .map(|(platform, pattern)| {
        (
            platform,
            Regex::new(pattern).expect("platform patterns are valid literals"),
        )
    })
    .collect()
});

impl SourcePlatform {
    /// Classify a URL
    pub fn detect(url: &str) -> Self {
        PLATFORM_PATTERNS
            .iter()
            .find(|(_, re)| re.is_match(url.trim()))
            .map(|(platform, _)| *platform)
            .unwrap_or(SourcePlatform::Other)
    }

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            SourcePlatform::YouTube => "YouTube",
            SourcePlatform::Instagram => "Instagram",
            SourcePlatform::Pinterest => "Pinterest",
            SourcePlatform::Other => "Other",
        }
    }
}

impl std::fmt::Display for SourcePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Parse `input` as an absolute http(s) URL
pub fn validate_url(input: &str) -> Result<Url> {
    let trimmed = input.trim();
    let url = Url::parse(trimmed).map_err(|e| Error::InvalidUrl {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        "http" | "https" => Err(Error::InvalidUrl {
            url: trimmed.to_string(),
            reason: "missing host".to_string(),
        }),
        other => Err(Error::InvalidUrl {
            url: trimmed.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

/// Whether the URL points at a playlist rather than a single item
pub fn is_playlist_url(url: &str) -> bool {
    match Url::parse(url.trim()) {
        Ok(parsed) => {
            parsed.query_pairs().any(|(k, _)| k == "list")
                || parsed
                    .path_segments()
                    .is_some_and(|mut segs| segs.any(|s| s.eq_ignore_ascii_case("playlist")))
        }
        Err(_) => url.contains("list=") || url.contains("playlist"),
    }
}
