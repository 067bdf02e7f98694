//! Choosing the finished file among everything the retrieval tool left behind
//!
//! The retrieval tool downloads video and audio as separate streams and merges them.
//! When merging fails or is interrupted, per-stream fragments (`title.f137.mp4`,
//! `title.f140.m4a`) and in-progress files (`*.part`, `*.ytdl`) stay in the directory.
//! The selector filters those out, picks one artifact and deletes the rest.
//!
//! An [`Artifact`] is the caller-owned handle to a selected file. It is deleted exactly
//! once: explicitly through [`Artifact::release`] / [`Artifact::consume`], or, if the
//! caller drops it (early return, `?`, panic), by a cleanup task spawned from `Drop`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cleanup;
use crate::error::{DownloadError, Result};
use crate::types::{Event, RequestId, RequestState, RequesterId};

// `<stem>.f<format id>.<ext>`, the naming of unmerged per-stream downloads
#[allow(clippy::expect_used)]
static FRAGMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.f\d+[a-z0-9-]*\.[a-z0-9]+$").expect("fragment pattern is a valid literal")
});

#[allow(clippy::expect_used)]
static LEADING_INDEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)").expect("index pattern is a valid literal"));

const IN_PROGRESS_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp", ".tmp"];

/// Result of [`select`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// The file to hand to the caller
    pub chosen: PathBuf,
    /// Every other file of the listing; to be deleted
    pub discarded: Vec<PathBuf>,
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

/// Hidden files (leading dot)
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Unmerged per-stream fragment, e.g. `clip.f140.webm`
pub fn is_fragment(name: &str) -> bool {
    FRAGMENT_PATTERN.is_match(name)
}

/// Download still in progress or abandoned mid-way
pub fn is_in_progress(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    IN_PROGRESS_SUFFIXES.iter().any(|s| lower.ends_with(s)) || lower.contains(".part-frag")
}

/// Anything that is never a final artifact
pub fn is_transient(name: &str) -> bool {
    is_hidden(name) || is_fragment(name) || is_in_progress(name)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension.trim_start_matches('.')))
}

/// Non-transient files of `listing`, or the whole listing when that would be empty
fn candidates(listing: &[PathBuf]) -> Vec<&PathBuf> {
    let finished: Vec<&PathBuf> = listing
        .iter()
        .filter(|p| !is_transient(file_name(p)))
        .collect();

    if finished.is_empty() {
        // Better to surface a fragment than nothing at all
        listing.iter().collect()
    } else {
        finished
    }
}

/// Pick one artifact from a directory listing
///
/// 1. hidden, fragment and in-progress files are excluded;
/// 2. if that leaves nothing, the unfiltered listing is used instead;
/// 3. the first candidate with `preferred_extension` wins, else the first candidate.
///
/// Returns `None` only for an empty listing.
pub fn select(listing: &[PathBuf], preferred_extension: Option<&str>) -> Option<Selection> {
    let pool = candidates(listing);

    let chosen = preferred_extension
        .and_then(|ext| pool.iter().find(|p| has_extension(p, ext)))
        .or_else(|| pool.first())
        .map(|p| (*p).clone())?;

    let discarded = listing.iter().filter(|p| **p != chosen).cloned().collect();
    Some(Selection { chosen, discarded })
}

/// Split a playlist directory listing into finished entries and leftovers
///
/// Uses the same transient filter and fallback as [`select`], but keeps every
/// candidate. Entries are ordered by their leading playlist index, then by name.
pub fn finished_files(listing: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut keep: Vec<PathBuf> = candidates(listing).into_iter().cloned().collect();
    let discard = listing
        .iter()
        .filter(|p| !keep.contains(p))
        .cloned()
        .collect();

    keep.sort_by(|a, b| {
        let (a, b) = (file_name(a), file_name(b));
        playlist_index(a).cmp(&playlist_index(b)).then_with(|| a.cmp(b))
    });
    (keep, discard)
}

fn playlist_index(name: &str) -> u64 {
    LEADING_INDEX
        .captures(name)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(u64::MAX)
}

/// Regular files directly inside `dir`, sorted by name
pub async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// List `dir`, select one artifact and delete every other file
///
/// Deletion is best-effort: failures are logged, never raised.
pub async fn select_and_prune(dir: &Path, preferred_extension: Option<&str>) -> Result<PathBuf> {
    let listing = list_files(dir).await?;
    prune_to_selection(dir, &listing, preferred_extension).await
}

/// Select one artifact out of `listing` (files inside `dir`) and delete the rest of it
///
/// Files of `dir` that are not in `listing` are left alone.
pub async fn prune_to_selection(
    dir: &Path,
    listing: &[PathBuf],
    preferred_extension: Option<&str>,
) -> Result<PathBuf> {
    let Some(selection) = select(listing, preferred_extension) else {
        return Err(DownloadError::NoArtifact {
            dir: dir.to_path_buf(),
        }
        .into());
    };

    if !selection.discarded.is_empty() {
        let removed = cleanup::remove_files(&selection.discarded).await;
        debug!(
            ?dir,
            chosen = ?selection.chosen,
            removed,
            "pruned leftover files"
        );
    }
    Ok(selection.chosen)
}

/// Give `existing` a second name, `<stem>.<tag>.<ext>`, next to it
///
/// The new name is hard-linked when the filesystem allows it and copied otherwise, so
/// either file can be deleted without touching the other.
pub(crate) async fn duplicate(existing: &Path, tag: impl std::fmt::Display) -> Result<PathBuf> {
    let stem = existing
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match existing.extension() {
        Some(ext) => format!("{stem}.{tag}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{tag}"),
    };
    let target = existing.with_file_name(name);

    if let Err(e) = tokio::fs::hard_link(existing, &target).await {
        debug!(?existing, error = %e, "hard link failed, copying instead");
        tokio::fs::copy(existing, &target).await?;
    }
    Ok(target)
}

/// Who to tell when a request's artifacts are cleaned up
///
/// Clones share one countdown; the event goes out when the last artifact is released.
#[derive(Debug, Clone)]
pub(crate) struct CleanupNotice {
    event_tx: broadcast::Sender<Event>,
    id: RequestId,
    requester: RequesterId,
    pending: Arc<AtomicUsize>,
}

impl CleanupNotice {
    pub(crate) fn new(
        event_tx: broadcast::Sender<Event>,
        id: RequestId,
        requester: RequesterId,
        artifacts: usize,
    ) -> Self {
        Self {
            event_tx,
            id,
            requester,
            pending: Arc::new(AtomicUsize::new(artifacts)),
        }
    }

    fn send(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        debug!(request_id = %self.id, requester = %self.requester, "request cleaned up");
        self.event_tx
            .send(Event::StateChanged {
                id: self.id,
                requester: self.requester,
                state: RequestState::CleanedUp,
            })
            .ok();
    }
}

/// A downloaded file owned by the caller until it is released
///
/// The file (and its directory, once empty) is deleted exactly once, however the
/// caller's consumption ends.
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
    size: u64,
    released: bool,
    notice: Option<CleanupNotice>,
}

impl Artifact {
    pub(crate) fn new(path: PathBuf, size: u64) -> Self {
        Self {
            path,
            size,
            released: false,
            notice: None,
        }
    }

    pub(crate) fn with_notice(mut self, notice: CleanupNotice) -> Self {
        self.notice = Some(notice);
        self
    }

    /// Location of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes when the artifact was selected
    pub fn size(&self) -> u64 {
        self.size
    }

    /// File name without the directory
    pub fn file_name(&self) -> &str {
        file_name(&self.path)
    }

    /// Delete the file now, then its directory if it became empty
    pub async fn release(mut self) {
        self.released = true;
        cleanup::remove_file(&self.path).await;
        if let Some(parent) = self.path.parent() {
            cleanup::remove_dir_if_empty(parent).await;
        }
        if let Some(notice) = &self.notice {
            notice.send();
        }
    }

    /// Run `consumer` on the file and release it afterwards, whatever the outcome
    ///
    /// The consumer's output is returned unchanged, so errors flow through to the caller
    /// after the file is gone.
    pub async fn consume<F, Fut, T>(self, consumer: F) -> T
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = T>,
    {
        // A panic inside the consumer unwinds through `self`, whose Drop cleans up
        let output = consumer(self.path.clone()).await;
        self.release().await;
        output
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        warn!(path = ?self.path, "artifact dropped without release, scheduling cleanup");
        cleanup::spawn_remove_file(self.path.clone());
        if let Some(notice) = &self.notice {
            notice.send();
        }
    }
}
