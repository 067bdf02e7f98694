//! Best-effort removal of transient files and directories
//!
//! Nothing in here returns an error: failures are logged and swallowed so that cleanup
//! never masks or replaces the primary result of a request.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Delete a file if it exists
///
/// Returns `true` when the file was removed by this call.
pub async fn remove_file(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => {
            info!(?path, "deleted file");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "file already gone");
            false
        }
        Err(e) => {
            warn!(?path, error = %e, "failed to delete file");
            false
        }
    }
}

/// Remove a directory only if it has no entries left
///
/// Returns `true` when the directory was removed by this call.
pub async fn remove_dir_if_empty(path: &Path) -> bool {
    let mut entries = match fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
        Err(e) => {
            warn!(?path, error = %e, "failed to read directory during cleanup");
            return false;
        }
    };

    match entries.next_entry().await {
        Ok(None) => {}
        Ok(Some(_)) => {
            debug!(?path, "directory not empty, keeping it");
            return false;
        }
        Err(e) => {
            warn!(?path, error = %e, "failed to read directory during cleanup");
            return false;
        }
    }

    // A concurrent request may have written into it in the meantime; remove_dir
    // refuses non-empty directories, so that race only costs a log line
    match fs::remove_dir(path).await {
        Ok(()) => {
            debug!(?path, "removed empty directory");
            true
        }
        Err(e) => {
            debug!(?path, error = %e, "could not remove directory");
            false
        }
    }
}

/// Delete a batch of files, returning how many were removed
pub async fn remove_files(paths: &[PathBuf]) -> usize {
    let mut deleted = 0;
    for path in paths {
        if remove_file(path).await {
            deleted += 1;
        }
    }
    deleted
}

/// Delete `path` and then its parent directory if that became empty, without waiting
///
/// Runs on the current tokio runtime when there is one; otherwise falls back to a
/// synchronous removal so the file is never leaked.
pub fn spawn_remove_file(path: PathBuf) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                remove_file(&path).await;
                if let Some(parent) = path.parent() {
                    remove_dir_if_empty(parent).await;
                }
            });
        }
        Err(_) => {
            if let Err(e) = std::fs::remove_file(&path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(?path, error = %e, "failed to delete file");
            }
            if let Some(parent) = path.parent() {
                // Fails harmlessly when the directory is not empty
                let _ = std::fs::remove_dir(parent);
            }
        }
    }
}
