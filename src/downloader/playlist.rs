//! Playlist downloads: every finished entry, partial success accepted.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::artifact::{self, Artifact, list_files};
use crate::cleanup;
use crate::error::{DownloadError, Error, Result};
use crate::retrieval::DownloadMode;
use crate::types::{DownloadRequest, RequestState};

use super::{Admission, MediaDownloader, discard_new_files, produced_files};

impl MediaDownloader {
    /// Download every entry of the playlist `request` points at
    ///
    /// Entries are returned in playlist order. A tool run that fails after some entries
    /// finished still yields those entries; a run that produced nothing usable yields an
    /// empty list. Entries above the size ceiling are deleted and left out.
    ///
    /// # Errors
    ///
    /// Only for requests that never ran to completion: [`DownloadError::RateLimited`],
    /// [`DownloadError::Cancelled`], [`Error::ShuttingDown`], or I/O errors while
    /// preparing the destination.
    pub async fn download_playlist(&self, request: &DownloadRequest) -> Result<Vec<Artifact>> {
        self.run_playlist(request, None).await
    }

    /// [`download_playlist`](Self::download_playlist), abandoned when `cancel` fires
    pub async fn download_playlist_with_cancel(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<Artifact>> {
        self.run_playlist(request, Some(cancel)).await
    }

    async fn run_playlist(
        &self,
        request: &DownloadRequest,
        caller: Option<&CancellationToken>,
    ) -> Result<Vec<Artifact>> {
        let admission = self.admit(request, caller).await?;
        let destination = request.destination();
        let job = self.job(request, DownloadMode::Playlist);

        let listing = match self.retriever.retrieve(&job, &admission.token).await {
            Ok(outcome) => {
                admission.tracked.advance(RequestState::Succeeded);
                outcome.files
            }
            Err(Error::Download(DownloadError::ProcessFailed { exit_code, stderr })) => {
                // With --ignore-errors a non-zero exit still leaves the good entries
                tracing::warn!(
                    request_id = %admission.tracked.id(),
                    ?exit_code,
                    stderr = %stderr,
                    "playlist finished with errors, keeping completed entries"
                );
                admission.tracked.advance(RequestState::Succeeded);
                list_files(destination).await.unwrap_or_default()
            }
            Err(e) => {
                let cancelled = matches!(
                    e,
                    Error::Download(DownloadError::Cancelled) | Error::ShuttingDown
                );
                self.fail(admission, destination, &e).await;
                return if cancelled { Err(e) } else { Ok(Vec::new()) };
            }
        };

        let entries = self.keep_entries(&admission, listing).await;
        if entries.is_empty() {
            tracing::warn!(
                request_id = %admission.tracked.id(),
                url = %request.url(),
                "playlist produced no usable entries"
            );
            discard_new_files(destination, &admission.baseline).await;
            admission.tracked.settle(RequestState::Failed);
            return Ok(Vec::new());
        }

        admission.tracked.advance(RequestState::Selected);
        tracing::info!(
            request_id = %admission.tracked.id(),
            requester = %request.requester(),
            entries = entries.len(),
            "playlist download complete"
        );
        let notice = admission.tracked.cleanup_notice(entries.len());
        admission.tracked.settle(RequestState::HandedOff);

        Ok(entries
            .into_iter()
            .map(|(path, size)| Artifact::new(path, size).with_notice(notice.clone()))
            .collect())
    }

    /// Finished entries within the size ceiling, in playlist order; everything else is deleted
    async fn keep_entries(
        &self,
        admission: &Admission,
        listing: Vec<PathBuf>,
    ) -> Vec<(PathBuf, u64)> {
        let produced = produced_files(listing, &admission.baseline);
        let (finished, leftovers) = artifact::finished_files(&produced);
        if !leftovers.is_empty() {
            cleanup::remove_files(&leftovers).await;
        }

        let limit = self.config.download.max_file_size;
        let mut entries = Vec::with_capacity(finished.len());
        for path in finished {
            let size = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) => {
                    tracing::warn!(?path, error = %e, "playlist entry vanished");
                    continue;
                }
            };
            if size > limit {
                tracing::warn!(
                    request_id = %admission.tracked.id(),
                    ?path,
                    size,
                    limit,
                    "playlist entry too large, skipping"
                );
                cleanup::remove_file(&path).await;
                continue;
            }
            entries.push((path, size));
        }
        entries
    }
}
