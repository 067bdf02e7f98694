//! Single-item downloads.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::artifact::{self, Artifact};
use crate::cleanup;
use crate::error::{DownloadError, Result};
use crate::retrieval::{DownloadMode, RetrievalOutcome, format::preferred_extension};
use crate::types::{DownloadRequest, RequestState};

use super::{Admission, MediaDownloader, produced_files};

impl MediaDownloader {
    /// Download the single item `request` points at
    ///
    /// Flow: rate limit → admission slot → destination directory → yt-dlp with the
    /// capped format selector → artifact selection → size check → hand-off.
    /// Everything but the returned file is removed from the destination, on success and
    /// on failure alike.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::RateLimited`] if the requester is still cooling down
    /// - [`DownloadError::Timeout`] if the tool ran out of time (it is killed)
    /// - [`DownloadError::ProcessFailed`] if the tool exited non-zero
    /// - [`DownloadError::NoArtifact`] if the tool succeeded but left no file
    /// - [`DownloadError::TooLarge`] if the file exceeds the size ceiling (it is deleted)
    /// - [`Error::ShuttingDown`](crate::Error::ShuttingDown) after [`shutdown`](Self::shutdown)
    pub async fn download_single(&self, request: &DownloadRequest) -> Result<Artifact> {
        self.run_single(request, None).await
    }

    /// [`download_single`](Self::download_single), abandoned when `cancel` fires
    ///
    /// Cancellation kills the tool, releases the admission slot and cleans the
    /// destination before [`DownloadError::Cancelled`] is returned.
    pub async fn download_single_with_cancel(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        self.run_single(request, Some(cancel)).await
    }

    async fn run_single(
        &self,
        request: &DownloadRequest,
        caller: Option<&CancellationToken>,
    ) -> Result<Artifact> {
        let admission = self.admit(request, caller).await?;
        let job = self.job(request, DownloadMode::Single);

        let selected = match self.retriever.retrieve(&job, &admission.token).await {
            Ok(outcome) => {
                admission.tracked.advance(RequestState::Succeeded);
                self.select_single(request, &admission, outcome).await
            }
            Err(e) => Err(e),
        };

        match selected {
            Ok((path, size)) => {
                admission.tracked.advance(RequestState::Selected);
                tracing::info!(
                    request_id = %admission.tracked.id(),
                    requester = %request.requester(),
                    ?path,
                    size,
                    "download complete"
                );
                let notice = admission.tracked.cleanup_notice(1);
                admission.tracked.settle(RequestState::HandedOff);
                Ok(Artifact::new(path, size).with_notice(notice))
            }
            Err(e) => {
                self.fail(admission, request.destination(), &e).await;
                Err(e)
            }
        }
    }

    /// Choose the artifact among the files this run produced and enforce the size ceiling
    async fn select_single(
        &self,
        request: &DownloadRequest,
        admission: &Admission,
        outcome: RetrievalOutcome,
    ) -> Result<(PathBuf, u64)> {
        let destination = request.destination();
        let produced = produced_files(outcome.files, &admission.baseline);
        let preferred = preferred_extension(request.kind(), &self.config.format);

        let chosen = if produced.is_empty()
            && let Some(existing) = outcome
                .reused
                .iter()
                .find(|p| admission.baseline.contains(*p))
        {
            // The earlier artifact belongs to someone else; hand off a name of our own
            let own = artifact::duplicate(existing, admission.tracked.id()).await?;
            tracing::debug!(
                request_id = %admission.tracked.id(),
                ?existing,
                path = ?own,
                "reusing existing download"
            );
            own
        } else {
            artifact::prune_to_selection(destination, &produced, Some(preferred)).await?
        };

        let size = tokio::fs::metadata(&chosen).await?.len();
        let limit = self.config.download.max_file_size;
        if size > limit {
            cleanup::remove_file(&chosen).await;
            return Err(DownloadError::TooLarge { size, limit }.into());
        }
        Ok((chosen, size))
    }
}
