//! Metadata lookups.

use std::sync::atomic::Ordering;

use crate::error::{Error, Result};
use crate::source::validate_url;
use crate::types::MediaInfo;

use super::MediaDownloader;

impl MediaDownloader {
    /// Fetch metadata for `url` without downloading anything
    ///
    /// Runs through the admission gate with the download timeout, but is not
    /// rate-limited and not tracked as a request.
    pub async fn fetch_info(&self, url: &str) -> Result<MediaInfo> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        let url = validate_url(url)?;

        let token = self.shutdown_token.child_token();
        let _permit = self.gate.acquire(&token).await?;

        let info = self
            .retriever
            .probe(url.as_str(), self.config.download.timeout, &token)
            .await
            .inspect_err(|e| tracing::warn!(%url, error = %e, "metadata lookup failed"))?;

        tracing::debug!(%url, title = %info.title, "metadata fetched");
        Ok(info)
    }
}
