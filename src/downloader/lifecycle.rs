//! Background sweeper and shutdown coordination.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::Result;
use crate::types::Event;

use super::MediaDownloader;

/// How long [`MediaDownloader::shutdown`] waits for in-flight requests
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl MediaDownloader {
    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new requests
    /// 2. Cancels in-flight requests, killing their retrieval processes
    /// 3. Closes the admission gate so queued requests fail fast
    /// 4. Waits for in-flight requests to settle with a timeout (30 seconds)
    ///
    /// The rate-limit sweeper stops with the cancellation. Calling this twice is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new requests
        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new requests");

        // 2. Cancel everything that is running or waiting for a slot
        self.shutdown_token.cancel();

        // 3. Close the gate
        self.gate.close();

        // 4. Wait for active requests to settle with timeout
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active_requests()).await {
            Ok(()) => tracing::info!("All active requests settled"),
            Err(_) => tracing::warn!(
                in_flight = self.in_flight(),
                "Timeout waiting for requests to settle, proceeding with shutdown"
            ),
        }

        let _ = self.event_tx.send(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether new requests are accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }

    async fn wait_for_active_requests(&self) {
        loop {
            let in_flight = self.in_flight();
            if in_flight == 0 {
                return;
            }
            tracing::debug!(in_flight, "Waiting for active requests to settle");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Periodically evict idle rate-limit entries
    ///
    /// Needs a tokio runtime; without one the map is only bounded by the number of
    /// distinct requesters. The task holds a weak reference and exits once the
    /// downloader is gone or shut down.
    pub(crate) fn start_sweeper(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no tokio runtime, rate-limit sweeper not started");
            return;
        };

        let limiter = Arc::downgrade(&self.rate_limiter);
        let shutdown = self.shutdown_token.clone();
        let period = self.config.rate_limit.sweep_interval;
        let multiplier = self.config.rate_limit.eviction_multiplier;

        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let evicted = limiter.evict_stale(multiplier);
                if evicted > 0 {
                    tracing::debug!(
                        evicted,
                        tracked = limiter.tracked(),
                        "swept idle rate-limit entries"
                    );
                }
            }
            tracing::debug!("rate-limit sweeper stopped");
        });
    }
}
