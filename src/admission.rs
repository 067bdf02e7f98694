//! Bounded concurrency for retrieval tool invocations
//!
//! The gate is the only global throttle on external processes: at most `capacity`
//! permits exist, and a permit is returned when its guard is dropped, whichever way the
//! guarded section ends.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, Error, Result};

/// Counting semaphore shared by all requests of a downloader
#[derive(Clone, Debug)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Scoped admission; the slot is released on drop
#[must_use = "the slot is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    /// Create a gate with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot
    ///
    /// Suspends the calling task (never a thread) until a slot frees up. Fails with
    /// [`DownloadError::Cancelled`] if `cancel` fires first and with
    /// [`Error::ShuttingDown`] once the gate is closed.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<AdmissionPermit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DownloadError::Cancelled.into()),
            permit = self.semaphore.clone().acquire_owned() => match permit {
                Ok(p) => Ok(AdmissionPermit { _permit: p }),
                Err(_) => Err(Error::ShuttingDown),
            },
        }
    }

    /// Take a slot only if one is free right now
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|p| AdmissionPermit { _permit: p })
    }

    /// Configured number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Stop admitting; pending and future `acquire` calls fail with `ShuttingDown`
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}
