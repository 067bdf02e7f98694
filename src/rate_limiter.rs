//! Per-requester cooldown gate
//!
//! A requester is admitted when at least `cooldown` has passed since their last
//! admission. The check and the timestamp update happen in one critical section, so two
//! concurrent requests from the same requester can never both be admitted.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::types::RequesterId;

/// Rate limiter with per-requester tracking
///
/// Owned by the downloader and injected where needed; independent instances share
/// nothing, which keeps tests isolated.
#[derive(Debug)]
pub struct RateLimiter {
    /// Last admission time per requester
    last_admitted: Mutex<HashMap<RequesterId, Instant>>,
    /// Minimum time between two admissions of the same requester
    cooldown: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter with the given cooldown
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_admitted: Mutex::new(HashMap::new()),
            cooldown,
        }
    }

    /// Configured cooldown
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Admit or deny `requester` now
    ///
    /// Returns `true` and records the admission time when the cooldown has elapsed
    /// (always for a first request), `false` without touching any state otherwise.
    pub fn admit(&self, requester: RequesterId) -> bool {
        self.admit_at(requester, Instant::now())
    }

    /// Admit or deny `requester` as of `now`
    pub fn admit_at(&self, requester: RequesterId, now: Instant) -> bool {
        self.try_admit_at(requester, now).is_ok()
    }

    /// Admit `requester` now, or report how long they still have to wait
    ///
    /// Decision and remaining time come from the same critical section.
    pub fn try_admit(&self, requester: RequesterId) -> Result<(), Duration> {
        self.try_admit_at(requester, Instant::now())
    }

    /// [`try_admit`](Self::try_admit) as of `now`
    pub fn try_admit_at(&self, requester: RequesterId, now: Instant) -> Result<(), Duration> {
        let mut entries = self.entries();
        let elapsed = entries
            .get(&requester)
            .map(|last| now.saturating_duration_since(*last))
            .unwrap_or(self.cooldown);

        if elapsed < self.cooldown {
            return Err(self.cooldown - elapsed);
        }

        entries.insert(requester, now);
        Ok(())
    }

    /// Time until `requester` would be admitted, zero if they would be admitted now
    ///
    /// Read-only; the answer may already be stale when a concurrent admission lands,
    /// which is fine for display purposes.
    pub fn remaining_cooldown(&self, requester: RequesterId) -> Duration {
        self.remaining_cooldown_at(requester, Instant::now())
    }

    /// Time until `requester` would be admitted, as of `now`
    pub fn remaining_cooldown_at(&self, requester: RequesterId, now: Instant) -> Duration {
        let entries = self.entries();
        match entries.get(&requester) {
            Some(last) => self
                .cooldown
                .saturating_sub(now.saturating_duration_since(*last)),
            None => Duration::ZERO,
        }
    }

    /// Drop entries whose last admission is older than `multiplier × cooldown`
    ///
    /// Returns how many entries were removed. Evicted requesters behave like new ones,
    /// which is only observable if `multiplier` is below 1.
    pub fn evict_stale(&self, multiplier: u32) -> usize {
        self.evict_stale_at(multiplier, Instant::now())
    }

    /// Drop stale entries as of `now`
    pub fn evict_stale_at(&self, multiplier: u32, now: Instant) -> usize {
        let max_idle = self.cooldown.saturating_mul(multiplier.max(1));
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, last| now.saturating_duration_since(*last) < max_idle);
        before - entries.len()
    }

    /// Number of tracked requesters
    pub fn tracked(&self) -> usize {
        self.entries().len()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RequesterId, Instant>> {
        // The map stays consistent even if a holder panicked; no invariant spans the lock
        self.last_admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
