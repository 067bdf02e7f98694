//! In-memory request table and state transitions.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;

use crate::artifact::CleanupNotice;
use crate::types::{ActiveRequest, DownloadRequest, Event, RequestId, RequestState, RequesterId};

use super::MediaDownloader;

/// Requests between `Pending` and hand-off (or their terminal state)
pub(crate) type RequestTable = Arc<Mutex<HashMap<RequestId, ActiveRequest>>>;

pub(crate) fn lock_table(
    table: &Mutex<HashMap<RequestId, ActiveRequest>>,
) -> MutexGuard<'_, HashMap<RequestId, ActiveRequest>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A request's row in the table
///
/// Every transition is logged and broadcast. The row disappears when the request
/// settles; if the owning future is dropped first, the row is removed, the request is
/// reported as `Cancelled` and whatever it wrote is deleted in the background.
pub(crate) struct TrackedRequest {
    id: RequestId,
    requester: RequesterId,
    table: RequestTable,
    event_tx: broadcast::Sender<Event>,
    /// Destination and the files that predate the request
    scratch: Option<(PathBuf, HashSet<PathBuf>)>,
    settled: bool,
}

impl TrackedRequest {
    pub(crate) fn id(&self) -> RequestId {
        self.id
    }

    /// Remember where the request writes, for cleanup if it is abandoned
    pub(crate) fn watch_directory(&mut self, destination: PathBuf, baseline: HashSet<PathBuf>) {
        self.scratch = Some((destination, baseline));
    }

    /// Move to `state`, keeping the row
    pub(crate) fn advance(&self, state: RequestState) {
        if let Some(entry) = lock_table(&self.table).get_mut(&self.id) {
            entry.state = state;
        }
        self.announce(state);
    }

    /// Move to `state` and drop the row
    pub(crate) fn settle(mut self, state: RequestState) {
        self.settled = true;
        lock_table(&self.table).remove(&self.id);
        self.announce(state);
    }

    /// Notice shared by the `artifacts` handed off for this request
    pub(crate) fn cleanup_notice(&self, artifacts: usize) -> CleanupNotice {
        CleanupNotice::new(self.event_tx.clone(), self.id, self.requester, artifacts)
    }

    fn announce(&self, state: RequestState) {
        tracing::debug!(
            request_id = %self.id,
            requester = %self.requester,
            ?state,
            "request state changed"
        );
        self.event_tx
            .send(Event::StateChanged {
                id: self.id,
                requester: self.requester,
                state,
            })
            .ok();
    }
}

impl Drop for TrackedRequest {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        lock_table(&self.table).remove(&self.id);
        self.announce(RequestState::Cancelled);

        if let Some((destination, baseline)) = self.scratch.take()
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            handle.spawn(async move {
                super::discard_new_files(&destination, &baseline).await;
            });
        }
    }
}

impl MediaDownloader {
    /// Register `request` as `Pending`
    pub(crate) fn track(&self, request: &DownloadRequest) -> TrackedRequest {
        let id = RequestId(self.next_request_id.fetch_add(1, Ordering::Relaxed));
        let requester = request.requester();

        lock_table(&self.requests).insert(
            id,
            ActiveRequest {
                id,
                requester,
                url: request.url().to_string(),
                kind: request.kind(),
                state: RequestState::Pending,
                started_at: Utc::now(),
            },
        );

        let tracked = TrackedRequest {
            id,
            requester,
            table: self.requests.clone(),
            event_tx: self.event_tx.clone(),
            scratch: None,
            settled: false,
        };
        tracked.announce(RequestState::Pending);
        tracked
    }

    /// Snapshot of in-flight requests, oldest first
    pub fn active_requests(&self) -> Vec<ActiveRequest> {
        let mut active: Vec<ActiveRequest> = lock_table(&self.requests).values().cloned().collect();
        active.sort_by_key(|r| r.id);
        active
    }

    pub(crate) fn in_flight(&self) -> usize {
        lock_table(&self.requests).len()
    }
}
