use super::*;
use crate::downloader::test_helpers::*;
use crate::types::{MediaInfo, RequestId};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

mod tracking;

/// Drain every event currently buffered for `rx`
fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

/// States reported for request `id`, in order
fn states_of(events: &[Event], id: RequestId) -> Vec<RequestState> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::StateChanged {
                id: event_id,
                state,
                ..
            } if *event_id == id => Some(*state),
            _ => None,
        })
        .collect()
}

/// Wait until `condition` holds, for at most two seconds
async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn fake(retriever: FakeRetriever) -> Arc<FakeRetriever> {
    Arc::new(retriever)
}

fn info(title: &str) -> MediaInfo {
    MediaInfo {
        id: "abc".to_string(),
        title: title.to_string(),
        ..Default::default()
    }
}
