//! Server-sent invalidation stream.
//!
//! Every successful write broadcasts a tag-only [`ChangeEvent`]; each
//! connected client receives it as one `data: {"type":"…"}` frame.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::api::SharedState;
use crate::domain::{ChangeEvent, ChangeKind};

/// Capacity of the broadcast ring. A subscriber that lags further behind
/// skips the overflow, which is harmless for pure invalidations.
pub const CHANNEL_CAPACITY: usize = 256;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Fan-out point for change notifications.
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Broadcast an invalidation. Returns silently when nobody is listening.
    pub fn notify(&self, kind: ChangeKind) {
        let receivers = self.tx.send(ChangeEvent::new(kind)).unwrap_or(0);
        tracing::debug!(event = %kind, receivers, "broadcast change");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// `GET /api/events`
pub async fn events_handler(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!("SSE client connected");
    Sse::new(event_stream(state.notifier.subscribe())).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

fn event_stream(
    rx: broadcast::Receiver<ChangeEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => match Event::default().json_data(event) {
                Ok(frame) => Some(Ok(frame)),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode change event");
                    None
                }
            },
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "SSE subscriber lagged");
                None
            }
        }
    })
}
