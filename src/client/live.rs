//! Live-update subscription: SSE push with a permanent polling fallback.
//!
//! ```text
//!  Connecting ──ok──> Connected ──error/end──> Reconnecting ──delay──> Connecting
//!      │                                            │
//!      └──error──> Reconnecting                     └── Nth consecutive failure ──> Polling
//!
//!  any state ──close()──> Closed
//! ```
//!
//! A successful connect resets the failure count. Once in `Polling`, every
//! interval synthesizes all five change kinds and push is never retried for
//! the lifetime of the handle.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::LiveSection;
use crate::domain::{ChangeEvent, ChangeKind};
use crate::errors::ClientError;

/// Connection state of a [`LiveUpdates`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Reconnecting,
    Polling,
    Closed,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Polling => "polling",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Stream of raw frame payloads (the `data:` part of each SSE event).
pub type FrameStream = BoxStream<'static, Result<String, ClientError>>;

/// Something that can open a push stream of change frames.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn connect(&self) -> Result<FrameStream, ClientError>;
}

// ── SSE transport ────────────────────────────────────────────────────

const SSE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Production transport: `GET <base>/api/events` as `text/event-stream`.
///
/// Only the connect phase is bounded; the response body is long-lived.
pub struct SseTransport {
    http: reqwest::Client,
    url: String,
}

impl SseTransport {
    pub fn new(url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(SSE_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushTransport for SseTransport {
    async fn connect(&self) -> Result<FrameStream, ClientError> {
        let resp = self
            .http
            .get(&self.url)
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: format!("event stream refused by {}", self.url),
            });
        }

        let bytes = resp.bytes_stream().boxed();
        let frames = futures::stream::unfold(
            (bytes, SseDecoder::default(), VecDeque::new()),
            |(mut bytes, mut decoder, mut ready)| async move {
                loop {
                    if let Some(frame) = ready.pop_front() {
                        return Some((Ok(frame), (bytes, decoder, ready)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => ready.extend(decoder.push(&chunk)),
                        Some(Err(e)) => {
                            return Some((Err(ClientError::from(e)), (bytes, decoder, ready)));
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(frames.boxed())
    }
}

/// Largest event the decoder buffers. Longer events are dropped whole.
pub const MAX_EVENT_BYTES: usize = 64 * 1024;

/// Incremental `text/event-stream` decoder. Yields the joined `data:` lines
/// of every complete event; comment lines (keep-alives) and other fields are
/// skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    // Bytes already searched for a blank line.
    scanned: usize,
    // Inside an oversized event; skip up to its terminating blank line.
    discarding: bool,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
        let mut frames = Vec::new();
        loop {
            // Back up one byte: the blank line may straddle two chunks.
            let from = self.scanned.saturating_sub(1);
            let Some(end) = self.buf[from..]
                .windows(2)
                .position(|w| w == b"\n\n")
                .map(|p| p + from)
            else {
                self.scanned = self.buf.len();
                break;
            };
            let block: Vec<u8> = self.buf.drain(..end + 2).collect();
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            let block = String::from_utf8_lossy(&block[..end]);
            let data: Vec<&str> = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect();
            if !data.is_empty() {
                frames.push(data.join("\n"));
            }
        }
        if self.buf.len() > MAX_EVENT_BYTES {
            tracing::warn!(bytes = self.buf.len(), "dropping oversized event");
            let trailing_newline = self.buf.last() == Some(&b'\n');
            self.buf.clear();
            if trailing_newline {
                self.buf.push(b'\n');
            }
            self.scanned = 0;
            self.discarding = true;
        }
        frames
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Timing of the reconnect and polling loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveConfig {
    pub reconnect_delay: Duration,
    pub max_failures: u32,
    pub poll_interval: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::from(&LiveSection::default())
    }
}

impl From<&LiveSection> for LiveConfig {
    fn from(section: &LiveSection) -> Self {
        Self {
            reconnect_delay: Duration::from_millis(section.reconnect_delay_ms),
            max_failures: section.max_reconnect_attempts.max(1),
            poll_interval: Duration::from_millis(section.poll_interval_ms.max(1)),
        }
    }
}

type Callback = Arc<dyn Fn(ChangeKind) + Send + Sync>;

struct Subscriber {
    kinds: Vec<ChangeKind>,
    callback: Callback,
}

struct Shared {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    state: watch::Sender<LinkState>,
}

impl Shared {
    /// `Closed` is terminal.
    fn set_state(&self, next: LinkState) {
        self.state.send_if_modified(|current| {
            if *current == LinkState::Closed || *current == next {
                return false;
            }
            tracing::debug!(from = %current, to = %next, "live update state");
            *current = next;
            true
        });
    }

    fn dispatch(&self, kind: ChangeKind) {
        let callbacks: Vec<Callback> = {
            let subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subscribers
                .values()
                .filter(|s| s.kinds.contains(&kind))
                .map(|s| s.callback.clone())
                .collect()
        };
        for callback in callbacks {
            callback(kind);
        }
    }

    fn dispatch_frame(&self, data: &str) {
        match ChangeEvent::parse(data) {
            Some(event) => self.dispatch(event.kind),
            None => tracing::debug!(frame = %data, "dropping unrecognized frame"),
        }
    }
}

/// Guard returned by [`LiveUpdates::subscribe`]. Unregisters on drop.
pub struct Subscription {
    shared: Weak<Shared>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut subscribers = shared.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subscribers.remove(&self.id);
        }
    }
}

/// One live-update channel shared by every resource collection.
///
/// Dropping the handle (or calling [`close`](Self::close)) cancels the
/// driver task together with any pending reconnect delay or polling tick.
pub struct LiveUpdates {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl LiveUpdates {
    /// Start the driver on the current Tokio runtime.
    pub fn start(transport: Arc<dyn PushTransport>, config: LiveConfig) -> Self {
        let (state, _) = watch::channel(LinkState::Connecting);
        let shared = Arc::new(Shared {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            state,
        });
        let cancel = CancellationToken::new();
        let driver = tokio::spawn(drive(
            shared.clone(),
            transport,
            config,
            cancel.clone(),
        ));
        Self {
            shared,
            cancel,
            driver: Mutex::new(Some(driver)),
        }
    }

    /// SSE against `base_url` + `events_path`, timed by `[live]`.
    pub fn connect(base_url: &str, section: &LiveSection) -> Result<Self, ClientError> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), section.events_path);
        let transport = SseTransport::new(url)?;
        Ok(Self::start(Arc::new(transport), LiveConfig::from(section)))
    }

    /// Register `callback` for the given kinds. Callbacks run on the driver
    /// task and must not block; spawn for anything slow.
    pub fn subscribe<F>(&self, kinds: &[ChangeKind], callback: F) -> Subscription
    where
        F: Fn(ChangeKind) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let subscriber = Subscriber {
            kinds: kinds.to_vec(),
            callback: Arc::new(callback),
        };
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, subscriber);
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }

    /// Stop the driver. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
        self.shared.set_state(LinkState::Closed);
    }

    /// Close and wait for the driver task to finish.
    pub async fn shutdown(&self) {
        self.close();
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "live update driver ended abnormally");
            }
        }
    }
}

impl Drop for LiveUpdates {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum StreamEnd {
    Cancelled,
    Failed(String),
}

async fn drive(
    shared: Arc<Shared>,
    transport: Arc<dyn PushTransport>,
    config: LiveConfig,
    cancel: CancellationToken,
) {
    let mut failures = 0u32;
    loop {
        shared.set_state(LinkState::Connecting);
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = transport.connect() => result,
        };

        match connected {
            Ok(mut stream) => {
                failures = 0;
                shared.set_state(LinkState::Connected);
                tracing::info!("live updates connected");
                let end = loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break StreamEnd::Cancelled,
                        frame = stream.next() => match frame {
                            Some(Ok(data)) => shared.dispatch_frame(&data),
                            Some(Err(e)) => break StreamEnd::Failed(e.to_string()),
                            None => break StreamEnd::Failed("stream ended".to_string()),
                        },
                    }
                };
                match end {
                    StreamEnd::Cancelled => break,
                    StreamEnd::Failed(reason) => {
                        failures += 1;
                        tracing::warn!(%reason, failures, "live update stream lost");
                    }
                }
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(error = %e, failures, "live update connect failed");
            }
        }

        if failures >= config.max_failures {
            poll(&shared, config.poll_interval, &cancel).await;
            break;
        }

        shared.set_state(LinkState::Reconnecting);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }
    shared.set_state(LinkState::Closed);
}

async fn poll(shared: &Shared, interval: Duration, cancel: &CancellationToken) {
    shared.set_state(LinkState::Polling);
    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        "push unavailable, polling for changes"
    );
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                for kind in ChangeKind::ALL {
                    shared.dispatch(kind);
                }
            }
        }
    }
}
