//! Bounded priority queue for background mutation tasks.
//!
//! Callers apply their optimistic change first, then enqueue a task whose
//! `on_error` reverses it. The queue knows nothing about the domain: it runs
//! at most `max_concurrent` executors at once, highest priority first (FIFO
//! among equal priorities), and calls exactly one of `on_success` /
//! `on_error` per task. Failed tasks are dropped, never retried.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use tokio::sync::Notify;

use crate::domain::new_id;
use crate::errors::SyncError;

pub const DEFAULT_MAX_CONCURRENT: usize = 3;

type Execute = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), SyncError>> + Send>;
type OnSuccess = Box<dyn FnOnce() + Send>;
type OnError = Box<dyn FnOnce(SyncError) + Send>;

/// One unit of background work.
pub struct SyncTask {
    id: String,
    label: String,
    priority: i32,
    execute: Execute,
    on_success: Option<OnSuccess>,
    on_error: Option<OnError>,
}

impl SyncTask {
    pub fn new<F, Fut>(label: impl Into<String>, execute: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        Self {
            id: new_id(),
            label: label.into(),
            priority: 0,
            execute: Box::new(move || Box::pin(execute())),
            on_success: None,
            on_error: None,
        }
    }

    /// Higher runs first. Defaults to 0.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnOnce(SyncError) + Send + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for SyncTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTask")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

struct Queued {
    priority: i32,
    seq: u64,
    task: SyncTask,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Max-heap: higher priority first, then lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    pending: BinaryHeap<Queued>,
    active: usize,
    next_seq: u64,
    succeeded: u64,
    failed: u64,
}

struct Inner {
    state: Mutex<QueueState>,
    max_concurrent: usize,
    idle: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A poisoned lock only means a callback panicked; the counters are still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub active: usize,
    pub succeeded: u64,
    pub failed: u64,
}

/// Shared handle to the queue. Cloning shares the same queue.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<Inner>,
}

impl Default for SyncQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl SyncQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                max_concurrent: max_concurrent.max(1),
                idle: Notify::new(),
            }),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Queue `task` and start it if a slot is free. Tasks only start when
    /// called from within a Tokio runtime. Returns the task id.
    pub fn enqueue(&self, task: SyncTask) -> String {
        let id = task.id.clone();
        {
            let mut state = self.inner.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            tracing::debug!(task = %task.label, priority = task.priority, "sync task queued");
            state.pending.push(Queued {
                priority: task.priority,
                seq,
                task,
            });
        }
        process(&self.inner);
        id
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.lock();
        QueueStats {
            pending: state.pending.len(),
            active: state.active,
            succeeded: state.succeeded,
            failed: state.failed,
        }
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.lock();
        state.pending.is_empty() && state.active == 0
    }

    /// Resolve once nothing is pending or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Start pending tasks while slots are free.
fn process(inner: &Arc<Inner>) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("sync queue used outside a Tokio runtime; tasks stay pending");
        return;
    };
    loop {
        let task = {
            let mut state = inner.lock();
            if state.active >= inner.max_concurrent {
                return;
            }
            let Some(queued) = state.pending.pop() else {
                return;
            };
            state.active += 1;
            queued.task
        };
        runtime.spawn(run_task(inner.clone(), task));
    }
}

/// Releases the slot on every exit path and starts the next task.
struct ActiveSlot {
    inner: Arc<Inner>,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let idle = {
            let mut state = self.inner.lock();
            state.active = state.active.saturating_sub(1);
            state.pending.is_empty() && state.active == 0
        };
        process(&self.inner);
        if idle {
            self.inner.idle.notify_waiters();
        }
    }
}

async fn run_task(inner: Arc<Inner>, task: SyncTask) {
    let _slot = ActiveSlot {
        inner: inner.clone(),
    };
    let SyncTask {
        id,
        label,
        execute,
        on_success,
        on_error,
        ..
    } = task;
    tracing::debug!(task = %label, %id, "sync task started");

    // The executor runs in its own task so a panic surfaces as a JoinError.
    let outcome = match tokio::spawn(async move { execute().await }).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(SyncError::Panicked(panic_message(e.into_panic()))),
        Err(e) => Err(SyncError::Panicked(e.to_string())),
    };

    match outcome {
        Ok(()) => {
            inner.lock().succeeded += 1;
            tracing::debug!(task = %label, "sync task succeeded");
            if let Some(f) = on_success {
                f();
            }
        }
        Err(err) => {
            inner.lock().failed += 1;
            tracing::warn!(task = %label, error = %err, "sync task failed");
            if let Some(f) = on_error {
                f(err);
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
