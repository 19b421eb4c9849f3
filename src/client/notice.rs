//! User-visible notices (the "toast" channel).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;
const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.level {
            NoticeLevel::Info => write!(f, "{}", self.message),
            NoticeLevel::Error => write!(f, "error: {}", self.message),
        }
    }
}

/// Fan-out of notices to any number of listeners, plus a short history for
/// listeners that attach late.
#[derive(Clone)]
pub struct Notices {
    tx: broadcast::Sender<Notice>,
    history: Arc<Mutex<VecDeque<Notice>>>,
}

impl Default for Notices {
    fn default() -> Self {
        Self::new()
    }
}

impl Notices {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            history: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn publish(&self, notice: Notice) {
        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(notice.clone());
        }
        // No receivers is fine; the history still has it.
        let _ = self.tx.send(notice);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(Notice {
            level: NoticeLevel::Error,
            message: message.into(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.publish(Notice {
            level: NoticeLevel::Info,
            message: message.into(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// Most recent notices, oldest first.
    pub fn recent(&self) -> Vec<Notice> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().cloned().collect()
    }
}
