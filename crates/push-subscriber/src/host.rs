//! Host-side collaborators: where tokens come from, where notifications go,
//! and how the host process is kept awake.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use crate::types::NotificationEvent;

/// Owns the current bearer token. `get` is called once per connection
/// attempt; `set`/`clear` are called when the host changes the token through
/// the supervisor.
pub trait TokenSource: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, token: String);
    fn clear(&self);
}

/// Renders notifications.
///
/// Called from the supervisor loop, so implementations must return quickly:
/// hand the event off (channel, spawned task) rather than doing I/O inline.
pub trait NotificationSink: Send + Sync {
    fn show(&self, event: NotificationEvent);
}

impl<F> NotificationSink for F
where
    F: Fn(NotificationEvent) + Send + Sync,
{
    fn show(&self, event: NotificationEvent) {
        self(event)
    }
}

/// Keeps the host process alive while the supervisor runs (a wake lock on
/// mobile). The supervisor pairs every `acquire` with exactly one `release`.
pub trait KeepAlive: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopKeepAlive;

impl KeepAlive for NoopKeepAlive {
    fn acquire(&self) {}
    fn release(&self) {}
}

/// Token store shared between the host (which writes it) and the supervisor.
#[derive(Debug, Default, Clone)]
pub struct MemoryTokenSource {
    token: Arc<RwLock<Option<String>>>,
}

impl MemoryTokenSource {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token)),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token.into());
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.token.write() {
            *guard = None;
        }
    }
}

impl TokenSource for MemoryTokenSource {
    fn get(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }

    fn set(&self, token: String) {
        MemoryTokenSource::set(self, token);
    }

    fn clear(&self) {
        MemoryTokenSource::clear(self);
    }
}

/// Forwards notifications into a bounded channel.
///
/// Uses `try_send`: when the consumer falls behind, events are dropped and
/// counted instead of stalling the supervisor loop.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<NotificationEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Events discarded so far because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl NotificationSink for ChannelSink {
    fn show(&self, event: NotificationEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(ev)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    id = %ev.id,
                    total_dropped = total,
                    "notification channel full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("notification receiver gone, dropping event");
            }
        }
    }
}
