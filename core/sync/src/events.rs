//! Engine notifications for external consumers.
//!
//! Every subscriber receives every event in emission order. Delivery is
//! asynchronous relative to the call that produced the event. Each
//! subscriber has its own unbounded channel, so a slow consumer delays
//! nothing and loses nothing.

use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::message::{FailedMessage, QueuedMessage};
use crate::state::SyncSummary;

/// Something observable happened in the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connectivity flipped to online.
    Online,
    /// Connectivity flipped to offline.
    Offline,
    /// A message was accepted into the queue.
    MessageQueued(QueuedMessage),
    /// A sync cycle finished.
    SyncComplete(SyncSummary),
    /// A message exhausted its retries and left the queue.
    MessageFailed(FailedMessage),
}

impl SyncEvent {
    /// Short event name, as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::Online => "online",
            SyncEvent::Offline => "offline",
            SyncEvent::MessageQueued(_) => "messageQueued",
            SyncEvent::SyncComplete(_) => "syncComplete",
            SyncEvent::MessageFailed(_) => "messageFailed",
        }
    }
}

/// Receiving end of an event subscription.
pub type EventReceiver = mpsc::UnboundedReceiver<SyncEvent>;

/// Fan-out of engine events to every live subscriber.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SyncEvent>>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new listener. It sees events emitted after this call.
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Publish an event to all current listeners.
    ///
    /// Listeners whose receiver was dropped are removed.
    pub fn emit(&self, event: SyncEvent) {
        let name = event.name();
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        trace!(event = name, listeners = subscribers.len(), "Emitted event");
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<SyncEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
