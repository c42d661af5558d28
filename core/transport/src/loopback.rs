//! In-process sender.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

use courier_common::{Error, Result};
use courier_sync::{MessageSender, QueuedMessage};

/// Sender that keeps delivered messages in memory.
///
/// Can be switched into a failing mode to simulate a backend outage.
#[derive(Default)]
pub struct LoopbackSender {
    delivered: Mutex<Vec<QueuedMessage>>,
    failing: AtomicBool,
    latency: Duration,
}

impl LoopbackSender {
    /// Create a sender that accepts everything immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay each delivery by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Reject every message while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages accepted so far, in delivery order.
    pub fn delivered(&self) -> Vec<QueuedMessage> {
        match self.delivered.lock() {
            Ok(delivered) => delivered.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl MessageSender for LoopbackSender {
    async fn send(&self, message: &QueuedMessage) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Transport("loopback backend unavailable".to_string()));
        }

        info!(
            message_id = %message.id,
            priority = %message.priority,
            "Delivered {}",
            message.payload
        );

        let mut delivered = self
            .delivered
            .lock()
            .map_err(|_| Error::Transport("loopback log poisoned".to_string()))?;
        delivered.push(message.clone());
        Ok(())
    }
}
