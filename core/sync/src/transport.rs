//! Send primitive consumed by the engine.

use async_trait::async_trait;
use std::sync::Arc;

use courier_common::Result;

use crate::message::QueuedMessage;

/// Delivers a single message to the backend.
///
/// The same message may be sent more than once (retries, restarts), so
/// the receiving side is expected to deduplicate on `message.id`. Timeouts
/// are the implementation's responsibility; the engine only looks at the
/// outcome.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Attempt delivery.
    ///
    /// # Errors
    /// - Any error counts as a failed attempt and goes through the retry policy
    async fn send(&self, message: &QueuedMessage) -> Result<()>;
}

#[async_trait]
impl<T: MessageSender + ?Sized> MessageSender for Arc<T> {
    async fn send(&self, message: &QueuedMessage) -> Result<()> {
        (**self).send(message).await
    }
}

#[async_trait]
impl<T: MessageSender + ?Sized> MessageSender for Box<T> {
    async fn send(&self, message: &QueuedMessage) -> Result<()> {
        (**self).send(message).await
    }
}
