//! Retry bookkeeping for failed deliveries.
//!
//! There is no backoff wait between attempts: a message that failed stays
//! queued and is retried on the next sync cycle. The retry budget is the
//! only bound on how often it is sent.

use tracing::{error, warn};

use crate::message::{MessageStatus, QueuedMessage};

/// Outcome of recording a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Leave the message queued for the next cycle.
    Retry {
        /// Retries used so far, including this one.
        attempt: u32,
        /// Retries still available after this one.
        remaining: u32,
    },
    /// Budget exhausted; the message must leave the queue.
    GiveUp,
}

/// Decides whether a failed message is retried or failed permanently.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// Create a policy allowing `max_attempts` retries after the first failure.
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Maximum number of retries.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Record a failed attempt on `message`.
    ///
    /// # Postconditions
    /// - On `Retry`, `retry_count` is incremented and `last_error` recorded
    /// - On `GiveUp`, `status` is `FailedPermanently` and `retry_count` is unchanged
    pub fn on_failure(&self, message: &mut QueuedMessage, err: &str) -> RetryDecision {
        message.last_error = Some(err.to_string());

        if message.retry_count < self.max_attempts {
            message.retry_count += 1;
            warn!(
                message_id = %message.id,
                attempt = message.retry_count,
                max = self.max_attempts,
                error = err,
                "Message failed, will retry"
            );
            RetryDecision::Retry {
                attempt: message.retry_count,
                remaining: self.max_attempts - message.retry_count,
            }
        } else {
            message.status = MessageStatus::FailedPermanently;
            error!(
                message_id = %message.id,
                attempts = self.max_attempts,
                error = err,
                "Message failed permanently"
            );
            RetryDecision::GiveUp
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
