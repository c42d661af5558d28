//! Message types held by the delivery queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use courier_common::{MessageId, Result};

/// Delivery-order class of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Sort rank; lower ranks are delivered first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Priority {
    type Err = courier_common::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(courier_common::Error::InvalidInput(format!(
                "Unknown priority '{}'. Use: high, normal, or low",
                other
            ))),
        }
    }
}

/// Lifecycle status of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting for delivery.
    #[default]
    Pending,
    /// Retry budget exhausted; no longer in the queue.
    FailedPermanently,
}

/// A message as handed over by a producer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Caller-supplied identifier; generated when absent.
    pub id: Option<MessageId>,
    /// Opaque payload forwarded to the transport.
    pub payload: Value,
    /// Delivery priority; `normal` when absent.
    pub priority: Option<Priority>,
}

impl OutgoingMessage {
    /// Create a message with the given payload and default settings.
    pub fn new(payload: Value) -> Self {
        Self {
            id: None,
            payload,
            priority: None,
        }
    }

    /// Use a caller-supplied identifier.
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the delivery priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// A message owned by the queue until it is delivered or fails permanently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub payload: Value,
    pub priority: Priority,
    /// When the message entered the queue.
    pub queued_at: DateTime<Utc>,
    /// Failed attempts so far.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub status: MessageStatus,
    /// Assigned by the queue on insertion; tells a replacement apart from
    /// the entry it replaced under the same id.
    #[serde(skip)]
    pub sequence: u64,
}

// `sequence` is queue bookkeeping and is not persisted.
impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.payload == other.payload
            && self.priority == other.priority
            && self.queued_at == other.queued_at
            && self.retry_count == other.retry_count
            && self.last_error == other.last_error
            && self.status == other.status
    }
}

impl QueuedMessage {
    /// Apply enqueue defaults to an outgoing message.
    pub fn from_outgoing(message: OutgoingMessage, queued_at: DateTime<Utc>) -> Self {
        Self {
            id: message.id.unwrap_or_else(MessageId::generate),
            payload: message.payload,
            priority: message.priority.unwrap_or_default(),
            queued_at,
            retry_count: 0,
            last_error: None,
            status: MessageStatus::Pending,
            sequence: 0,
        }
    }

    /// Delivery order: priority rank first, then enqueue time.
    pub fn delivery_order(&self, other: &Self) -> Ordering {
        self.priority
            .rank()
            .cmp(&other.priority.rank())
            .then_with(|| self.queued_at.cmp(&other.queued_at))
    }
}

/// Terminal record for a message that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedMessage {
    pub message: QueuedMessage,
    pub failed_at: DateTime<Utc>,
    pub error: String,
}
