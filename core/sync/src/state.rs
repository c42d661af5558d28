//! Delivery statistics and status reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::queue::MessageQueue;

/// Running counters. A summary only; the queue is the source of truth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncStats {
    /// Messages accepted by `enqueue`.
    pub queued: u64,
    /// Messages delivered.
    pub synced: u64,
    /// Messages that failed permanently.
    pub failed: u64,
    /// End of the last completed sync cycle.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Current queue length.
    pub queue_size: usize,
}

impl SyncStats {
    /// Bring the derived fields back in line with the queue.
    pub fn reconcile(&mut self, queue: &MessageQueue) {
        self.queue_size = queue.len();
    }
}

/// Result of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Messages delivered in this cycle.
    pub synced: usize,
    /// Failed attempts in this cycle, retryable or not.
    pub failed: usize,
    /// Messages that exhausted their retries in this cycle.
    pub permanently_failed: usize,
    /// Queue length after the cycle.
    pub remaining: usize,
    #[serde(skip)]
    pub duration: Duration,
}

/// Administrative view of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub queue_size: usize,
    pub stats: SyncStats,
    /// Enqueue time of the message at the head of the queue.
    pub oldest_message: Option<DateTime<Utc>>,
}
