//! Bounded priority queue of undelivered messages.
//!
//! Messages are stored in insertion order; delivery order is only computed
//! when a snapshot is taken. The queue never rejects a message: at capacity
//! it evicts the oldest low-priority message, or failing that the oldest
//! message of any priority.

use std::collections::VecDeque;
use tracing::{debug, warn};

use courier_common::MessageId;

use crate::message::{Priority, QueuedMessage};

/// Insertion-ordered message store with a hard capacity.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    messages: VecDeque<QueuedMessage>,
    max_size: usize,
    next_sequence: u64,
}

impl MessageQueue {
    /// Create an empty queue holding at most `max_size` messages.
    pub fn new(max_size: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_size: max_size.max(1),
            next_sequence: 0,
        }
    }

    /// Rebuild a queue from restored messages, in their stored order.
    ///
    /// Messages beyond capacity are evicted with the same policy as `push`.
    pub fn from_messages(messages: Vec<QueuedMessage>, max_size: usize) -> Self {
        let mut queue = Self::new(max_size);
        for message in messages {
            queue.push(message);
        }
        queue
    }

    /// Append a message, evicting first when the queue is full.
    ///
    /// A message whose id is already queued replaces the earlier entry.
    /// Every pushed message gets a fresh `sequence`.
    ///
    /// # Returns
    /// The evicted message, if any.
    pub fn push(&mut self, mut message: QueuedMessage) -> Option<QueuedMessage> {
        message.sequence = self.next_sequence;
        self.next_sequence += 1;

        if let Some(previous) = self.remove(&message.id) {
            debug!(message_id = %previous.id, "Replacing queued message with same id");
        }

        let evicted = if self.messages.len() >= self.max_size {
            self.evict()
        } else {
            None
        };

        self.messages.push_back(message);
        evicted
    }

    fn evict(&mut self) -> Option<QueuedMessage> {
        if let Some(index) = self
            .messages
            .iter()
            .position(|m| m.priority == Priority::Low)
        {
            let removed = self.messages.remove(index);
            if let Some(ref m) = removed {
                debug!(message_id = %m.id, "Removed low-priority message to make space");
            }
            return removed;
        }

        let removed = self.messages.pop_front();
        if let Some(ref m) = removed {
            warn!(
                message_id = %m.id,
                priority = %m.priority,
                "Message queue full, dropping oldest message"
            );
        }
        removed
    }

    /// All pending messages in delivery order. The queue is left untouched.
    pub fn drain_snapshot(&self) -> Vec<QueuedMessage> {
        let mut snapshot: Vec<QueuedMessage> = self.messages.iter().cloned().collect();
        // Stable sort keeps insertion order for identical timestamps.
        snapshot.sort_by(|a, b| a.delivery_order(b));
        snapshot
    }

    /// Remove a message by id.
    pub fn remove(&mut self, id: &MessageId) -> Option<QueuedMessage> {
        let index = self.messages.iter().position(|m| &m.id == id)?;
        self.messages.remove(index)
    }

    /// Look up a message by id.
    pub fn get(&self, id: &MessageId) -> Option<&QueuedMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Remove the queued entry `message` was copied from.
    ///
    /// Returns `None` if that entry is gone or was replaced by a newer
    /// message with the same id.
    pub fn remove_entry(&mut self, message: &QueuedMessage) -> Option<QueuedMessage> {
        let index = self.position_of(message)?;
        self.messages.remove(index)
    }

    /// The queued entry `message` was copied from, for mutation.
    pub fn entry_mut(&mut self, message: &QueuedMessage) -> Option<&mut QueuedMessage> {
        let index = self.position_of(message)?;
        self.messages.get_mut(index)
    }

    fn position_of(&self, message: &QueuedMessage) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.id == message.id && m.sequence == message.sequence)
    }

    /// The message at the head of the queue (oldest by insertion).
    pub fn oldest(&self) -> Option<&QueuedMessage> {
        self.messages.front()
    }

    /// Remove every message.
    ///
    /// # Returns
    /// Number of messages removed.
    pub fn clear(&mut self) -> usize {
        let count = self.messages.len();
        self.messages.clear();
        count
    }

    /// Messages in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.messages.iter()
    }

    /// Copy of the messages in insertion order, for persistence.
    pub fn to_vec(&self) -> Vec<QueuedMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
