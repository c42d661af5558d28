//! Snapshot persistence through a key-value store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use courier_common::{Error, Result};
use courier_storage::KeyValueStore;

use crate::clock::Clock;
use crate::message::QueuedMessage;
use crate::queue::MessageQueue;
use crate::state::SyncStats;

/// Everything the engine needs to resume after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Queued messages in insertion order.
    pub queue: Vec<QueuedMessage>,
    /// Rebuilt from the queue on restore when absent.
    #[serde(default)]
    pub stats: SyncStats,
    /// When the snapshot was written.
    pub timestamp: DateTime<Utc>,
}

/// Reads and writes the engine snapshot under a single key.
pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl SnapshotStore {
    /// Create a snapshot store.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
        max_age: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            max_age,
            clock,
        }
    }

    /// Name of the backing store.
    pub fn backend(&self) -> &str {
        self.store.name()
    }

    /// Write the current queue and stats, replacing the previous snapshot.
    ///
    /// # Errors
    /// - `Error::Persistence` when the store rejects the write
    pub async fn save(&self, queue: &MessageQueue, stats: &SyncStats) -> Result<()> {
        let snapshot = Snapshot {
            queue: queue.to_vec(),
            stats: stats.clone(),
            timestamp: self.clock.now(),
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        self.store.set(&self.key, bytes).await?;
        debug!(key = %self.key, messages = snapshot.queue.len(), "Persisted queue snapshot");
        Ok(())
    }

    /// Read the stored snapshot.
    ///
    /// A snapshot at least `max_age` old is deleted and reported as absent;
    /// nothing from it is recovered.
    ///
    /// # Errors
    /// - `Error::Persistence` when the store cannot be read
    /// - `Error::Serialization` when the stored bytes are not a snapshot
    pub async fn load(&self) -> Result<Option<Snapshot>> {
        let Some(bytes) = self.store.get(&self.key).await? else {
            return Ok(None);
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Serialization(format!("corrupt snapshot: {}", e)))?;

        let age = self
            .clock
            .now()
            .signed_duration_since(snapshot.timestamp)
            .to_std()
            .unwrap_or(Duration::ZERO);

        if age >= self.max_age {
            info!(
                key = %self.key,
                age_secs = age.as_secs(),
                messages = snapshot.queue.len(),
                "Discarding stale queue snapshot"
            );
            if let Err(e) = self.store.delete(&self.key).await {
                warn!("Failed to delete stale snapshot: {}", e);
            }
            return Ok(None);
        }

        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::message::{OutgoingMessage, Priority};
    use courier_storage::MemoryStore;
    use serde_json::json;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn fixture() -> (MemoryStore, Arc<ManualClock>, SnapshotStore) {
        let memory = MemoryStore::new();
        let clock = Arc::new(ManualClock::default());
        let snapshots = SnapshotStore::new(
            Arc::new(memory.clone()),
            "queue",
            DAY,
            clock.clone(),
        );
        (memory, clock, snapshots)
    }

    fn two_message_queue(clock: &ManualClock) -> MessageQueue {
        let mut queue = MessageQueue::new(10);
        queue.push(QueuedMessage::from_outgoing(
            OutgoingMessage::new(json!({ "content": "first" })),
            clock.now(),
        ));
        queue.push(QueuedMessage::from_outgoing(
            OutgoingMessage::new(json!({ "content": "second" })).with_priority(Priority::High),
            clock.now(),
        ));
        queue
    }

    #[tokio::test]
    async fn test_empty_store_loads_nothing() {
        let (_, _, snapshots) = fixture();
        assert!(snapshots.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fresh_snapshot_restored_unchanged() {
        let (_, clock, snapshots) = fixture();
        let queue = two_message_queue(&clock);
        let stats = SyncStats {
            queued: 2,
            queue_size: 2,
            ..Default::default()
        };
        snapshots.save(&queue, &stats).await.unwrap();

        clock.advance(chrono::Duration::hours(23));
        let snapshot = snapshots.load().await.unwrap().unwrap();

        assert_eq!(snapshot.queue, queue.to_vec());
        assert_eq!(snapshot.stats, stats);
    }

    #[tokio::test]
    async fn test_stale_snapshot_discarded() {
        let (memory, clock, snapshots) = fixture();
        let queue = two_message_queue(&clock);
        snapshots.save(&queue, &SyncStats::default()).await.unwrap();

        clock.advance(chrono::Duration::hours(25));
        assert!(snapshots.load().await.unwrap().is_none());
        // Stale data is removed from the store entirely.
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let (memory, _, snapshots) = fixture();
        memory.set("queue", b"{ not json".to_vec()).await.unwrap();

        assert!(matches!(
            snapshots.load().await,
            Err(Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_without_stats_still_loads() {
        let (memory, clock, snapshots) = fixture();
        let queue = two_message_queue(&clock);
        let mut value = serde_json::to_value(Snapshot {
            queue: queue.to_vec(),
            stats: SyncStats::default(),
            timestamp: clock.now(),
        })
        .unwrap();
        value.as_object_mut().unwrap().remove("stats");
        memory
            .set("queue", serde_json::to_vec(&value).unwrap())
            .await
            .unwrap();

        let snapshot = snapshots.load().await.unwrap().unwrap();
        assert_eq!(snapshot.queue, queue.to_vec());
        assert_eq!(snapshot.stats, SyncStats::default());
    }
}
