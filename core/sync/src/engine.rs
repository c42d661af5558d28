//! Core delivery engine that owns the queue and drains it to the transport.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use courier_common::{Error, MessageId, Result};
use courier_storage::KeyValueStore;

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityState, Transition};
use crate::events::{EventBus, EventReceiver, SyncEvent};
use crate::message::{FailedMessage, OutgoingMessage, QueuedMessage};
use crate::persistence::SnapshotStore;
use crate::queue::MessageQueue;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::scheduler::SyncTrigger;
use crate::state::{QueueStatus, SyncStats, SyncSummary};
use crate::transport::MessageSender;

/// Queue and counters, always mutated together.
struct QueueState {
    queue: MessageQueue,
    stats: SyncStats,
}

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder<S: MessageSender + ?Sized> {
    sender: Arc<S>,
    config: SyncConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    clock: Arc<dyn Clock>,
}

impl<S: MessageSender + 'static> SyncEngineBuilder<S> {
    /// Start building an engine around `sender`.
    pub fn new(sender: S) -> Self {
        Self::from_arc(Arc::new(sender))
    }
}

impl<S: MessageSender + ?Sized + 'static> SyncEngineBuilder<S> {
    /// Start building an engine around an Arc-wrapped sender.
    pub fn from_arc(sender: Arc<S>) -> Self {
        Self {
            sender,
            config: SyncConfig::default(),
            store: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use the given configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist snapshots to `store`. Without a store the engine is in-memory only.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `clock` for enqueue timestamps and snapshot ages.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the engine, restoring the persisted snapshot if there is a fresh one.
    ///
    /// # Errors
    /// - `Error::Config` when the configuration is invalid. Storage problems
    ///   are logged and the engine starts empty.
    pub async fn build(self) -> Result<SyncEngine<S>> {
        self.config.validate()?;

        let snapshots = match (self.config.persist_queue, self.store) {
            (true, Some(store)) => Some(SnapshotStore::new(
                store,
                self.config.storage_key.clone(),
                self.config.snapshot_max_age,
                self.clock.clone(),
            )),
            _ => None,
        };

        let mut state = QueueState {
            queue: MessageQueue::new(self.config.max_queue_size),
            stats: SyncStats::default(),
        };

        if let Some(ref snapshots) = snapshots {
            match snapshots.load().await {
                Ok(Some(snapshot)) => {
                    state.queue =
                        MessageQueue::from_messages(snapshot.queue, self.config.max_queue_size);
                    state.stats = snapshot.stats;
                    state.stats.reconcile(&state.queue);
                    info!(
                        backend = snapshots.backend(),
                        "Loaded {} queued messages from storage",
                        state.queue.len()
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to load persisted queue, starting empty: {}", e);
                }
            }
        }

        Ok(SyncEngine {
            sender: self.sender,
            state: RwLock::new(state),
            connectivity: ConnectivityState::new(self.config.assume_online),
            syncing: AtomicBool::new(false),
            retry_policy: RetryPolicy::new(self.config.max_retry_attempts),
            snapshots,
            persist_lock: Mutex::new(()),
            clock: self.clock,
            events: EventBus::new(),
            triggers: OnceLock::new(),
            config: self.config,
        })
    }
}

/// Offline-first delivery engine.
///
/// Messages are accepted at any time, persisted, and delivered in priority
/// order whenever the backend is reachable. Delivery is at-least-once.
pub struct SyncEngine<S: MessageSender + ?Sized> {
    /// Transport for single-message delivery.
    sender: Arc<S>,
    state: RwLock<QueueState>,
    connectivity: ConnectivityState,
    /// Single-flight guard for sync cycles.
    syncing: AtomicBool,
    retry_policy: RetryPolicy,
    /// Absent when persistence is disabled or no store was configured.
    snapshots: Option<SnapshotStore>,
    /// Serializes snapshot writes so the newest state is always written last.
    persist_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    /// Set once a scheduler is attached.
    triggers: OnceLock<mpsc::Sender<SyncTrigger>>,
    config: SyncConfig,
}

impl<S: MessageSender + 'static> SyncEngine<S> {
    /// Start building an engine.
    pub fn builder(sender: S) -> SyncEngineBuilder<S> {
        SyncEngineBuilder::new(sender)
    }
}

impl<S: MessageSender + ?Sized + 'static> SyncEngine<S> {
    /// Get the engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Register a listener for engine events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Whether the engine currently treats the backend as reachable.
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Whether a sync cycle is running.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Number of queued messages.
    pub async fn queue_len(&self) -> usize {
        self.state.read().await.queue.len()
    }

    /// Pending messages in the order the next cycle would deliver them.
    pub async fn pending_messages(&self) -> Vec<QueuedMessage> {
        self.state.read().await.queue.drain_snapshot()
    }

    /// Route sync requests to a scheduler.
    ///
    /// # Errors
    /// - `Error::Scheduler` if a scheduler is already attached
    pub fn attach_scheduler(&self, triggers: mpsc::Sender<SyncTrigger>) -> Result<()> {
        self.triggers
            .set(triggers)
            .map_err(|_| Error::Scheduler("A scheduler is already attached".to_string()))
    }

    /// Accept a message for delivery.
    ///
    /// Never fails: a full queue evicts to make room, and persistence
    /// problems are logged. When online, a sync is requested right away.
    pub async fn enqueue(&self, message: OutgoingMessage) -> MessageId {
        let queued = QueuedMessage::from_outgoing(message, self.clock.now());
        let id = queued.id.clone();

        let (queued, queue_size) = {
            let mut state = self.state.write().await;
            state.queue.push(queued.clone());
            state.stats.queued += 1;
            state.stats.queue_size = state.queue.len();
            // The queue assigns the sequence; report the entry as stored.
            let stored = state.queue.get(&id).cloned().unwrap_or(queued);
            (stored, state.queue.len())
        };
        debug!(message_id = %id, queue_size, "Message queued");

        self.persist().await;
        self.events.emit(SyncEvent::MessageQueued(queued));

        if self.connectivity.is_online() {
            self.request_sync(SyncTrigger::Enqueued);
        }

        id
    }

    /// Record a connectivity reading.
    ///
    /// Emits `Online`/`Offline` only when the state flips. Coming back
    /// online requests an immediate sync; going offline leaves a running
    /// cycle alone and only keeps new ones from starting.
    pub fn set_online(&self, online: bool) -> Option<Transition> {
        let transition = self.connectivity.observe(online)?;
        match transition {
            Transition::CameOnline => {
                self.events.emit(SyncEvent::Online);
                self.request_sync(SyncTrigger::Reconnected);
            }
            Transition::WentOffline => {
                self.events.emit(SyncEvent::Offline);
            }
        }
        Some(transition)
    }

    /// Run one delivery pass if online, non-empty and not already syncing.
    ///
    /// # Returns
    /// The cycle summary, or `None` if the call was a no-op.
    pub async fn sync(&self) -> Option<SyncSummary> {
        let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
            debug!("Sync already in progress");
            return None;
        };

        if !self.connectivity.is_online() {
            debug!("Offline, sync skipped");
            return None;
        }

        if self.state.read().await.queue.is_empty() {
            return None;
        }

        Some(self.run_cycle().await)
    }

    /// Run one delivery pass regardless of connectivity.
    ///
    /// The engine reports online for the duration of the pass only; the
    /// observed connectivity state is left untouched.
    pub async fn force_sync(&self) -> QueueStatus {
        info!("Forcing sync of all queued messages");

        match SyncGuard::acquire(&self.syncing) {
            Some(_guard) => {
                let _online = self.connectivity.force_online();
                if !self.state.read().await.queue.is_empty() {
                    self.run_cycle().await;
                }
            }
            None => debug!("Sync already in progress, forced sync skipped"),
        }

        self.status().await
    }

    /// Administrative snapshot of the engine.
    pub async fn status(&self) -> QueueStatus {
        let state = self.state.read().await;
        QueueStatus {
            is_online: self.connectivity.is_online(),
            is_syncing: self.is_syncing(),
            queue_size: state.queue.len(),
            stats: state.stats.clone(),
            oldest_message: state.queue.oldest().map(|m| m.queued_at),
        }
    }

    /// Drop every queued message.
    ///
    /// # Returns
    /// Number of messages removed.
    pub async fn clear_queue(&self) -> usize {
        let count = {
            let mut state = self.state.write().await;
            let count = state.queue.clear();
            state.stats.queue_size = 0;
            count
        };
        self.persist().await;
        info!("Cleared {} messages from queue", count);
        count
    }

    /// Write the current state to the store, if persistence is enabled.
    ///
    /// Failures are logged and otherwise ignored.
    pub async fn flush(&self) {
        self.persist().await;
    }

    async fn persist(&self) {
        let Some(ref snapshots) = self.snapshots else {
            return;
        };

        let _write = self.persist_lock.lock().await;
        let (queue, stats) = {
            let state = self.state.read().await;
            (state.queue.clone(), state.stats.clone())
        };

        if let Err(e) = snapshots.save(&queue, &stats).await {
            warn!("Failed to persist queue, continuing in memory: {}", e);
        }
    }

    fn request_sync(&self, trigger: SyncTrigger) {
        let Some(tx) = self.triggers.get() else {
            debug!(?trigger, "No scheduler attached, sync not requested");
            return;
        };

        match tx.try_send(trigger) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!(?trigger, "Sync already requested"),
            Err(TrySendError::Closed(_)) => debug!(?trigger, "Scheduler stopped"),
        }
    }

    /// Deliver a snapshot of the queue. Caller holds the single-flight guard.
    async fn run_cycle(&self) -> SyncSummary {
        let start = Instant::now();
        let snapshot = self.state.read().await.queue.drain_snapshot();
        info!("Syncing {} queued messages", snapshot.len());

        let mut synced = 0;
        let mut failed = 0;
        let mut permanently_failed = 0;

        for (index, message) in snapshot.iter().enumerate() {
            if index > 0 && !self.config.send_pacing.is_zero() {
                sleep(self.config.send_pacing).await;
            }

            match self.deliver(message).await {
                Ok(()) => {
                    let mut state = self.state.write().await;
                    if state.queue.remove_entry(message).is_none() {
                        debug!(
                            message_id = %message.id,
                            "Delivered message was replaced or removed during sync"
                        );
                    }
                    state.stats.synced += 1;
                    synced += 1;
                    debug!(message_id = %message.id, "Message synced");
                }
                Err(e) => {
                    failed += 1;
                    if self.handle_failure(message, &e.to_string()).await {
                        permanently_failed += 1;
                    }
                }
            }
        }

        let remaining = {
            let mut state = self.state.write().await;
            state.stats.queue_size = state.queue.len();
            state.stats.last_sync_time = Some(self.clock.now());
            state.queue.len()
        };

        self.persist().await;

        let summary = SyncSummary {
            synced,
            failed,
            permanently_failed,
            remaining,
            duration: start.elapsed(),
        };
        info!(
            "Sync complete in {:?}: {} sent, {} failed, {} remaining",
            summary.duration, synced, failed, remaining
        );
        self.events.emit(SyncEvent::SyncComplete(summary.clone()));
        summary
    }

    /// Send one message, converting a panicking transport into a failed attempt.
    async fn deliver(&self, message: &QueuedMessage) -> Result<()> {
        match AssertUnwindSafe(self.sender.send(message)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(Error::Transport("sender panicked".to_string())),
        }
    }

    /// Apply the retry policy to a failed attempt.
    ///
    /// # Returns
    /// `true` if the message failed permanently.
    async fn handle_failure(&self, attempted: &QueuedMessage, err: &str) -> bool {
        let message = {
            let mut state = self.state.write().await;
            let Some(live) = state.queue.entry_mut(attempted) else {
                debug!(
                    message_id = %attempted.id,
                    "Failed message was replaced or removed during sync"
                );
                return false;
            };

            match self.retry_policy.on_failure(live, err) {
                RetryDecision::Retry { .. } => return false,
                RetryDecision::GiveUp => {}
            }

            let Some(message) = state.queue.remove_entry(attempted) else {
                return false;
            };
            state.stats.failed += 1;
            message
        };

        self.events.emit(SyncEvent::MessageFailed(FailedMessage {
            message,
            failed_at: self.clock.now(),
            error: Error::DeliveryFailed(format!(
                "retries exhausted after {} attempts: {}",
                self.retry_policy.max_attempts() + 1,
                err
            ))
            .to_string(),
        }));
        true
    }
}

/// Holds the single-flight flag; clears it on drop.
struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
