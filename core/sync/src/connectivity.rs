//! Connectivity tracking.
//!
//! Monitors publish raw reachability readings on a `watch` channel; the
//! engine folds them into a single online/offline state and reacts to the
//! edges. How a reading is obtained (probing, platform signals) is the
//! monitor's business only.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Liveness check against the backend. Must be side-effect free.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Whether the backend is reachable right now.
    async fn probe(&self) -> bool;
}

/// Source of connectivity readings.
pub trait ConnectivityMonitor: Send + Sync {
    /// Receiver for readings. The current value is the latest reading;
    /// a change notification fires only when the reading flips.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Publish `online` only if it differs from the current reading.
fn publish(tx: &watch::Sender<bool>, online: bool) -> bool {
    tx.send_if_modified(|current| {
        if *current == online {
            false
        } else {
            *current = online;
            true
        }
    })
}

/// Monitor that probes the backend on a fixed interval.
///
/// The first probe runs immediately. The polling task stops when the
/// monitor is dropped.
pub struct PollingMonitor {
    tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollingMonitor {
    /// Start probing with `probe` every `period`.
    pub fn spawn<P>(probe: Arc<P>, period: Duration, initial: bool) -> Self
    where
        P: ConnectivityProbe + ?Sized + 'static,
    {
        let (tx, _) = watch::channel(initial);
        let task_tx = tx.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let online = probe.probe().await;
                if publish(&task_tx, online) {
                    debug!(online, "Connectivity probe reading changed");
                }
            }
        });

        Self { tx, task }
    }
}

impl ConnectivityMonitor for PollingMonitor {
    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Drop for PollingMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Monitor driven by external online/offline signals, e.g. the host
/// platform's network notifications.
pub struct SignalMonitor {
    tx: watch::Sender<bool>,
}

impl SignalMonitor {
    /// Create a monitor with an initial reading.
    pub fn new(initial: bool) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Report a platform signal.
    pub fn set_online(&self, online: bool) {
        publish(&self.tx, online);
    }

    /// Latest reported reading.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }
}

impl ConnectivityMonitor for SignalMonitor {
    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Edge produced when the observed state flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    CameOnline,
    WentOffline,
}

/// The engine's view of connectivity.
///
/// `observed` only changes through [`ConnectivityState::observe`]. A forced
/// override makes the engine report online without touching `observed`, so
/// lifting the override restores whatever was last observed.
#[derive(Debug)]
pub struct ConnectivityState {
    observed: AtomicBool,
    forced: AtomicBool,
}

impl ConnectivityState {
    pub fn new(initial: bool) -> Self {
        Self {
            observed: AtomicBool::new(initial),
            forced: AtomicBool::new(false),
        }
    }

    /// Record a reading. Returns the transition if the state flipped.
    pub fn observe(&self, online: bool) -> Option<Transition> {
        let was_online = self.observed.swap(online, Ordering::SeqCst);
        match (was_online, online) {
            (false, true) => {
                info!("Connectivity restored");
                Some(Transition::CameOnline)
            }
            (true, false) => {
                info!("Connectivity lost, messages will be queued");
                Some(Transition::WentOffline)
            }
            _ => None,
        }
    }

    /// Online as far as the engine is concerned, override included.
    pub fn is_online(&self) -> bool {
        self.forced.load(Ordering::SeqCst) || self.observed.load(Ordering::SeqCst)
    }

    /// Last observed reading, ignoring any override.
    pub fn observed(&self) -> bool {
        self.observed.load(Ordering::SeqCst)
    }

    /// Report online until the returned guard is dropped.
    pub fn force_online(&self) -> ForcedOnline<'_> {
        self.forced.store(true, Ordering::SeqCst);
        ForcedOnline { state: self }
    }
}

/// Lifts the forced-online override on drop.
#[must_use = "the override is lifted when the guard is dropped"]
pub struct ForcedOnline<'a> {
    state: &'a ConnectivityState,
}

impl Drop for ForcedOnline<'_> {
    fn drop(&mut self) {
        self.state.forced.store(false, Ordering::SeqCst);
    }
}
