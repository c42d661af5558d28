//! Sync scheduling: periodic ticks, enqueue and reconnect triggers.

use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use courier_common::{Error, Result};

use crate::connectivity::ConnectivityMonitor;
use crate::engine::SyncEngine;
use crate::transport::MessageSender;

/// Reason a sync cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// A message was accepted while online.
    Enqueued,
    /// Connectivity came back.
    Reconnected,
    /// Explicit request through the scheduler handle.
    Requested,
}

/// Background driver for a [`SyncEngine`].
pub struct SyncScheduler;

impl SyncScheduler {
    /// Start driving `engine` with readings from `monitor`.
    ///
    /// The first periodic tick fires immediately, so a restored queue is
    /// delivered as soon as the engine is online.
    ///
    /// # Errors
    /// - `Error::Scheduler` if the engine already has a scheduler
    pub fn spawn<S>(
        engine: Arc<SyncEngine<S>>,
        monitor: &dyn ConnectivityMonitor,
    ) -> Result<SchedulerHandle<S>>
    where
        S: MessageSender + ?Sized + 'static,
    {
        // Capacity 1: pending requests coalesce into a single cycle.
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        engine.attach_scheduler(trigger_tx.clone())?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(
            engine.clone(),
            trigger_rx,
            monitor.subscribe(),
            shutdown_rx,
        ));

        Ok(SchedulerHandle {
            engine,
            triggers: trigger_tx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

/// Handle to a running scheduler.
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown) stops
/// the loop at once and flushes the queue in the background.
pub struct SchedulerHandle<S: MessageSender + ?Sized + 'static> {
    engine: Arc<SyncEngine<S>>,
    triggers: mpsc::Sender<SyncTrigger>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl<S: MessageSender + ?Sized + 'static> SchedulerHandle<S> {
    /// The engine being driven.
    pub fn engine(&self) -> &Arc<SyncEngine<S>> {
        &self.engine
    }

    /// Ask for a sync cycle as soon as possible.
    pub fn request_sync(&self) {
        match self.triggers.try_send(SyncTrigger::Requested) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Closed(_)) => debug!("Scheduler stopped, sync request dropped"),
        }
    }

    /// Stop the scheduler.
    ///
    /// Waits for an in-flight cycle to finish, then flushes the queue.
    ///
    /// # Errors
    /// - `Error::Scheduler` if the scheduler task panicked
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| Error::Scheduler(format!("Scheduler task failed: {}", e))),
            None => Ok(()),
        }
    }
}

impl<S: MessageSender + ?Sized + 'static> Drop for SchedulerHandle<S> {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let engine = self.engine.clone();
                runtime.spawn(async move { engine.flush().await });
            }
            Err(_) => warn!("Scheduler dropped outside a runtime, queue not flushed"),
        }
    }
}

async fn run<S>(
    engine: Arc<SyncEngine<S>>,
    mut triggers: mpsc::Receiver<SyncTrigger>,
    mut readings: watch::Receiver<bool>,
    mut shutdown: oneshot::Receiver<()>,
) where
    S: MessageSender + ?Sized + 'static,
{
    let mut ticker = interval(engine.config().sync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let initial = *readings.borrow_and_update();
    engine.set_online(initial);

    let mut cycle: Option<JoinHandle<()>> = None;
    let mut readings_open = true;

    info!(
        interval = ?engine.config().sync_interval,
        online = engine.is_online(),
        "Sync scheduler started"
    );

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Sync scheduler shutting down");
                break;
            }
            changed = readings.changed(), if readings_open => {
                match changed {
                    Ok(()) => {
                        let online = *readings.borrow_and_update();
                        engine.set_online(online);
                    }
                    Err(_) => {
                        debug!("Connectivity monitor closed");
                        readings_open = false;
                    }
                }
            }
            Some(trigger) = triggers.recv() => {
                debug!(?trigger, "Sync requested");
                start_cycle(&engine, &mut cycle);
            }
            _ = ticker.tick() => {
                start_cycle(&engine, &mut cycle);
            }
        }
    }

    if let Some(cycle) = cycle {
        if let Err(e) = cycle.await {
            warn!("Sync cycle failed during shutdown: {}", e);
        }
    }
    engine.flush().await;
    info!("Sync scheduler stopped");
}

/// Spawn a sync cycle unless one is still running.
fn start_cycle<S>(engine: &Arc<SyncEngine<S>>, cycle: &mut Option<JoinHandle<()>>)
where
    S: MessageSender + ?Sized + 'static,
{
    if cycle.as_ref().is_some_and(|c| !c.is_finished()) {
        debug!("Sync cycle still running");
        return;
    }

    let engine = engine.clone();
    *cycle = Some(tokio::spawn(async move {
        engine.sync().await;
    }));
}
