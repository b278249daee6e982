// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queue scheduler: a single in-flight drain loop over the durable queue.
//!
//! # States
//!
//! ```text
//!            request drain                 queue empty
//!   Idle ─────────────────▶ Draining ─────────────────▶ Idle
//!    ▲                          │
//!    │ timer fires              │ action failed
//!    │ (drain requested)        ▼
//!    └─────────────────── RetryScheduled
//! ```
//!
//! # Ordering
//!
//! - Enqueues happen under the queueing gate, so queue order is call order.
//! - The drain loop passes the same gate before each peek, so it never
//!   observes a half-written enqueue.
//! - At most one drain runs. A second request waits for the running one to
//!   finish, then drains whatever is left.
//! - A failing action stays at the head of the queue. Nothing behind it
//!   runs until it succeeds.
//!
//! There is no per-action timeout: a remote call that never returns stalls
//! the drain, and the retry timer only arms once a call has failed.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::executor::ActionExecutor;
use crate::action::{Action, QueueInteraction};
use crate::error::{Result, SharingError};
use crate::metrics;
use crate::storage::traits::ActionQueueStore;

/// Where the drain loop currently is.
enum DrainState {
    Idle,
    /// `done` flips to `true` once the running drain finished
    Draining { done: watch::Receiver<bool> },
    RetryScheduled { timer: JoinHandle<()> },
}

/// Observable summary of [`DrainState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStatus {
    Idle,
    Draining,
    RetryScheduled,
}

pub struct QueueScheduler {
    queue: Arc<dyn ActionQueueStore>,
    executor: Arc<ActionExecutor>,
    queueing: AsyncMutex<()>,
    state: Mutex<DrainState>,
    /// Number of requested drains not yet finished
    active: watch::Sender<usize>,
    retry_interval: Duration,
}

impl QueueScheduler {
    pub fn new(
        queue: Arc<dyn ActionQueueStore>,
        executor: Arc<ActionExecutor>,
        retry_interval: Duration,
    ) -> Arc<Self> {
        let (active, _) = watch::channel(0);
        Arc::new(Self {
            queue,
            executor,
            queueing: AsyncMutex::new(()),
            state: Mutex::new(DrainState::Idle),
            active,
            retry_interval,
        })
    }

    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        match &*self.state.lock() {
            DrainState::Idle => SchedulerStatus::Idle,
            DrainState::Draining { .. } => SchedulerStatus::Draining,
            DrainState::RetryScheduled { .. } => SchedulerStatus::RetryScheduled,
        }
    }

    pub async fn pending_count(&self) -> Result<u64> {
        Ok(self.queue.len().await?)
    }

    /// Queue (or directly run) an action according to `mode`.
    ///
    /// - `QueueAndReturn`: returns once the action is persisted. A failing
    ///   drain is logged and left to the retry timer; the caller never sees it.
    /// - `QueueAndAwait`: returns the result of the drain it triggered.
    /// - `SkipQueue`: runs the action right away, nothing is persisted, and
    ///   a failure is the caller's to retry.
    pub async fn schedule_action(self: &Arc<Self>, action: Action, mode: QueueInteraction) -> Result<()> {
        metrics::record_action_scheduled(action.kind(), mode);

        if mode == QueueInteraction::SkipQueue {
            // Wait out an in-progress enqueue, same as the drain loop does
            drop(self.queueing.lock().await);
            return self.executor.execute(&action).await;
        }

        {
            let _gate = self.queueing.lock().await;
            let id = self.queue.enqueue(&action).await?;
            debug!(id, kind = action.kind(), "Action queued");
        }

        let drain = self.spawn_drain();
        match mode {
            QueueInteraction::QueueAndAwait => join(drain).await,
            // Dropping the handle detaches the drain; it logs its own failure
            _ => Ok(()),
        }
    }

    /// Drain the queue and wait for the result.
    ///
    /// If a drain is already running this waits for it first, then drains
    /// what remains, so actions are never executed by two loops at once.
    pub async fn execute_pending_actions(self: &Arc<Self>) -> Result<()> {
        join(self.spawn_drain()).await
    }

    /// Cancel a pending retry timer and drain now.
    pub async fn force_pending_actions_retry(self: &Arc<Self>) -> Result<()> {
        info!("Forcing retry of pending sharing actions");
        self.execute_pending_actions().await
    }

    /// Resolve once no drain is running or requested.
    pub async fn wait_for_idle(&self) -> Result<()> {
        let mut active = self.active.subscribe();
        active
            .wait_for(|count| *count == 0)
            .await
            .map_err(|e| SharingError::Task(e.to_string()))?;
        Ok(())
    }

    /// Run the drain on its own task so a dropped caller cannot cut an
    /// action short between execute and remove.
    fn spawn_drain(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        self.active.send_modify(|count| *count += 1);
        let this = self.clone();
        tokio::spawn(async move {
            let _active = ActiveGuard(&*this);
            this.drain().await
        })
    }

    async fn drain(self: &Arc<Self>) -> Result<()> {
        let done = self.begin_drain().await;
        let _guard = DrainGuard { scheduler: &**self, done };

        let mut executed = 0;
        let result = self.drain_queue(&mut executed).await;

        metrics::record_drain(executed, result.is_ok());
        if let Ok(depth) = self.queue.len().await {
            metrics::set_queue_depth(depth);
        }

        match &result {
            Ok(()) => {
                if executed > 0 {
                    info!(executed, "Sharing queue drained");
                }
            }
            Err(e) => {
                warn!(
                    executed,
                    error = %e,
                    retry_in = ?self.retry_interval,
                    "Error while executing sharing actions (retry scheduled)"
                );
                self.schedule_retry();
            }
        }

        result
    }

    async fn drain_queue(&self, executed: &mut usize) -> Result<()> {
        loop {
            drop(self.queueing.lock().await);

            let Some(entry) = self.queue.peek_oldest().await? else {
                return Ok(());
            };
            self.executor.execute(&entry.action).await?;
            self.queue.remove(entry.id).await?;
            *executed += 1;
        }
    }

    /// Become the one running drain, waiting for any running one first.
    /// Cancels a pending retry timer.
    async fn begin_drain(&self) -> watch::Sender<bool> {
        loop {
            let mut running = {
                let mut state = self.state.lock();
                if let DrainState::Draining { done } = &*state {
                    done.clone()
                } else {
                    let (tx, rx) = watch::channel(false);
                    let previous = std::mem::replace(&mut *state, DrainState::Draining { done: rx });
                    if let DrainState::RetryScheduled { timer } = previous {
                        debug!("Pending retry superseded");
                        timer.abort();
                    }
                    return tx;
                }
            };

            // Err means the other drain vanished without signalling; retake the state either way
            let _ = running.wait_for(|finished| *finished).await;
        }
    }

    fn schedule_retry(self: &Arc<Self>) {
        let scheduler: Weak<Self> = Arc::downgrade(self);
        let interval = self.retry_interval;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.take_retry_timer();
                drop(scheduler.spawn_drain());
            }
        });

        let previous = std::mem::replace(&mut *self.state.lock(), DrainState::RetryScheduled { timer });
        if let DrainState::RetryScheduled { timer } = previous {
            timer.abort();
        }
        metrics::record_retry_scheduled();
    }

    /// Called by the firing timer: leave `RetryScheduled` without aborting itself.
    fn take_retry_timer(&self) {
        let mut state = self.state.lock();
        if matches!(*state, DrainState::RetryScheduled { .. }) {
            *state = DrainState::Idle;
        }
    }
}

async fn join(handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(e.into()),
    }
}

/// RAII guard: leaves `Draining` and wakes waiting drains.
struct DrainGuard<'a> {
    scheduler: &'a QueueScheduler,
    done: watch::Sender<bool>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.scheduler.state.lock();
            if matches!(*state, DrainState::Draining { .. }) {
                *state = DrainState::Idle;
            }
        }
        self.done.send_replace(true);
    }
}

/// RAII guard: one requested drain finished.
struct ActiveGuard<'a>(&'a QueueScheduler);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.send_modify(|count| *count = count.saturating_sub(1));
    }
}
