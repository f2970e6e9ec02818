//! Notification worker pool.
//!
//! Tasks are enqueued with a non-blocking `try_send`. When the bounded queue is
//! full they spill into an unbounded backlog that a forwarder thread feeds
//! back into the queue, so the caller never blocks and no accepted task is
//! lost. Workers exit once every sender is gone, so dropping the system drains
//! the backlog and the queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};

use super::{ChatNotifier, NotificationTask};

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Worker threads delivering notifications.
    pub workers: usize,
    /// Queued tasks before new ones spill into the backlog.
    pub queue_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Background delivery of welcome notifications.
pub struct NotificationSystem {
    tx: Option<Sender<NotificationTask>>,
    backlog: Option<Sender<NotificationTask>>,
    counters: Arc<Counters>,
    scheduled: AtomicU64,
    spilled: AtomicU64,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationSystem {
    /// Starts the worker pool and the backlog forwarder.
    pub fn new(cfg: &NotificationConfig, notifier: Arc<dyn ChatNotifier>) -> GatewayResult<Self> {
        let (tx, rx) = bounded::<NotificationTask>(cfg.queue_capacity.max(1));
        let (backlog, backlog_rx) = unbounded::<NotificationTask>();
        let counters = Arc::new(Counters::default());

        let mut threads = Vec::with_capacity(cfg.workers.max(1) + 1);
        for i in 0..cfg.workers.max(1) {
            let rx = rx.clone();
            let notifier = Arc::clone(&notifier);
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("teamgate-notify-{i}"))
                .spawn(move || worker_loop(&rx, notifier.as_ref(), &counters))
                .map_err(|e| GatewayError::internal(format!("failed to spawn notification worker: {e}")))?;
            threads.push(handle);
        }

        let queue = tx.clone();
        let forwarder_counters = Arc::clone(&counters);
        let handle = thread::Builder::new()
            .name("teamgate-notify-backlog".to_string())
            .spawn(move || forward_backlog(&backlog_rx, &queue, &forwarder_counters))
            .map_err(|e| GatewayError::internal(format!("failed to spawn notification backlog: {e}")))?;
        threads.push(handle);

        Ok(Self {
            tx: Some(tx),
            backlog: Some(backlog),
            counters,
            scheduled: AtomicU64::new(0),
            spilled: AtomicU64::new(0),
            threads: Mutex::new(threads),
        })
    }

    /// Non-blocking enqueue. Returns false only if the pool has shut down.
    pub fn schedule(&self, task: NotificationTask) -> bool {
        let (Some(tx), Some(backlog)) = (&self.tx, &self.backlog) else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        let outcome = match tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => {
                self.spilled.fetch_add(1, Ordering::Relaxed);
                debug!(tag = "BG", recipient = %task.recipient_username, "notification queue full, spilling to backlog");
                backlog.send(task).map_err(|e| e.into_inner())
            }
            Err(TrySendError::Disconnected(task)) => Err(task),
        };
        match outcome {
            Ok(()) => {
                self.scheduled.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(task) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(tag = "BG", recipient = %task.recipient_username, "notification workers gone, dropping");
                false
            }
        }
    }

    /// Enqueues every task and returns how many were accepted.
    pub fn schedule_all(&self, tasks: impl IntoIterator<Item = NotificationTask>) -> usize {
        tasks.into_iter().map(|t| usize::from(self.schedule(t))).sum()
    }

    #[must_use]
    pub fn scheduled(&self) -> u64 {
        self.scheduled.load(Ordering::Relaxed)
    }

    /// Tasks that found the queue full and went through the backlog.
    #[must_use]
    pub fn spilled(&self) -> u64 {
        self.spilled.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for NotificationSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSystem")
            .field("scheduled", &self.scheduled())
            .field("spilled", &self.spilled())
            .field("delivered", &self.delivered())
            .field("failed", &self.failed())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl Drop for NotificationSystem {
    fn drop(&mut self) {
        // The forwarder holds the last queue sender once ours is gone, so
        // workers exit only after the backlog is flushed.
        drop(self.backlog.take());
        drop(self.tx.take());
        let handles = match self.threads.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if handle.join().is_err() {
                warn!(tag = "BG", "notification thread panicked");
            }
        }
    }
}

fn forward_backlog(backlog: &Receiver<NotificationTask>, queue: &Sender<NotificationTask>, counters: &Counters) {
    while let Ok(task) = backlog.recv() {
        if let Err(e) = queue.send(task) {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(tag = "BG", recipient = %e.into_inner().recipient_username, "notification workers gone, dropping");
        }
    }
}

fn worker_loop(rx: &Receiver<NotificationTask>, notifier: &dyn ChatNotifier, counters: &Counters) {
    while let Ok(task) = rx.recv() {
        match notifier.send_welcome(&task) {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(tag = "BG", team_id = %task.team_id, recipient = %task.recipient_username, "sent welcome message");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    tag = "BG",
                    team_id = %task.team_id,
                    recipient = %task.recipient_username,
                    error = %e,
                    "failed to send welcome message"
                );
            }
        }
    }
}
