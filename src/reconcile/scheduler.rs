//! Per-record reconciliation tasks
//!
//! Each scheduled record gets one tokio task that owns a child of the
//! scheduler's root [`CancellationToken`]. The token is released when the
//! task ends, when the record is cancelled or rescheduled, or when the
//! scheduler shuts down. A cancelled task never writes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stream_ingestr::reconcile::{ReconcileJob, ReconcileScheduler, Reconciler};
//! # use stream_ingestr::stream::StreamId;
//!
//! # async fn example(reconciler: Arc<Reconciler>, id: StreamId) {
//! let scheduler = ReconcileScheduler::new(reconciler);
//! let ticket = scheduler.schedule(ReconcileJob::new(id));
//! let outcome = ticket.outcome().await;
//! println!("{}", outcome);
//! scheduler.shutdown().await;
//! # }
//! ```

use super::{ReconcileJob, ReconcileOutcome, Reconciler};
use crate::stream::StreamId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Handle to a scheduled reconciliation
#[derive(Debug)]
pub struct ReconcileTicket {
    stream_id: StreamId,
    outcome: oneshot::Receiver<ReconcileOutcome>,
}

impl ReconcileTicket {
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Wait for the task to finish
    ///
    /// A task that is torn down before reporting counts as cancelled.
    pub async fn outcome(self) -> ReconcileOutcome {
        self.outcome
            .await
            .unwrap_or(ReconcileOutcome::Cancelled { attempts: 0 })
    }
}

struct ActiveTask {
    task_id: u64,
    cancel: CancellationToken,
}

/// Owns one polling task per in-flight record
pub struct ReconcileScheduler {
    reconciler: Arc<Reconciler>,
    tasks: Arc<DashMap<StreamId, ActiveTask>>,
    root: CancellationToken,
    tracker: TaskTracker,
    next_task_id: AtomicU64,
}

impl ReconcileScheduler {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            reconciler,
            tasks: Arc::new(DashMap::new()),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            next_task_id: AtomicU64::new(1),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Start polling a record
    ///
    /// A record that already has a live task gets that task cancelled
    /// first. After [`shutdown`](Self::shutdown) the returned ticket
    /// resolves to `Cancelled` without polling.
    pub fn schedule(&self, job: ReconcileJob) -> ReconcileTicket {
        let (tx, rx) = oneshot::channel();
        let stream_id = job.stream_id.clone();

        if self.root.is_cancelled() {
            let _ = tx.send(ReconcileOutcome::Cancelled { attempts: 0 });
            return ReconcileTicket {
                stream_id,
                outcome: rx,
            };
        }

        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.root.child_token();

        if let Some(previous) = self.tasks.insert(
            stream_id.clone(),
            ActiveTask {
                task_id,
                cancel: cancel.clone(),
            },
        ) {
            tracing::debug!(uid = %stream_id, "Replacing existing reconciliation task");
            previous.cancel.cancel();
        }

        let reconciler = Arc::clone(&self.reconciler);
        let tasks = Arc::clone(&self.tasks);
        self.tracker.spawn(async move {
            let outcome = reconciler.run(&job, cancel).await;
            // Only drop our own entry; a replacement may already be registered
            tasks.remove_if(&job.stream_id, |_, active| active.task_id == task_id);
            let _ = tx.send(outcome);
        });

        tracing::debug!(uid = %stream_id, task_id, "Reconciliation scheduled");
        ReconcileTicket {
            stream_id,
            outcome: rx,
        }
    }

    /// Cancel a record's task; `true` if one was running
    pub fn cancel(&self, id: &StreamId) -> bool {
        match self.tasks.remove(id) {
            Some((_, active)) => {
                active.cancel.cancel();
                tracing::debug!(uid = %id, "Reconciliation cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, id: &StreamId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel every task and wait for all of them to exit
    pub async fn shutdown(&self) {
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.tasks.clear();
        tracing::info!("Reconciliation scheduler stopped");
    }
}
