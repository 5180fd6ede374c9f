//! Confirmation broker: the suspend/resume primitive behind
//! AWAITING_CONFIRMATION.
//!
//! Holds at most one outstanding confirmation per task. A controller
//! requests a ticket and parks on it; an external `resolve` (or
//! `cancel`, or the wait budget expiring) is the only thing that wakes
//! it. Entry removal and sender consumption happen together under the
//! map entry, so a resolution observed after the request always applies
//! to that pending confirmation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use operator_core_types::{Action, PendingConfirmation, TaskId};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// How a pending confirmation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Approved,
    Declined,
    /// The wait budget elapsed; treated as a decline by callers.
    TimedOut,
    /// The task was cancelled while suspended.
    Cancelled,
}

/// Errors produced by the broker surface.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("task {0} already has a pending confirmation")]
    AlreadyPending(TaskId),

    #[error("task {0} is not awaiting confirmation")]
    NotPending(TaskId),
}

struct PendingSlot {
    entry: PendingConfirmation,
    tx: oneshot::Sender<Resolution>,
}

/// Broker holding the pending confirmations of all live tasks.
#[derive(Clone, Default)]
pub struct ConfirmationBroker {
    pending: Arc<DashMap<TaskId, PendingSlot>>,
}

impl ConfirmationBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending confirmation and hand back the ticket the
    /// controller parks on. A second request while one is outstanding
    /// is an invariant breach, reported as `AlreadyPending`.
    pub fn request(
        &self,
        task_id: &TaskId,
        action: Action,
        reason: impl Into<String>,
    ) -> Result<PendingTicket, BrokerError> {
        use dashmap::mapref::entry::Entry;

        let entry = PendingConfirmation {
            action,
            reason: reason.into(),
            requested_at: Utc::now(),
        };
        let (tx, rx) = oneshot::channel();

        match self.pending.entry(task_id.clone()) {
            Entry::Occupied(_) => Err(BrokerError::AlreadyPending(task_id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(PendingSlot {
                    entry: entry.clone(),
                    tx,
                });
                debug!(task = %task_id, "confirmation requested");
                Ok(PendingTicket {
                    task_id: task_id.clone(),
                    entry,
                    rx,
                    pending: Arc::clone(&self.pending),
                })
            }
        }
    }

    /// Apply an external approve/decline to the task's outstanding
    /// confirmation. `NotPending` when there is none.
    pub fn resolve(&self, task_id: &TaskId, approved: bool) -> Result<(), BrokerError> {
        let resolution = if approved {
            Resolution::Approved
        } else {
            Resolution::Declined
        };
        self.finish(task_id, resolution)
    }

    /// Wake a suspended task because it was cancelled.
    pub fn cancel(&self, task_id: &TaskId) -> Result<(), BrokerError> {
        self.finish(task_id, Resolution::Cancelled)
    }

    pub fn is_pending(&self, task_id: &TaskId) -> bool {
        self.pending.contains_key(task_id)
    }

    /// Snapshot of the entry a task is suspended on, if any.
    pub fn pending_entry(&self, task_id: &TaskId) -> Option<PendingConfirmation> {
        self.pending.get(task_id).map(|slot| slot.entry.clone())
    }

    fn finish(&self, task_id: &TaskId, resolution: Resolution) -> Result<(), BrokerError> {
        let (_, slot) = self
            .pending
            .remove(task_id)
            .ok_or_else(|| BrokerError::NotPending(task_id.clone()))?;
        debug!(task = %task_id, ?resolution, "confirmation resolved");
        if slot.tx.send(resolution).is_err() {
            // Ticket side already gave up (timeout raced us); the
            // caller still gets Ok because the entry is gone.
            warn!(task = %task_id, "confirmation resolved after waiter left");
        }
        Ok(())
    }
}

/// Handle the controller awaits while the task is suspended.
pub struct PendingTicket {
    task_id: TaskId,
    entry: PendingConfirmation,
    rx: oneshot::Receiver<Resolution>,
    pending: Arc<DashMap<TaskId, PendingSlot>>,
}

impl std::fmt::Debug for PendingTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTicket")
            .field("task_id", &self.task_id)
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

impl PendingTicket {
    pub fn entry(&self) -> &PendingConfirmation {
        &self.entry
    }

    /// Wait for a resolution, up to `budget`. Expiry auto-resolves as
    /// `TimedOut` and clears the pending entry; a resolver that wins
    /// the race at the deadline still gets its resolution honored.
    pub async fn wait(mut self, budget: Duration) -> Resolution {
        match tokio::time::timeout(budget, &mut self.rx).await {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_)) => {
                // Sender dropped without a resolution; broker state is
                // gone, so treat it as a decline.
                warn!(task = %self.task_id, "confirmation channel closed without resolution");
                Resolution::Declined
            }
            Err(_) => {
                if self.pending.remove(&self.task_id).is_some() {
                    debug!(task = %self.task_id, "confirmation wait budget elapsed");
                    Resolution::TimedOut
                } else {
                    // A resolve() removed the entry right at the
                    // deadline; its verdict is already in the channel.
                    self.rx.try_recv().unwrap_or(Resolution::TimedOut)
                }
            }
        }
    }
}
