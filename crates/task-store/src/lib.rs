//! Task store: the authoritative task records and their histories.
//!
//! Every task lives behind its own async mutex; the controller and the
//! confirmation path serialize through that lock, which is what makes
//! status transitions race-free. Mutation happens only through the
//! narrow [`TaskGuard`] operations — there is no ad hoc field access
//! from outside — and each operation enforces the status machine and
//! the history invariants before touching the record.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use operator_core_types::{
    reason, Action, Observation, PendingConfirmation, StepRecord, Task, TaskId, TaskSpec,
    TaskStatus, Verdict,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Errors produced by store operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("illegal status transition on task {task}: {from:?} -> {to:?}")]
    IllegalTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {0} is already terminal")]
    AlreadyTerminal(TaskId),

    #[error("task {0} has reached its step limit")]
    StepLimitReached(TaskId),
}

/// Storage surface consumed by the controller and the facade.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a task in CREATED status and return its id.
    async fn create(&self, spec: TaskSpec) -> TaskId;

    /// Snapshot of the full record, history included. Safe to call
    /// concurrently with an active controller loop.
    async fn get(&self, id: &TaskId) -> Result<Task, StoreError>;

    /// Snapshots of all records.
    async fn list(&self) -> Vec<Task>;

    /// Acquire the task's exclusive mutation scope. All writes to a
    /// task happen through the returned guard.
    async fn guard(&self, id: &TaskId) -> Result<TaskGuard, StoreError>;
}

/// In-memory store keyed by task id.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<DashMap<TaskId, Arc<Mutex<Task>>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, spec: TaskSpec) -> TaskId {
        let id = TaskId::new();
        let task = Task::new(id.clone(), spec);
        debug!(task = %id, "task record created");
        self.tasks.insert(id.clone(), Arc::new(Mutex::new(task)));
        id
    }

    async fn get(&self, id: &TaskId) -> Result<Task, StoreError> {
        let cell = self
            .tasks
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let task = cell.lock().await;
        Ok(task.clone())
    }

    async fn list(&self) -> Vec<Task> {
        let cells: Vec<Arc<Mutex<Task>>> = self
            .tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut tasks = Vec::with_capacity(cells.len());
        for cell in cells {
            tasks.push(cell.lock().await.clone());
        }
        tasks
    }

    async fn guard(&self, id: &TaskId) -> Result<TaskGuard, StoreError> {
        let cell = self
            .tasks
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(TaskGuard {
            inner: cell.lock_owned().await,
        })
    }
}

/// Exclusive mutation scope over one task.
///
/// Read access is free-form; writes go through the named operations,
/// each of which checks the status machine first.
pub struct TaskGuard {
    inner: OwnedMutexGuard<Task>,
}

impl std::ops::Deref for TaskGuard {
    type Target = Task;

    fn deref(&self) -> &Task {
        &self.inner
    }
}

impl TaskGuard {
    /// Move the task to another status, enforcing the machine.
    pub fn transition(&mut self, to: TaskStatus) -> Result<(), StoreError> {
        let from = self.inner.status;
        if !from.can_transition_to(to) {
            if from.is_terminal() {
                return Err(StoreError::AlreadyTerminal(self.inner.id.clone()));
            }
            return Err(StoreError::IllegalTransition {
                task: self.inner.id.clone(),
                from,
                to,
            });
        }
        debug!(task = %self.inner.id, ?from, ?to, "status transition");
        self.inner.status = to;
        if to.is_terminal() {
            self.inner.finished_at = Some(Utc::now());
            self.inner.pending_confirmation = None;
        }
        Ok(())
    }

    /// First transition out of CREATED; stamps `started_at`.
    pub fn begin(&mut self) -> Result<(), StoreError> {
        self.transition(TaskStatus::Planning)?;
        if self.inner.started_at.is_none() {
            self.inner.started_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Append one step record and bump `steps_taken`. The two always
    /// move together, keeping `history.len() == steps_taken`.
    pub fn record_step(
        &mut self,
        action: Action,
        verdict: Verdict,
        observation: Observation,
        screenshot: Option<String>,
    ) -> Result<&StepRecord, StoreError> {
        if self.inner.steps_taken >= self.inner.max_steps {
            return Err(StoreError::StepLimitReached(self.inner.id.clone()));
        }
        self.transition(TaskStatus::Observing)?;
        let seq = self.inner.steps_taken + 1;
        if let Some(url) = observation.current_url.as_deref() {
            self.inner.target_url = Some(url.to_string());
        }
        self.inner.history.push(StepRecord {
            seq,
            action,
            verdict,
            observation,
            screenshot,
            recorded_at: Utc::now(),
        });
        self.inner.steps_taken = seq;
        debug_assert!(self.inner.invariants_hold());
        Ok(self.inner.history.last().expect("step just appended"))
    }

    /// Enter AWAITING_CONFIRMATION with its pending entry. The entry
    /// and the status move together.
    pub fn suspend_on_confirmation(
        &mut self,
        entry: PendingConfirmation,
    ) -> Result<(), StoreError> {
        self.transition(TaskStatus::AwaitingConfirmation)?;
        self.inner.pending_confirmation = Some(entry);
        Ok(())
    }

    /// Approved: clear the pending entry and resume toward the same
    /// action that was gated.
    pub fn resume_confirmed(&mut self) -> Result<(), StoreError> {
        self.transition(TaskStatus::Executing)?;
        self.inner.pending_confirmation = None;
        Ok(())
    }

    pub fn complete(&mut self, result: Option<Value>) -> Result<(), StoreError> {
        self.transition(TaskStatus::Completed)?;
        self.inner.result = result;
        Ok(())
    }

    /// Terminal failure with one of the fixed reason strings, plus
    /// optional detail.
    pub fn fail(&mut self, why: &str, detail: Option<String>) -> Result<(), StoreError> {
        self.transition(TaskStatus::Failed)?;
        self.inner.error = Some(match detail {
            Some(detail) => format!("{why}: {detail}"),
            None => why.to_string(),
        });
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), StoreError> {
        self.transition(TaskStatus::Cancelled)?;
        self.inner.error = Some(reason::CANCELLED_BY_USER.to_string());
        Ok(())
    }

    pub fn time_out(&mut self) -> Result<(), StoreError> {
        self.transition(TaskStatus::TimedOut)?;
        self.inner.error = Some(reason::TIME_LIMIT_EXCEEDED.to_string());
        Ok(())
    }

    /// Cooperative cancellation: flag only, no transition. The
    /// controller observes it at its next checkpoint.
    pub fn request_cancel(&mut self) -> Result<(), StoreError> {
        if self.inner.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal(self.inner.id.clone()));
        }
        self.inner.cancel_requested = true;
        Ok(())
    }
}
