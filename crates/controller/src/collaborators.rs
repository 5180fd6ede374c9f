//! Contracts for the external collaborators the controller consumes.
//!
//! The core never reaches past these traits: how plans are produced,
//! how the browser is driven and how screenshots are stored are all
//! someone else's concern.

use async_trait::async_trait;
use operator_core_types::{Action, Observation, StepRecord, TaskId};
use serde_json::Value;

use crate::errors::{ExecutorError, PlanningError, ScreenshotError};

/// Everything the planner may look at when deciding the next action.
#[derive(Clone, Debug)]
pub struct PlanContext {
    pub task_id: TaskId,
    pub description: String,
    pub target_url: Option<String>,
    /// Full step history, oldest first.
    pub history: Vec<StepRecord>,
}

/// Planner output: the next action, or the completion signal.
#[derive(Clone, Debug)]
pub enum PlannerDecision {
    Next(Action),
    Done { result: Option<Value> },
}

impl PlannerDecision {
    pub fn done() -> Self {
        Self::Done { result: None }
    }

    pub fn done_with(result: Value) -> Self {
        Self::Done {
            result: Some(result),
        }
    }
}

/// Produces the next proposed action for a task.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn next_action(&self, ctx: PlanContext) -> Result<PlannerDecision, PlanningError>;
}

/// Performs a single browser action and reports what happened.
/// Transient vs permanent failure is expressed on the observation.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn perform(&self, action: &Action) -> Result<Observation, ExecutorError>;
}

/// Captures the current visual state, returning an opaque reference.
#[async_trait]
pub trait ScreenshotService: Send + Sync {
    async fn capture(&self, task_id: &TaskId, seq: u32) -> Result<String, ScreenshotError>;
}

/// Screenshot service that never captures anything. Useful in tests
/// and for deployments with screenshots disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopScreenshotService;

#[async_trait]
impl ScreenshotService for NoopScreenshotService {
    async fn capture(&self, _task_id: &TaskId, _seq: u32) -> Result<String, ScreenshotError> {
        Err(ScreenshotError::new("screenshots disabled"))
    }
}
