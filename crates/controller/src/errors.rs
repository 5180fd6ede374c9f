use operator_confirm_broker::BrokerError;
use operator_core_types::TaskId;
use operator_task_store::StoreError;
use thiserror::Error;

/// Planner could not produce a decision (unavailable backend,
/// malformed output). Always terminal for the task.
#[derive(Debug, Error)]
#[error("planning failed: {0}")]
pub struct PlanningError(pub String);

impl PlanningError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Infrastructure-level executor failure. Transient-vs-permanent for
/// *performed* actions is carried by the observation outcome instead;
/// this error means the action could not be attempted at all.
#[derive(Debug, Error)]
#[error("executor failed: {0}")]
pub struct ExecutorError(pub String);

impl ExecutorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Screenshot capture failure. Best-effort: never fails a step.
#[derive(Debug, Error)]
#[error("screenshot capture failed: {0}")]
pub struct ScreenshotError(pub String);

impl ScreenshotError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors surfaced by the controller itself. Task-level failures are
/// not errors here — they land on the task record as terminal status
/// plus reason; this enum is for misuse of the controller surface.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("task {0} is not in CREATED status")]
    AlreadyStarted(TaskId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}
