use operator_core_types::TaskId;
use operator_task_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the operator facade.
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("invalid task spec: {0}")]
    InvalidSpec(String),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {0} is not awaiting confirmation")]
    NotAwaitingConfirmation(TaskId),

    #[error("task {0} is already terminal")]
    AlreadyTerminal(TaskId),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for OperatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => OperatorError::NotFound(id),
            StoreError::AlreadyTerminal(id) => OperatorError::AlreadyTerminal(id),
            other => OperatorError::Store(other),
        }
    }
}
