//! Task execution core for an autonomous web-browsing agent.
//!
//! A task moves through bounded plan -> gate -> (confirm) -> act ->
//! observe cycles until it reaches a terminal status. This crate wires
//! the pieces together behind [`Operator`]: the task store, the safety
//! gate, the confirmation broker and the per-task controller. Callers
//! supply the planner and action executor; everything else has
//! defaults.
//!
//! ```no_run
//! use std::sync::Arc;
//! use web_operator::{Operator, TaskSpec};
//! # use web_operator::{Planner, ActionExecutor};
//! # async fn demo(planner: Arc<dyn Planner>, executor: Arc<dyn ActionExecutor>) {
//! web_operator::init_logging();
//! let operator = Operator::builder(planner, executor).build();
//! let id = operator.create(TaskSpec::new("find today's headlines")).await.unwrap();
//! let task = operator.wait(&id).await.unwrap();
//! println!("{:?}: {:?}", task.status, task.result);
//! # }
//! ```

mod errors;
mod logging;
mod operator;

pub use errors::OperatorError;
pub use logging::init_logging;
pub use operator::{Operator, OperatorBuilder};

// Core vocabulary.
pub use operator_core_types::{
    reason, Action, ActionKind, Observation, Outcome, PendingConfirmation, StepRecord, Task,
    TaskId, TaskPriority, TaskSpec, TaskStatus, Verdict,
};

// Collaborator contracts and loop configuration.
pub use operator_controller::{
    ActionExecutor, ControllerConfig, ExecutorError, NoopScreenshotService, PlanContext, Planner,
    PlannerDecision, PlanningError, ScreenshotService, ScreenshotError, TaskController,
};

// Safety policy surface.
pub use operator_safety_gate::{
    classify, default_policy, load_policy, PolicyError, SafetyPolicy, TaskSafetyContext,
};
