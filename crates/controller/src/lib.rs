//! Task execution state machine.
//!
//! The controller drives one task through bounded
//! plan -> gate -> (confirm) -> act -> observe cycles until a terminal
//! status, consuming the planner, executor and screenshot collaborators
//! through the traits in [`collaborators`].

pub mod collaborators;
pub mod config;
pub mod controller;
pub mod errors;

pub use collaborators::{
    ActionExecutor, NoopScreenshotService, PlanContext, Planner, PlannerDecision,
    ScreenshotService,
};
pub use config::ControllerConfig;
pub use controller::TaskController;
pub use errors::{ControllerError, ExecutorError, PlanningError, ScreenshotError};
