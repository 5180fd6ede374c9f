//! Shared data model for the web-operator task execution core.
//!
//! Everything here is plain data: identifiers, the action/observation
//! vocabulary, the task record with its append-only step history, and
//! the status machine every other crate transitions through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a task, issued once at creation.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kinds of browser operations a planner may propose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Click,
    TypeText,
    Submit,
    Scroll,
    Extract,
    Wait,
    Screenshot,
    FillForm,
    /// Planner-issued completion marker when it arrives as an action.
    Finish,
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::TypeText => "type_text",
            ActionKind::Submit => "submit",
            ActionKind::Scroll => "scroll",
            ActionKind::Extract => "extract",
            ActionKind::Wait => "wait",
            ActionKind::Screenshot => "screenshot",
            ActionKind::FillForm => "fill_form",
            ActionKind::Finish => "finish",
        }
    }
}

/// A single proposed browser operation.
///
/// The payload is opaque to the core; only the kind and the target
/// descriptor participate in safety classification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,

    /// CSS selector, element description or URL, depending on kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Kind-specific parameters, passed through to the executor.
    #[serde(default)]
    pub payload: Value,

    /// Planner's stated reason for proposing this action.
    #[serde(default)]
    pub reason: String,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            target: None,
            payload: Value::Null,
            reason: String::new(),
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new(ActionKind::Navigate).with_target(url)
    }

    pub fn click(target: impl Into<String>) -> Self {
        Self::new(ActionKind::Click).with_target(target)
    }

    pub fn type_text(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(ActionKind::TypeText)
            .with_target(target)
            .with_payload(serde_json::json!({ "text": text.into() }))
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// Execution outcome category for one performed action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// Worth retrying (network hiccup, element not yet attached).
    TransientFailure,
    /// Retrying will not help.
    PermanentFailure,
}

/// What the executor observed after performing an action.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Observation {
    pub outcome: Outcome,

    /// Content extracted by the action, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// URL the page landed on, when the executor reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
}

impl Observation {
    pub fn success() -> Self {
        Self {
            outcome: Outcome::Success,
            extracted: None,
            error: None,
            current_url: None,
        }
    }

    pub fn transient_failure(error: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::TransientFailure,
            extracted: None,
            error: Some(error.into()),
            current_url: None,
        }
    }

    pub fn permanent_failure(error: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::PermanentFailure,
            extracted: None,
            error: Some(error.into()),
            current_url: None,
        }
    }

    pub fn with_extracted(mut self, extracted: Value) -> Self {
        self.extracted = Some(extracted);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.current_url = Some(url.into());
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }
}

/// Safety classification of a proposed action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    RequireConfirmation,
    Block,
}

/// Task lifecycle status.
///
/// `Created` is initial; `Completed`, `Failed`, `Cancelled` and
/// `TimedOut` are terminal. Everything else is transient within one
/// controller iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Planning,
    Executing,
    AwaitingConfirmation,
    Observing,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::TimedOut
        )
    }

    /// Whether the status machine permits moving to `next`.
    ///
    /// Terminal states permit nothing; the transient states follow the
    /// plan -> gate -> (confirm) -> act -> observe cycle, with limit and
    /// cancellation exits at the points the controller checks them.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match self {
            Created => matches!(next, Planning | Failed | Cancelled | TimedOut),
            Planning => matches!(
                next,
                Executing | AwaitingConfirmation | Completed | Failed | Cancelled | TimedOut
            ),
            AwaitingConfirmation => matches!(next, Executing | Failed | Cancelled),
            Executing => matches!(next, Observing | Failed),
            Observing => matches!(next, Planning | Failed | Cancelled | TimedOut),
            Completed | Failed | Cancelled | TimedOut => false,
        }
    }
}

/// Attempted move between two task statuses the machine forbids.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("illegal status transition: {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Scheduling weight for a task. Ordering only; no lanes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl TaskPriority {
    pub fn weight(self) -> u8 {
        match self {
            TaskPriority::Low => 1,
            TaskPriority::Normal => 2,
            TaskPriority::High => 4,
        }
    }
}

/// One recorded plan -> gate -> act -> observe cycle. Append-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-indexed sequence number within the task.
    pub seq: u32,
    pub action: Action,
    pub verdict: Verdict,
    pub observation: Observation,
    /// Reference to the screenshot captured after the action, if any.
    /// Write-once per step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Confirmation the task is suspended on. Present iff the task status
/// is `AwaitingConfirmation`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub action: Action,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

/// Caller-provided parameters for a new task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSpec {
    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,

    #[serde(default)]
    pub priority: TaskPriority,

    /// Maximum number of steps before the task fails.
    pub max_steps: u32,

    /// Wall-clock budget in seconds.
    pub max_execution_secs: u64,

    /// When set, every action is gated on confirmation.
    #[serde(default)]
    pub require_confirmation: bool,
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self {
            description: String::new(),
            target_url: None,
            priority: TaskPriority::Normal,
            max_steps: 10,
            max_execution_secs: 300,
            require_confirmation: false,
        }
    }
}

impl TaskSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_execution_secs(mut self, secs: u64) -> Self {
        self.max_execution_secs = secs;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn confirm_everything(mut self) -> Self {
        self.require_confirmation = true;
        self
    }
}

/// Authoritative task record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    pub priority: TaskPriority,
    pub max_steps: u32,
    pub max_execution_secs: u64,
    pub require_confirmation: bool,

    pub status: TaskStatus,
    pub steps_taken: u32,

    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_confirmation: Option<PendingConfirmation>,

    /// Cooperative cancellation flag, observed at the controller's
    /// next checkpoint.
    #[serde(default)]
    pub cancel_requested: bool,

    pub history: Vec<StepRecord>,
}

impl Task {
    pub fn new(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            description: spec.description,
            target_url: spec.target_url,
            priority: spec.priority,
            max_steps: spec.max_steps,
            max_execution_secs: spec.max_execution_secs,
            require_confirmation: spec.require_confirmation,
            status: TaskStatus::Created,
            steps_taken: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            pending_confirmation: None,
            cancel_requested: false,
            history: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Reference to the most recent screenshot, doubling as the final
    /// screenshot once the task is terminal.
    pub fn last_screenshot(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find_map(|step| step.screenshot.as_deref())
    }

    /// Debug check for the record-level invariants the store maintains.
    pub fn invariants_hold(&self) -> bool {
        self.steps_taken as usize == self.history.len()
            && self.steps_taken <= self.max_steps
            && (self.pending_confirmation.is_some()
                == matches!(self.status, TaskStatus::AwaitingConfirmation))
    }
}

/// Fixed reason strings recorded on terminal tasks.
pub mod reason {
    pub const STEP_LIMIT_EXCEEDED: &str = "step-limit-exceeded";
    pub const TIME_LIMIT_EXCEEDED: &str = "time-limit-exceeded";
    pub const SAFETY_VIOLATION: &str = "safety-violation";
    pub const EXECUTION_ERROR: &str = "execution-error";
    pub const DECLINED_BY_USER: &str = "declined-by-user";
    pub const CONFIRMATION_TIMEOUT: &str = "confirmation-timeout";
    pub const CANCELLED_BY_USER: &str = "cancelled-by-user";
    pub const PLANNING_ERROR: &str = "planning-error";
}
