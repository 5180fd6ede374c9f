//! The per-task execution loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use operator_confirm_broker::{ConfirmationBroker, Resolution};
use operator_core_types::{reason, Action, Observation, Outcome, Task, TaskId, TaskStatus, Verdict};
use operator_safety_gate::{classify, SafetyPolicy, TaskSafetyContext};
use operator_task_store::TaskStore;
use tracing::{debug, info, warn};

use crate::collaborators::{ActionExecutor, PlanContext, Planner, PlannerDecision, ScreenshotService};
use crate::config::ControllerConfig;
use crate::errors::ControllerError;

/// Drives a single task from CREATED to a terminal status.
///
/// One controller instance may serve many tasks, but `run` must be
/// invoked at most once per task; the store's per-task lock plus the
/// CREATED-status check enforce that.
pub struct TaskController {
    store: Arc<dyn TaskStore>,
    broker: ConfirmationBroker,
    policy: Arc<SafetyPolicy>,
    planner: Arc<dyn Planner>,
    executor: Arc<dyn ActionExecutor>,
    screenshots: Arc<dyn ScreenshotService>,
    config: ControllerConfig,
}

impl TaskController {
    pub fn new(
        store: Arc<dyn TaskStore>,
        broker: ConfirmationBroker,
        policy: Arc<SafetyPolicy>,
        planner: Arc<dyn Planner>,
        executor: Arc<dyn ActionExecutor>,
        screenshots: Arc<dyn ScreenshotService>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            broker,
            policy,
            planner,
            executor,
            screenshots,
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Execute the loop until the task is terminal, then return the
    /// final record. Task-level failures are not `Err`s — they land on
    /// the record as status plus reason.
    pub async fn run(&self, task_id: &TaskId) -> Result<Task, ControllerError> {
        let (max_steps, budget, require_confirmation) = {
            let mut guard = self.store.guard(task_id).await?;
            if guard.status != TaskStatus::Created {
                return Err(ControllerError::AlreadyStarted(task_id.clone()));
            }
            guard.begin()?;
            (
                guard.max_steps,
                Duration::from_secs(guard.max_execution_secs),
                guard.require_confirmation,
            )
        };
        let started = Instant::now();
        info!(task = %task_id, "task started");

        loop {
            // Checkpoint: cancellation and the wall-clock budget,
            // before any planning.
            let ctx = {
                let mut guard = self.store.guard(task_id).await?;
                if guard.cancel_requested {
                    guard.cancel()?;
                    info!(task = %task_id, "task cancelled");
                    break;
                }
                if started.elapsed() >= budget {
                    guard.time_out()?;
                    warn!(task = %task_id, "execution time budget exceeded");
                    break;
                }
                if guard.status == TaskStatus::Observing {
                    guard.transition(TaskStatus::Planning)?;
                }
                PlanContext {
                    task_id: task_id.clone(),
                    description: guard.description.clone(),
                    target_url: guard.target_url.clone(),
                    history: guard.history.clone(),
                }
            };
            let current_url = ctx.target_url.clone();
            let steps_taken = ctx.history.len() as u32;
            let next_seq = steps_taken + 1;

            // Plan. A spent step budget still gets one planning call:
            // a planner that declares the task done after its final
            // step completes it; only another proposed action trips
            // the limit.
            let action = match self.planner.next_action(ctx).await {
                Err(err) => {
                    let mut guard = self.store.guard(task_id).await?;
                    guard.fail(reason::PLANNING_ERROR, Some(err.0))?;
                    break;
                }
                Ok(PlannerDecision::Done { result }) => {
                    let mut guard = self.store.guard(task_id).await?;
                    guard.complete(result)?;
                    info!(task = %task_id, steps = guard.steps_taken, "task completed");
                    break;
                }
                Ok(PlannerDecision::Next(action)) => action,
            };

            // Step budget: the proposed action is never issued once
            // the limit is reached.
            if steps_taken >= max_steps {
                let mut guard = self.store.guard(task_id).await?;
                guard.fail(reason::STEP_LIMIT_EXCEEDED, None)?;
                warn!(task = %task_id, max_steps, "step limit exceeded");
                break;
            }

            // Gate.
            let safety_ctx = TaskSafetyContext::new(current_url.as_deref(), require_confirmation);
            let verdict = classify(&self.policy, &action, &safety_ctx);
            debug!(task = %task_id, kind = action.kind.name(), ?verdict, "action classified");
            match verdict {
                Verdict::Block => {
                    let mut guard = self.store.guard(task_id).await?;
                    guard.fail(
                        reason::SAFETY_VIOLATION,
                        Some(format!("{} action blocked by policy", action.kind.name())),
                    )?;
                    warn!(task = %task_id, kind = action.kind.name(), "action blocked");
                    break;
                }
                Verdict::RequireConfirmation => {
                    if !self.await_confirmation(task_id, &action).await? {
                        break;
                    }
                }
                Verdict::Allow => {
                    let mut guard = self.store.guard(task_id).await?;
                    guard.transition(TaskStatus::Executing)?;
                }
            }

            // Act, with the transient-retry budget.
            let observation = self.perform_with_retry(task_id, &action).await;
            if !observation.is_success() {
                let mut guard = self.store.guard(task_id).await?;
                guard.fail(reason::EXECUTION_ERROR, observation.error.clone())?;
                warn!(task = %task_id, error = ?observation.error, "action failed permanently");
                break;
            }

            // Screenshot is best-effort; a capture failure never fails
            // the step.
            let screenshot = match self.screenshots.capture(task_id, next_seq).await {
                Ok(reference) => Some(reference),
                Err(err) => {
                    debug!(task = %task_id, %err, "screenshot skipped");
                    None
                }
            };

            // Observe.
            let mut guard = self.store.guard(task_id).await?;
            guard.record_step(action, verdict, observation, screenshot)?;
        }

        Ok(self.store.get(task_id).await?)
    }

    /// Suspend on the broker until the gated action is approved,
    /// declined, timed out or the task is cancelled. Returns whether
    /// the loop should proceed to execute the same action.
    async fn await_confirmation(
        &self,
        task_id: &TaskId,
        action: &Action,
    ) -> Result<bool, ControllerError> {
        let why = if action.reason.is_empty() {
            format!("{} requires approval", action.kind.name())
        } else {
            action.reason.clone()
        };
        let ticket = self.broker.request(task_id, action.clone(), why)?;

        {
            let mut guard = self.store.guard(task_id).await?;
            guard.suspend_on_confirmation(ticket.entry().clone())?;
            if guard.cancel_requested {
                // Cancellation arrived before we registered; wake our
                // own ticket so the wait below returns immediately.
                let _ = self.broker.cancel(task_id);
            }
        }
        info!(task = %task_id, kind = action.kind.name(), "awaiting confirmation");

        let resolution = ticket.wait(self.config.confirmation_wait()).await;
        let mut guard = self.store.guard(task_id).await?;
        match resolution {
            Resolution::Approved => {
                if guard.cancel_requested {
                    guard.cancel()?;
                    return Ok(false);
                }
                guard.resume_confirmed()?;
                info!(task = %task_id, "confirmation approved, resuming");
                Ok(true)
            }
            Resolution::Declined => {
                guard.fail(reason::DECLINED_BY_USER, None)?;
                info!(task = %task_id, "confirmation declined");
                Ok(false)
            }
            Resolution::TimedOut => {
                guard.fail(reason::CONFIRMATION_TIMEOUT, None)?;
                warn!(task = %task_id, "confirmation wait budget elapsed");
                Ok(false)
            }
            Resolution::Cancelled => {
                guard.cancel()?;
                info!(task = %task_id, "cancelled while awaiting confirmation");
                Ok(false)
            }
        }
    }

    /// Perform the action, retrying transient failures up to the
    /// configured budget with doubling backoff. Whatever comes back
    /// last is the step's observation.
    async fn perform_with_retry(&self, task_id: &TaskId, action: &Action) -> Observation {
        let mut attempt = 0;
        loop {
            let observation = match self.executor.perform(action).await {
                Ok(observation) => observation,
                Err(err) => Observation::permanent_failure(err.to_string()),
            };
            match observation.outcome {
                Outcome::TransientFailure if attempt < self.config.max_transient_retries => {
                    let backoff = self.config.backoff_for(attempt);
                    warn!(
                        task = %task_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                _ => return observation,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NoopScreenshotService;
    use crate::errors::{ExecutorError, PlanningError};
    use async_trait::async_trait;
    use operator_core_types::TaskSpec;
    use operator_safety_gate::default_policy;
    use operator_task_store::InMemoryTaskStore;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    struct ScriptedPlanner {
        script: Mutex<VecDeque<Result<PlannerDecision, PlanningError>>>,
    }

    impl ScriptedPlanner {
        fn new(steps: Vec<Result<PlannerDecision, PlanningError>>) -> Self {
            Self {
                script: Mutex::new(steps.into()),
            }
        }
    }

    #[async_trait]
    impl Planner for ScriptedPlanner {
        async fn next_action(&self, _ctx: PlanContext) -> Result<PlannerDecision, PlanningError> {
            self.script
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(PlannerDecision::done()))
        }
    }

    struct ScriptedExecutor {
        script: Mutex<VecDeque<Observation>>,
        calls: AtomicU32,
    }

    impl ScriptedExecutor {
        fn new(observations: Vec<Observation>) -> Self {
            Self {
                script: Mutex::new(observations.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn always_ok() -> Self {
            Self::new(Vec::new())
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ActionExecutor for ScriptedExecutor {
        async fn perform(&self, _action: &Action) -> Result<Observation, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .script
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(Observation::success))
        }
    }

    struct Fixture {
        controller: TaskController,
        store: Arc<InMemoryTaskStore>,
        broker: ConfirmationBroker,
        executor: Arc<ScriptedExecutor>,
    }

    fn fixture(planner: ScriptedPlanner, executor: ScriptedExecutor) -> Fixture {
        let store = Arc::new(InMemoryTaskStore::new());
        let broker = ConfirmationBroker::new();
        let executor = Arc::new(executor);
        let controller = TaskController::new(
            store.clone(),
            broker.clone(),
            Arc::new(default_policy()),
            Arc::new(planner),
            executor.clone(),
            Arc::new(NoopScreenshotService),
            ControllerConfig::minimal(),
        );
        Fixture {
            controller,
            store,
            broker,
            executor,
        }
    }

    fn navigate() -> PlannerDecision {
        PlannerDecision::Next(Action::navigate("https://docs.example.org"))
    }

    #[tokio::test]
    async fn single_step_then_done() {
        let fx = fixture(
            ScriptedPlanner::new(vec![Ok(navigate()), Ok(PlannerDecision::done())]),
            ScriptedExecutor::always_ok(),
        );
        let id = fx
            .store
            .create(TaskSpec::new("read the docs").with_max_steps(1))
            .await;

        let task = fx.controller.run(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.steps_taken, 1);
        assert_eq!(task.history.len(), 1);
        assert_eq!(fx.executor.call_count(), 1);
        assert!(task.finished_at.is_some());
    }

    #[tokio::test]
    async fn done_result_is_attached() {
        let fx = fixture(
            ScriptedPlanner::new(vec![Ok(PlannerDecision::done_with(
                serde_json::json!({"answer": 42}),
            ))]),
            ScriptedExecutor::always_ok(),
        );
        let id = fx.store.create(TaskSpec::new("trivial")).await;

        let task = fx.controller.run(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.unwrap()["answer"], 42);
        assert!(task.history.is_empty());
    }

    #[tokio::test]
    async fn blocked_action_never_reaches_executor() {
        let fx = {
            let store = Arc::new(InMemoryTaskStore::new());
            let broker = ConfirmationBroker::new();
            let executor = Arc::new(ScriptedExecutor::always_ok());
            let mut policy = default_policy();
            policy.blocked_kinds.push(operator_core_types::ActionKind::Submit);
            let controller = TaskController::new(
                store.clone(),
                broker.clone(),
                Arc::new(policy),
                Arc::new(ScriptedPlanner::new(vec![Ok(PlannerDecision::Next(
                    Action::new(operator_core_types::ActionKind::Submit),
                ))])),
                executor.clone(),
                Arc::new(NoopScreenshotService),
                ControllerConfig::minimal(),
            );
            Fixture {
                controller,
                store,
                broker,
                executor,
            }
        };
        let id = fx.store.create(TaskSpec::new("pay the invoice")).await;

        let task = fx.controller.run(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().starts_with(reason::SAFETY_VIOLATION));
        assert_eq!(fx.executor.call_count(), 0);
        assert!(task.history.is_empty());
    }

    #[tokio::test]
    async fn transient_failures_retry_into_one_step() {
        let fx = fixture(
            ScriptedPlanner::new(vec![Ok(navigate()), Ok(PlannerDecision::done())]),
            ScriptedExecutor::new(vec![
                Observation::transient_failure("socket reset"),
                Observation::transient_failure("socket reset"),
                Observation::success(),
            ]),
        );
        let id = fx.store.create(TaskSpec::new("flaky network")).await;

        let task = fx.controller.run(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.history.len(), 1);
        assert!(task.history[0].observation.is_success());
        assert_eq!(fx.executor.call_count(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_task() {
        let fx = fixture(
            ScriptedPlanner::new(vec![Ok(navigate())]),
            ScriptedExecutor::new(vec![
                Observation::transient_failure("timeout"),
                Observation::transient_failure("timeout"),
                Observation::transient_failure("timeout"),
            ]),
        );
        let id = fx.store.create(TaskSpec::new("hopeless network")).await;

        let task = fx.controller.run(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("execution-error: timeout"));
        // Initial attempt plus two retries.
        assert_eq!(fx.executor.call_count(), 3);
        assert!(task.history.is_empty());
    }

    #[tokio::test]
    async fn permanent_failure_fails_immediately() {
        let fx = fixture(
            ScriptedPlanner::new(vec![Ok(navigate())]),
            ScriptedExecutor::new(vec![Observation::permanent_failure("404 not found")]),
        );
        let id = fx.store.create(TaskSpec::new("missing page")).await;

        let task = fx.controller.run(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(fx.executor.call_count(), 1);
    }

    #[tokio::test]
    async fn step_limit_stops_the_next_proposed_action() {
        let fx = fixture(
            // Planner never signals done; the limit has to stop it.
            ScriptedPlanner::new(vec![Ok(navigate()), Ok(navigate()), Ok(navigate())]),
            ScriptedExecutor::always_ok(),
        );
        let id = fx
            .store
            .create(TaskSpec::new("never finishes").with_max_steps(2))
            .await;

        let task = fx.controller.run(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some(reason::STEP_LIMIT_EXCEEDED));
        assert_eq!(task.steps_taken, 2);
        assert_eq!(task.history.len(), 2);
        assert_eq!(fx.executor.call_count(), 2);
    }

    #[tokio::test]
    async fn done_on_a_spent_step_budget_still_completes() {
        let fx = fixture(
            ScriptedPlanner::new(vec![
                Ok(navigate()),
                Ok(navigate()),
                Ok(PlannerDecision::done_with(serde_json::json!("wrapped up"))),
            ]),
            ScriptedExecutor::always_ok(),
        );
        let id = fx
            .store
            .create(TaskSpec::new("finishes right at the limit").with_max_steps(2))
            .await;

        let task = fx.controller.run(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.steps_taken, 2);
        assert_eq!(task.result.unwrap(), "wrapped up");
        assert_eq!(fx.executor.call_count(), 2);
    }

    #[tokio::test]
    async fn zero_time_budget_times_out_before_any_action() {
        let fx = fixture(
            ScriptedPlanner::new(vec![Ok(navigate())]),
            ScriptedExecutor::always_ok(),
        );
        let id = fx
            .store
            .create(TaskSpec::new("instant deadline").with_max_execution_secs(0))
            .await;

        let task = fx.controller.run(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::TimedOut);
        assert_eq!(task.error.as_deref(), Some(reason::TIME_LIMIT_EXCEEDED));
        assert_eq!(fx.executor.call_count(), 0);
    }

    #[tokio::test]
    async fn planning_error_is_terminal() {
        let fx = fixture(
            ScriptedPlanner::new(vec![Err(PlanningError::new("model unavailable"))]),
            ScriptedExecutor::always_ok(),
        );
        let id = fx.store.create(TaskSpec::new("no plan")).await;

        let task = fx.controller.run(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error.as_deref(),
            Some("planning-error: model unavailable")
        );
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let fx = fixture(
            ScriptedPlanner::new(vec![Ok(PlannerDecision::done())]),
            ScriptedExecutor::always_ok(),
        );
        let id = fx.store.create(TaskSpec::new("once only")).await;

        fx.controller.run(&id).await.unwrap();
        let err = fx.controller.run(&id).await.unwrap_err();
        assert!(matches!(err, ControllerError::AlreadyStarted(_)));
    }

    #[tokio::test]
    async fn approved_confirmation_executes_same_action() {
        let fx = fixture(
            ScriptedPlanner::new(vec![
                Ok(PlannerDecision::Next(Action::click("#purchase"))),
                Ok(PlannerDecision::done()),
            ]),
            ScriptedExecutor::always_ok(),
        );
        let id = fx.store.create(TaskSpec::new("buy the book")).await;

        let broker = fx.broker.clone();
        let store = fx.store.clone();
        let id_for_approver = id.clone();
        let approver = tokio::spawn(async move {
            // Wait until the task suspends, then approve.
            for _ in 0..200 {
                if broker.is_pending(&id_for_approver) {
                    let snapshot = store.get(&id_for_approver).await.unwrap();
                    assert_eq!(snapshot.status, TaskStatus::AwaitingConfirmation);
                    assert!(snapshot.pending_confirmation.is_some());
                    broker.resolve(&id_for_approver, true).unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            panic!("task never suspended on confirmation");
        });

        let task = fx.controller.run(&id).await.unwrap();
        approver.await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.history.len(), 1);
        assert_eq!(task.history[0].verdict, Verdict::RequireConfirmation);
        assert_eq!(fx.executor.call_count(), 1);
        assert!(task.pending_confirmation.is_none());
    }

    #[tokio::test]
    async fn unanswered_confirmation_times_out() {
        let fx = fixture(
            ScriptedPlanner::new(vec![Ok(PlannerDecision::Next(Action::click("#buy")))]),
            ScriptedExecutor::always_ok(),
        );
        let id = fx
            .store
            .create(TaskSpec::new("nobody home").confirm_everything())
            .await;

        let task = fx.controller.run(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some(reason::CONFIRMATION_TIMEOUT));
        assert_eq!(fx.executor.call_count(), 0);
        assert!(task.pending_confirmation.is_none());
    }

    #[tokio::test]
    async fn declined_confirmation_fails_without_executing() {
        let fx = fixture(
            ScriptedPlanner::new(vec![Ok(PlannerDecision::Next(Action::click("#purchase")))]),
            ScriptedExecutor::always_ok(),
        );
        let id = fx.store.create(TaskSpec::new("second thoughts")).await;

        let broker = fx.broker.clone();
        let id_for_decliner = id.clone();
        let decliner = tokio::spawn(async move {
            for _ in 0..200 {
                if broker.is_pending(&id_for_decliner) {
                    broker.resolve(&id_for_decliner, false).unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            panic!("task never suspended on confirmation");
        });

        let task = fx.controller.run(&id).await.unwrap();
        decliner.await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some(reason::DECLINED_BY_USER));
        assert_eq!(fx.executor.call_count(), 0);
    }
}
