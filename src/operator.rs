//! The operator facade: task lifecycle surface over the store, the
//! safety policy, the confirmation broker and the per-task controller.

use std::sync::Arc;

use dashmap::DashMap;
use operator_confirm_broker::ConfirmationBroker;
use operator_controller::{
    ActionExecutor, ControllerConfig, NoopScreenshotService, Planner, ScreenshotService,
    TaskController,
};
use operator_core_types::{Task, TaskId, TaskSpec};
use operator_safety_gate::SafetyPolicy;
use operator_task_store::{InMemoryTaskStore, TaskStore};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::errors::OperatorError;

/// Owns the execution machinery and exposes the task lifecycle:
/// create, status, list, confirm, cancel.
///
/// Each created task gets its own spawned controller loop; the
/// operator itself never blocks on one.
pub struct Operator {
    store: Arc<dyn TaskStore>,
    broker: ConfirmationBroker,
    controller: Arc<TaskController>,
    running: Arc<DashMap<TaskId, JoinHandle<()>>>,
}

impl Operator {
    pub fn builder(
        planner: Arc<dyn Planner>,
        executor: Arc<dyn ActionExecutor>,
    ) -> OperatorBuilder {
        OperatorBuilder::new(planner, executor)
    }

    /// Validate the spec, create the task and spawn its controller
    /// loop. Returns the id immediately; execution proceeds in the
    /// background.
    pub async fn create(&self, spec: TaskSpec) -> Result<TaskId, OperatorError> {
        if spec.description.trim().is_empty() {
            return Err(OperatorError::InvalidSpec(
                "description must not be empty".into(),
            ));
        }
        if spec.max_steps == 0 {
            return Err(OperatorError::InvalidSpec(
                "max_steps must be at least 1".into(),
            ));
        }
        if let Some(raw) = spec.target_url.as_deref() {
            url::Url::parse(raw)
                .map_err(|err| OperatorError::InvalidSpec(format!("target_url: {err}")))?;
        }

        let id = self.store.create(spec).await;
        info!(task = %id, "task accepted");

        let controller = Arc::clone(&self.controller);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = controller.run(&task_id).await {
                error!(task = %task_id, %err, "controller aborted");
            }
        });
        self.running.insert(id.clone(), handle);
        Ok(id)
    }

    /// Snapshot of the task record, history included.
    pub async fn status(&self, id: &TaskId) -> Result<Task, OperatorError> {
        Ok(self.store.get(id).await?)
    }

    /// Snapshots of all known tasks, oldest first.
    pub async fn list(&self) -> Vec<Task> {
        let mut tasks = self.store.list().await;
        tasks.sort_by_key(|task| task.created_at);
        tasks
    }

    /// Apply a human approve/decline to a task suspended on
    /// confirmation.
    pub async fn confirm(&self, id: &TaskId, approved: bool) -> Result<(), OperatorError> {
        let task = self.store.get(id).await?;
        if task.is_terminal() {
            return Err(OperatorError::AlreadyTerminal(id.clone()));
        }
        self.broker
            .resolve(id, approved)
            .map_err(|_| OperatorError::NotAwaitingConfirmation(id.clone()))
    }

    /// Request cooperative cancellation. The flag is set immediately;
    /// a task suspended on confirmation is woken as well. The terminal
    /// CANCELLED status lands when the controller reaches its next
    /// checkpoint.
    pub async fn cancel(&self, id: &TaskId) -> Result<(), OperatorError> {
        {
            let mut guard = self.store.guard(id).await?;
            guard.request_cancel()?;
        }
        let _ = self.broker.cancel(id);
        info!(task = %id, "cancellation requested");
        Ok(())
    }

    /// Block until the task's controller loop has exited, then return
    /// the final record.
    pub async fn wait(&self, id: &TaskId) -> Result<Task, OperatorError> {
        if let Some((_, handle)) = self.running.remove(id) {
            let _ = handle.await;
        }
        Ok(self.store.get(id).await?)
    }
}

/// Assembles an [`Operator`] from its collaborators, with defaults for
/// everything but the planner and executor.
pub struct OperatorBuilder {
    planner: Arc<dyn Planner>,
    executor: Arc<dyn ActionExecutor>,
    screenshots: Arc<dyn ScreenshotService>,
    policy: SafetyPolicy,
    config: ControllerConfig,
}

impl OperatorBuilder {
    pub fn new(planner: Arc<dyn Planner>, executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            planner,
            executor,
            screenshots: Arc::new(NoopScreenshotService),
            policy: SafetyPolicy::default(),
            config: ControllerConfig::default(),
        }
    }

    pub fn policy(mut self, policy: SafetyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn screenshots(mut self, screenshots: Arc<dyn ScreenshotService>) -> Self {
        self.screenshots = screenshots;
        self
    }

    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Operator {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let broker = ConfirmationBroker::new();
        let controller = Arc::new(TaskController::new(
            Arc::clone(&store),
            broker.clone(),
            Arc::new(self.policy),
            self.planner,
            self.executor,
            self.screenshots,
            self.config,
        ));
        Operator {
            store,
            broker,
            controller,
            running: Arc::new(DashMap::new()),
        }
    }
}
