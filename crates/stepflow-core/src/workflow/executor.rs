//! Workflow runner: sequential step execution with durable checkpointing.
//!
//! # Execution flow
//!
//! 1. Load the execution and its workflow definition.
//! 2. Fail immediately if the workflow has no steps; otherwise mark it running.
//! 3. For each step in order: pace, record the current step, locate its
//!    `StepExecution`, run it with the previous step's output context.
//! 4. Stop at the first failed step (fail-fast).
//! 5. When every step completed, aggregate tokens and cost and mark the
//!    execution completed.
//!
//! Any fault escaping steps 1-5 is converted into a failed execution, so a
//! run never ends in `pending` or `running`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stepflow_types::config::GlobalConfig;
use stepflow_types::cost::UsdMicros;
use stepflow_types::error::RepositoryError;
use stepflow_types::execution::{Execution, ExecutionStatus, StepExecution};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::llm::provider::LlmProvider;
use crate::repository::workflow::WorkflowRepository;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::retry::sleep_or_cancel;
use super::step_runner::{CANCELLED_MESSAGE, StepError, StepOutcome, StepRunner};

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Final state of a finished execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub total_tokens: u64,
    pub total_cost: String,
    pub error: Option<String>,
}

impl From<&Execution> for ExecutionResult {
    fn from(execution: &Execution) -> Self {
        Self {
            execution_id: execution.id,
            status: execution.status,
            total_tokens: execution.total_tokens,
            total_cost: execution.total_cost.clone(),
            error: execution.error_message.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

/// Runs executions of stored workflows.
///
/// Generic over `R: WorkflowRepository` for storage and `P: LlmProvider`
/// for the model backend. Executions share nothing mutable, so one runner
/// can drive any number of them concurrently.
pub struct WorkflowRunner<R: WorkflowRepository, P: LlmProvider> {
    pub(super) checkpoint: Arc<CheckpointManager<R>>,
    step_runner: StepRunner<R, P>,
    config: Arc<GlobalConfig>,
}

impl<R: WorkflowRepository, P: LlmProvider> WorkflowRunner<R, P> {
    pub fn new(repo: R, provider: Arc<P>, config: Arc<GlobalConfig>) -> Self {
        let checkpoint = Arc::new(CheckpointManager::new(repo));
        let step_runner = StepRunner::new(Arc::clone(&checkpoint), provider, Arc::clone(&config));
        Self {
            checkpoint,
            step_runner,
            config,
        }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        self.checkpoint.repo()
    }

    /// Create the pending execution record and one pending step execution
    /// per step, without running anything.
    pub async fn prepare_execution(&self, workflow_id: Uuid) -> Result<Execution, ExecutorError> {
        let definition = self
            .checkpoint
            .load_definition(workflow_id)
            .await?
            .ok_or(ExecutorError::WorkflowNotFound(workflow_id))?;

        let steps = definition.ordered_steps();
        let first_order = steps.first().map_or(1, |s| s.order);
        let execution = Execution::pending(workflow_id, first_order);
        self.repo().create_execution(&execution).await?;

        for step in &steps {
            self.repo()
                .create_step_execution(&StepExecution::pending(execution.id, step.id))
                .await?;
        }

        tracing::debug!(
            execution_id = %execution.id,
            workflow = definition.name.as_str(),
            steps = steps.len(),
            "prepared execution"
        );
        Ok(execution)
    }

    /// Run a prepared execution to a terminal state.
    ///
    /// Step failures and unexpected faults end the execution `failed` and
    /// still return `Ok`; `Err` means even the failure could not be recorded.
    pub async fn execute(
        &self,
        execution_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutorError> {
        let mut execution = self.checkpoint.load_execution(execution_id).await?;

        tracing::info!(
            execution_id = %execution_id,
            workflow_id = %execution.workflow_id,
            "starting workflow execution"
        );

        if let Err(e) = self.run_steps(&mut execution, cancel).await {
            let message = match e {
                ExecutorError::Cancelled => CANCELLED_MESSAGE.to_string(),
                other => format!("Unexpected error: {other}"),
            };
            tracing::error!(execution_id = %execution_id, error = message.as_str(), "execution aborted");
            execution.fail(message);
            self.checkpoint.checkpoint_execution(&execution).await?;
        }

        tracing::info!(
            execution_id = %execution_id,
            status = %execution.status,
            total_tokens = execution.total_tokens,
            total_cost = execution.total_cost.as_str(),
            "workflow execution finished"
        );
        Ok(ExecutionResult::from(&execution))
    }

    async fn run_steps(
        &self,
        execution: &mut Execution,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutorError> {
        let definition = self
            .checkpoint
            .load_definition(execution.workflow_id)
            .await?
            .ok_or(ExecutorError::WorkflowNotFound(execution.workflow_id))?;
        let steps = definition.ordered_steps();

        if steps.is_empty() {
            execution.fail("Workflow has no steps");
            self.checkpoint.checkpoint_execution(execution).await?;
            return Ok(());
        }

        execution.status = ExecutionStatus::Running;
        self.checkpoint.checkpoint_execution(execution).await?;

        let pacing = Duration::from_millis(self.config.execution.inter_step_delay_ms);
        let mut carried_context: Option<String> = None;

        for (index, step) in steps.iter().enumerate() {
            if index > 0 && sleep_or_cancel(pacing, cancel).await {
                return Err(ExecutorError::Cancelled);
            }

            tracing::info!(
                execution_id = %execution.id,
                order = step.order,
                step = step.name.as_str(),
                "starting step"
            );
            execution.current_step_order = step.order;
            self.checkpoint.checkpoint_execution(execution).await?;

            let mut record = self
                .checkpoint
                .step_execution_for(execution.id, step.id)
                .await?;

            let outcome = self
                .step_runner
                .run(step, &mut record, carried_context.as_deref(), cancel)
                .await?;

            match outcome {
                StepOutcome::Completed { output_context } => {
                    tracing::info!(step = step.name.as_str(), "step completed");
                    carried_context = Some(output_context);
                }
                StepOutcome::Failed => {
                    let message = format!(
                        "Step '{}' failed after {} attempts",
                        step.name,
                        step.max_attempts()
                    );
                    tracing::warn!(execution_id = %execution.id, error = message.as_str(), "execution failed");
                    execution.fail(message);
                    self.checkpoint.checkpoint_execution(execution).await?;
                    return Ok(());
                }
            }
        }

        let (total_tokens, total_cost) = self.aggregate_totals(execution.id).await?;
        execution.total_tokens = total_tokens;
        execution.total_cost = total_cost.to_string();
        execution.status = ExecutionStatus::Completed;
        execution.completed_at = Some(Utc::now());
        execution.error_message = None;
        self.checkpoint.checkpoint_execution(execution).await?;
        Ok(())
    }

    /// Sum tokens and cost over every step execution of the run. A cost that
    /// does not parse counts as zero.
    async fn aggregate_totals(&self, execution_id: Uuid) -> Result<(u64, UsdMicros), ExecutorError> {
        let records = self.checkpoint.list_step_executions(execution_id).await?;

        let mut tokens: u64 = 0;
        let mut cost = UsdMicros::ZERO;
        for record in &records {
            tokens = tokens.saturating_add(u64::from(record.total_tokens));
            match record.cost.parse::<UsdMicros>() {
                Ok(amount) => cost = cost + amount,
                Err(e) => tracing::warn!(
                    step_execution_id = %record.id,
                    cost = record.cost.as_str(),
                    error = %e,
                    "ignoring unparseable step cost"
                ),
            }
        }
        Ok((tokens, cost))
    }
}

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("execution cancelled")]
    Cancelled,

    /// The run task died before reporting a result.
    #[error("execution task aborted: {0}")]
    Aborted(String),
}

impl From<StepError> for ExecutorError {
    fn from(err: StepError) -> Self {
        match err {
            StepError::Checkpoint(e) => ExecutorError::Checkpoint(e),
            StepError::Cancelled => ExecutorError::Cancelled,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::{ScriptedProvider, reply};
    use crate::repository::memory::InMemoryWorkflowRepository;
    use stepflow_types::execution::StepStatus;
    use stepflow_types::llm::LlmError;
    use stepflow_types::workflow::{ContextMode, Criterion, StepDefinition, WorkflowDefinition};

    type TestRunner = WorkflowRunner<InMemoryWorkflowRepository, ScriptedProvider>;

    fn make_step(order: i32, name: &str, criterion: Criterion, context_mode: ContextMode) -> StepDefinition {
        StepDefinition {
            id: Uuid::now_v7(),
            order,
            name: name.to_string(),
            model: "kimi-k2p5".to_string(),
            prompt: format!("Prompt for {name}"),
            criterion,
            max_retries: 1,
            context_mode,
        }
    }

    async fn runner_with(provider: ScriptedProvider, steps: Vec<StepDefinition>) -> (TestRunner, Arc<ScriptedProvider>, WorkflowDefinition) {
        let mut config = GlobalConfig::default();
        config.execution = config.execution.without_delays();

        let mut def = WorkflowDefinition::new("pipeline", None);
        def.steps = steps;

        let provider = Arc::new(provider);
        let runner = WorkflowRunner::new(InMemoryWorkflowRepository::new(), Arc::clone(&provider), Arc::new(config));
        runner.repo().save_definition(&def).await.unwrap();
        (runner, provider, def)
    }

    #[tokio::test]
    async fn code_only_context_flows_into_next_step() {
        let step1 = make_step(1, "generate", Criterion::AlwaysPass, ContextMode::CodeOnly);
        let step2 = make_step(2, "review", Criterion::AlwaysPass, ContextMode::Full);
        let provider = ScriptedProvider::new(
            vec![
                Ok(reply("Here:\n```rust\nfn main() {}\n```\nDone", 100, 40)),
                Ok(reply("Looks good", 60, 10)),
            ],
            Ok(reply("unused", 0, 0)),
        );
        let (runner, _, def) = runner_with(provider, vec![step1.clone(), step2.clone()]).await;

        let execution = runner.prepare_execution(def.id).await.unwrap();
        let result = runner.execute(execution.id, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.total_tokens, 210);
        assert!(result.error.is_none());

        let second = runner
            .repo()
            .find_step_execution(&execution.id, &step2.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.input_context.as_deref(), Some("```\nfn main() {}\n\n```"));

        let stored = runner.repo().get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.current_step_order, 2);
        assert!(stored.completed_at.is_some());
        // 160 * 0.15/1M + 50 * 0.60/1M
        assert_eq!(stored.total_cost, "0.000054");
    }

    #[tokio::test]
    async fn steps_run_in_order_key_order() {
        let late = make_step(20, "late", Criterion::AlwaysPass, ContextMode::Full);
        let early = make_step(5, "early", Criterion::AlwaysPass, ContextMode::Full);
        let (runner, provider, def) =
            runner_with(ScriptedProvider::always("ok"), vec![late, early]).await;

        let execution = runner.prepare_execution(def.id).await.unwrap();
        assert_eq!(execution.current_step_order, 5);
        runner.execute(execution.id, &CancellationToken::new()).await.unwrap();

        let prompts: Vec<String> = provider
            .requests()
            .iter()
            .map(|r| r.messages[0].content.clone())
            .collect();
        assert_eq!(prompts[0], "Prompt for early");
        assert!(prompts[1].ends_with("Your task:\nPrompt for late"));
    }

    #[tokio::test]
    async fn failing_step_stops_the_run() {
        let step1 = make_step(1, "fetch", Criterion::AlwaysPass, ContextMode::Full);
        let step2 = make_step(2, "never", Criterion::AlwaysPass, ContextMode::Full);
        let (runner, provider, def) = runner_with(
            ScriptedProvider::always_failing(LlmError::Connection("refused".into())),
            vec![step1.clone(), step2.clone()],
        )
        .await;

        let execution = runner.prepare_execution(def.id).await.unwrap();
        let result = runner.execute(execution.id, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("Step 'fetch' failed after 2 attempts"));
        assert_eq!(provider.call_count(), 2);

        let first = runner.repo().find_step_execution(&execution.id, &step1.id).await.unwrap().unwrap();
        assert_eq!(first.status, StepStatus::Failed);
        assert_eq!(first.attempt_number, 2);
        assert!(first.output_context.is_none());

        let second = runner.repo().find_step_execution(&execution.id, &step2.id).await.unwrap().unwrap();
        assert_eq!(second.status, StepStatus::Pending);
        assert_eq!(second.attempt_number, 0);
    }

    #[tokio::test]
    async fn empty_workflow_fails_without_running() {
        let (runner, provider, def) = runner_with(ScriptedProvider::always("ok"), Vec::new()).await;

        let execution = runner.prepare_execution(def.id).await.unwrap();
        assert_eq!(execution.current_step_order, 1);
        let result = runner.execute(execution.id, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("Workflow has no steps"));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_step_execution_is_created_on_demand() {
        let step = make_step(1, "only", Criterion::AlwaysPass, ContextMode::Full);
        let (runner, _, def) = runner_with(ScriptedProvider::always("ok"), vec![step.clone()]).await;

        let execution = Execution::pending(def.id, 1);
        runner.repo().create_execution(&execution).await.unwrap();

        let result = runner.execute(execution.id, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        let records = runner.repo().list_step_executions(&execution.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn unparseable_cost_is_counted_as_zero() {
        let step1 = make_step(1, "a", Criterion::AlwaysPass, ContextMode::Full);
        let step2 = make_step(2, "b", Criterion::AlwaysPass, ContextMode::Full);
        let (runner, _, def) = runner_with(ScriptedProvider::always("ok"), vec![step1.clone(), step2]).await;

        let execution = runner.prepare_execution(def.id).await.unwrap();
        let mut corrupt = runner.repo().find_step_execution(&execution.id, &step1.id).await.unwrap().unwrap();
        corrupt.cost = "not-a-number".to_string();
        corrupt.total_tokens = 7;
        runner.repo().update_step_execution(&corrupt).await.unwrap();

        let (tokens, cost) = runner.aggregate_totals(execution.id).await.unwrap();
        assert_eq!(tokens, 7);
        assert_eq!(cost, UsdMicros::ZERO);

        let result = runner.execute(execution.id, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        // Each step: 10 in, 20 out.
        assert_eq!(result.total_tokens, 60);
    }

    #[tokio::test]
    async fn storage_fault_fails_the_execution() {
        let step = make_step(1, "a", Criterion::AlwaysPass, ContextMode::Full);
        let (runner, _, def) = runner_with(ScriptedProvider::always("ok"), vec![step]).await;

        let execution = runner.prepare_execution(def.id).await.unwrap();
        runner.repo().fail_step_updates();
        let result = runner.execute(execution.id, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        let error = result.error.unwrap();
        assert!(error.starts_with("Unexpected error: "), "got: {error}");
        assert!(error.contains("disk I/O error"));
    }

    #[tokio::test]
    async fn cancelled_run_ends_failed() {
        let step = make_step(1, "a", Criterion::AlwaysPass, ContextMode::Full);
        let (runner, provider, def) = runner_with(ScriptedProvider::always("ok"), vec![step.clone()]).await;

        let execution = runner.prepare_execution(def.id).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = runner.execute(execution.id, &cancel).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error.as_deref(), Some(CANCELLED_MESSAGE));
        assert_eq!(provider.call_count(), 0);

        let record = runner.repo().find_step_execution(&execution.id, &step.id).await.unwrap().unwrap();
        assert_eq!(record.status, StepStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some(CANCELLED_MESSAGE));
    }

    #[tokio::test]
    async fn unknown_workflow_is_rejected() {
        let (runner, _, _) = runner_with(ScriptedProvider::always("ok"), Vec::new()).await;
        let err = runner.prepare_execution(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::WorkflowNotFound(_)));

        let err = runner
            .execute(Uuid::now_v7(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Checkpoint(CheckpointError::ExecutionNotFound(_))));
    }
}
