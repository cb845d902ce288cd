//! Background execution launcher.
//!
//! `start_execution` records the pending execution synchronously, then runs
//! it on a spawned task and hands back an [`ExecutionHandle`]. The caller can
//! poll the repository for progress while the run proceeds.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::llm::provider::LlmProvider;
use crate::repository::workflow::WorkflowRepository;

use super::executor::{ExecutionResult, ExecutorError, WorkflowRunner};

/// A running (or finished) background execution.
pub struct ExecutionHandle {
    execution_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<Result<ExecutionResult, ExecutorError>>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Request cancellation. The run stops at its next attempt boundary or
    /// wait and ends `failed`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> Result<ExecutionResult, ExecutorError> {
        self.task
            .await
            .map_err(|e| ExecutorError::Aborted(e.to_string()))?
    }
}

impl<R, P> WorkflowRunner<R, P>
where
    R: WorkflowRepository + 'static,
    P: LlmProvider + 'static,
{
    /// Create a pending execution of `workflow_id` and start running it in
    /// the background.
    pub async fn start_execution(
        self: &Arc<Self>,
        workflow_id: Uuid,
    ) -> Result<ExecutionHandle, ExecutorError> {
        let execution = self.prepare_execution(workflow_id).await?;
        let execution_id = execution.id;

        let cancel = CancellationToken::new();
        let runner = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move { runner.supervise(execution_id, token).await });

        tracing::info!(execution_id = %execution_id, workflow_id = %workflow_id, "execution launched");
        Ok(ExecutionHandle {
            execution_id,
            cancel,
            task,
        })
    }

    /// Run the execution on its own task so a panic inside the run is
    /// observed here and recorded as a failure instead of leaving the
    /// execution `running` forever.
    async fn supervise(
        self: Arc<Self>,
        execution_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ExecutorError> {
        let runner = Arc::clone(&self);
        let inner = tokio::spawn(async move { runner.execute(execution_id, &cancel).await });

        match inner.await {
            Ok(result) => result,
            Err(join_err) => {
                let message = format!("Unexpected error: {join_err}");
                tracing::error!(execution_id = %execution_id, error = message.as_str(), "execution task died");

                let mut execution = self.checkpoint.load_execution(execution_id).await?;
                execution.fail(message.clone());
                self.checkpoint.checkpoint_execution(&execution).await?;
                Err(ExecutorError::Aborted(message))
            }
        }
    }
}
