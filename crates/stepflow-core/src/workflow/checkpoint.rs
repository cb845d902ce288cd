//! Durable checkpoints for execution state.
//!
//! Wraps `WorkflowRepository` so the runners persist every state transition
//! before moving on. A concurrent reader therefore never sees a status
//! change without the fields that go with it.

use stepflow_types::execution::{Execution, StepExecution};
use stepflow_types::workflow::WorkflowDefinition;
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Generic over `R: WorkflowRepository` so it works with any storage backend
/// (SQLite, in-memory mock, etc.).
pub struct CheckpointManager<R: WorkflowRepository> {
    repo: R,
}

impl<R: WorkflowRepository> CheckpointManager<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Loads
    // -----------------------------------------------------------------------

    pub async fn load_definition(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<WorkflowDefinition>, CheckpointError> {
        self.repo
            .get_definition(&workflow_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    pub async fn load_execution(&self, execution_id: Uuid) -> Result<Execution, CheckpointError> {
        self.repo
            .get_execution(&execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::ExecutionNotFound(execution_id))
    }

    /// Find the step's record for this execution, creating a pending one if
    /// none exists yet.
    pub async fn step_execution_for(
        &self,
        execution_id: Uuid,
        step_id: Uuid,
    ) -> Result<StepExecution, CheckpointError> {
        let existing = self
            .repo
            .find_step_execution(&execution_id, &step_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        if let Some(step) = existing {
            return Ok(step);
        }

        let step = StepExecution::pending(execution_id, step_id);
        self.repo
            .create_step_execution(&step)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            execution_id = %execution_id,
            step_id = %step_id,
            "created missing step execution"
        );
        Ok(step)
    }

    pub async fn list_step_executions(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, CheckpointError> {
        self.repo
            .list_step_executions(&execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Persist the full current state of a step execution.
    pub async fn checkpoint_step(&self, step: &StepExecution) -> Result<(), CheckpointError> {
        self.repo
            .update_step_execution(step)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            step_execution_id = %step.id,
            status = %step.status,
            attempt = step.attempt_number,
            "checkpointed step"
        );
        Ok(())
    }

    /// Persist the full current state of an execution.
    pub async fn checkpoint_execution(&self, execution: &Execution) -> Result<(), CheckpointError> {
        self.repo
            .update_execution(execution)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            execution_id = %execution.id,
            status = %execution.status,
            current_step_order = execution.current_step_order,
            "checkpointed execution"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryWorkflowRepository;
    use stepflow_types::execution::StepStatus;

    #[test]
    fn checkpoint_error_display() {
        let err = CheckpointError::Repository("connection lost".to_string());
        assert!(err.to_string().contains("connection lost"));

        let err = CheckpointError::ExecutionNotFound(Uuid::nil());
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn step_execution_for_is_idempotent() {
        let manager = CheckpointManager::new(InMemoryWorkflowRepository::new());
        let execution_id = Uuid::now_v7();
        let step_id = Uuid::now_v7();

        let first = manager.step_execution_for(execution_id, step_id).await.unwrap();
        let second = manager.step_execution_for(execution_id, step_id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn checkpoint_of_missing_records_fails() {
        let manager = CheckpointManager::new(InMemoryWorkflowRepository::new());
        let step = StepExecution::pending(Uuid::now_v7(), Uuid::now_v7());
        let err = manager.checkpoint_step(&step).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Repository(_)));

        let err = manager.load_execution(Uuid::nil()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::ExecutionNotFound(_)));
    }
}
