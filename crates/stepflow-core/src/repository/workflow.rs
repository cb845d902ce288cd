//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflow definitions, executions and
//! step executions. The infrastructure layer (stepflow-infra) implements
//! this trait with SQLite persistence.

use stepflow_types::error::RepositoryError;
use stepflow_types::execution::{Execution, StepExecution};
use stepflow_types::workflow::WorkflowDefinition;
use uuid::Uuid;

/// Repository trait for workflow persistence.
///
/// Covers three entity families:
/// - **Definitions:** CRUD for workflows and their ordered steps.
/// - **Executions:** create/overwrite/query runs of a workflow.
/// - **Step executions:** the single latest-attempt record per
///   `(execution, step)` pair.
///
/// Every write is visible to readers as soon as the returned future
/// resolves; the runners rely on this to expose progress mid-run.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Upsert a workflow and its steps. Steps no longer present in the
    /// definition are removed.
    fn save_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow definition (with its steps) by UUID.
    fn get_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// List all workflow definitions ordered by name.
    fn list_definitions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Delete a workflow and everything it owns. Returns `true` if it existed.
    fn delete_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    fn create_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Overwrite every mutable field of an existing execution.
    ///
    /// Returns `RepositoryError::NotFound` if the record does not exist.
    fn update_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// List executions, newest first, optionally for one workflow.
    fn list_executions(
        &self,
        workflow_id: Option<&Uuid>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Step executions
    // -----------------------------------------------------------------------

    /// Returns `RepositoryError::Conflict` if a record already exists for
    /// the same `(execution_id, step_id)`.
    fn create_step_execution(
        &self,
        step: &StepExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Overwrite every mutable field of an existing step execution.
    fn update_step_execution(
        &self,
        step: &StepExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn find_step_execution(
        &self,
        execution_id: &Uuid,
        step_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<StepExecution>, RepositoryError>> + Send;

    /// All step executions of a run, in step order.
    fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepExecution>, RepositoryError>> + Send;
}
