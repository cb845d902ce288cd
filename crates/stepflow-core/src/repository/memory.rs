//! In-memory `WorkflowRepository` for engine tests.
//!
//! Mirrors the SQLite semantics the engine relies on: `NotFound` on updates
//! of missing rows, `Conflict` on a duplicate `(execution, step)` pair, and
//! cascade deletes. Every step-execution write is also appended to a
//! history log so tests can observe intermediate states.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use stepflow_types::error::RepositoryError;
use stepflow_types::execution::{Execution, StepExecution};
use stepflow_types::workflow::WorkflowDefinition;
use uuid::Uuid;

use super::workflow::WorkflowRepository;

#[derive(Default)]
pub(crate) struct InMemoryWorkflowRepository {
    definitions: Mutex<HashMap<Uuid, WorkflowDefinition>>,
    executions: Mutex<HashMap<Uuid, Execution>>,
    steps: Mutex<HashMap<Uuid, StepExecution>>,
    step_history: Mutex<Vec<StepExecution>>,
    fail_step_updates: AtomicBool,
}

impl InMemoryWorkflowRepository {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `update_step_execution` fail.
    pub(crate) fn fail_step_updates(&self) {
        self.fail_step_updates.store(true, Ordering::SeqCst);
    }

    /// Every step-execution state written so far, in write order.
    pub(crate) fn step_history(&self) -> Vec<StepExecution> {
        self.step_history.lock().unwrap().clone()
    }

    fn step_order(&self, execution_id: &Uuid, step_id: &Uuid) -> i32 {
        let workflow_id = self
            .executions
            .lock()
            .unwrap()
            .get(execution_id)
            .map(|e| e.workflow_id);
        workflow_id
            .and_then(|wid| {
                self.definitions
                    .lock()
                    .unwrap()
                    .get(&wid)
                    .and_then(|d| d.step(step_id).map(|s| s.order))
            })
            .unwrap_or(i32::MAX)
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        self.definitions.lock().unwrap().insert(def.id, def.clone());
        Ok(())
    }

    async fn get_definition(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.definitions.lock().unwrap().get(id).cloned())
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut defs: Vec<_> = self.definitions.lock().unwrap().values().cloned().collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }

    async fn delete_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let existed = self.definitions.lock().unwrap().remove(id).is_some();
        let mut executions = self.executions.lock().unwrap();
        let owned: Vec<Uuid> = executions
            .values()
            .filter(|e| e.workflow_id == *id)
            .map(|e| e.id)
            .collect();
        for exec_id in &owned {
            executions.remove(exec_id);
        }
        self.steps
            .lock()
            .unwrap()
            .retain(|_, s| !owned.contains(&s.execution_id));
        Ok(existed)
    }

    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut executions = self.executions.lock().unwrap();
        if executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut executions = self.executions.lock().unwrap();
        match executions.get_mut(&execution.id) {
            Some(existing) => {
                *existing = execution.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        Ok(self.executions.lock().unwrap().get(id).cloned())
    }

    async fn list_executions(
        &self,
        workflow_id: Option<&Uuid>,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let mut list: Vec<_> = self
            .executions
            .lock()
            .unwrap()
            .values()
            .filter(|e| workflow_id.is_none_or(|wid| e.workflow_id == *wid))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        list.truncate(limit as usize);
        Ok(list)
    }

    async fn create_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        let mut steps = self.steps.lock().unwrap();
        let duplicate = steps
            .values()
            .any(|s| s.execution_id == step.execution_id && s.step_id == step.step_id);
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "step execution for step {} already exists",
                step.step_id
            )));
        }
        steps.insert(step.id, step.clone());
        self.step_history.lock().unwrap().push(step.clone());
        Ok(())
    }

    async fn update_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        if self.fail_step_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("disk I/O error".to_string()));
        }
        let mut steps = self.steps.lock().unwrap();
        match steps.get_mut(&step.id) {
            Some(existing) => {
                *existing = step.clone();
                self.step_history.lock().unwrap().push(step.clone());
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn find_step_execution(
        &self,
        execution_id: &Uuid,
        step_id: &Uuid,
    ) -> Result<Option<StepExecution>, RepositoryError> {
        Ok(self
            .steps
            .lock()
            .unwrap()
            .values()
            .find(|s| s.execution_id == *execution_id && s.step_id == *step_id)
            .cloned())
    }

    async fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        let mut list: Vec<_> = self
            .steps
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.execution_id == *execution_id)
            .cloned()
            .collect();
        list.sort_by_key(|s| self.step_order(&s.execution_id, &s.step_id));
        Ok(list)
    }
}
