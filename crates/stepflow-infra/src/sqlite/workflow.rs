//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `stepflow-core` using sqlx with split
//! read/write pools. Definitions are normalized into `workflows` and `steps`;
//! executions and their per-step records track run state so another process
//! can watch a run while it progresses.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::Row;
use stepflow_core::repository::workflow::WorkflowRepository;
use stepflow_types::error::RepositoryError;
use stepflow_types::execution::{Execution, ExecutionStatus, StepExecution, StepStatus};
use stepflow_types::workflow::{
    ContextMode, ContextModeKind, Criterion, CriterionKind, StepDefinition, WorkflowDefinition,
};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn load_steps(&self, workflow_id: &str) -> Result<Vec<StepDefinition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM steps WHERE workflow_id = ? ORDER BY step_order ASC, rowid ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = StepRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            steps.push(r.into_step()?);
        }
        Ok(steps)
    }

    async fn assemble(&self, row: WorkflowRow) -> Result<WorkflowDefinition, RepositoryError> {
        let steps = self.load_steps(&row.id).await?;
        row.into_definition(steps)
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowRow {
    id: String,
    name: String,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_definition(self, steps: Vec<StepDefinition>) -> Result<WorkflowDefinition, RepositoryError> {
        Ok(WorkflowDefinition {
            id: parse_uuid(&self.id)?,
            name: self.name,
            description: self.description,
            steps,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct StepRow {
    id: String,
    step_order: i32,
    name: String,
    model: String,
    prompt: String,
    criteria_type: String,
    criteria_value: Option<String>,
    max_retries: i64,
    context_mode: String,
    context_template: Option<String>,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            step_order: row.try_get("step_order")?,
            name: row.try_get("name")?,
            model: row.try_get("model")?,
            prompt: row.try_get("prompt")?,
            criteria_type: row.try_get("criteria_type")?,
            criteria_value: row.try_get("criteria_value")?,
            max_retries: row.try_get("max_retries")?,
            context_mode: row.try_get("context_mode")?,
            context_template: row.try_get("context_template")?,
        })
    }

    fn into_step(self) -> Result<StepDefinition, RepositoryError> {
        let criteria_kind = self
            .criteria_type
            .parse::<CriterionKind>()
            .map_err(RepositoryError::Query)?;
        let context_kind = self
            .context_mode
            .parse::<ContextModeKind>()
            .map_err(RepositoryError::Query)?;

        Ok(StepDefinition {
            id: parse_uuid(&self.id)?,
            order: self.step_order,
            name: self.name,
            model: self.model,
            prompt: self.prompt,
            criterion: Criterion::from_parts(criteria_kind, self.criteria_value),
            max_retries: to_u32(self.max_retries, "max_retries")?,
            context_mode: ContextMode::from_parts(context_kind, self.context_template),
        })
    }
}

struct ExecutionRow {
    id: String,
    workflow_id: String,
    status: String,
    current_step_order: i32,
    started_at: String,
    completed_at: Option<String>,
    error_message: Option<String>,
    total_tokens: i64,
    total_cost: String,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            status: row.try_get("status")?,
            current_step_order: row.try_get("current_step_order")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error_message: row.try_get("error_message")?,
            total_tokens: row.try_get("total_tokens")?,
            total_cost: row.try_get("total_cost")?,
        })
    }

    fn into_execution(self) -> Result<Execution, RepositoryError> {
        let status = self
            .status
            .parse::<ExecutionStatus>()
            .map_err(RepositoryError::Query)?;

        Ok(Execution {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            status,
            current_step_order: self.current_step_order,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            error_message: self.error_message,
            total_tokens: u64::try_from(self.total_tokens)
                .map_err(|_| RepositoryError::Query(format!("invalid total_tokens: {}", self.total_tokens)))?,
            total_cost: self.total_cost,
        })
    }
}

struct StepExecutionRow {
    id: String,
    execution_id: String,
    step_id: String,
    status: String,
    attempt_number: i64,
    input_context: Option<String>,
    prompt_sent: Option<String>,
    llm_response: Option<String>,
    output_context: Option<String>,
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
    cost: String,
    criteria_passed: bool,
    criteria_details: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    error_message: Option<String>,
}

impl StepExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            step_id: row.try_get("step_id")?,
            status: row.try_get("status")?,
            attempt_number: row.try_get("attempt_number")?,
            input_context: row.try_get("input_context")?,
            prompt_sent: row.try_get("prompt_sent")?,
            llm_response: row.try_get("llm_response")?,
            output_context: row.try_get("output_context")?,
            prompt_tokens: row.try_get("prompt_tokens")?,
            completion_tokens: row.try_get("completion_tokens")?,
            total_tokens: row.try_get("total_tokens")?,
            cost: row.try_get("cost")?,
            criteria_passed: row.try_get("criteria_passed")?,
            criteria_details: row.try_get("criteria_details")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error_message: row.try_get("error_message")?,
        })
    }

    fn into_step_execution(self) -> Result<StepExecution, RepositoryError> {
        let status = self
            .status
            .parse::<StepStatus>()
            .map_err(RepositoryError::Query)?;

        Ok(StepExecution {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            step_id: parse_uuid(&self.step_id)?,
            status,
            attempt_number: to_u32(self.attempt_number, "attempt_number")?,
            input_context: self.input_context,
            prompt_sent: self.prompt_sent,
            llm_response: self.llm_response,
            output_context: self.output_context,
            prompt_tokens: to_u32(self.prompt_tokens, "prompt_tokens")?,
            completion_tokens: to_u32(self.completion_tokens, "completion_tokens")?,
            total_tokens: to_u32(self.total_tokens, "total_tokens")?,
            cost: self.cost,
            criteria_passed: self.criteria_passed,
            criteria_details: self.criteria_details,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            error_message: self.error_message,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn to_u32(value: i64, column: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Query(format!("invalid {column}: {value}")))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let workflow_id = def.id.to_string();
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflows (id, name, description, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&workflow_id)
        .bind(&def.name)
        .bind(&def.description)
        .bind(format_datetime(&def.created_at))
        .bind(format_datetime(&def.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // Steps dropped from the definition go, along with their records.
        let existing: Vec<(String,)> = sqlx::query_as("SELECT id FROM steps WHERE workflow_id = ?")
            .bind(&workflow_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let keep: HashSet<String> = def.steps.iter().map(|s| s.id.to_string()).collect();
        for (step_id,) in existing.into_iter().filter(|(id,)| !keep.contains(id)) {
            sqlx::query("DELETE FROM steps WHERE id = ?")
                .bind(&step_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        for step in &def.steps {
            sqlx::query(
                r#"INSERT INTO steps
                   (id, workflow_id, step_order, name, model, prompt, criteria_type,
                    criteria_value, max_retries, context_mode, context_template)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT(id) DO UPDATE SET
                     step_order = excluded.step_order,
                     name = excluded.name,
                     model = excluded.model,
                     prompt = excluded.prompt,
                     criteria_type = excluded.criteria_type,
                     criteria_value = excluded.criteria_value,
                     max_retries = excluded.max_retries,
                     context_mode = excluded.context_mode,
                     context_template = excluded.context_template"#,
            )
            .bind(step.id.to_string())
            .bind(&workflow_id)
            .bind(step.order)
            .bind(&step.name)
            .bind(&step.model)
            .bind(&step.prompt)
            .bind(step.criterion.kind().as_str())
            .bind(step.criterion.value())
            .bind(i64::from(step.max_retries))
            .bind(step.context_mode.kind().as_str())
            .bind(step.context_mode.template())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_definition(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = WorkflowRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(self.assemble(r).await?))
            }
            None => Ok(None),
        }
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflows ORDER BY name ASC, id ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut defs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = WorkflowRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            defs.push(self.assemble(r).await?);
        }
        Ok(defs)
    }

    async fn delete_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO executions
               (id, workflow_id, status, current_step_order, started_at, completed_at,
                error_message, total_tokens, total_cost)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.status.to_string())
        .bind(execution.current_step_order)
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(&execution.error_message)
        .bind(to_i64(execution.total_tokens))
        .bind(&execution.total_cost)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE executions SET
                 status = ?, current_step_order = ?, started_at = ?, completed_at = ?,
                 error_message = ?, total_tokens = ?, total_cost = ?
               WHERE id = ?"#,
        )
        .bind(execution.status.to_string())
        .bind(execution.current_step_order)
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(&execution.error_message)
        .bind(to_i64(execution.total_tokens))
        .bind(&execution.total_cost)
        .bind(execution.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_execution()?))
            }
            None => Ok(None),
        }
    }

    async fn list_executions(
        &self,
        workflow_id: Option<&Uuid>,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let rows = match workflow_id {
            Some(wid) => {
                sqlx::query(
                    "SELECT * FROM executions WHERE workflow_id = ? ORDER BY started_at DESC, id DESC LIMIT ?",
                )
                .bind(wid.to_string())
                .bind(i64::from(limit))
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM executions ORDER BY started_at DESC, id DESC LIMIT ?")
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ExecutionRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            executions.push(r.into_execution()?);
        }
        Ok(executions)
    }

    async fn create_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"INSERT INTO step_executions
               (id, execution_id, step_id, status, attempt_number, input_context, prompt_sent,
                llm_response, output_context, prompt_tokens, completion_tokens, total_tokens,
                cost, criteria_passed, criteria_details, started_at, completed_at, error_message)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(step.id.to_string())
        .bind(step.execution_id.to_string())
        .bind(step.step_id.to_string())
        .bind(step.status.to_string())
        .bind(i64::from(step.attempt_number))
        .bind(&step.input_context)
        .bind(&step.prompt_sent)
        .bind(&step.llm_response)
        .bind(&step.output_context)
        .bind(i64::from(step.prompt_tokens))
        .bind(i64::from(step.completion_tokens))
        .bind(i64::from(step.total_tokens))
        .bind(&step.cost)
        .bind(step.criteria_passed)
        .bind(&step.criteria_details)
        .bind(step.started_at.as_ref().map(format_datetime))
        .bind(step.completed_at.as_ref().map(format_datetime))
        .bind(&step.error_message)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => {
                Err(RepositoryError::Conflict(format!(
                    "step execution for step {} already exists in execution {}",
                    step.step_id, step.execution_id
                )))
            }
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn update_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE step_executions SET
                 status = ?, attempt_number = ?, input_context = ?, prompt_sent = ?,
                 llm_response = ?, output_context = ?, prompt_tokens = ?,
                 completion_tokens = ?, total_tokens = ?, cost = ?, criteria_passed = ?,
                 criteria_details = ?, started_at = ?, completed_at = ?, error_message = ?
               WHERE id = ?"#,
        )
        .bind(step.status.to_string())
        .bind(i64::from(step.attempt_number))
        .bind(&step.input_context)
        .bind(&step.prompt_sent)
        .bind(&step.llm_response)
        .bind(&step.output_context)
        .bind(i64::from(step.prompt_tokens))
        .bind(i64::from(step.completion_tokens))
        .bind(i64::from(step.total_tokens))
        .bind(&step.cost)
        .bind(step.criteria_passed)
        .bind(&step.criteria_details)
        .bind(step.started_at.as_ref().map(format_datetime))
        .bind(step.completed_at.as_ref().map(format_datetime))
        .bind(&step.error_message)
        .bind(step.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn find_step_execution(
        &self,
        execution_id: &Uuid,
        step_id: &Uuid,
    ) -> Result<Option<StepExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM step_executions WHERE execution_id = ? AND step_id = ?")
            .bind(execution_id.to_string())
            .bind(step_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = StepExecutionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_step_execution()?))
            }
            None => Ok(None),
        }
    }

    async fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT se.* FROM step_executions se
               JOIN steps s ON s.id = se.step_id
               WHERE se.execution_id = ?
               ORDER BY s.step_order ASC, s.rowid ASC"#,
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = StepExecutionRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            steps.push(r.into_step_execution()?);
        }
        Ok(steps)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::DatabasePool;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn make_step(order: i32, name: &str, criterion: Criterion, context_mode: ContextMode) -> StepDefinition {
        StepDefinition {
            id: Uuid::now_v7(),
            order,
            name: name.to_string(),
            model: "kimi-k2p5".to_string(),
            prompt: format!("Do {name}"),
            criterion,
            max_retries: 2,
            context_mode,
        }
    }

    fn sample_definition() -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("code-pipeline", Some("Write and check".to_string()));
        def.steps = vec![
            make_step(
                2,
                "check",
                Criterion::LlmJudge("Is it correct?".to_string()),
                ContextMode::Custom { template: Some("{{code}}".to_string()) },
            ),
            make_step(1, "write", Criterion::CodeBlock(None), ContextMode::CodeOnly),
        ];
        def
    }

    // -- Definition CRUD --

    #[tokio::test]
    async fn test_save_and_get_definition() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let def = sample_definition();

        repo.save_definition(&def).await.unwrap();

        let loaded = repo.get_definition(&def.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "code-pipeline");
        assert_eq!(loaded.description.as_deref(), Some("Write and check"));
        assert_eq!(loaded.steps.len(), 2);
        assert_eq!(loaded.steps[0].name, "write");
        assert_eq!(loaded.steps[0].criterion, Criterion::CodeBlock(None));
        assert_eq!(loaded.steps[0].context_mode, ContextMode::CodeOnly);
        assert_eq!(
            loaded.steps[1].context_mode,
            ContextMode::Custom { template: Some("{{code}}".to_string()) }
        );
        assert_eq!(loaded.steps[1].max_retries, 2);
    }

    #[tokio::test]
    async fn test_get_missing_definition() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        assert!(repo.get_definition(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_definition_upserts_and_prunes_steps() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let mut def = sample_definition();
        repo.save_definition(&def).await.unwrap();

        def.name = "renamed".to_string();
        def.steps.remove(0);
        def.steps[0].prompt = "Write it again".to_string();
        def.steps.push(make_step(3, "polish", Criterion::AlwaysPass, ContextMode::Full));
        repo.save_definition(&def).await.unwrap();

        let loaded = repo.get_definition(&def.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "renamed");
        let names: Vec<&str> = loaded.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["write", "polish"]);
        assert_eq!(loaded.steps[0].prompt, "Write it again");
    }

    #[tokio::test]
    async fn test_list_definitions_by_name() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        repo.save_definition(&WorkflowDefinition::new("zeta", None)).await.unwrap();
        repo.save_definition(&WorkflowDefinition::new("alpha", None)).await.unwrap();

        let defs = repo.list_definitions().await.unwrap();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_delete_definition_cascades() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let def = sample_definition();
        repo.save_definition(&def).await.unwrap();

        let execution = Execution::pending(def.id, 1);
        repo.create_execution(&execution).await.unwrap();
        let record = StepExecution::pending(execution.id, def.steps[0].id);
        repo.create_step_execution(&record).await.unwrap();

        assert!(repo.delete_definition(&def.id).await.unwrap());
        assert!(!repo.delete_definition(&def.id).await.unwrap());
        assert!(repo.get_execution(&execution.id).await.unwrap().is_none());
        assert!(repo
            .find_step_execution(&execution.id, &def.steps[0].id)
            .await
            .unwrap()
            .is_none());
    }

    // -- Executions --

    #[tokio::test]
    async fn test_execution_roundtrip_and_update() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let def = sample_definition();
        repo.save_definition(&def).await.unwrap();

        let mut execution = Execution::pending(def.id, 1);
        repo.create_execution(&execution).await.unwrap();

        let loaded = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Pending);
        assert_eq!(loaded.total_cost, "0.0");

        execution.status = ExecutionStatus::Completed;
        execution.current_step_order = 2;
        execution.total_tokens = 1234;
        execution.total_cost = "0.00045".to_string();
        execution.completed_at = Some(Utc::now());
        repo.update_execution(&execution).await.unwrap();

        let loaded = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert_eq!(loaded.current_step_order, 2);
        assert_eq!(loaded.total_tokens, 1234);
        assert_eq!(loaded.total_cost, "0.00045");
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_execution_is_not_found() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let execution = Execution::pending(Uuid::now_v7(), 1);
        let err = repo.update_execution(&execution).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_list_executions_newest_first() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let first = sample_definition();
        let second = WorkflowDefinition::new("other", None);
        repo.save_definition(&first).await.unwrap();
        repo.save_definition(&second).await.unwrap();

        let mut older = Execution::pending(first.id, 1);
        older.started_at = Utc::now() - chrono::Duration::minutes(5);
        let newer = Execution::pending(first.id, 1);
        let unrelated = Execution::pending(second.id, 1);
        for e in [&older, &newer, &unrelated] {
            repo.create_execution(e).await.unwrap();
        }

        let runs = repo.list_executions(Some(&first.id), 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, newer.id);
        assert_eq!(runs[1].id, older.id);

        assert_eq!(repo.list_executions(None, 10).await.unwrap().len(), 3);
        assert_eq!(repo.list_executions(None, 1).await.unwrap().len(), 1);
    }

    // -- Step executions --

    #[tokio::test]
    async fn test_step_execution_lifecycle() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let def = sample_definition();
        repo.save_definition(&def).await.unwrap();
        let execution = Execution::pending(def.id, 1);
        repo.create_execution(&execution).await.unwrap();

        let write_step = def.steps[1].id;
        let mut record = StepExecution::pending(execution.id, write_step);
        repo.create_step_execution(&record).await.unwrap();

        record.status = StepStatus::Completed;
        record.attempt_number = 2;
        record.prompt_sent = Some("Do write".to_string());
        record.llm_response = Some("```\nx\n```".to_string());
        record.output_context = Some("```\nx\n\n```".to_string());
        record.prompt_tokens = 100;
        record.completion_tokens = 50;
        record.total_tokens = 150;
        record.cost = "0.000045".to_string();
        record.criteria_passed = true;
        record.criteria_details = Some("Found 1 code block(s) in output".to_string());
        record.started_at = Some(Utc::now());
        record.completed_at = Some(Utc::now());
        repo.update_step_execution(&record).await.unwrap();

        let loaded = repo
            .find_step_execution(&execution.id, &write_step)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.status, StepStatus::Completed);
        assert_eq!(loaded.attempt_number, 2);
        assert_eq!(loaded.total_tokens, 150);
        assert_eq!(loaded.cost, "0.000045");
        assert!(loaded.criteria_passed);
        assert_eq!(loaded.output_context.as_deref(), Some("```\nx\n\n```"));
    }

    #[tokio::test]
    async fn test_duplicate_step_execution_conflicts() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let def = sample_definition();
        repo.save_definition(&def).await.unwrap();
        let execution = Execution::pending(def.id, 1);
        repo.create_execution(&execution).await.unwrap();

        repo.create_step_execution(&StepExecution::pending(execution.id, def.steps[0].id))
            .await
            .unwrap();
        let err = repo
            .create_step_execution(&StepExecution::pending(execution.id, def.steps[0].id))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_missing_step_execution_is_not_found() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let record = StepExecution::pending(Uuid::now_v7(), Uuid::now_v7());
        let err = repo.update_step_execution(&record).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_list_step_executions_in_step_order() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let def = sample_definition();
        repo.save_definition(&def).await.unwrap();
        let execution = Execution::pending(def.id, 1);
        repo.create_execution(&execution).await.unwrap();

        // Declared order is (check, write); step order is (write, check).
        for step in &def.steps {
            repo.create_step_execution(&StepExecution::pending(execution.id, step.id))
                .await
                .unwrap();
        }

        let records = repo.list_step_executions(&execution.id).await.unwrap();
        let step_ids: Vec<Uuid> = records.iter().map(|r| r.step_id).collect();
        assert_eq!(step_ids, vec![def.steps[1].id, def.steps[0].id]);
    }
}
