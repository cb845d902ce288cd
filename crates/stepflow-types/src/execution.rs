//! Execution records: one run of a workflow and its per-step attempt state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cost::UsdMicros;

/// Lifecycle status of an [`Execution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

/// Lifecycle status of a [`StepExecution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Retrying,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Retrying => write!(f, "retrying"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "retrying" => Ok(StepStatus::Retrying),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            other => Err(format!("invalid step status: '{other}'")),
        }
    }
}

/// One run of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    /// Order key of the step currently (or last) being processed.
    pub current_step_order: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub total_tokens: u64,
    /// Decimal text, see [`UsdMicros`].
    pub total_cost: String,
}

impl Execution {
    pub fn pending(workflow_id: Uuid, first_step_order: i32) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            status: ExecutionStatus::Pending,
            current_step_order: first_step_order,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            total_tokens: 0,
            total_cost: UsdMicros::ZERO.to_string(),
        }
    }

    /// Move to a terminal failure, stamping the completion time.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }
}

/// The latest attempt of one step within one execution.
///
/// Exactly one record exists per `(execution_id, step_id)`; every attempt
/// overwrites the mutable fields in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: Uuid,
    pub status: StepStatus,
    /// 1-based; zero until the first attempt starts.
    pub attempt_number: u32,
    pub input_context: Option<String>,
    pub prompt_sent: Option<String>,
    pub llm_response: Option<String>,
    pub output_context: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// Decimal text, see [`UsdMicros`].
    pub cost: String,
    pub criteria_passed: bool,
    pub criteria_details: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl StepExecution {
    pub fn pending(execution_id: Uuid, step_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            execution_id,
            step_id,
            status: StepStatus::Pending,
            attempt_number: 0,
            input_context: None,
            prompt_sent: None,
            llm_response: None,
            output_context: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            cost: UsdMicros::ZERO.to_string(),
            criteria_passed: false,
            criteria_details: None,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}
