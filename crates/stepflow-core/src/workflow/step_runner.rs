//! Step runner: drives one step through its attempts.
//!
//! Each attempt builds the prompt, resolves the model, calls the provider,
//! evaluates the criterion and, on a pass, derives the context for the next
//! step. The single `StepExecution` record is overwritten in place on every
//! attempt and checkpointed after each transition:
//!
//! ```text
//! pending -> running -> completed
//!               |
//!               +-> retrying -> running -> ...
//!               |
//!               +-> failed
//! ```

use std::sync::Arc;

use chrono::Utc;
use stepflow_types::config::GlobalConfig;
use stepflow_types::execution::{StepExecution, StepStatus};
use stepflow_types::llm::{CompletionRequest, Usage};
use stepflow_types::workflow::{ContextMode, StepDefinition};
use tokio_util::sync::CancellationToken;

use crate::llm::pricing::compute_cost;
use crate::llm::provider::LlmProvider;
use crate::llm::selector::select_model;
use crate::repository::workflow::WorkflowRepository;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::{extract_context, frame_prompt, summarize_for_context};
use super::criteria::CriteriaEvaluator;
use super::retry::{AttemptFailure, RetryHandler, sleep_or_cancel};

/// Error message recorded on records ended by cancellation.
pub const CANCELLED_MESSAGE: &str = "Execution cancelled";

// ---------------------------------------------------------------------------
// StepOutcome
// ---------------------------------------------------------------------------

/// Terminal result of running one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The criterion passed; carries the context for the next step.
    Completed { output_context: String },
    /// Every attempt failed. Details are on the `StepExecution` record.
    Failed,
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Faults that abort the step outside the retry budget.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("step cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

pub struct StepRunner<R: WorkflowRepository, P: LlmProvider> {
    checkpoint: Arc<CheckpointManager<R>>,
    provider: Arc<P>,
    evaluator: CriteriaEvaluator<P>,
    config: Arc<GlobalConfig>,
}

impl<R: WorkflowRepository, P: LlmProvider> StepRunner<R, P> {
    pub fn new(
        checkpoint: Arc<CheckpointManager<R>>,
        provider: Arc<P>,
        config: Arc<GlobalConfig>,
    ) -> Self {
        let evaluator = CriteriaEvaluator::new(Arc::clone(&provider), Arc::clone(&config));
        Self {
            checkpoint,
            provider,
            evaluator,
            config,
        }
    }

    /// Run `step` until its criterion passes or its attempts run out.
    ///
    /// Model and criterion failures are consumed as failed attempts; only
    /// storage faults and cancellation surface as `Err`.
    pub async fn run(
        &self,
        step: &StepDefinition,
        record: &mut StepExecution,
        input_context: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, StepError> {
        let input_context = input_context.filter(|c| !c.is_empty());
        let max_attempts = RetryHandler::max_attempts(step);

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                self.mark_cancelled(record).await?;
                return Err(StepError::Cancelled);
            }

            tracing::info!(
                execution_id = %record.execution_id,
                step = step.name.as_str(),
                attempt,
                max_attempts,
                "starting step attempt"
            );

            record.attempt_number = attempt;
            record.status = StepStatus::Running;
            record.started_at = Some(Utc::now());
            record.completed_at = None;
            record.input_context = input_context.map(str::to_string);
            record.llm_response = None;
            record.output_context = None;
            record.criteria_passed = false;
            record.criteria_details = None;
            self.checkpoint.checkpoint_step(record).await?;

            let prompt = frame_prompt(input_context, &step.prompt);
            record.prompt_sent = Some(prompt.clone());
            self.checkpoint.checkpoint_step(record).await?;

            let model = if step.uses_auto_model() {
                let chosen = select_model(&self.config.models, &prompt, step.criterion.kind());
                tracing::info!(model = chosen, "auto-selected model");
                chosen.to_string()
            } else {
                step.model.clone()
            };

            let request = CompletionRequest::user_prompt(
                &model,
                &prompt,
                self.config.execution.step_max_tokens,
                self.config.execution.step_temperature,
            );
            let result = self.provider.complete(&request).await;

            let usage = result.as_ref().map(|r| r.usage).unwrap_or_default();
            self.record_usage(record, &model, usage);

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        step = step.name.as_str(),
                        attempt,
                        error = %e,
                        "model call failed"
                    );
                    record.error_message = Some(e.to_string());
                    self.checkpoint.checkpoint_step(record).await?;

                    if self
                        .after_failure(step, record, attempt, AttemptFailure::CallFailed, cancel)
                        .await?
                    {
                        continue;
                    }
                    return Ok(StepOutcome::Failed);
                }
            };

            record.llm_response = Some(response.content.clone());
            self.checkpoint.checkpoint_step(record).await?;

            let outcome = self
                .evaluator
                .evaluate(&response.content, &step.criterion, &step.prompt)
                .await;
            tracing::info!(
                step = step.name.as_str(),
                attempt,
                passed = outcome.passed,
                details = outcome.details.as_str(),
                "criteria evaluated"
            );
            record.criteria_passed = outcome.passed;
            record.criteria_details = Some(outcome.details.clone());

            if outcome.passed {
                let output_context = match &step.context_mode {
                    ContextMode::Summary => {
                        summarize_for_context(self.provider.as_ref(), &self.config, &response.content)
                            .await
                    }
                    mode => extract_context(&response.content, mode),
                };

                record.output_context = Some(output_context.clone());
                record.status = StepStatus::Completed;
                record.completed_at = Some(Utc::now());
                record.error_message = None;
                self.checkpoint.checkpoint_step(record).await?;

                return Ok(StepOutcome::Completed { output_context });
            }

            record.error_message = Some(format!("Criteria not met: {}", outcome.details));
            self.checkpoint.checkpoint_step(record).await?;

            if !self
                .after_failure(step, record, attempt, AttemptFailure::CriteriaNotMet, cancel)
                .await?
            {
                return Ok(StepOutcome::Failed);
            }
        }

        // Only reachable with a zero attempt budget, which `max_attempts` rules out.
        Ok(StepOutcome::Failed)
    }

    fn record_usage(&self, record: &mut StepExecution, model: &str, usage: Usage) {
        record.prompt_tokens = usage.input_tokens;
        record.completion_tokens = usage.output_tokens;
        record.total_tokens = usage.total_tokens();
        record.cost = compute_cost(
            &self.config.pricing,
            model,
            usage.input_tokens,
            usage.output_tokens,
        )
        .to_string();
    }

    /// Handle a failed attempt. Returns `true` if the caller should retry.
    async fn after_failure(
        &self,
        step: &StepDefinition,
        record: &mut StepExecution,
        attempt: u32,
        failure: AttemptFailure,
        cancel: &CancellationToken,
    ) -> Result<bool, StepError> {
        if !RetryHandler::should_retry(step, attempt) {
            record.status = StepStatus::Failed;
            record.completed_at = Some(Utc::now());
            self.checkpoint.checkpoint_step(record).await?;
            tracing::warn!(
                step = step.name.as_str(),
                attempts = attempt,
                "step failed, retries exhausted"
            );
            return Ok(false);
        }

        record.status = StepStatus::Retrying;
        self.checkpoint.checkpoint_step(record).await?;

        let delay = RetryHandler::backoff(&self.config.execution, failure);
        if sleep_or_cancel(delay, cancel).await {
            self.mark_cancelled(record).await?;
            return Err(StepError::Cancelled);
        }
        Ok(true)
    }

    async fn mark_cancelled(&self, record: &mut StepExecution) -> Result<(), StepError> {
        record.status = StepStatus::Failed;
        record.completed_at = Some(Utc::now());
        record.error_message = Some(CANCELLED_MESSAGE.to_string());
        self.checkpoint.checkpoint_step(record).await?;
        tracing::info!(step_execution_id = %record.id, "step cancelled");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
