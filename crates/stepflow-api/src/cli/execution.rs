//! CLI execution inspection subcommands.
//!
//! Reads execution and step execution records; works while a run is in
//! progress in another process.

use std::collections::HashMap;

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use stepflow_core::repository::workflow::WorkflowRepository;
use stepflow_types::execution::Execution;
use stepflow_types::workflow::StepDefinition;

use super::{ellipsize, execution_status_cell, parse_id, short_id, step_status_cell};
use crate::state::AppState;

/// Execution inspection subcommands.
#[derive(Subcommand)]
pub enum ExecutionCommand {
    /// List recent executions, newest first.
    List {
        /// Only executions of this workflow UUID.
        #[arg(long)]
        workflow: Option<String>,

        /// Maximum number of executions to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show the status and totals of one execution.
    Status {
        /// Execution UUID.
        id: String,
    },

    /// Show per-step records of one execution.
    Logs {
        /// Execution UUID.
        id: String,

        /// Also print prompts, responses, and passed context.
        #[arg(long)]
        full: bool,
    },
}

/// Handle an execution subcommand.
pub async fn handle_execution_command(
    cmd: ExecutionCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        ExecutionCommand::List { workflow, limit } => {
            handle_list(workflow.as_deref(), limit, state, json).await
        }
        ExecutionCommand::Status { id } => handle_status(&id, state, json).await,
        ExecutionCommand::Logs { id, full } => handle_logs(&id, full, state, json).await,
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list(
    workflow: Option<&str>,
    limit: u32,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let workflow_id = workflow.map(|w| parse_id(w, "workflow")).transpose()?;

    let runs = state
        .repo
        .list_executions(workflow_id.as_ref(), limit)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list executions: {e}"))?;

    let names = workflow_names(state).await?;

    if json {
        let out: Vec<_> = runs
            .iter()
            .map(|r| {
                let mut value = execution_json(r);
                value["workflow_name"] = serde_json::json!(names.get(&r.workflow_id));
                value
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!();
        println!("  No executions found.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Execution").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Status"),
            Cell::new("Tokens"),
            Cell::new("Cost"),
            Cell::new("Started"),
        ]);

    for r in &runs {
        let name = names
            .get(&r.workflow_id)
            .cloned()
            .unwrap_or_else(|| short_id(&r.workflow_id));
        table.add_row(vec![
            Cell::new(r.id),
            Cell::new(name),
            execution_status_cell(r.status),
            Cell::new(r.total_tokens),
            Cell::new(format!("${}", r.total_cost)),
            Cell::new(r.started_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

async fn handle_status(id: &str, state: &AppState, json: bool) -> Result<()> {
    let execution = load_execution(id, state).await?;
    let definition = state
        .repo
        .get_definition(&execution.workflow_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up workflow: {e}"))?;

    if json {
        let mut out = execution_json(&execution);
        out["workflow_name"] = serde_json::json!(definition.as_ref().map(|d| d.name.clone()));
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Execution {}",
        style("Status:").bold(),
        style(short_id(&execution.id)).cyan()
    );
    if let Some(ref def) = definition {
        println!("  Workflow: {} ({})", style(&def.name).cyan(), def.id);
        if let Some(step) = def
            .ordered_steps()
            .into_iter()
            .find(|s| s.order == execution.current_step_order)
        {
            println!(
                "  Current step: {} '{}'",
                execution.current_step_order, step.name
            );
        }
    }
    println!("  Status: {}", execution.status);
    println!("  Tokens: {}", execution.total_tokens);
    println!("  Cost: ${}", execution.total_cost);
    println!("  Started: {}", execution.started_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(completed) = execution.completed_at {
        println!("  Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
        let elapsed = completed - execution.started_at;
        println!("  Duration: {}s", elapsed.num_seconds());
    }
    if let Some(ref err) = execution.error_message {
        println!("  Error: {}", style(err).red());
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

async fn handle_logs(id: &str, full: bool, state: &AppState, json: bool) -> Result<()> {
    let execution = load_execution(id, state).await?;
    let records = state
        .repo
        .list_step_executions(&execution.id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list step executions: {e}"))?;

    let steps: HashMap<Uuid, StepDefinition> = state
        .repo
        .get_definition(&execution.workflow_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up workflow: {e}"))?
        .map(|def| def.steps.into_iter().map(|s| (s.id, s)).collect())
        .unwrap_or_default();

    if json {
        let out: Vec<_> = records
            .iter()
            .map(|r| {
                let step = steps.get(&r.step_id);
                serde_json::json!({
                    "step_id": r.step_id.to_string(),
                    "step_name": step.map(|s| s.name.clone()),
                    "step_order": step.map(|s| s.order),
                    "status": r.status.to_string(),
                    "attempt_number": r.attempt_number,
                    "prompt_tokens": r.prompt_tokens,
                    "completion_tokens": r.completion_tokens,
                    "total_tokens": r.total_tokens,
                    "cost": r.cost,
                    "criteria_passed": r.criteria_passed,
                    "criteria_details": r.criteria_details,
                    "input_context": r.input_context,
                    "prompt_sent": r.prompt_sent,
                    "llm_response": r.llm_response,
                    "output_context": r.output_context,
                    "started_at": r.started_at.map(|t| t.to_rfc3339()),
                    "completed_at": r.completed_at.map(|t| t.to_rfc3339()),
                    "error": r.error_message,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if records.is_empty() {
        println!();
        println!("  No step records for execution '{}'.", short_id(&execution.id));
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Tokens"),
            Cell::new("Cost"),
            Cell::new("Criteria"),
        ]);

    for r in &records {
        let step = steps.get(&r.step_id);
        let criteria = match (&r.criteria_details, r.criteria_passed) {
            (Some(details), _) => ellipsize(details, 48),
            (None, true) => "passed".to_string(),
            (None, false) => "-".to_string(),
        };
        let criteria_cell = if r.criteria_passed {
            Cell::new(criteria).fg(Color::Green)
        } else {
            Cell::new(criteria)
        };
        table.add_row(vec![
            Cell::new(step.map(|s| s.order.to_string()).unwrap_or_else(|| "?".to_string())),
            Cell::new(step.map(|s| s.name.as_str()).unwrap_or("(deleted)")),
            step_status_cell(r.status),
            Cell::new(r.attempt_number),
            Cell::new(r.total_tokens),
            Cell::new(format!("${}", r.cost)),
            criteria_cell,
        ]);
    }

    println!();
    println!(
        "  Step log for execution {} ({})",
        style(short_id(&execution.id)).cyan(),
        execution.status
    );
    println!();
    println!("{table}");

    for r in &records {
        let name = steps.get(&r.step_id).map(|s| s.name.as_str()).unwrap_or("(deleted)");
        if let Some(ref err) = r.error_message {
            println!("  {} {name}: {}", style("error").red().bold(), err);
        }
        if full {
            println!();
            println!("  {}", style(format!("--- {name} ---")).bold());
            print_section("Input context", r.input_context.as_deref());
            print_section("Prompt", r.prompt_sent.as_deref());
            print_section("Response", r.llm_response.as_deref());
            print_section("Output context", r.output_context.as_deref());
        }
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn load_execution(id: &str, state: &AppState) -> Result<Execution> {
    let execution_id = parse_id(id, "execution")?;
    state
        .repo
        .get_execution(&execution_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get execution: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("Execution not found: {execution_id}"))
}

async fn workflow_names(state: &AppState) -> Result<HashMap<Uuid, String>> {
    let defs = state
        .repo
        .list_definitions()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list workflows: {e}"))?;
    Ok(defs.into_iter().map(|d| (d.id, d.name)).collect())
}

fn execution_json(r: &Execution) -> serde_json::Value {
    serde_json::json!({
        "execution_id": r.id.to_string(),
        "workflow_id": r.workflow_id.to_string(),
        "status": r.status.to_string(),
        "current_step_order": r.current_step_order,
        "total_tokens": r.total_tokens,
        "total_cost": r.total_cost,
        "started_at": r.started_at.to_rfc3339(),
        "completed_at": r.completed_at.map(|t| t.to_rfc3339()),
        "error": r.error_message,
    })
}

fn print_section(title: &str, body: Option<&str>) {
    let Some(body) = body else { return };
    println!("  {}", style(title).dim());
    for line in body.lines() {
        println!("    {line}");
    }
}
