//! CLI workflow management subcommands.
//!
//! Provides import, export, list, show, delete, run, and runs operations for
//! workflow definitions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Subcommand, ValueEnum};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use uuid::Uuid;

use stepflow_core::repository::workflow::WorkflowRepository;
use stepflow_core::workflow::definition::{
    DocumentFormat, WorkflowError, export_workflow, import_workflow, lint_definition,
    load_document_file, save_document_file, serialize_document,
};
use stepflow_core::workflow::executor::ExecutionResult;
use stepflow_types::execution::ExecutionStatus;
use stepflow_types::workflow::WorkflowDefinition;

use super::{ellipsize, execution_status_cell, parse_id, short_id};
use crate::state::AppState;

/// Workflow management subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Import a workflow from a JSON or YAML document.
    Import {
        /// Path to the workflow document (.json, .yaml, .yml).
        file: PathBuf,
    },

    /// Export a workflow as a JSON or YAML document.
    Export {
        /// Workflow UUID.
        id: String,

        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Document format (defaults to the output extension, else JSON).
        #[arg(long, value_enum)]
        format: Option<ExportFormat>,
    },

    /// List stored workflows.
    List,

    /// Show a workflow and its steps.
    Show {
        /// Workflow UUID.
        id: String,
    },

    /// Delete a workflow and all of its executions.
    Delete {
        /// Workflow UUID.
        id: String,

        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Run a workflow and follow its progress (Ctrl+C cancels).
    Run {
        /// Workflow UUID.
        id: String,
    },

    /// Show recent executions of a workflow.
    Runs {
        /// Workflow UUID.
        id: String,

        /// Maximum number of executions to display.
        #[arg(long, default_value = "10")]
        limit: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ExportFormat {
    Json,
    Yaml,
}

impl From<ExportFormat> for DocumentFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Json => DocumentFormat::Json,
            ExportFormat::Yaml => DocumentFormat::Yaml,
        }
    }
}

/// Handle a workflow subcommand.
pub async fn handle_workflow_command(
    cmd: WorkflowCommand,
    state: &AppState,
    json: bool,
    quiet: bool,
) -> Result<()> {
    match cmd {
        WorkflowCommand::Import { file } => handle_import(&file, state, json).await,
        WorkflowCommand::Export { id, output, format } => {
            handle_export(&id, output.as_deref(), format, state).await
        }
        WorkflowCommand::List => handle_list(state, json).await,
        WorkflowCommand::Show { id } => handle_show(&id, state, json).await,
        WorkflowCommand::Delete { id, force } => handle_delete(&id, force, state, json).await,
        WorkflowCommand::Run { id } => handle_run(&id, state, json, quiet).await,
        WorkflowCommand::Runs { id, limit } => handle_runs(&id, limit, state, json).await,
    }
}

// ---------------------------------------------------------------------------
// Import / Export
// ---------------------------------------------------------------------------

async fn handle_import(file: &Path, state: &AppState, json: bool) -> Result<()> {
    let doc = load_document_file(file).map_err(|e| match e {
        WorkflowError::ParseError(msg) => anyhow::anyhow!("Invalid import format: {msg}"),
        WorkflowError::IoError(err) => {
            anyhow::anyhow!("Failed to read {}: {err}", file.display())
        }
        other => anyhow::anyhow!(other),
    })?;

    let def = import_workflow(&doc, &state.config.models.default_model)
        .map_err(|e| anyhow::anyhow!("Import failed: {e}"))?;

    state
        .repo
        .save_definition(&def)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to save workflow: {e}"))?;

    let warnings = lint_definition(&def);
    tracing::info!(workflow_id = %def.id, steps = def.steps.len(), "workflow imported");

    if json {
        let out = serde_json::json!({
            "id": def.id.to_string(),
            "name": def.name,
            "steps": def.steps.len(),
            "warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Imported workflow '{}'",
            style("*").green().bold(),
            style(&def.name).cyan()
        );
        println!("  ID: {}", def.id);
        println!("  Steps: {}", def.steps.len());
        print_warnings(&warnings);
        println!();
    }

    Ok(())
}

async fn handle_export(
    id: &str,
    output: Option<&Path>,
    format: Option<ExportFormat>,
    state: &AppState,
) -> Result<()> {
    let def = load_definition(id, state).await?;
    let doc = export_workflow(&def);

    let format = match (format, output) {
        (Some(f), _) => DocumentFormat::from(f),
        (None, Some(path)) => DocumentFormat::from_path(path),
        (None, None) => DocumentFormat::Json,
    };

    match output {
        Some(path) => {
            save_document_file(path, &doc, format)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "  {} Exported '{}' to {}",
                style("*").green().bold(),
                style(&def.name).cyan(),
                path.display()
            );
        }
        None => {
            let text = serialize_document(&doc, format)?;
            println!("{}", text.trim_end());
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// List / Show
// ---------------------------------------------------------------------------

async fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let defs = state
        .repo
        .list_definitions()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list workflows: {e}"))?;

    if json {
        let out: Vec<_> = defs
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id.to_string(),
                    "name": d.name,
                    "description": d.description,
                    "steps": d.steps.len(),
                    "updated_at": d.updated_at.to_rfc3339(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!("  No workflows stored.");
        println!(
            "  Import one with: {}",
            style("sflow workflow import <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Steps"),
            Cell::new("Description"),
            Cell::new("Updated"),
        ]);

    for d in &defs {
        table.add_row(vec![
            Cell::new(d.id),
            Cell::new(&d.name),
            Cell::new(d.steps.len()),
            Cell::new(ellipsize(d.description.as_deref().unwrap_or("-"), 40)),
            Cell::new(d.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

async fn handle_show(id: &str, state: &AppState, json: bool) -> Result<()> {
    let def = load_definition(id, state).await?;
    let warnings = lint_definition(&def);

    if json {
        let mut out = serde_json::to_value(&def)?;
        out["warnings"] = serde_json::json!(warnings);
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} {}", style("Workflow:").bold(), style(&def.name).cyan());
    println!("  ID: {}", def.id);
    if let Some(ref description) = def.description {
        println!("  Description: {description}");
    }
    println!("  Created: {}", def.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated: {}", def.updated_at.format("%Y-%m-%d %H:%M:%S"));
    println!();

    if def.steps.is_empty() {
        println!("  No steps.");
    } else {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Order").fg(Color::Cyan),
                Cell::new("Name"),
                Cell::new("Model"),
                Cell::new("Criteria"),
                Cell::new("Retries"),
                Cell::new("Context"),
                Cell::new("Prompt"),
            ]);

        for step in def.ordered_steps() {
            let criteria = match step.criterion.value() {
                Some(value) => format!("{} ({})", step.criterion.kind(), ellipsize(value, 24)),
                None => step.criterion.kind().to_string(),
            };
            table.add_row(vec![
                Cell::new(step.order),
                Cell::new(&step.name),
                Cell::new(&step.model),
                Cell::new(criteria),
                Cell::new(step.max_retries),
                Cell::new(step.context_mode.kind()),
                Cell::new(ellipsize(&step.prompt, 48)),
            ]);
        }
        println!("{table}");
    }

    print_warnings(&warnings);
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

async fn handle_delete(id: &str, force: bool, state: &AppState, json: bool) -> Result<()> {
    let def = load_definition(id, state).await?;

    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete workflow '{}' and all of its executions?",
                style(&def.name).red().bold()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    let deleted = state
        .repo
        .delete_definition(&def.id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to delete workflow: {e}"))?;
    if !deleted {
        bail!("Workflow not found");
    }

    if json {
        println!(
            "{}",
            serde_json::json!({"deleted": def.id.to_string(), "name": def.name})
        );
    } else {
        println!();
        println!(
            "  {} Deleted workflow '{}'",
            style("*").green().bold(),
            style(&def.name).cyan()
        );
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

async fn handle_run(id: &str, state: &AppState, json: bool, quiet: bool) -> Result<()> {
    let def = load_definition(id, state).await?;

    let warnings = lint_definition(&def);
    for warning in &warnings {
        tracing::warn!(workflow_id = %def.id, "{warning}");
    }
    if !json && !quiet {
        print_warnings(&warnings);
    }

    let runner = state.runner()?;
    let handle = runner
        .start_execution(def.id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start execution: {e}"))?;
    let execution_id = handle.execution_id();

    let spinner = if json || quiet {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    };
    spinner.set_message(format!("Starting '{}'...", def.name));

    let steps_by_order: HashMap<i32, (Uuid, &str)> = def
        .ordered_steps()
        .into_iter()
        .rev()
        .map(|s| (s.order, (s.id, s.name.as_str())))
        .collect();
    let total_steps = def.steps.len();

    let mut poll = tokio::time::interval(Duration::from_millis(500));
    let mut cancel_requested = false;
    while !handle.is_finished() {
        tokio::select! {
            _ = poll.tick() => {
                if let Some(message) = progress_message(state, execution_id, &steps_by_order, total_steps).await {
                    spinner.set_message(message);
                }
            }
            signal = tokio::signal::ctrl_c(), if !cancel_requested => {
                signal.context("failed to listen for Ctrl+C")?;
                cancel_requested = true;
                handle.cancel();
                spinner.set_message("Cancelling...");
                tracing::info!(execution_id = %execution_id, "cancellation requested");
            }
        }
    }

    let result = handle
        .wait()
        .await
        .map_err(|e| anyhow::anyhow!("Execution {} aborted: {e}", short_id(&execution_id)))?;
    spinner.finish_and_clear();

    print_result(&def, &result, json)?;

    if result.status == ExecutionStatus::Failed {
        bail!(
            "Execution failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Spinner text for the step the execution is currently on.
async fn progress_message(
    state: &AppState,
    execution_id: Uuid,
    steps_by_order: &HashMap<i32, (Uuid, &str)>,
    total_steps: usize,
) -> Option<String> {
    let execution = state.repo.get_execution(&execution_id).await.ok().flatten()?;
    let (step_id, step_name) = steps_by_order.get(&execution.current_step_order)?;
    let step = state
        .repo
        .find_step_execution(&execution_id, step_id)
        .await
        .ok()
        .flatten()?;

    let position = steps_by_order
        .keys()
        .filter(|order| **order <= execution.current_step_order)
        .count();
    Some(format!(
        "Step {position}/{total_steps} '{step_name}': {} (attempt {})",
        step.status,
        step.attempt_number.max(1)
    ))
}

fn print_result(def: &WorkflowDefinition, result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "execution_id": result.execution_id.to_string(),
            "workflow_id": def.id.to_string(),
            "status": result.status.to_string(),
            "total_tokens": result.total_tokens,
            "total_cost": result.total_cost,
            "error": result.error,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let marker = match result.status {
        ExecutionStatus::Completed => style("*").green().bold(),
        _ => style("x").red().bold(),
    };
    println!();
    println!(
        "  {marker} Workflow '{}' {}",
        style(&def.name).cyan(),
        result.status
    );
    println!("  Execution: {}", result.execution_id);
    println!("  Tokens: {}", result.total_tokens);
    println!("  Cost: ${}", result.total_cost);
    if let Some(ref err) = result.error {
        println!("  Error: {}", style(err).red());
    }
    println!();
    println!(
        "  Step details: {}",
        style(format!("sflow execution logs {}", result.execution_id)).dim()
    );
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

async fn handle_runs(id: &str, limit: u32, state: &AppState, json: bool) -> Result<()> {
    let def = load_definition(id, state).await?;
    let runs = state
        .repo
        .list_executions(Some(&def.id), limit)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list executions: {e}"))?;

    if json {
        let out: Vec<_> = runs
            .iter()
            .map(|r| {
                serde_json::json!({
                    "execution_id": r.id.to_string(),
                    "status": r.status.to_string(),
                    "current_step_order": r.current_step_order,
                    "total_tokens": r.total_tokens,
                    "total_cost": r.total_cost,
                    "started_at": r.started_at.to_rfc3339(),
                    "completed_at": r.completed_at.map(|t| t.to_rfc3339()),
                    "error": r.error_message,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!();
        println!("  No executions for workflow '{}'.", def.name);
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Execution").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Tokens"),
            Cell::new("Cost"),
            Cell::new("Started"),
            Cell::new("Completed"),
        ]);

    for r in &runs {
        let completed = r
            .completed_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(r.id),
            execution_status_cell(r.status),
            Cell::new(r.total_tokens),
            Cell::new(format!("${}", r.total_cost)),
            Cell::new(r.started_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(completed),
        ]);
    }

    println!();
    println!("  Executions of '{}'", style(&def.name).cyan());
    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn load_definition(id: &str, state: &AppState) -> Result<WorkflowDefinition> {
    let workflow_id = parse_id(id, "workflow")?;
    state
        .repo
        .get_definition(&workflow_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up workflow: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("Workflow not found: {workflow_id}"))
}

fn print_warnings(warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    println!();
    for warning in warnings {
        println!("  {} {warning}", style("warning:").yellow().bold());
    }
}
