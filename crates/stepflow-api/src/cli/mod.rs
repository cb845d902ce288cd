//! CLI command definitions for the `sflow` binary.
//!
//! Uses clap derive macros for argument parsing. Commands are grouped by
//! noun (`sflow workflow run`, `sflow execution logs`), with the read-only
//! catalogs at the top level.

pub mod catalog;
pub mod execution;
pub mod workflow;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use comfy_table::{Cell, Color};
use uuid::Uuid;

use stepflow_types::execution::{ExecutionStatus, StepStatus};

/// Run multi-step LLM workflows with completion criteria and retries.
#[derive(Parser)]
#[command(name = "sflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage and run workflows (import, export, list, show, delete, run, runs).
    #[command(alias = "wf")]
    Workflow {
        #[command(subcommand)]
        action: workflow::WorkflowCommand,
    },

    /// Inspect executions (list, status, logs).
    #[command(alias = "exec")]
    Execution {
        #[command(subcommand)]
        action: execution::ExecutionCommand,
    },

    /// List the selectable models.
    Models,

    /// List the available completion criteria.
    Criteria,

    /// List the available context passing modes.
    ContextModes,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid> {
    raw.trim()
        .parse::<Uuid>()
        .with_context(|| format!("Invalid {what} ID: '{raw}'"))
}

pub(crate) fn short_id(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

pub(crate) fn execution_status_cell(status: ExecutionStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        ExecutionStatus::Pending => cell.fg(Color::Yellow),
        ExecutionStatus::Running => cell.fg(Color::Blue),
        ExecutionStatus::Completed => cell.fg(Color::Green),
        ExecutionStatus::Failed => cell.fg(Color::Red),
    }
}

pub(crate) fn step_status_cell(status: StepStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        StepStatus::Pending => cell.fg(Color::Yellow),
        StepStatus::Running => cell.fg(Color::Blue),
        StepStatus::Retrying => cell.fg(Color::Magenta),
        StepStatus::Completed => cell.fg(Color::Green),
        StepStatus::Failed => cell.fg(Color::Red),
    }
}

/// Cut `text` to `max` characters for table cells.
pub(crate) fn ellipsize(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_global_flags() {
        let cli = Cli::try_parse_from([
            "sflow",
            "--json",
            "workflow",
            "run",
            "0190a5c4-7e2b-7000-8000-000000000001",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Workflow {
                action: workflow::WorkflowCommand::Run { .. }
            }
        ));
    }

    #[test]
    fn test_parse_context_modes_is_kebab_case() {
        let cli = Cli::try_parse_from(["sflow", "context-modes"]).unwrap();
        assert!(matches!(cli.command, Commands::ContextModes));
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        let err = parse_id("not-a-uuid", "workflow").unwrap_err();
        assert!(err.to_string().contains("Invalid workflow ID"));
    }

    #[test]
    fn test_ellipsize() {
        assert_eq!(ellipsize("short", 10), "short");
        assert_eq!(ellipsize("abcdefghijkl", 8), "abcde...");
    }
}
