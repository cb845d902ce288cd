//! stepflow CLI entry point.
//!
//! Binary name: `sflow`
//!
//! Parses CLI arguments, initializes the data directory, config, and
//! database, then dispatches to the appropriate command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,stepflow=debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // Neither completions nor catalogs need the database
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(*shell, &mut cmd, "sflow", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Criteria => return cli::catalog::list_criteria(cli.json),
        Commands::ContextModes => return cli::catalog::list_context_modes(cli.json),
        _ => {}
    }

    let state = AppState::init().await?;

    match cli.command {
        Commands::Workflow { action } => {
            cli::workflow::handle_workflow_command(action, &state, cli.json, cli.quiet).await?;
        }
        Commands::Execution { action } => {
            cli::execution::handle_execution_command(action, &state, cli.json).await?;
        }
        Commands::Models => {
            cli::catalog::list_models(&state.config, cli.json)?;
        }
        Commands::Completions { .. } | Commands::Criteria | Commands::ContextModes => {
            unreachable!("handled above")
        }
    }

    Ok(())
}
