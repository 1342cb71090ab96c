//! nodeflow: command-line shell for running workflow graphs.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "nodeflow", version, about = "Run workflow graphs against a code sandbox")]
struct Cli {
    /// Engine configuration file (TOML). `NODEFLOW_*` variables override it.
    #[arg(long, global = true, env = "NODEFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a workflow and print the run result as JSON.
    Run {
        workflow: PathBuf,
        /// JSON object used as the initial context.
        #[arg(long)]
        context: Option<PathBuf>,
    },
    /// Parse and validate a workflow without running it.
    Validate { workflow: PathBuf },
    /// Inspect or reset the SQLite code cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Export the persisted trace of a past run.
    Trace {
        #[command(subcommand)]
        action: TraceAction,
    },
}

#[derive(Debug, Subcommand)]
enum CacheAction {
    Stats,
    Clear,
}

#[derive(Debug, Subcommand)]
enum TraceAction {
    Export { execution_id: uuid::Uuid },
    /// List the most recent runs.
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = dirs_data_dir();

    let result = match cli.command {
        Command::Run { workflow, context } => {
            commands::run(&workflow, context.as_deref(), cli.config.as_deref(), data_dir).await
        }
        Command::Validate { workflow } => commands::validate(&workflow),
        Command::Cache { action } => match action {
            CacheAction::Stats => commands::cache_stats(cli.config.as_deref(), data_dir),
            CacheAction::Clear => commands::cache_clear(cli.config.as_deref(), data_dir),
        },
        Command::Trace { action } => match action {
            TraceAction::Export { execution_id } => {
                commands::trace_export(execution_id, cli.config.as_deref(), data_dir)
            }
            TraceAction::Runs { limit } => {
                commands::trace_runs(limit, cli.config.as_deref(), data_dir)
            }
        },
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn dirs_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("nodeflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_context_and_global_config() {
        let cli = Cli::try_parse_from([
            "nodeflow",
            "run",
            "flow.json",
            "--context",
            "ctx.json",
            "--config",
            "engine.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("engine.toml")));
        match cli.command {
            Command::Run { workflow, context } => {
                assert_eq!(workflow, PathBuf::from("flow.json"));
                assert_eq!(context, Some(PathBuf::from("ctx.json")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_cache_and_trace_subcommands() {
        let cli = Cli::try_parse_from(["nodeflow", "cache", "clear"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Cache {
                action: CacheAction::Clear
            }
        ));

        let id = uuid::Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from(["nodeflow", "trace", "export", &id]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Trace {
                action: TraceAction::Export { .. }
            }
        ));
    }

    #[test]
    fn rejects_unknown_cache_action() {
        assert!(Cli::try_parse_from(["nodeflow", "cache", "purge"]).is_err());
    }
}
