//! Concierge CLI - research briefs from the command line.
//!
//! Usage:
//!   concierge "What changed in grid storage this year?"   # Run one research query
//!   concierge -d notes.pdf "Summarize these findings"      # Include local documents
//!   concierge config show                                  # Show the effective config
//!   concierge sessions list                                # List recorded sessions

mod commands;
mod render;

use clap::Parser;
use concierge_core::config::ConciergeConfig;
use concierge_core::types::{QueryConfig, ResearchQuery};
use concierge_core::{FatalError, Orchestrator, build_providers};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Concierge: a research assistant that gathers, checks and synthesizes sources.
#[derive(Parser, Debug)]
#[command(name = "concierge", version, about, long_about = None)]
pub struct Cli {
    /// Research question to answer
    query: Option<String>,

    /// Local document to include (repeatable)
    #[arg(short, long = "document")]
    documents: Vec<PathBuf>,

    /// Maximum number of web sources to gather
    #[arg(long)]
    max_sources: Option<usize>,

    /// Overall quality score (0-100) at which the brief is accepted
    #[arg(long)]
    target: Option<u8>,

    /// Maximum number of brief versions to evaluate
    #[arg(long)]
    iterations: Option<u32>,

    /// Output format
    #[arg(long, value_enum, default_value = "markdown")]
    format: OutputFormat,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Markdown,
    Json,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect recorded research sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default configuration file into the workspace
    Init,
    /// Show the effective configuration
    Show,
}

#[derive(clap::Subcommand, Debug)]
pub enum SessionAction {
    /// List sessions, most recently updated first
    List,
    /// Print a session snapshot as JSON
    Show {
        /// Session ID
        id: String,
    },
    /// Delete a session
    Remove {
        /// Session ID
        id: String,
    },
}

/// Apply command-line overrides on top of the configured query defaults.
fn query_config(cli: &Cli, defaults: QueryConfig) -> QueryConfig {
    QueryConfig {
        max_sources: cli.max_sources.unwrap_or(defaults.max_sources),
        quality_target: cli.target.unwrap_or(defaults.quality_target),
        max_iterations: cli.iterations.unwrap_or(defaults.max_iterations),
    }
}

/// Build the provider chains and the orchestrator. Missing credentials are
/// configuration failures like any other.
fn prepare(config: ConciergeConfig) -> Result<Orchestrator, FatalError> {
    let providers = build_providers(&config)?;
    Orchestrator::new(config, providers)
}

fn report(err: &FatalError) -> ExitCode {
    eprintln!("Error [{}]: {}", err.code(), err);
    ExitCode::from(exit_code(err))
}

fn exit_code(err: &FatalError) -> u8 {
    match err {
        FatalError::Configuration(_) => 2,
        FatalError::InputExhaustion { .. } => 3,
        FatalError::PipelineTimeout { .. } => 4,
        FatalError::SessionBusy { .. } | FatalError::Memory(_) => 5,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)));

    let log_dir = concierge_core::config::data_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "concierge.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Some(command) = cli.command {
        commands::handle_command(command, &workspace).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let Some(question) = cli.query.clone() else {
        eprintln!("No research question given. Run `concierge --help` for usage.");
        return Ok(ExitCode::from(2));
    };

    let config = match commands::resolve_config(&workspace) {
        Ok(config) => config,
        Err(e) => return Ok(report(&FatalError::from(e))),
    };
    let query = ResearchQuery {
        question,
        documents: cli.documents.clone(),
        config: query_config(&cli, config.query),
    };

    let orchestrator = match prepare(config) {
        Ok(o) => o,
        Err(e) => return Ok(report(&e)),
    };

    match orchestrator.run(query).await {
        Ok(outcome) => {
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
                OutputFormat::Markdown => print!("{}", render::outcome_markdown(&outcome)),
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(report(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parses_query_and_overrides() {
        let cli = Cli::try_parse_from([
            "concierge",
            "--target",
            "80",
            "-d",
            "a.pdf",
            "--document",
            "b.md",
            "grid storage",
        ])
        .unwrap();
        assert_eq!(cli.query.as_deref(), Some("grid storage"));
        assert_eq!(cli.documents, vec![PathBuf::from("a.pdf"), PathBuf::from("b.md")]);
        let config = query_config(&cli, QueryConfig::default());
        assert_eq!(config.quality_target, 80);
        assert_eq!(config.max_sources, QueryConfig::default().max_sources);
    }

    #[test]
    fn test_parses_subcommand() {
        let cli = Cli::try_parse_from(["concierge", "sessions", "show", "abc"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Sessions {
                action: SessionAction::Show { .. }
            })
        ));
        assert_eq!(cli.format, OutputFormat::Markdown);
    }

    #[test]
    fn test_missing_credential_is_configuration_failure() {
        let mut config = ConciergeConfig::default();
        config.generation.api_key_env = "CONCIERGE_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        let err = prepare(config).err().unwrap();
        assert_eq!(err.code(), "CONFIGURATION");
        assert_eq!(exit_code(&err), 2);
        assert!(err.to_string().contains("CONCIERGE_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_exit_codes_distinguish_failures() {
        let err = FatalError::InputExhaustion {
            question: "q".into(),
        };
        assert_eq!(exit_code(&err), 3);
    }
}
