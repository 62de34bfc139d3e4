//! churl CLI - Query chart museums running inside a Kubernetes cluster
//!
//! Opens a port-forward to the chart museum selected in the manifest and
//! reads chart metadata through it.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::latest::LatestArgs;
use commands::version::OutputFormat;

#[derive(Parser)]
#[command(name = "churl")]
#[command(author, version, about = "Query chart museums running inside a Kubernetes cluster")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the manifest file [default: <config dir>/churl/config.json]
    #[arg(long, global = true, env = "CHURL_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read chart metadata
    Get {
        #[command(subcommand)]
        action: GetAction,
    },

    /// Inspect the manifest
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Create an empty manifest
    Init,

    /// Report the version of the tool
    Version {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
}

#[derive(Subcommand)]
enum GetAction {
    /// Return the metadata for the newest version of a chart
    Latest(LatestArgs),
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the selected chart museum
    Current,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Get {
                action: GetAction::Latest(_),
            } => "latest",
            Self::Config {
                action: ConfigAction::Current,
            } => "current",
            Self::Init => "init",
            Self::Version { .. } => "version",
        }
    }
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose {
        "churl=debug,churl_core=debug"
    } else {
        "churl=info,churl_core=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = || match &cli.config {
        Some(path) => Ok(path.clone()),
        None => churl_core::default_manifest_path(),
    };

    match cli.command {
        Commands::Get {
            action: GetAction::Latest(args),
        } => commands::latest::run(args, &config()?).await,
        Commands::Config {
            action: ConfigAction::Current,
        } => commands::config::current(&config()?).await,
        Commands::Init => commands::init::run(&config()?).await,
        Commands::Version { output } => commands::version::run(output),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    let name = cli.command.name();
    let started = Instant::now();
    let result = run(cli).await;
    debug!("Executed command \"{}\" in {:?}", name, started.elapsed());

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", commands::describe_error(&e));
            ExitCode::FAILURE
        }
    }
}
