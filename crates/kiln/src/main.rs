//! Kiln CLI - build orchestrator for component-library review sites.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Build orchestrator for component-library review sites")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Workspace root (defaults to the nearest directory containing kiln.toml)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Package to build (defaults to the workspace's site package)
    #[arg(short, long, global = true)]
    package: Option<String>,

    /// Maximum number of stages running at once
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean and build a package (default)
    Build,

    /// Empty a package's output directory
    Clean,

    /// Print the stage waves of a build without running it
    Plan,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let project = config::Project::load(cli.root.as_deref())?;

    match cli.command.unwrap_or(Commands::Build) {
        Commands::Build => {
            let result = commands::build::run(&project, cli.package, cli.jobs).await?;
            Ok(ExitCode::from(result.exit_code() as u8))
        }
        Commands::Clean => {
            commands::clean::run(&project, cli.package)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Plan => {
            commands::plan::run(&project, cli.package)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
