//! Loom - collaborative workspace runner
//!
//! Main entry point for the Loom CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{compute, config, serve};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Loom - collaborative workspace runner
#[derive(Parser)]
#[command(name = "loom")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file (overrides default discovery)
    #[arg(long, global = true, env = "LOOM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the websocket gateway
    Serve(serve::ServeArgs),

    /// Create or repair the compute resources of a workspace
    Ensure(compute::ComputeArgs),

    /// Delete the compute resources of a workspace
    Teardown(compute::ComputeArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing: console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "loom=debug,loom_server=debug,loom_session=debug,loom_files=debug,loom_terminal=debug,loom_config=debug,info"
    } else {
        "loom=info,loom_server=info,loom_session=info,loom_files=info,loom_terminal=info,warn"
    };

    let log_dir = loom_config::log_dir().unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "loom.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "loom=trace,loom_server=trace,loom_session=trace,loom_files=trace,loom_terminal=trace,loom_config=trace,info",
                )),
        )
        .init();

    let ctx = commands::Context {
        config_path: cli.config,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Ensure(args) => compute::ensure(args, &ctx).await,
        Commands::Teardown(args) => compute::teardown(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
