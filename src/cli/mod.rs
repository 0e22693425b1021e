//! CLI module for Tidings
//!
//! - `serve`: run both schedulers and the admin API
//! - `check`: run plugin checks once and deliver the results
//! - `events`: list persisted events
//! - `cleanup`: prune old sent/failed events

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod check;
pub mod events;

/// Tidings notification scheduler
#[derive(Parser, Debug)]
#[command(name = "tidings")]
#[command(about = "Durable push-notification scheduler")]
#[command(version)]
pub struct Cli {
    /// Extra configuration file, applied after config/local.toml
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the schedulers and admin API
    Serve,
    /// Run plugin checks now, outside their schedules
    Check {
        /// Only this plugin
        #[arg(long)]
        plugin: Option<String>,
    },
    /// List scheduled events
    Events {
        /// Comma-separated statuses (pending, scheduled, sent, failed)
        #[arg(long)]
        status: Option<String>,
    },
    /// Remove sent/failed events past retention
    Cleanup,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let config = crate::server::load_config(cli.config.as_deref())?;
    match command {
        Commands::Serve => crate::server::run(config).await,
        Commands::Check { plugin } => check::run(&config, plugin.as_deref()).await,
        Commands::Events { status } => events::list(&config, status.as_deref()).await,
        Commands::Cleanup => events::cleanup(&config).await,
    }
}
