//! Kiln CLI - validate and hot-reload sandboxed widget units.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config_bridge;
mod history;
mod theme;

use commands::{check, config, host, recent};
use history::RecentHistory;

/// Kiln - hot-reloading host for WebAssembly widgets
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the validation pipeline once against a unit
    Check {
        /// Unit root (directory holding the .ini descriptor)
        root: PathBuf,
        /// Print a JSON report instead of progress lines
        #[arg(long)]
        json: bool,
    },

    /// Host a unit interactively
    Host {
        /// Unit root (directory holding the .ini descriptor)
        root: PathBuf,
        /// Reload automatically when watched files change
        #[arg(short, long)]
        watch: bool,
    },

    /// List recently hosted units
    Recent {
        /// Forget all recent units
        #[arg(long)]
        clear: bool,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the resolved configuration
    Show {
        /// Workspace (unit root) whose `.kiln/config.toml` is layered on top
        #[arg(long)]
        root: Option<PathBuf>,
        /// Output format (toml or json)
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
    /// Show config file paths being checked
    Paths {
        /// Workspace (unit root) to include
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

impl Commands {
    /// Unit root whose workspace config applies, if any.
    fn workspace(&self) -> Option<&Path> {
        match self {
            Self::Check { root, .. } | Self::Host { root, .. } => Some(root.as_path()),
            Self::Config {
                command: ConfigCommands::Show { root, .. } | ConfigCommands::Paths { root },
            } => root.as_deref(),
            Self::Recent { .. } => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let loaded = kiln_config::Config::load(cli.command.workspace());

    let log_config = match &loaded {
        Ok(resolved) => {
            let mut lc = config_bridge::to_log_config(&resolved.config);
            if cli.verbose {
                "debug".clone_into(&mut lc.level);
            }
            lc
        },
        Err(_) => {
            let level = if cli.verbose { "debug" } else { "info" };
            kiln_telemetry::LogConfig::new(level)
        },
    };
    if let Err(e) = kiln_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    // `config` reports load errors itself; everything else needs a config.
    if let Commands::Config { command } = &cli.command {
        match command {
            ConfigCommands::Show { root, format } => {
                config::show_config(root.as_deref(), format)?;
            },
            ConfigCommands::Paths { root } => config::show_paths(root.as_deref())?,
        }
        return Ok(ExitCode::SUCCESS);
    }
    let cfg = loaded?.config;

    match cli.command {
        Commands::Check { root, json } => {
            if !check::run_check(&root, &cfg, json).await? {
                return Ok(ExitCode::FAILURE);
            }
        },
        Commands::Host { root, watch } => {
            let history = Arc::new(RecentHistory::from_config(&cfg)?);
            host::run_host(&root, &cfg, watch, history).await?;
        },
        Commands::Recent { clear } => {
            let history = RecentHistory::from_config(&cfg)?;
            if clear {
                recent::clear_recent(&history)?;
            } else {
                recent::list_recent(&history)?;
            }
        },
        Commands::Config { .. } => {},
    }

    Ok(ExitCode::SUCCESS)
}
