//! Command-line interface of the updater.
//!
//! The device launches the binary without arguments, which performs an
//! update run. The other subcommands are the host-side halves of the update
//! protocol, so shell launchers and the host application can drive the
//! updater without reimplementing its file formats.
//!
//! # Available Commands
//!
//! - `run` - Execute the pending update plan and hand off to the launcher (default)
//! - `request` - Write an update plan, optionally launching the updater
//! - `status` - Read and consume the outcome of the last update
//! - `swap-staged` - Move staged `.new` files over their originals
//!
//! # Global Options
//!
//! - `--verbose` / `--quiet` - Log level (overridden by `RUST_LOG`)
//! - `--config <path>` - Configuration file instead of the default lookup
//! - `--no-progress` - Log progress instead of drawing a progress bar
//!
//! # Example
//!
//! ```bash
//! # What the host does before launching the updater
//! updater request --version 1.2.0 --url https://example.com/MiyooPod.zip \
//!     --checksum sha256:... --size 4194304 --exec
//!
//! # What the launcher does on the next start
//! updater swap-staged
//! updater status --json
//! ```

mod request;
mod run;
mod status;
mod swap;


use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use request::RequestCommand;
pub use run::RunCommand;
pub use status::StatusCommand;
pub use swap::SwapCommand;

/// Runtime options shared by every subcommand.
///
/// Built once from the global flags and passed down explicitly instead of
/// through environment variables.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Default log level; `RUST_LOG` still wins.
    pub log_level: String,

    /// Log progress through `tracing` instead of drawing a bar.
    pub no_progress: bool,

    /// Explicit configuration file.
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            ..Self::default()
        }
    }
}

/// MiyooPod over-the-air updater.
#[derive(Parser, Debug)]
#[command(
    name = "updater",
    about = "Over-the-air updater for MiyooPod",
    version,
    long_about = "Downloads, verifies and installs a MiyooPod update bundle with backup and \
                  rollback, then hands control back to the application launcher."
)]
pub struct Cli {
    /// Command to execute; an update run if omitted
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = crate::constants::CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Log progress instead of drawing a progress bar
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute the pending update plan and hand off to the launcher
    Run(RunCommand),

    /// Write an update plan for the next run
    Request(RequestCommand),

    /// Read and consume the outcome of the last update
    Status(StatusCommand),

    /// Move staged `.new` files over their originals
    SwapStaged(SwapCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        };

        CliConfig {
            log_level: log_level.to_string(),
            no_progress: self.no_progress,
            config_path: self.config.clone(),
        }
    }

    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        match self.command {
            None => RunCommand::default().execute(&config).await,
            Some(Commands::Run(cmd)) => cmd.execute(&config).await,
            Some(Commands::Request(cmd)) => cmd.execute(&config),
            Some(Commands::Status(cmd)) => cmd.execute(&config),
            Some(Commands::SwapStaged(cmd)) => cmd.execute(&config),
        }
    }
}
