use super::CliConfig;
use crate::config::UpdaterConfig;
use crate::upgrade::StatusReporter;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

/// Read and consume the outcome of the last update.
///
/// The record is gone afterwards, so the host shows each outcome once.
/// Exits with status 1 when the record reports a failure.
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// Print the record as JSON (`null` if there is none)
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub fn execute(self, cli: &CliConfig) -> Result<()> {
        let config = UpdaterConfig::load(cli.config_path.as_deref())?;
        let reporter = StatusReporter::new(config.layout()?.status_path);

        let status = reporter
            .read_and_consume_status()
            .with_context(|| format!("Failed to read update status {}", reporter.path().display()))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            match &status {
                None => println!("No update status recorded"),
                Some(s) if s.success => println!("{}", s.summary().green()),
                Some(s) => println!("{}", s.summary().red()),
            }
        }

        if status.is_some_and(|s| !s.success) {
            std::process::exit(1);
        }
        Ok(())
    }
}
