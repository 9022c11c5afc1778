use super::CliConfig;
use crate::config::UpdaterConfig;
use crate::upgrade::StagedSwap;
use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

/// Move staged `<name>.new` files over their originals.
///
/// Run by the launcher after the updater has exited, when nothing holds the
/// originals open any more.
#[derive(Args, Debug)]
pub struct SwapCommand {
    /// Installation root, instead of the configured one
    #[arg(long)]
    pub root: Option<PathBuf>,
}

impl SwapCommand {
    pub fn execute(self, cli: &CliConfig) -> Result<()> {
        let mut config = UpdaterConfig::load(cli.config_path.as_deref())?;
        if let Some(root) = self.root {
            config.install_root = Some(root.to_string_lossy().into_owned());
        }
        let report = StagedSwap::from_layout(&config.layout()?).swap();

        for path in &report.swapped {
            println!("{} {}", "✓".green(), path.display());
        }
        for (path, reason) in &report.failures {
            println!("{} {}: {}", "✗".red(), path.display(), reason);
        }

        if !report.failures.is_empty() {
            bail!("{} staged file(s) could not be swapped in", report.failures.len());
        }
        Ok(())
    }
}
