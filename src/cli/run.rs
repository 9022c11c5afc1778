//! The update run the launcher starts when an update is pending.

use super::CliConfig;
use crate::config::UpdaterConfig;
use crate::ui::{
    LogDisplay, Palette, PowerButtonMonitor, PowerWarning, ProgressDisplay, TerminalDisplay,
    load_theme_name,
};
use crate::upgrade::Updater;
use anyhow::{Context, Result};
use clap::Args;
use std::io::{self, IsTerminal};
use tracing::{debug, info, warn};

/// Execute the pending update plan.
#[derive(Args, Debug, Default)]
pub struct RunCommand {
    /// Exit after the run instead of launching the application
    #[arg(long)]
    pub no_handoff: bool,
}

impl RunCommand {
    /// Runs the update and replaces the process with the launcher.
    ///
    /// Only returns on its own when the handoff could not be performed, or
    /// with `--no-handoff`. In that case a failed update is an error; a
    /// cancelled one is not.
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let config = UpdaterConfig::load(cli.config_path.as_deref())?;
        let layout = config.layout()?;
        debug!("Installation root: {}", layout.install_root.display());

        let power = PowerWarning::new();
        // Detached; it ends with the process
        let _monitor = PowerButtonMonitor::start(&layout.input_device, power.clone());

        let display = select_display(cli, &layout.settings_path);
        let completion = Updater::new(config, display)?.with_power_warning(power).run().await;

        match &completion.outcome {
            Ok(version) => info!("Update to {} complete", version),
            Err(e) if e.is_cancelled() => info!("Update cancelled"),
            Err(e) => warn!("Update failed: {}", e),
        }

        if self.no_handoff {
            return match completion.outcome {
                Err(e) if !e.is_cancelled() => Err(e.into()),
                _ => Ok(()),
            };
        }

        let launcher = completion.handoff.launcher().to_path_buf();
        let err = completion.handoff.exec();
        Err(err).with_context(|| format!("Failed to launch {}", launcher.display()))
    }
}

fn select_display(cli: &CliConfig, settings_path: &std::path::Path) -> Box<dyn ProgressDisplay + Send> {
    if cli.no_progress || !io::stderr().is_terminal() {
        return Box::new(LogDisplay::new());
    }
    let theme = load_theme_name(settings_path);
    Box::new(TerminalDisplay::new(Palette::for_theme(theme.as_deref())))
}
