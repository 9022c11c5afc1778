use super::CliConfig;
use crate::config::UpdaterConfig;
use crate::upgrade::UpdatePlan;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::io;
use std::process::Command;
use tracing::info;

/// Write an update plan, the way the host requests an update.
#[derive(Args, Debug)]
pub struct RequestCommand {
    /// Version being installed
    #[arg(long)]
    pub version: String,

    /// Where to download the bundle from
    #[arg(long)]
    pub url: String,

    /// Expected `sha256:<hex>` digest of the bundle; verification is skipped without one
    #[arg(long, default_value = "")]
    pub checksum: String,

    /// Expected bundle size in bytes, 0 if unknown
    #[arg(long, default_value_t = 0)]
    pub size: i64,

    /// Replace this process with the updater once the plan is written
    #[arg(long)]
    pub exec: bool,
}

impl RequestCommand {
    pub fn execute(self, cli: &CliConfig) -> Result<()> {
        let config = UpdaterConfig::load(cli.config_path.as_deref())?;
        let layout = config.layout()?;

        let plan = UpdatePlan {
            version: self.version,
            url: self.url,
            checksum: self.checksum,
            size: self.size,
        };
        plan.write(&layout.plan_path)
            .with_context(|| format!("Failed to write update plan {}", layout.plan_path.display()))?;
        println!("{} Update to {} requested", "✓".green(), plan.version.bold());

        if !self.exec {
            return Ok(());
        }

        let updater = layout.install_root.join(&layout.updater_executable);
        let mut cmd = Command::new(&updater);
        cmd.current_dir(&layout.install_root);
        if let Some(path) = &cli.config_path {
            cmd.arg("--config").arg(path);
        }

        info!("Launching {}", updater.display());
        let err = exec(&mut cmd);
        UpdatePlan::remove(&layout.plan_path);
        Err(err).with_context(|| format!("Failed to launch {}", updater.display()))
    }
}

#[cfg(unix)]
fn exec(cmd: &mut Command) -> io::Error {
    use std::os::unix::process::CommandExt;
    cmd.exec()
}

#[cfg(not(unix))]
fn exec(cmd: &mut Command) -> io::Error {
    match cmd.status() {
        Ok(status) => std::process::exit(status.code().unwrap_or(0)),
        Err(e) => e,
    }
}
