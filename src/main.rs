//! MiyooPod updater binary entry point.

use anyhow::Result;
use clap::Parser;
use miyoopod_updater::cli;
use miyoopod_updater::config::UpdaterConfig;
use miyoopod_updater::core::error::user_friendly_error;
use miyoopod_updater::utils::logger;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let config = cli.build_config();

    // The log file location lives in the configuration; a broken
    // configuration is reported by the command itself
    let log_file = UpdaterConfig::load(config.config_path.as_deref())
        .ok()
        .and_then(|c| c.log_path().ok().flatten());
    if let Err(e) = logger::init(&config.log_level, log_file.as_deref()) {
        eprintln!("Warning: logging disabled: {e:#}");
    }

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute_with_config(config).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}
