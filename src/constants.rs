//! Global constants used throughout the updater.
//!
//! This module contains file names, intervals, buffer sizes and other
//! values shared by the configuration defaults and the update pipeline.
//! Defining them centrally keeps the on-device layout discoverable in one
//! place.

use std::time::Duration;

/// Directory holding the host application's persisted data on the SD card.
pub const DEFAULT_DATA_DIR: &str = "/mnt/SDCARD/Media/Music";

/// UpdatePlan written by the host application before it launches the updater.
pub const DEFAULT_PLAN_FILE: &str = ".miyoopod_update.json";

/// UpdateStatus written by the updater for the next host generation.
pub const DEFAULT_STATUS_FILE: &str = ".miyoopod_update_status";

/// Host settings file; only its `theme` key is read.
pub const DEFAULT_SETTINGS_FILE: &str = ".miyoopod_settings.json";

/// Relaunch entry point, relative to the installation root.
pub const DEFAULT_LAUNCHER: &str = "launch.sh";

/// Interpreter used to run the launcher on handoff.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Application executable name inside the installation root.
pub const DEFAULT_EXECUTABLE: &str = "MiyooPod";

/// The updater's own executable name inside the installation root.
pub const DEFAULT_UPDATER_EXECUTABLE: &str = "updater";

/// Application configuration file inside the installation root.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Flat assets directory inside the installation root.
pub const DEFAULT_ASSETS_DIR: &str = "assets";

/// Relative path prefixes of shared libraries mapped by the running process.
pub const DEFAULT_STAGED_PREFIXES: &[&str] = &["libs/"];

/// Name of the downloaded bundle inside the installation root.
pub const DEFAULT_DOWNLOAD_NAME: &str = ".update_download.zip";

/// Download artifact name used by older updater builds; removed on startup.
pub const LEGACY_DOWNLOAD_NAME: &str = ".update_tmp.zip";

/// Backup directory inside the installation root.
pub const DEFAULT_BACKUP_DIR: &str = ".miyoopod_backup";

/// Linux input device that reports the power button.
pub const DEFAULT_INPUT_DEVICE: &str = "/dev/input/event0";

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "MIYOOPOD_UPDATER_CONFIG";

/// Configuration file looked up next to the running executable.
pub const CONFIG_FILE_NAME: &str = "updater.toml";

/// Suffix of a staged replacement for an in-use resource.
pub const STAGED_SUFFIX: &str = "new";

/// Suffix of an in-flight write that has not been renamed yet.
pub const TEMP_SUFFIX: &str = "tmp";

/// Suffix given to the status file while it is being consumed.
pub const CONSUMED_SUFFIX: &str = "consumed";

/// Marker written into the backup root once every copy has succeeded.
pub const BACKUP_COMPLETE_MARKER: &str = ".complete";

/// Write-ahead list of files and directories created by the installer.
pub const INSTALL_JOURNAL_FILE: &str = ".journal";

/// Buffer used for streaming hashes, copies and archive extraction (64 KiB).
///
/// One buffer of this size is reused for every entry of an install so the
/// updater stays far below the device's memory ceiling.
pub const IO_BUFFER_SIZE: usize = 64 * 1024;

/// Foreground poll cadence for input and the result channel (33ms).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 33;

/// Fetch progress and cancellation polling cadence (200ms).
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 200;

/// How long a terminal message stays on screen before handoff (2s).
pub const DEFAULT_MESSAGE_PAUSE_MS: u64 = 2000;

/// How long the "Do not power off!" overlay stays visible after a press.
pub const POWER_WARNING_DURATION: Duration = Duration::from_secs(3);

/// Mode given to extracted files whose archive entry records none.
pub const DEFAULT_FILE_MODE: u32 = 0o644;
