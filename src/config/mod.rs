//! Updater configuration
//!
//! Every key is optional; a missing file means the built-in defaults, which
//! match the production layout on the device. The file is TOML:
//!
//! ```toml
//! install_root = "/mnt/SDCARD/App/MiyooPod"
//! data_dir = "/mnt/SDCARD/Media/Music"
//! staged_prefixes = ["libs/"]
//! log_file = "updater.log"
//!
//! [[fetch_tools]]
//! program = "curl"
//! args = ["-k", "-s", "-L", "-o", "{output}", "{url}"]
//! ```
//!
//! # Lookup order
//!
//! 1. The `--config` flag
//! 2. The `MIYOOPOD_UPDATER_CONFIG` environment variable
//! 3. `updater.toml` next to the running executable (optional)
//! 4. Built-in defaults
//!
//! An explicitly named file that does not exist is an error. String paths
//! support `~` and `$VAR` expansion; relative paths resolve against the
//! installation root.

use crate::constants::{
    CONFIG_ENV_VAR, CONFIG_FILE_NAME, DEFAULT_ASSETS_DIR, DEFAULT_BACKUP_DIR, DEFAULT_CONFIG_FILE,
    DEFAULT_DATA_DIR, DEFAULT_DOWNLOAD_NAME, DEFAULT_EXECUTABLE, DEFAULT_INPUT_DEVICE,
    DEFAULT_LAUNCHER, DEFAULT_MESSAGE_PAUSE_MS, DEFAULT_PLAN_FILE, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_PROGRESS_INTERVAL_MS, DEFAULT_SETTINGS_FILE, DEFAULT_SHELL, DEFAULT_STAGED_PREFIXES,
    DEFAULT_STATUS_FILE, DEFAULT_UPDATER_EXECUTABLE, LEGACY_DOWNLOAD_NAME,
};
use crate::core::ConfigError;
use crate::upgrade::fetch::FetchTool;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Raw configuration as read from `updater.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpdaterConfig {
    /// Application installation directory. Defaults to the working directory,
    /// which is where the launcher starts the updater.
    pub install_root: Option<String>,
    /// Host data directory holding the plan, status and settings files.
    pub data_dir: String,
    pub plan_file: String,
    pub status_file: String,
    pub settings_file: String,
    /// Relaunch entry point, relative to the installation root.
    pub launcher: String,
    pub shell: String,
    pub executable: String,
    pub updater_executable: String,
    pub config_file: String,
    pub assets_dir: String,
    /// Relative path prefixes whose files are always staged as `.new`.
    pub staged_prefixes: Vec<String>,
    pub download_name: String,
    pub backup_dir: String,
    pub poll_interval_ms: u64,
    pub progress_interval_ms: u64,
    pub message_pause_ms: u64,
    pub input_device: String,
    /// Transfer tools, tried in order until one starts.
    pub fetch_tools: Vec<FetchTool>,
    /// Write logs here instead of stderr.
    pub log_file: Option<String>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            install_root: None,
            data_dir: DEFAULT_DATA_DIR.to_string(),
            plan_file: DEFAULT_PLAN_FILE.to_string(),
            status_file: DEFAULT_STATUS_FILE.to_string(),
            settings_file: DEFAULT_SETTINGS_FILE.to_string(),
            launcher: DEFAULT_LAUNCHER.to_string(),
            shell: DEFAULT_SHELL.to_string(),
            executable: DEFAULT_EXECUTABLE.to_string(),
            updater_executable: DEFAULT_UPDATER_EXECUTABLE.to_string(),
            config_file: DEFAULT_CONFIG_FILE.to_string(),
            assets_dir: DEFAULT_ASSETS_DIR.to_string(),
            staged_prefixes: DEFAULT_STAGED_PREFIXES.iter().map(|p| (*p).to_string()).collect(),
            download_name: DEFAULT_DOWNLOAD_NAME.to_string(),
            backup_dir: DEFAULT_BACKUP_DIR.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            message_pause_ms: DEFAULT_MESSAGE_PAUSE_MS,
            input_device: DEFAULT_INPUT_DEVICE.to_string(),
            fetch_tools: FetchTool::defaults(),
            log_file: None,
        }
    }
}

impl UpdaterConfig {
    /// Loads configuration following the documented lookup order.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        if let Ok(value) = env::var(CONFIG_ENV_VAR) {
            if !value.is_empty() {
                let path = expand_path(&value)?;
                return Self::load_from(&path);
            }
        }

        match Self::default_path() {
            Some(path) if path.is_file() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Loads configuration from a specific file, which must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content).map_err(|e| {
            ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: e.message().to_string(),
            }
            .into()
        })
    }

    /// `updater.toml` beside the running executable.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        let exe = env::current_exe().ok()?;
        Some(exe.parent()?.join(CONFIG_FILE_NAME))
    }

    /// Resolves every configured location into absolute paths.
    pub fn layout(&self) -> Result<UpdateLayout> {
        let install_root = match &self.install_root {
            Some(root) => absolute(&expand_path(root)?)?,
            None => env::current_dir().context("Failed to determine working directory")?,
        };
        let data_dir = install_root.join(expand_path(&self.data_dir)?);

        Ok(UpdateLayout {
            backup_root: install_root.join(&self.backup_dir),
            download_path: install_root.join(&self.download_name),
            legacy_download_path: install_root.join(LEGACY_DOWNLOAD_NAME),
            plan_path: data_dir.join(&self.plan_file),
            status_path: data_dir.join(&self.status_file),
            settings_path: data_dir.join(&self.settings_file),
            launcher: install_root.join(expand_path(&self.launcher)?),
            shell: expand_path(&self.shell)?,
            input_device: expand_path(&self.input_device)?,
            executable: self.executable.clone(),
            updater_executable: self.updater_executable.clone(),
            config_file: self.config_file.clone(),
            assets_dir: self.assets_dir.clone(),
            backup_dir: self.backup_dir.trim_end_matches('/').to_string(),
            staged_prefixes: self.staged_prefixes.clone(),
            install_root,
        })
    }

    /// Resolved log file location, if file logging is configured.
    pub fn log_path(&self) -> Result<Option<PathBuf>> {
        let Some(log_file) = &self.log_file else {
            return Ok(None);
        };
        let path = expand_path(log_file)?;
        if path.is_absolute() {
            return Ok(Some(path));
        }
        Ok(Some(self.layout()?.install_root.join(path)))
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    #[must_use]
    pub const fn message_pause(&self) -> Duration {
        Duration::from_millis(self.message_pause_ms)
    }
}

/// Every location the update pipeline touches, resolved to absolute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateLayout {
    pub install_root: PathBuf,
    pub backup_root: PathBuf,
    pub download_path: PathBuf,
    pub legacy_download_path: PathBuf,
    pub plan_path: PathBuf,
    pub status_path: PathBuf,
    pub settings_path: PathBuf,
    pub launcher: PathBuf,
    pub shell: PathBuf,
    pub input_device: PathBuf,
    pub executable: String,
    pub updater_executable: String,
    pub config_file: String,
    pub assets_dir: String,
    /// Backup directory name relative to the installation root
    pub backup_dir: String,
    pub staged_prefixes: Vec<String>,
}

impl UpdateLayout {
    /// Absolute location of an installation-relative path.
    #[must_use]
    pub fn target(&self, rel: &str) -> PathBuf {
        self.install_root.join(rel)
    }

    /// Whether a `/`-separated relative path lies inside the backup directory.
    #[must_use]
    pub fn is_backup_path(&self, rel: &str) -> bool {
        rel == self.backup_dir
            || rel
                .strip_prefix(self.backup_dir.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

fn expand_path(value: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(value)
        .with_context(|| format!("Failed to expand path: {value}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(env::current_dir().context("Failed to determine working directory")?.join(path))
}
