//! Error handling for the updater
//!
//! Two layers of errors live here:
//! - [`UpdateError`] and its component errors ([`FetchError`],
//!   [`BackupError`], [`InstallError`]) describe why an update attempt
//!   failed. The `Display` text of an [`UpdateError`] is exactly what gets
//!   persisted in the status record, so it is written for whoever reads the
//!   host's log after relaunch.
//! - [`ErrorContext`] wraps any error surfaced by a CLI command with optional
//!   details and a suggestion, rendered with terminal colors.
//!
//! # Examples
//!
//! ```rust,no_run
//! use miyoopod_updater::core::{UpdateError, user_friendly_error};
//!
//! let err = UpdateError::ChecksumMismatch {
//!     expected: "sha256:00".into(),
//!     actual: "sha256:ff".into(),
//! };
//! assert_eq!(err.to_string(), "checksum mismatch");
//! assert_eq!(err.user_message(), "Checksum mismatch!");
//!
//! user_friendly_error(anyhow::Error::from(err)).display();
//! ```

use colored::Colorize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Terminal failure of an update attempt.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// The plan file could not be read.
    #[error("Failed to read update info: {source}")]
    PlanUnreadable {
        /// Plan file location
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The plan file was read but its content is unusable.
    #[error("Failed to parse update info: {reason}")]
    PlanInvalid {
        /// What was wrong with it
        reason: String,
    },

    /// The download did not complete.
    #[error("Download failed: {0}")]
    FetchFailed(FetchError),

    /// The user cancelled the download.
    #[error("cancelled")]
    Cancelled,

    /// The downloaded bundle does not match the expected checksum.
    #[error("checksum mismatch")]
    ChecksumMismatch {
        /// Checksum from the plan
        expected: String,
        /// Checksum of the downloaded file
        actual: String,
    },

    /// The downloaded bundle could not be read for hashing.
    #[error("Checksum error: {0}")]
    ChecksumError(#[source] io::Error),

    /// The pre-install snapshot could not be completed.
    #[error("Backup failed: {0}")]
    BackupFailed(#[from] BackupError),

    /// Extraction failed; the installation has been rolled back.
    #[error("Extract failed: {0}")]
    InstallFailed(#[from] InstallError),

    /// Rollback could not restore everything.
    #[error("Rollback incomplete: {failures} path(s) could not be restored")]
    RollbackPartial {
        /// Number of paths that failed
        failures: usize,
    },

    /// A background stage stopped without delivering a result.
    #[error("{stage} task ended without a result")]
    TaskAborted {
        /// Stage that was running
        stage: &'static str,
    },
}

impl UpdateError {
    /// Short text for the progress screen.
    ///
    /// Never contains paths or OS error strings; the full detail goes to the
    /// status record instead.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::PlanUnreadable { .. } | Self::PlanInvalid { .. } => "Update info unavailable",
            Self::FetchFailed(_) => "Download failed",
            Self::Cancelled => "Update cancelled",
            Self::ChecksumMismatch { .. } => "Checksum mismatch!",
            Self::ChecksumError(_) => "Checksum error",
            Self::BackupFailed(_) => "Backup failed",
            Self::InstallFailed(_) => "Install failed",
            Self::RollbackPartial { .. } => "Restore incomplete",
            Self::TaskAborted { .. } => "Update failed",
        }
    }

    /// Whether this outcome was requested by the user rather than a fault.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<FetchError> for UpdateError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => Self::Cancelled,
            other => Self::FetchFailed(other),
        }
    }
}

/// Failure of the external transfer step.
#[derive(Error, Debug)]
pub enum FetchError {
    /// None of the configured tools could be started.
    #[error("no download tool available")]
    NoTool,

    /// The tool ran but did not produce a complete file.
    #[error("{tool} {reason}")]
    Failed {
        /// Program name
        tool: String,
        /// Exit status or other explanation
        reason: String,
    },

    /// The cancel flag was observed while the transfer was running.
    #[error("cancelled")]
    Cancelled,

    /// Local filesystem error around the transfer.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FetchError {
    pub(crate) fn exited(tool: &str, status: ExitStatus) -> Self {
        Self::Failed {
            tool: tool.to_string(),
            reason: format!("exited with {status}"),
        }
    }
}

/// Failure while snapshotting the installation.
#[derive(Error, Debug)]
pub enum BackupError {
    /// A stale backup root could not be cleared or the new one created.
    #[error("cannot prepare {path}: {source}")]
    Prepare {
        /// Backup root
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// One path of the backup set could not be copied.
    #[error("{path}: {source}")]
    Copy {
        /// Path relative to the installation root
        path: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The completion marker could not be written.
    #[error("cannot write completion marker: {source}")]
    Marker {
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
}

/// Failure while extracting the bundle.
#[derive(Error, Debug)]
pub enum InstallError {
    /// The bundle is not a readable zip archive.
    #[error("cannot open archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// A single entry could not be installed.
    #[error("{path}: {source}")]
    Entry {
        /// Entry path relative to the installation root
        path: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The install journal could not be persisted.
    #[error("cannot write install journal: {0}")]
    Journal(#[source] io::Error),
}

impl InstallError {
    /// Relative path of the entry that failed, if the failure was per-entry.
    #[must_use]
    pub fn entry_path(&self) -> Option<&str> {
        match self {
            Self::Entry { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Configuration could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly named configuration file does not exist.
    #[error("Configuration file not found: {}", path.display())]
    NotFound {
        /// Path that was looked up
        path: PathBuf,
    },

    /// The configuration file is not valid TOML for [`crate::config::UpdaterConfig`].
    #[error("Invalid configuration in {}: {reason}", path.display())]
    Invalid {
        /// Offending file
        path: PathBuf,
        /// Parser message
        reason: String,
    },
}

/// User-facing wrapper around a CLI failure.
///
/// Carries the error itself plus optional details and a suggestion, and
/// knows how to print all three to stderr with colors.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: anyhow::Error,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error
    ///
    /// Suggestions are actionable steps, displayed in green.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error, displayed in yellow.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors
    pub fn display(&self) {
        eprintln!("{}: {:#}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

/// Converts any error into an [`ErrorContext`] with a suggestion where one
/// is known.
///
/// Recognizes [`ConfigError`], [`UpdateError`] and raw I/O permission and
/// not-found errors anywhere in the chain.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(config_error) = error.downcast_ref::<ConfigError>() {
        let suggestion = match config_error {
            ConfigError::NotFound { .. } => format!(
                "Check the --config flag and the {} environment variable",
                crate::constants::CONFIG_ENV_VAR
            ),
            ConfigError::Invalid { .. } => {
                "Check the TOML syntax and field names of the configuration file".to_string()
            }
        };
        return ErrorContext::new(error).with_suggestion(suggestion);
    }

    if let Some(update_error) = error.downcast_ref::<UpdateError>() {
        let details = update_error.user_message();
        return match update_error {
            UpdateError::PlanUnreadable { .. } | UpdateError::PlanInvalid { .. } => {
                ErrorContext::new(error)
                    .with_details(details)
                    .with_suggestion("Write a new request with `updater request`")
            }
            _ => ErrorContext::new(error).with_details(details),
        };
    }

    let io_kind = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<io::Error>())
        .map(io::Error::kind);

    match io_kind {
        Some(io::ErrorKind::PermissionDenied) => ErrorContext::new(error)
            .with_suggestion("Check that the installation directory is writable")
            .with_details("The SD card may be mounted read-only"),
        Some(io::ErrorKind::NotFound) => ErrorContext::new(error)
            .with_suggestion("Check that the file or directory exists and the path is correct"),
        _ => ErrorContext::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_for_checksum_mismatch() {
        let err = UpdateError::ChecksumMismatch {
            expected: "sha256:aa".into(),
            actual: "sha256:bb".into(),
        };
        assert_eq!(err.to_string(), "checksum mismatch");
    }

    #[test]
    fn test_fetch_cancel_maps_to_cancelled() {
        let err: UpdateError = FetchError::Cancelled.into();
        assert!(err.is_cancelled());

        let err: UpdateError = FetchError::NoTool.into();
        assert!(matches!(err, UpdateError::FetchFailed(FetchError::NoTool)));
        assert_eq!(err.to_string(), "Download failed: no download tool available");
    }

    #[test]
    fn test_install_error_names_entry() {
        let err = UpdateError::from(InstallError::Entry {
            path: "assets/x.ttf".into(),
            source: io::Error::other("disk full"),
        });
        assert_eq!(err.to_string(), "Extract failed: assets/x.ttf: disk full");
        assert_eq!(err.user_message(), "Install failed");
    }

    #[test]
    fn test_user_messages_have_no_detail() {
        let err = UpdateError::PlanUnreadable {
            path: PathBuf::from("/secret/path"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(!err.user_message().contains("/secret"));
    }

    #[test]
    fn test_user_friendly_error_config() {
        let ctx = user_friendly_error(
            ConfigError::NotFound {
                path: PathBuf::from("missing.toml"),
            }
            .into(),
        );
        assert!(ctx.suggestion.is_some());
        assert!(ctx.to_string().contains("missing.toml"));
    }

    #[test]
    fn test_user_friendly_error_io_in_chain() {
        let err = anyhow::Error::from(io::Error::from(io::ErrorKind::PermissionDenied))
            .context("Failed to write update request");
        let ctx = user_friendly_error(err);
        assert!(ctx.details.is_some());
        assert!(ctx.to_string().starts_with("Failed to write update request"));
    }
}
