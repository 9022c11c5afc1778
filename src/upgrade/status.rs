//! The outcome record passed from one process generation to the next.
//!
//! The updater writes it just before handing off; the host reads and deletes
//! it on its next launch to show "Updated to vX!" or the failure reason.

use crate::constants::CONSUMED_SUFFIX;
use crate::utils::fs::{atomic_write, with_suffix};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Terminal outcome of one update attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub success: bool,
    /// Version that was attempted
    pub version: String,
    /// Failure detail; empty on success
    #[serde(default)]
    pub error: String,
}

impl UpdateStatus {
    #[must_use]
    pub fn succeeded(version: impl Into<String>) -> Self {
        Self {
            success: true,
            version: version.into(),
            error: String::new(),
        }
    }

    #[must_use]
    pub fn failed(version: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            version: version.into(),
            error: error.into(),
        }
    }

    /// The one-line message the host shows after relaunch.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.success {
            format!("Updated to v{}!", self.version)
        } else {
            format!("Update failed: {}", self.error)
        }
    }
}

/// Reads and writes the status file.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    path: PathBuf,
}

impl StatusReporter {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replaces any previous record.
    pub fn write_status(&self, status: &UpdateStatus) -> anyhow::Result<()> {
        let json = serde_json::to_vec(status).context("Failed to serialize update status")?;
        atomic_write(&self.path, &json)?;
        info!(
            "Wrote update status (success: {}, version: {}) to {}",
            status.success,
            status.version,
            self.path.display()
        );
        Ok(())
    }

    /// Returns the record once; every later call returns `None`.
    ///
    /// The file is first renamed to `<status>.consumed`, so a crash anywhere
    /// after that point cannot make a later generation see the record
    /// again. A leftover `.consumed` file from such a crash is removed. An
    /// unparsable record is logged and treated as absent.
    pub fn read_and_consume_status(&self) -> io::Result<Option<UpdateStatus>> {
        let consumed = with_suffix(&self.path, CONSUMED_SUFFIX);

        match fs::rename(&self.path, &consumed) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if consumed.exists() {
                    debug!("Removing status left by an interrupted read");
                    fs::remove_file(&consumed)?;
                }
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let content = fs::read_to_string(&consumed);
        fs::remove_file(&consumed)?;

        match serde_json::from_str(&content?) {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                warn!("Ignoring unreadable update status: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_success_record_format() {
        let temp = TempDir::new().unwrap();
        let reporter = StatusReporter::new(temp.path().join("update_status.json"));

        reporter.write_status(&UpdateStatus::succeeded("1.2.0")).unwrap();

        let raw = fs::read_to_string(reporter.path()).unwrap();
        assert_eq!(raw, r#"{"success":true,"version":"1.2.0","error":""}"#);
    }

    #[test]
    fn test_consumed_exactly_once() {
        let temp = TempDir::new().unwrap();
        let reporter = StatusReporter::new(temp.path().join("update_status.json"));
        let status = UpdateStatus::failed("1.2.0", "checksum mismatch");
        reporter.write_status(&status).unwrap();

        assert_eq!(reporter.read_and_consume_status().unwrap(), Some(status));
        assert_eq!(reporter.read_and_consume_status().unwrap(), None);
        assert!(!reporter.path().exists());
    }

    #[test]
    fn test_crash_after_rename_is_not_replayed() {
        let temp = TempDir::new().unwrap();
        let reporter = StatusReporter::new(temp.path().join("update_status.json"));
        let consumed = temp.path().join("update_status.json.consumed");
        fs::write(&consumed, r#"{"success":true,"version":"1","error":""}"#).unwrap();

        assert_eq!(reporter.read_and_consume_status().unwrap(), None);
        assert!(!consumed.exists());
    }

    #[test]
    fn test_garbage_is_absent() {
        let temp = TempDir::new().unwrap();
        let reporter = StatusReporter::new(temp.path().join("update_status.json"));
        fs::write(reporter.path(), "{garbage").unwrap();

        assert_eq!(reporter.read_and_consume_status().unwrap(), None);
        assert!(!reporter.path().exists());
    }

    #[test]
    fn test_missing_error_field_defaults() {
        let status: UpdateStatus =
            serde_json::from_str(r#"{"success":true,"version":"2.0.0"}"#).unwrap();
        assert_eq!(status.error, "");
        assert_eq!(status.summary(), "Updated to v2.0.0!");
        assert_eq!(
            UpdateStatus::failed("2.0.0", "Download failed: x").summary(),
            "Update failed: Download failed: x"
        );
    }
}
