//! The update request handed from the host application to the updater.
//!
//! The host writes a small JSON document before it launches the updater:
//!
//! ```json
//! {"version": "1.2.0", "url": "https://example/bundle.zip", "checksum": "sha256:…", "size": 5242880}
//! ```
//!
//! `checksum` and `size` are optional. The updater reads the plan once and
//! deletes it once the attempt reaches a terminal outcome.

use crate::core::UpdateError;
use crate::utils::fs::{atomic_write, remove_file_if_exists};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

const SHA256_PREFIX: &str = "sha256:";
const SHA256_HEX_LEN: usize = 64;

/// A pending update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePlan {
    /// Target version, non-empty.
    pub version: String,
    /// Location of the bundle archive.
    pub url: String,
    /// Expected checksum, `sha256:<hex>` or bare hex. Empty skips verification.
    #[serde(default)]
    pub checksum: String,
    /// Expected size in bytes; zero or negative means unknown.
    #[serde(default)]
    pub size: i64,
}

impl UpdatePlan {
    /// Reads and validates the plan at `path`.
    pub fn load(path: &Path) -> Result<Self, UpdateError> {
        let content = fs::read_to_string(path).map_err(|source| UpdateError::PlanUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

        let plan: Self = serde_json::from_str(&content).map_err(|e| UpdateError::PlanInvalid {
            reason: e.to_string(),
        })?;
        plan.validate()?;

        debug!("Loaded update plan for version {} from {}", plan.version, path.display());
        Ok(plan)
    }

    /// Checks the fields a run depends on.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.version.trim().is_empty() {
            return Err(UpdateError::PlanInvalid {
                reason: "version is empty".to_string(),
            });
        }
        if self.url.trim().is_empty() {
            return Err(UpdateError::PlanInvalid {
                reason: "url is empty".to_string(),
            });
        }
        Checksum::parse(&self.checksum).map_err(|reason| UpdateError::PlanInvalid { reason })?;
        Ok(())
    }

    /// The expected checksum, or `None` when verification is to be skipped.
    #[must_use]
    pub fn checksum(&self) -> Option<Checksum> {
        Checksum::parse(&self.checksum).ok().flatten()
    }

    /// Expected size, or `None` when unknown.
    #[must_use]
    pub fn expected_size(&self) -> Option<u64> {
        u64::try_from(self.size).ok().filter(|size| *size > 0)
    }

    /// Validates and atomically writes the plan to `path`.
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize update plan")?;
        atomic_write(path, &json)
    }

    /// Deletes the plan file, logging instead of failing.
    pub fn remove(path: &Path) {
        match remove_file_if_exists(path) {
            Ok(true) => debug!("Removed update plan {}", path.display()),
            Ok(false) => {}
            Err(e) => warn!("Failed to remove update plan {}: {}", path.display(), e),
        }
    }
}

/// A SHA-256 digest, stored as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum(String);

impl Checksum {
    /// Parses `sha256:<hex>` or bare `<hex>`.
    ///
    /// Returns `Ok(None)` for an empty value and `Err` with a reason for
    /// anything that is not 64 hex digits.
    pub fn parse(value: &str) -> Result<Option<Self>, String> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(None);
        }

        let hex = match value.get(..SHA256_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(SHA256_PREFIX) => {
                &value[SHA256_PREFIX.len()..]
            }
            _ => value,
        };

        if hex.len() != SHA256_HEX_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("unsupported checksum: {value}"));
        }

        Ok(Some(Self(hex.to_ascii_lowercase())))
    }

    /// Builds a checksum from a raw digest.
    #[must_use]
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    /// Lowercase hex without prefix.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SHA256_PREFIX}{}", self.0)
    }
}
