use crate::constants::IO_BUFFER_SIZE;
use crate::upgrade::plan::Checksum;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, info, warn};

/// Outcome of checking a download against its expected checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// No checksum was supplied, so nothing was hashed.
    Skipped,
    Matched,
    Mismatch {
        /// Digest of the file on disk
        actual: Checksum,
    },
}

impl Verification {
    /// Skipped counts as verified.
    #[must_use]
    pub const fn is_verified(&self) -> bool {
        !matches!(self, Self::Mismatch { .. })
    }
}

/// Verifies downloaded bundles with a streaming SHA-256.
///
/// Files are hashed through a fixed 64 KiB buffer, never read whole, so a
/// bundle of any size fits in the device's memory budget.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Compute the SHA-256 of a file.
    ///
    /// `progress(hashed, total)` is called after every buffer.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use miyoopod_updater::upgrade::verification::ChecksumVerifier;
    /// use std::path::Path;
    ///
    /// # fn example() -> std::io::Result<()> {
    /// let checksum = ChecksumVerifier::compute_sha256(Path::new(".update_download.zip"), |_, _| {})?;
    /// println!("{checksum}"); // sha256:…
    /// # Ok(())
    /// # }
    /// ```
    pub fn compute_sha256<F>(path: &Path, mut progress: F) -> io::Result<Checksum>
    where
        F: FnMut(u64, u64),
    {
        debug!("Computing SHA256 checksum for: {}", path.display());

        let mut file = File::open(path)?;
        let total = file.metadata()?.len();
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; IO_BUFFER_SIZE];
        let mut hashed = 0u64;

        loop {
            let n = match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
            hashed += n as u64;
            progress(hashed, total);
        }

        Ok(Checksum::from_digest(&hasher.finalize()))
    }

    /// Verify a file against an optional expected checksum.
    ///
    /// A missing checksum skips hashing and counts as verified. A mismatch
    /// is a normal outcome, not an error; only read failures are errors.
    pub fn check<F>(path: &Path, expected: Option<&Checksum>, progress: F) -> io::Result<Verification>
    where
        F: FnMut(u64, u64),
    {
        let Some(expected) = expected else {
            warn!("No checksum supplied, skipping verification of {}", path.display());
            return Ok(Verification::Skipped);
        };

        info!("Verifying checksum for: {}", path.display());
        let actual = Self::compute_sha256(path, progress)?;

        if actual == *expected {
            info!("Checksum verification successful");
            Ok(Verification::Matched)
        } else {
            warn!("Checksum mismatch: expected {}, got {}", expected, actual);
            Ok(Verification::Mismatch { actual })
        }
    }

    /// [`check`](Self::check) reduced to a boolean.
    pub fn verify(path: &Path, expected: Option<&Checksum>) -> io::Result<bool> {
        Self::check(path, expected, |_, _| {}).map(|v| v.is_verified())
    }
}
