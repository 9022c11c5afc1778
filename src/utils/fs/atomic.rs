//! Atomic file write operations using a temp-and-rename strategy.
//!
//! Every function here leaves the destination either with its old content or
//! with the complete new content. An interruption leaves at most a `.tmp`
//! sibling behind, never a half-written destination.

use crate::constants::TEMP_SUFFIX;
use crate::utils::fs::dirs::ensure_parent_dir;
use crate::utils::fs::paths::with_suffix;
use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

/// Atomically writes bytes to a file using a write-then-rename strategy.
///
/// 1. Writes content to `<path>.tmp`
/// 2. Syncs the temporary file to disk
/// 3. Renames the temporary file over `path`
///
/// Parent directories are created if needed.
///
/// # Examples
///
/// ```rust,no_run
/// use miyoopod_updater::utils::fs::atomic_write;
/// use std::path::Path;
///
/// # fn example() -> anyhow::Result<()> {
/// atomic_write(Path::new(".miyoopod_update_status"), br#"{"success":true}"#)?;
/// # Ok(())
/// # }
/// ```
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    ensure_parent_dir(path)?;

    let temp_path = with_suffix(path, TEMP_SUFFIX);

    let written = (|| -> io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e)
            .with_context(|| format!("Failed to write temp file: {}", temp_path.display()));
    }

    fs::rename(&temp_path, path).with_context(|| {
        let _ = fs::remove_file(&temp_path);
        format!("Failed to rename temp file to: {}", path.display())
    })?;

    Ok(())
}

/// Atomically copies `src` over `dst`, carrying over the source permissions.
///
/// Content streams through `buf` into `<dst>.tmp`, which is synced and then
/// renamed into place.
pub fn atomic_copy(src: &Path, dst: &Path, buf: &mut [u8]) -> io::Result<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = with_suffix(dst, TEMP_SUFFIX);
    let result = (|| -> io::Result<u64> {
        let mut reader = fs::File::open(src)?;
        let permissions = reader.metadata()?.permissions();
        let mut writer = fs::File::create(&temp_path)?;
        let copied = copy_with_buffer(&mut reader, &mut writer, buf)?;
        writer.sync_all()?;
        drop(writer);
        fs::set_permissions(&temp_path, permissions)?;
        fs::rename(&temp_path, dst)?;
        Ok(copied)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Streams `reader` into `writer` through a caller-owned buffer.
///
/// The buffer is reused across calls so a whole extraction or backup runs
/// with a single allocation.
pub fn copy_with_buffer<R, W>(reader: &mut R, writer: &mut W, buf: &mut [u8]) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut total = 0u64;
    loop {
        let n = match reader.read(buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
}
