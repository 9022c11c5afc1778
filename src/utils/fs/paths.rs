//! Path utilities for normalization, traversal checks and suffix handling.
//!
//! Everything here is lexical: no function touches the filesystem, so the
//! results are the same whether or not the paths exist yet.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Normalizes a path by resolving `.` and `..` components.
///
/// Performs logical resolution without accessing the filesystem; symbolic
/// links are not followed.
///
/// # Examples
///
/// ```rust,no_run
/// use miyoopod_updater::utils::fs::normalize_path;
/// use std::path::{Path, PathBuf};
///
/// let path = Path::new("/mnt/SDCARD/App/./libs/../assets");
/// assert_eq!(normalize_path(path), PathBuf::from("/mnt/SDCARD/App/assets"));
/// ```
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                components.pop();
            }
            c => components.push(c),
        }
    }

    components.iter().collect()
}

/// Checks that `path` stays lexically under `base`.
///
/// Relative paths are joined onto `base` before normalization. A relative
/// path with more `..` components than it has depth is rejected even though
/// normalization would clamp it, since an archive entry like
/// `../../etc/passwd` must never be treated as harmless.
///
/// # Examples
///
/// ```rust,no_run
/// use miyoopod_updater::utils::fs::is_safe_path;
/// use std::path::Path;
///
/// let base = Path::new("/mnt/SDCARD/App/MiyooPod");
/// assert!(is_safe_path(base, Path::new("assets/ui_font.ttf")));
/// assert!(!is_safe_path(base, Path::new("../../../etc/passwd")));
/// assert!(!is_safe_path(base, Path::new("/etc/passwd")));
/// ```
#[must_use]
pub fn is_safe_path(base: &Path, path: &Path) -> bool {
    if !path.is_absolute() && escapes_upward(path) {
        return false;
    }

    let normalized_base = normalize_path(base);
    let normalized_path = if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base.join(path))
    };

    normalized_path.starts_with(normalized_base)
}

fn escapes_upward(path: &Path) -> bool {
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                if depth == 0 {
                    return true;
                }
                depth -= 1;
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return true,
        }
    }
    false
}

/// Appends `.suffix` to the final component of `path`.
///
/// Unlike [`Path::with_extension`], the existing extension is kept:
/// `libs/audio.so` becomes `libs/audio.so.new`.
#[must_use]
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Returns `path` without a trailing `.suffix`, or `None` if it has none.
#[must_use]
pub fn strip_suffix(path: &Path, suffix: &str) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(suffix)?.strip_suffix('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(path.with_file_name(stem))
}

/// Converts a relative path into the `/`-separated form used by archives
/// and configuration prefixes.
#[must_use]
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
