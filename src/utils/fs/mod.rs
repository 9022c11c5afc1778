//! File system utilities for crash-safe file operations
//!
//! The updater runs on a removable SD card that can lose power at any
//! moment, so every write that matters goes through a temp-and-rename step
//! and every path taken from an archive goes through a lexical guard.
//!
//! # Examples
//!
//! ```rust,no_run
//! use miyoopod_updater::utils::fs::{atomic_write, is_safe_path};
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! atomic_write(Path::new("/mnt/SDCARD/App/MiyooPod/config.json"), b"{}")?;
//! assert!(is_safe_path(Path::new("/mnt/SDCARD/App/MiyooPod"), Path::new("libs/audio.so")));
//! # Ok(())
//! # }
//! ```

pub mod atomic;
pub mod dirs;
pub mod paths;

pub use atomic::{atomic_copy, atomic_write, copy_with_buffer};
pub use dirs::{ensure_parent_dir, remove_file_if_exists};
pub use paths::{is_safe_path, normalize_path, strip_suffix, to_slash, with_suffix};
