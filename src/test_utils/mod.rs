//! Test utilities for the updater
//!
//! Helpers for unit and integration tests: update bundles built in memory,
//! a throwaway installation with a local "server", a display that records
//! what the update screen would have shown, and tree snapshots for
//! before/after comparisons.
//!
//! # Example
//!
//! ```rust,no_run
//! use miyoopod_updater::test_utils::{InstallFixture, RecordingDisplay, v2_bundle};
//! use miyoopod_updater::upgrade::Updater;
//!
//! # async fn example() {
//! let fixture = InstallFixture::with_v1();
//! fixture.plan_update("2.0.0", &v2_bundle());
//!
//! let updater = Updater::new(fixture.config(), RecordingDisplay::new()).unwrap();
//! let completion = updater.run().await;
//! assert_eq!(completion.outcome.unwrap(), "2.0.0");
//! # }
//! ```

pub mod bundle;
pub mod display;
pub mod environment;

pub use bundle::BundleBuilder;
pub use display::{Frame, RecordingDisplay};
pub use environment::{InstallFixture, V1_FILES, local_fetch_tool, v2_bundle};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. Uses `level` if given, otherwise
/// `RUST_LOG`; with neither, tests run silent.
///
/// ```bash
/// RUST_LOG=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// Contents of every file below `root`, keyed by slash-separated relative
/// path. Directories only show up through the files they contain.
pub fn snapshot_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap();
            (crate::utils::fs::to_slash(rel), fs::read(e.path()).unwrap())
        })
        .collect()
}

/// Relative paths of every directory below `root`.
pub fn snapshot_dirs(root: &Path) -> Vec<String> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
        .map(|e| crate::utils::fs::to_slash(e.path().strip_prefix(root).unwrap()))
        .collect()
}
