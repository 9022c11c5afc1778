//! Over-the-air update of a MiyooPod installation.
//!
//! The host application decides that an update is available, writes an
//! [`UpdatePlan`] next to its settings and launches the updater. The updater
//! runs the plan to completion, leaves an [`UpdateStatus`] record for the
//! next generation of the host, and replaces itself with the host launcher.
//!
//! # Architecture Overview
//!
//! ## Core Components
//!
//! - **[`Updater`]**: Drives one run through its states and owns the display loop
//! - **[`fetch::Fetcher`]**: Downloads with an external tool, cancellable, with progress
//! - **[`verification::ChecksumVerifier`]**: Streams SHA-256 over the downloaded bundle
//! - **[`backup::BackupManager`]**: Copies everything the bundle will overwrite
//! - **[`install::Installer`]**: Extracts the bundle, staging files that are in use
//! - **[`rollback::RollbackManager`]**: Undoes a failed extraction from backup and journal
//! - **[`status::StatusReporter`]**: The one-shot status record handed to the host
//! - **[`staged::StagedSwap`]**: Moves staged `.new` files into place after exit
//!
//! ## Update Process Flow
//!
//! ```text
//! 1. Prepare
//!    ├── Remove stale downloads
//!    └── Recover from an interrupted earlier run
//!
//! 2. Download (cancellable with B or MENU)
//!    └── Fetch tool writes <download>.tmp, renamed when complete
//!
//! 3. Verify
//!    └── SHA-256 against the plan, skipped when the plan has none
//!
//! 4. Install
//!    ├── Back up every file the bundle overwrites
//!    ├── Extract, journaling each created file and directory
//!    └── On failure: restore backup, remove journaled paths
//!
//! 5. Finish
//!    ├── Delete download, backup and plan
//!    ├── Write the status record (not on cancel)
//!    └── exec the host launcher
//! ```
//!
//! # Safety Mechanisms
//!
//! - The backup carries a completion marker; a backup without one is never
//!   restored from
//! - The install journal is written ahead of each change, so a run that died
//!   mid-extraction is rolled back on the next start
//! - Every file is written to a temporary name and renamed into place
//! - Archive entries that would resolve outside the installation root are
//!   skipped
//! - Files the running updater has mapped are staged as `<name>.new` rather
//!   than overwritten

pub mod backup;
pub mod fetch;
pub mod handoff;
pub mod install;
pub mod plan;
pub mod rollback;
pub mod self_updater;
pub mod staged;
pub mod status;
pub mod task;
pub mod verification;


pub use backup::{BackupManager, BackupSet};
pub use fetch::{CancelFlag, FetchTool, Fetcher};
pub use handoff::Handoff;
pub use install::{InUseResources, InstallJournal, Installer};
pub use plan::{Checksum, UpdatePlan};
pub use rollback::{RollbackManager, RollbackReport};
pub use self_updater::{Completion, InstallPhase, UpdateState, Updater};
pub use staged::{StagedSwap, SwapReport};
pub use status::{StatusReporter, UpdateStatus};
pub use verification::ChecksumVerifier;
