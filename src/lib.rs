//! MiyooPod updater - over-the-air self-update for a handheld music player
//!
//! The host application cannot replace its own files while it runs, so it
//! writes an update plan and hands control to this updater. The updater
//! downloads the bundle, verifies it, backs up what it is about to
//! overwrite, extracts it, and finally replaces itself with the
//! application's launcher. Whatever happens, the installation ends up either
//! fully updated or exactly as it was, and the next generation of the
//! application finds a status record describing the outcome.
//!
//! # Architecture Overview
//!
//! ```text
//!   host app ──writes──▶ UpdatePlan ──▶ updater run ──writes──▶ UpdateStatus
//!                                           │
//!                  download ▶ verify ▶ backup ▶ extract ▶ commit
//!                                                  │
//!                                               rollback
//!                                           │
//!                                    exec launch.sh
//! ```
//!
//! The pipeline runs each slow stage as one background task while a
//! foreground loop keeps the screen and the cancel keys responsive.
//!
//! # Core Modules
//!
//! - [`upgrade`] - The update pipeline, from plan to handoff
//! - [`ui`] - Progress display abstraction, themes and power button warning
//! - [`config`] - `updater.toml` and the resolved on-disk layout
//! - [`core`] - Error taxonomy and user-facing error rendering
//! - [`cli`] - Subcommands for the device and for host-side scripting
//! - [`utils`] - Atomic file operations, path guards and logging setup
//! - [`constants`] - Default file names, intervals and buffer sizes
//!
//! # Files
//!
//! | File | Written by | Read by |
//! |------|-----------|---------|
//! | `.miyoopod_update.json` | host (`updater request`) | updater run |
//! | `.update_download.zip` | updater run | updater run |
//! | `.miyoopod_backup/` | updater run | rollback, recovery |
//! | `.miyoopod_update_status` | updater run | host (`updater status`) |
//! | `<name>.new` | updater run | launcher (`updater swap-staged`) |

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod ui;
pub mod upgrade;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
