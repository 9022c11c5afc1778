//! Core types shared by every part of the updater
//!
//! # Modules
//!
//! - [`error`] - [`UpdateError`] taxonomy, component errors and the
//!   [`ErrorContext`] used to report CLI failures

pub mod error;

pub use error::{
    BackupError, ConfigError, ErrorContext, FetchError, InstallError, UpdateError,
    user_friendly_error,
};
