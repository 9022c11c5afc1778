//! Supporting utilities
//!
//! # Modules
//!
//! - [`fs`] - Atomic writes, directory helpers and path traversal guards
//! - [`logger`] - Global `tracing` subscriber setup

pub mod fs;
pub mod logger;
