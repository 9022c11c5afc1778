//! Integration test suite for the MiyooPod updater
//!
//! End-to-end update runs against throwaway installations, plus tests of
//! the `updater` binary. Downloads use a local `cp` fetch tool, so nothing
//! here touches the network.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **update_flow**: Successful runs, verification failures, staged swaps, power warning
//! - **rollback**: Install failures and crash recovery at every archive entry
//! - **cli**: The `updater` binary and its subcommands

mod cli;
mod rollback;
mod update_flow;
