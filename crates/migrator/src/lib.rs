//! Schema migration runner.
//!
//! Environment-driven configuration for the `migrator` binary. The work itself lives in
//! `migrator-core`.

pub mod config;
