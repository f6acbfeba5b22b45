//! gin-cli - client for content-addressed data repositories
//!
//! Drives git and git-annex as child processes: builds their invocations,
//! streams their output into [`gin_core::StatusEvent`]s, works out per-file sync
//! status and sequences the upload, download and sync protocols.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config;
pub mod output;
pub mod progress;
pub mod services;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
