//! gin-core - domain types and rules for the gin client
//!
//! This crate holds the value types exchanged between the service layer and its
//! callers, the error taxonomy, the failure classification rules, and the ports
//! (process runner, clock) the adapters implement. It spawns no processes and
//! touches no files; those concerns live in the `gin-cli` adapters.

pub mod classify;
pub mod domain;
pub mod error;
pub mod ports;

// Re-exports for ergonomics
pub use domain::*;
pub use error::*;
