//! Concrete implementations behind the process port and typed wrappers around
//! the two external tools.

pub mod annex;
pub mod command;
pub mod git;
pub mod process;

pub use annex::Annex;
pub use command::{AnnexFilter, CommandBuilder, SshSettings};
pub use git::{Git, LogQuery, LsFilesKind};
pub use process::SystemRunner;
