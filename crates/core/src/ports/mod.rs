pub mod process;
pub mod time;

// Re-exports
pub use process::*;
pub use time::*;
