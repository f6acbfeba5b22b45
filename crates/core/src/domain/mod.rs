pub mod commit;
pub mod events;
pub mod location;
pub mod status;

// Re-exports for convenience
pub use commit::*;
pub use events::*;
pub use location::*;
pub use status::*;
