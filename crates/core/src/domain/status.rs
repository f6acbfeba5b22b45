use serde::{Deserialize, Serialize};
use std::fmt;

/// Sync state of a single path with respect to local and remote changes.
///
/// The declaration order is the display order: listings group files by status
/// and sort the groups with `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    /// Content is present locally and known to exist on at least one other location
    Synced,
    /// Annexed file whose content has not been fetched locally
    NoContent,
    /// Uncommitted local modification
    Modified,
    /// Committed locally, not yet transferred to a remote
    LocalChanges,
    /// Changed remotely, not yet pulled
    RemoteChanges,
    /// Annexed file currently unlocked for editing
    Unlocked,
    /// Lock state toggled since the last recorded change
    TypeChange,
    /// Tracked path deleted locally
    Removed,
    /// Not tracked by either tool
    Untracked,
}

impl FileStatus {
    pub const ALL: [FileStatus; 9] = [
        FileStatus::Synced,
        FileStatus::NoContent,
        FileStatus::Modified,
        FileStatus::LocalChanges,
        FileStatus::RemoteChanges,
        FileStatus::Unlocked,
        FileStatus::TypeChange,
        FileStatus::Removed,
        FileStatus::Untracked,
    ];

    /// Long description used as a group header in listings.
    pub fn description(self) -> &'static str {
        match self {
            FileStatus::Synced => "Synced",
            FileStatus::NoContent => "No local content",
            FileStatus::Modified => "Locally modified (unsaved)",
            FileStatus::LocalChanges => "Locally modified (not uploaded)",
            FileStatus::RemoteChanges => "Remotely modified (not downloaded)",
            FileStatus::Unlocked => "Unlocked for editing",
            FileStatus::TypeChange => "Lock status changed",
            FileStatus::Removed => "Removed",
            FileStatus::Untracked => "Untracked",
        }
    }

    /// Two-letter abbreviation used by the short and JSON listings.
    pub fn abbrev(self) -> &'static str {
        match self {
            FileStatus::Synced => "OK",
            FileStatus::NoContent => "NC",
            FileStatus::Modified => "MD",
            FileStatus::LocalChanges => "LC",
            FileStatus::RemoteChanges => "RC",
            FileStatus::Unlocked => "UL",
            FileStatus::TypeChange => "TC",
            FileStatus::Removed => "RM",
            FileStatus::Untracked => "??",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
