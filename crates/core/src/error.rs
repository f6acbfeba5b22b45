use thiserror::Error;

/// Errors raised while orchestrating git and git-annex.
///
/// Environment and transport failures, state conflicts and generic tool failures
/// are hard errors that abort the current operation. `Transfer` is the per-item
/// failure carried in-band on a [`StatusEvent`](crate::domain::StatusEvent).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GinError {
    #[error("{program} executable not found: {reason}")]
    MissingBinary { program: String, reason: String },

    #[error("{program} version {found} found, but {required} or newer is required")]
    VersionTooOld {
        program: String,
        found: String,
        required: String,
    },

    #[error("{operation} failed: permission denied")]
    PermissionDenied { operation: String },

    #[error("{operation} failed: server key does not match known host key")]
    HostKeyMismatch { operation: String },

    #[error("{operation} failed: could not connect to the server")]
    ConnectionFailed { operation: String },

    #[error("{operation} failed: changes were made on the server that have not been downloaded; run 'gin download' to update local copies")]
    RemoteAhead { operation: String },

    #[error("{operation} failed: local modified or untracked files would be overwritten by download:\n{}", file_list(.files))]
    WouldOverwrite { operation: String, files: Vec<String> },

    #[error("{operation} failed: files changed locally and remotely and cannot be automatically merged (merge conflict):\n{}", file_list(.files))]
    MergeConflict { operation: String, files: Vec<String> },

    #[error("failed: {message}")]
    Transfer { message: String },

    #[error("content of {files:?} was not transferred to '{remote}'")]
    ContentNotTransferred { remote: String, files: Vec<String> },

    #[error("not a repository")]
    NotARepository,

    #[error("no files matched {pattern}")]
    NoMatch { pattern: String },

    #[error("bad file pattern {pattern}: {reason}")]
    BadPattern { pattern: String, reason: String },

    #[error("could not determine default remote")]
    NoRemote,

    #[error("unknown remote name '{name}'")]
    UnknownRemote { name: String },

    #[error("nothing to commit")]
    NothingToCommit,

    #[error("{}", command_message(.description, .stderr))]
    Command {
        origin: String,
        description: String,
        stderr: String,
    },

    #[error("{context}: {reason}")]
    Io { context: String, reason: String },
}

impl GinError {
    /// Generic tool failure with the raw error text and no description.
    pub fn command(origin: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Command {
            origin: origin.into(),
            description: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Generic tool failure with a human-readable description.
    pub fn described(
        origin: impl Into<String>,
        description: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::Command {
            origin: origin.into(),
            description: description.into(),
            stderr: stderr.into(),
        }
    }

    pub fn io(context: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            reason: err.to_string(),
        }
    }

    /// Files named by a state-conflict error, if any.
    pub fn files(&self) -> &[String] {
        match self {
            Self::WouldOverwrite { files, .. }
            | Self::MergeConflict { files, .. }
            | Self::ContentNotTransferred { files, .. } => files,
            _ => &[],
        }
    }
}

fn command_message(description: &str, stderr: &str) -> String {
    if description.is_empty() {
        stderr.trim().to_string()
    } else {
        description.to_string()
    }
}

fn file_list(files: &[String]) -> String {
    files
        .iter()
        .map(|f| format!("  {f}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, GinError>;
