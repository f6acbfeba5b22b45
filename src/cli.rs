use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, PartialEq)]
#[command(name = "gin")]
#[command(version, about = "Manage data repositories: track large content, upload, download and sync")]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Print the underlying commands and their raw output
    #[arg(long, global = true, conflicts_with = "json")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Initialise the current directory as a repository
    Init {
        /// Create a bare repository
        #[arg(long)]
        bare: bool,
    },
    /// Download a repository from a server into a new directory
    Get {
        /// Repository path on the server, e.g. alice/experiment
        repo: String,
        /// Server alias from the configuration
        #[arg(long, default_value = "gin")]
        server: String,
    },
    /// Record files for the next commit
    Add { paths: Vec<String> },
    /// Record changes in the local repository
    Commit {
        #[arg(short, long)]
        message: Option<String>,
        paths: Vec<String>,
    },
    /// Commit changes and upload them with their content
    Upload {
        /// Remote to upload to; may be given more than once
        #[arg(long)]
        to: Vec<String>,
        paths: Vec<String>,
    },
    /// Download changes from the default remote
    Download {
        /// Also download all file content
        #[arg(long)]
        content: bool,
    },
    /// Synchronise with all remotes in both directions
    Sync {
        /// Also transfer all file content
        #[arg(long)]
        content: bool,
    },
    /// List files and their status
    Ls {
        #[arg(short, long)]
        short: bool,
        paths: Vec<String>,
    },
    /// Show the version history
    Log {
        /// Number of versions to show
        #[arg(short = 'n', long)]
        number: Option<usize>,
        /// Include versions that only delete the given paths
        #[arg(long)]
        show_deletes: bool,
        paths: Vec<String>,
    },
    /// Restore files from an earlier version
    Version {
        /// Version ID (commit hash) to restore
        #[arg(long)]
        id: String,
        /// Copy the old files here instead of replacing the current ones
        #[arg(long)]
        copy_to: Option<PathBuf>,
        paths: Vec<String>,
    },
    /// Download the content of files
    GetContent { paths: Vec<String> },
    /// Remove local copies of content that exists on a remote
    RemoveContent { paths: Vec<String> },
    /// Lock files so their content cannot be edited
    Lock { paths: Vec<String> },
    /// Unlock files for editing
    Unlock { paths: Vec<String> },
    /// List configured remotes
    Remotes,
    /// Add a remote
    AddRemote { name: String, url: String },
    /// Remove a remote
    RemoveRemote { name: String },
    /// Set (or with no name, show) the default remote
    UseRemote { name: Option<String> },
    /// Check that git and git-annex are usable
    Env,
}
