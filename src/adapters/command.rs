//! Construction of git and git-annex invocations.

use gin_core::ports::{Invocation, Tool};
use gin_core::{GinError, Result};
use glob::Pattern;
use std::path::{Path, PathBuf};

use crate::config::CONFIG_FILE_NAME;

/// Credential material injected into every invocation through `GIT_SSH_COMMAND`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshSettings {
    pub ssh_bin: PathBuf,
    /// Private keys offered to the server, in order
    pub keys: Vec<PathBuf>,
    /// Managed known hosts file; strict host key checking is always on
    pub known_hosts: Option<PathBuf>,
}

impl SshSettings {
    /// Value for `GIT_SSH_COMMAND`.
    pub fn command(&self) -> String {
        let mut parts = vec![ssh_path(&self.ssh_bin)];
        for key in &self.keys {
            parts.push(format!("-i {}", ssh_path(key)));
        }
        parts.push("-o IdentitiesOnly=yes".to_string());
        parts.push("-o StrictHostKeyChecking=yes".to_string());
        if let Some(hosts) = &self.known_hosts {
            parts.push(format!(
                "-o 'UserKnownHostsFile=\"{}\"'",
                hosts.to_string_lossy().replace('\\', "/")
            ));
        }
        parts.join(" ")
    }
}

// The shell that runs GIT_SSH_COMMAND wants forward slashes and escaped spaces
fn ssh_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").replace(' ', "\\ ")
}

/// Routes files to content tracking (annex) or metadata tracking (git).
///
/// A file is content-tracked when its size is at least `min_size` and its path
/// matches none of the exclusion patterns. The repository configuration file is
/// never content-tracked.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnexFilter {
    min_size: u64,
    exclude: Vec<String>,
}

impl AnnexFilter {
    pub fn new(min_size: u64, exclude: Vec<String>) -> Self {
        Self { min_size, exclude }
    }

    pub fn min_size(&self) -> u64 {
        self.min_size
    }

    /// Matching options for `git annex add`.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.min_size > 0 {
            args.push("--not".to_string());
            args.push(format!("--smallerthan={}", self.min_size));
        }
        for pattern in &self.exclude {
            args.push(format!("--exclude={pattern}"));
        }
        args.push(format!("--exclude={CONFIG_FILE_NAME}"));
        args
    }

    /// Same decision as [`args`](Self::args) evaluated locally for a path
    /// relative to the repository root.
    pub fn is_content_tracked(&self, path: &str, size: u64) -> bool {
        if path == CONFIG_FILE_NAME {
            return false;
        }
        if size < self.min_size {
            return false;
        }
        !self.exclude.iter().any(|p| match Pattern::new(p) {
            Ok(pattern) => pattern.matches(path),
            Err(_) => p == path,
        })
    }
}

/// Parses a size with an optional unit: `1024`, `10M`, `1.5GB`, `512KiB`.
///
/// SI units (`k`, `M`, `G`, `T`, optionally followed by `B`) are powers of 1000
/// and case-insensitive; binary units (`KiB`, `MiB`, `GiB`, `TiB`) are powers of 1024.
pub fn parse_size(value: &str) -> Result<u64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let bad = |reason: &str| GinError::Io {
        context: format!("invalid size '{value}'"),
        reason: reason.to_string(),
    };
    let number: f64 = number.parse().map_err(|_| bad("not a number"))?;
    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1_000,
        "m" | "mb" => 1_000_000,
        "g" | "gb" => 1_000_000_000,
        "t" | "tb" => 1_000_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        "tib" => 1 << 40,
        _ => return Err(bad("unknown unit")),
    };
    Ok((number * multiplier as f64).round() as u64)
}

/// Builds concrete invocations of both tools from the configured binaries and
/// credential settings. Output depends only on the builder's inputs.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    git_bin: PathBuf,
    annex_bin: PathBuf,
    ssh: Option<SshSettings>,
    filter: AnnexFilter,
    disable_symlinks: bool,
}

impl CommandBuilder {
    pub fn new(git_bin: impl Into<PathBuf>, annex_bin: impl Into<PathBuf>) -> Self {
        Self {
            git_bin: git_bin.into(),
            annex_bin: annex_bin.into(),
            ssh: None,
            filter: AnnexFilter::new(0, Vec::new()),
            disable_symlinks: cfg!(windows),
        }
    }

    pub fn with_ssh(mut self, ssh: SshSettings) -> Self {
        self.ssh = Some(ssh);
        self
    }

    pub fn with_filter(mut self, filter: AnnexFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Forces `core.symlinks=false` on every git call (always on for Windows).
    pub fn with_symlinks_disabled(mut self, disabled: bool) -> Self {
        self.disable_symlinks = disabled;
        self
    }

    pub fn filter(&self) -> &AnnexFilter {
        &self.filter
    }

    pub fn git_bin(&self) -> &Path {
        &self.git_bin
    }

    pub fn annex_bin(&self) -> &Path {
        &self.annex_bin
    }

    pub fn git<I, S>(&self, dir: &Path, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inv = Invocation::new(Tool::Git, &self.git_bin).current_dir(dir);
        if self.disable_symlinks {
            inv = inv.args(["-c", "core.symlinks=false"]);
        }
        self.with_env(inv.args(args))
    }

    pub fn annex<I, S>(&self, dir: &Path, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inv = Invocation::new(Tool::Annex, &self.annex_bin)
            .current_dir(dir)
            .args(args)
            .env("GIT_ANNEX_USE_GIT_SSH", "1");
        self.with_env(inv)
    }

    fn with_env(&self, inv: Invocation) -> Invocation {
        match &self.ssh {
            Some(ssh) => inv.env("GIT_SSH_COMMAND", ssh.command()),
            None => inv,
        }
    }
}
