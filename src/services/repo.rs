use gin_core::ports::{Clock, ProcessRunner, SystemClock};
use gin_core::{GinError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::adapters::{Annex, CommandBuilder, Git};

const DEFAULT_REMOTE_KEY: &str = "gin.remote";
const DEFAULT_BRANCH: &str = "master";

/// Process runner, invocation builder and clock shared by every operation.
#[derive(Clone)]
pub struct Tools {
    runner: Arc<dyn ProcessRunner>,
    builder: Arc<CommandBuilder>,
    clock: Arc<dyn Clock>,
}

impl Tools {
    pub fn new(runner: Arc<dyn ProcessRunner>, builder: CommandBuilder) -> Self {
        Self {
            runner,
            builder: Arc::new(builder),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn git<'a>(&'a self, dir: &'a Path) -> Git<'a> {
        Git::new(self.runner.as_ref(), &self.builder, dir)
    }

    pub fn annex<'a>(&'a self, dir: &'a Path) -> Annex<'a> {
        Annex::new(self.runner.as_ref(), &self.builder, dir)
    }

    pub fn builder(&self) -> &CommandBuilder {
        &self.builder
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

/// Everything an operation needs to know about the repository it runs in.
///
/// Built once per invocation. The operating mode is read when the context is
/// opened and never re-read.
#[derive(Clone)]
pub struct RepoContext {
    tools: Tools,
    /// Directory the tools run in; user paths are relative to it
    dir: PathBuf,
    root: PathBuf,
    direct: bool,
}

impl RepoContext {
    /// Finds the repository containing `dir` and reads its operating mode.
    pub fn open(tools: Tools, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let root = find_root(&dir).ok_or(GinError::NotARepository)?;
        let direct = tools
            .git(&dir)
            .config_get_local("annex.direct")?
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        debug!(root = %root.display(), direct, "Opened repository");
        Ok(Self {
            tools,
            dir,
            root,
            direct,
        })
    }

    /// Context with an explicitly given mode, for callers that already know it.
    pub fn with_mode(tools: Tools, dir: impl Into<PathBuf>, direct: bool) -> Self {
        let dir = dir.into();
        let root = find_root(&dir).unwrap_or_else(|| dir.clone());
        Self {
            tools,
            dir,
            root,
            direct,
        }
    }

    pub fn tools(&self) -> &Tools {
        &self.tools
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True for direct (bare) mode repositories.
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn git(&self) -> Git<'_> {
        self.tools.git(&self.dir)
    }

    pub fn annex(&self) -> Annex<'_> {
        self.tools.annex(&self.dir)
    }

    pub fn clock(&self) -> &dyn Clock {
        self.tools.clock()
    }

    /// The remote used when none is named: `gin.remote`, else the remote the
    /// current branch tracks.
    pub fn default_remote(&self) -> Result<Option<String>> {
        let git = self.git();
        if let Some(remote) = git.config_get_local(DEFAULT_REMOTE_KEY)?.filter(|r| !r.is_empty()) {
            return Ok(Some(remote));
        }
        let Some(branch) = git.current_branch()? else {
            return Ok(None);
        };
        Ok(git
            .config_get(&format!("branch.{branch}.remote"))?
            .filter(|r| !r.is_empty()))
    }

    /// `remote` if given, else the default remote.
    pub fn resolve_remote(&self, remote: Option<&str>) -> Result<String> {
        match remote {
            Some(name) => Ok(name.to_string()),
            None => self.default_remote()?.ok_or(GinError::NoRemote),
        }
    }

    pub fn set_default_remote(&self, name: &str) -> Result<()> {
        if !self.git().remotes()?.contains_key(name) {
            return Err(GinError::UnknownRemote {
                name: name.to_string(),
            });
        }
        self.git().config_set(DEFAULT_REMOTE_KEY, name)
    }

    pub fn unset_default_remote(&self) -> Result<()> {
        self.git().config_unset(DEFAULT_REMOTE_KEY)
    }

    /// Remote-tracking reference of the current branch on the default remote,
    /// `None` when there is no default remote or the reference was never fetched.
    pub fn upstream(&self) -> Result<Option<String>> {
        let Some(remote) = self.default_remote()? else {
            return Ok(None);
        };
        let git = self.git();
        let branch = git
            .current_branch()?
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        let upstream = format!("{remote}/{branch}");
        match git.rev_parse(&format!("refs/remotes/{upstream}"))? {
            Some(_) => Ok(Some(upstream)),
            None => {
                debug!("Upstream {} not initialised", upstream);
                Ok(None)
            }
        }
    }

    /// Turns the bare flag off for the lifetime of the guard. Does nothing
    /// outside direct mode.
    pub fn bare_off(&self) -> Result<BareGuard<'_>> {
        if self.direct {
            self.git().set_bare(false)?;
        }
        Ok(BareGuard { ctx: self })
    }
}

/// Restores the bare flag of a direct mode repository when dropped.
pub struct BareGuard<'a> {
    ctx: &'a RepoContext,
}

impl Drop for BareGuard<'_> {
    fn drop(&mut self) {
        if self.ctx.direct {
            if let Err(err) = self.ctx.git().set_bare(true) {
                warn!("Failed to restore bare flag: {}", err);
            }
        }
    }
}

/// Nearest ancestor of `dir` (inclusive) holding a `.git` entry.
pub fn find_root(dir: &Path) -> Option<PathBuf> {
    dir.ancestors()
        .find(|candidate| candidate.join(".git").exists())
        .map(Path::to_path_buf)
}
