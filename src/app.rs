//! Command dispatch: wires configuration, tools, services and output together.

use anyhow::{anyhow, bail, Context, Result};
use chrono::DateTime;
use gin_core::GinError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::adapters::{CommandBuilder, LogQuery, SystemRunner};
use crate::cli::{CliArgs, Command};
use crate::config::{config_dir, Config};
use crate::output::{print_checkout, print_log, print_status, print_stream, OutputMode, Summary};
use crate::services::content::{self, check_environment, hostname, InitOptions};
use crate::services::history::{self, CopyTarget};
use crate::services::repo::find_root;
use crate::services::transfer::{self, CloneRequest};
use crate::services::{status, EventStream, RepoContext, Tools};

/// Suffix format of files restored with `version --copy-to`
const COPY_SUFFIX_FORMAT: &str = "%Y-%m-%d-%H%M%S";

pub struct App {
    config: Config,
    tools: Tools,
    mode: OutputMode,
    cwd: PathBuf,
}

impl App {
    pub fn new(config: Config, tools: Tools, mode: OutputMode, cwd: impl Into<PathBuf>) -> Self {
        Self {
            config,
            tools,
            mode,
            cwd: cwd.into(),
        }
    }

    /// Loads configuration for the current directory and prepares the
    /// system process runner.
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        let mut config = Config::load(args.config.clone())?;
        if let Some(root) = find_root(&cwd) {
            config.merge_repo_config(&root)?;
        }
        let ssh_dir = match &args.config {
            Some(path) => path.parent().map(Path::to_path_buf).unwrap_or_default(),
            None => config_dir()?,
        };
        let builder = CommandBuilder::new(&config.bin.git, &config.bin.git_annex)
            .with_ssh(config.ssh_settings(&ssh_dir))
            .with_filter(config.annex_filter()?);
        let tools = Tools::new(Arc::new(SystemRunner::new()), builder);
        let mode = OutputMode {
            json: args.json,
            verbose: args.verbose,
        };
        Ok(Self::new(config, tools, mode, cwd))
    }

    fn open(&self) -> Result<RepoContext> {
        check_environment(&self.tools, &self.cwd)?;
        Ok(RepoContext::open(self.tools.clone(), &self.cwd)?)
    }

    pub fn run<W: Write>(&self, command: Command, out: &mut W) -> Result<()> {
        debug!(?command, "Running command");
        match command {
            Command::Env => {
                let env = check_environment(&self.tools, &self.cwd)?;
                writeln!(out, "git {}", env.git_version)?;
                writeln!(out, "git-annex {}", env.annex_version)?;
                Ok(())
            }
            Command::Init { bare } => {
                check_environment(&self.tools, &self.cwd)?;
                let options = InitOptions {
                    bare,
                    ..InitOptions::default()
                };
                content::init_repo(&self.tools, &self.cwd, &options)?;
                writeln!(out, "Repository initialised in {}", self.cwd.display())?;
                Ok(())
            }
            Command::Get { repo, server } => self.clone_repo(&repo, &server, out),
            Command::Add { paths } => {
                let ctx = self.open()?;
                self.finish(content::add(&ctx, paths), out)
            }
            Command::Commit { message, paths } => {
                let ctx = self.open()?;
                outcome(&self.stage(&ctx, &paths, out)?)?;
                self.commit(&ctx, message, &paths, out)
            }
            Command::Upload { to, paths } => {
                let ctx = self.open()?;
                let mut summary = self.stage(&ctx, &paths, out)?;
                outcome(&summary)?;
                self.commit(&ctx, None, &paths, out)?;
                let remotes = if to.is_empty() {
                    vec![ctx.resolve_remote(None)?]
                } else {
                    to
                };
                for remote in remotes {
                    info!("Uploading to {}", remote);
                    let stream = transfer::push(&ctx, paths.clone(), remote);
                    summary.merge(print_stream(stream, self.mode, out)?);
                }
                outcome(&summary)
            }
            Command::Download { content } => {
                let ctx = self.open()?;
                let remote = ctx.resolve_remote(None)?;
                self.finish(transfer::pull(&ctx, Some(remote), content), out)
            }
            Command::Sync { content } => {
                let ctx = self.open()?;
                self.finish(transfer::sync(&ctx, content), out)
            }
            Command::Ls { short, paths } => {
                let ctx = self.open()?;
                let statuses = status::file_status(&ctx, &paths)?;
                print_status(&statuses, short, self.mode, out)?;
                Ok(())
            }
            Command::Log {
                number,
                show_deletes,
                paths,
            } => {
                let ctx = self.open()?;
                let query = LogQuery {
                    count: number,
                    revrange: None,
                    paths,
                    show_deletes,
                };
                print_log(&history::log(&ctx, &query)?, self.mode, out)?;
                Ok(())
            }
            Command::Version { id, copy_to, paths } => {
                let ctx = self.open()?;
                self.version(&ctx, id, copy_to, paths, out)
            }
            Command::GetContent { paths } => {
                let ctx = self.open()?;
                self.finish(content::get_content(&ctx, paths), out)
            }
            Command::RemoveContent { paths } => {
                let ctx = self.open()?;
                self.finish(content::remove_content(&ctx, paths), out)
            }
            Command::Lock { paths } => {
                let ctx = self.open()?;
                self.finish(content::lock(&ctx, paths), out)
            }
            Command::Unlock { paths } => {
                let ctx = self.open()?;
                self.finish(content::unlock(&ctx, paths), out)
            }
            Command::Remotes => {
                let ctx = self.open()?;
                let default = ctx.default_remote()?;
                let remotes = ctx.git().remotes()?;
                if remotes.is_empty() {
                    writeln!(out, "No remotes configured")?;
                }
                for (name, url) in remotes {
                    let marker = if default.as_deref() == Some(name.as_str()) {
                        " [default]"
                    } else {
                        ""
                    };
                    writeln!(out, "{name}: {url}{marker}")?;
                }
                Ok(())
            }
            Command::AddRemote { name, url } => {
                let ctx = self.open()?;
                let url = self.expand_remote_url(&url);
                ctx.git().remote_add(&name, &url)?;
                writeln!(out, "New remote '{name}' added: {url}")?;
                if ctx.default_remote()?.is_none() {
                    ctx.set_default_remote(&name)?;
                    writeln!(out, "Default remote set to '{name}'")?;
                }
                Ok(())
            }
            Command::RemoveRemote { name } => {
                let ctx = self.open()?;
                if ctx.default_remote()?.as_deref() == Some(name.as_str()) {
                    ctx.unset_default_remote()?;
                }
                ctx.git().remote_remove(&name)?;
                writeln!(out, "Remote '{name}' removed")?;
                Ok(())
            }
            Command::UseRemote { name } => {
                let ctx = self.open()?;
                match name {
                    Some(name) => {
                        ctx.set_default_remote(&name)?;
                        writeln!(out, "Default remote set to '{name}'")?;
                    }
                    None => match ctx.default_remote()? {
                        Some(name) => writeln!(out, "Default remote: {name}")?,
                        None => writeln!(out, "No default remote set")?,
                    },
                }
                Ok(())
            }
        }
    }

    fn finish<W: Write>(&self, stream: EventStream, out: &mut W) -> Result<()> {
        let summary = print_stream(stream, self.mode, out)?;
        outcome(&summary)
    }

    /// Adds `paths` ahead of a commit. Without paths only what is already
    /// staged gets committed.
    fn stage<W: Write>(&self, ctx: &RepoContext, paths: &[String], out: &mut W) -> Result<Summary> {
        if paths.is_empty() {
            return Ok(Summary::default());
        }
        Ok(print_stream(content::add(ctx, paths.to_vec()), self.mode, out)?)
    }

    /// Commits whatever is staged. An empty index is not an error.
    fn commit<W: Write>(
        &self,
        ctx: &RepoContext,
        message: Option<String>,
        paths: &[String],
        out: &mut W,
    ) -> Result<()> {
        let message = match message {
            Some(message) => message,
            None => default_commit_message(ctx, paths)?,
        };
        match content::commit(ctx, &message) {
            Ok(()) => {
                if !self.mode.json {
                    writeln!(out, "Changes recorded")?;
                }
                Ok(())
            }
            Err(GinError::NothingToCommit) => {
                if !self.mode.json {
                    writeln!(out, "No changes to record")?;
                }
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn version<W: Write>(
        &self,
        ctx: &RepoContext,
        id: String,
        copy_to: Option<PathBuf>,
        paths: Vec<String>,
        out: &mut W,
    ) -> Result<()> {
        let query = LogQuery {
            count: Some(1),
            revrange: Some(id.clone()),
            paths: Vec::new(),
            show_deletes: true,
        };
        let commit = history::log(ctx, &query)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Unknown version '{id}'"))?;

        if let Some(destination) = copy_to {
            let target = CopyTarget {
                destination: self.cwd.join(destination),
                suffix: copy_suffix(&commit.date, &commit.abbreviated_hash),
            };
            let stream = history::checkout_copies(ctx, commit.hash, paths, target);
            let summary = print_checkout(stream, self.mode, out)?;
            return outcome(&summary);
        }

        history::checkout_version(ctx, &commit.hash, &paths)?;
        let message = format!(
            "Repository version changed to:\n{}\n{}\n(Commit {})",
            commit.date, commit.subject, commit.abbreviated_hash
        );
        self.commit(ctx, Some(message), &paths, out)
    }

    fn clone_repo<W: Write>(&self, repo: &str, alias: &str, out: &mut W) -> Result<()> {
        let name = repo_name(repo)?;
        let server = self
            .config
            .server(alias)
            .ok_or_else(|| anyhow!("Unknown server '{alias}'"))?;
        check_environment(&self.tools, &self.cwd)?;
        let request = CloneRequest {
            url: format!("{}/{}", server.git.address(), repo),
            parent: self.cwd.clone(),
            name: name.to_string(),
            description: InitOptions::default().description,
        };
        self.finish(transfer::clone_repo(&self.tools, request), out)
    }

    /// `<server>:<owner>/<repo>` becomes the server's address; anything else is used as given.
    fn expand_remote_url(&self, url: &str) -> String {
        if let Some((alias, path)) = url.split_once(':') {
            if let Some(server) = self.config.server(alias) {
                return format!("{}/{}", server.git.address(), path.trim_start_matches('/'));
            }
        }
        url.to_string()
    }
}

fn outcome(summary: &Summary) -> Result<()> {
    summary.outcome().map_err(|message| anyhow!(message))
}

/// `owner/repository` path on a server; the last component names the new directory.
pub fn repo_name(repo: &str) -> Result<&str> {
    let parts: Vec<&str> = repo.trim_matches('/').split('/').collect();
    match parts.as_slice() {
        [owner, name] if !owner.is_empty() && !name.is_empty() => Ok(*name),
        _ => bail!("Invalid repository path '{repo}': expected <owner>/<repository>"),
    }
}

fn default_commit_message(ctx: &RepoContext, paths: &[String]) -> Result<String> {
    let summary = content::describe_index_short(ctx, paths)?;
    Ok(format!("gin commit from {}\n\n{}", hostname(), summary))
}

/// Revision date as a file name suffix; the abbreviated hash when the date is unreadable.
pub fn copy_suffix(date: &str, fallback: &str) -> String {
    match DateTime::parse_from_rfc3339(date.trim()) {
        Ok(date) => date.format(COPY_SUFFIX_FORMAT).to_string(),
        Err(err) => {
            debug!("Unreadable revision date {}: {}", date, err);
            fallback.to_string()
        }
    }
}

/// Entry point for the binary.
pub fn run(args: CliArgs) -> Result<()> {
    let app = App::from_args(&args)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    app.run(args.command, &mut out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_name() -> Result<()> {
        assert_eq!(repo_name("alice/experiment")?, "experiment");
        assert_eq!(repo_name("/alice/experiment/")?, "experiment");
        assert!(repo_name("experiment").is_err());
        assert!(repo_name("a/b/c").is_err());
        assert!(repo_name("/b").is_err());
        Ok(())
    }

    #[test]
    fn test_copy_suffix() {
        assert_eq!(copy_suffix("2021-03-04T05:06:07+01:00", "abc1234"), "2021-03-04-050607");
        assert_eq!(copy_suffix("yesterday", "abc1234"), "abc1234");
    }
}
