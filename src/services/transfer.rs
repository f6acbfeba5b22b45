//! Upload, download, sync and clone protocols.

use crossbeam_channel::Sender;
use gin_core::classify::{auto_resolved_files, classify, classify_error, to_error, FailureCategory};
use gin_core::{GinError, Result, StatusEvent};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::content::{get_content, init_repo, InitOptions};
use super::{spawn_stream, EventStream, RepoContext, Tools};
use crate::progress::{GitProgressParser, JsonProgressParser, KeyNameResolver};

/// File name used for events about the repository metadata as a whole
pub const GIT_ITEM: &str = "(git)";

/// Uploads metadata to `remote`, then the content of `paths` (all content when empty).
pub fn push(ctx: &RepoContext, paths: Vec<String>, remote: String) -> EventStream {
    let ctx = ctx.clone();
    spawn_stream("Upload", move |tx| run_push(&ctx, &paths, &remote, tx))
}

fn run_push(ctx: &RepoContext, paths: &[String], remote: &str, tx: &Sender<StatusEvent>) -> Result<()> {
    push_metadata(ctx, remote, tx)?;

    let annex = ctx.annex();
    let eligible: Vec<_> = annex
        .whereis(paths)?
        .into_iter()
        .filter(|info| info.present_here())
        .collect();
    if eligible.is_empty() {
        info!("No content to upload to {}", remote);
        return Ok(());
    }
    let only_here: Vec<String> = eligible
        .iter()
        .filter(|info| info.only_here())
        .map(|info| info.file.clone())
        .collect();

    let mut args = vec![
        "copy".to_string(),
        "--json-progress".to_string(),
        format!("--to={remote}"),
    ];
    if paths.is_empty() {
        args.push("--all".to_string());
    } else {
        args.extend(eligible.iter().map(|info| info.file.clone()));
    }
    let handle = annex.spawn(args)?;
    let raw_input = handle.command_line().to_string();
    let mut parser = JsonProgressParser::new(format!("Uploading (to: {remote})"), raw_input, ctx.clock())
        .with_key_names(KeyNameResolver::new(&annex));
    for line in handle.stdout().iter() {
        if let Some(event) = parser.parse_line(&line) {
            if tx.send(event).is_err() {
                debug!("Upload receiver gone");
                return Ok(());
            }
        }
    }
    let finished = handle.finish()?;
    if !finished.status.success() && parser.results() == 0 {
        return Err(classify_error("upload", "AnnexCopy", &finished.stderr_text()));
    }
    if parser.results() == 0 && !only_here.is_empty() {
        warn!("Copy to {} reported no transfers for {} file(s)", remote, only_here.len());
        return Err(GinError::ContentNotTransferred {
            remote: remote.to_string(),
            files: only_here,
        });
    }
    Ok(())
}

/// Metadata-only sync towards `remote`. Never commits, never pulls.
fn push_metadata(ctx: &RepoContext, remote: &str, tx: &Sender<StatusEvent>) -> Result<()> {
    let handle = ctx
        .annex()
        .spawn(["sync", "--no-pull", "--no-commit", "--no-content", remote])?;
    let parser = GitProgressParser::new(
        GIT_ITEM,
        format!("Uploading git files (to: {remote})"),
        handle.command_line(),
    );
    let mut stderr = Vec::new();
    for line in handle.stderr().iter() {
        if let Some(event) = parser.parse_line(&line) {
            let _ = tx.send(event);
        }
        stderr.push(line);
    }
    let finished = handle.finish()?;
    if !finished.status.success() {
        let mut text = stderr.join("\n");
        text.push('\n');
        text.push_str(&finished.stdout.join("\n"));
        return Err(classify_error("upload", "UploadGit", &text));
    }
    // git prints no meters without a terminal, the completion is always reported
    let done = StatusEvent::new(GIT_ITEM, format!("Uploading git files (to: {remote})")).completed();
    let _ = tx.send(done);
    Ok(())
}

/// Downloads metadata from `remote` (the default when `None`), optionally
/// followed by all content.
pub fn pull(ctx: &RepoContext, remote: Option<String>, content: bool) -> EventStream {
    let ctx = ctx.clone();
    spawn_stream("Download", move |tx| {
        run_pull(&ctx, remote.as_deref(), tx)?;
        if content {
            for event in get_content(&ctx, Vec::new()).iter() {
                let _ = tx.send(event);
            }
        }
        Ok(())
    })
}

fn run_pull(ctx: &RepoContext, remote: Option<&str>, tx: &Sender<StatusEvent>) -> Result<()> {
    let state = "Downloading changes";
    let mut args = vec!["sync", "--no-push", "--no-commit"];
    if let Some(remote) = remote {
        args.push(remote);
    }
    let out = ctx.annex().run(args)?;
    let text = format!("{}\n{}", out.stdout_text(), out.stderr_text());
    let category = classify(&text);
    if !out.success() || category == FailureCategory::MergeConflict {
        abort_failed_merge(ctx, category);
        return Err(to_error(category, "download", "Download", &text));
    }
    notify_resolved(&text, tx);
    let _ = tx.send(StatusEvent::new(GIT_ITEM, state).completed());
    Ok(())
}

/// Full two-way sync with automatic conflict resolution.
pub fn sync(ctx: &RepoContext, content: bool) -> EventStream {
    let ctx = ctx.clone();
    spawn_stream("Sync", move |tx| {
        let mut args = vec!["sync", "--resolvemerge"];
        if content {
            args.push("--content");
        }
        let out = ctx.annex().run(args)?;
        let text = format!("{}\n{}", out.stdout_text(), out.stderr_text());
        if !out.success() {
            let category = classify(&text);
            abort_failed_merge(&ctx, category);
            return Err(to_error(category, "sync", "Sync", &text));
        }
        notify_resolved(&text, tx);
        let _ = tx.send(StatusEvent::new(GIT_ITEM, "Synchronising repository").completed());
        Ok(())
    })
}

/// Leaves no half-finished merge behind. Failures are only logged so the
/// caller keeps reporting the original error.
fn abort_failed_merge(ctx: &RepoContext, category: FailureCategory) {
    let git = ctx.git();
    let pending = category == FailureCategory::MergeConflict
        || git.merge_in_progress().unwrap_or_else(|err| {
            warn!("Could not check for a pending merge: {}", err);
            false
        });
    if pending {
        info!("Aborting failed merge");
        if let Err(err) = git.merge_abort() {
            warn!("Could not abort merge: {}", err);
        }
    }
}

fn notify_resolved(text: &str, tx: &Sender<StatusEvent>) {
    for file in auto_resolved_files(text) {
        let event = StatusEvent::new(file, "Conflict resolved (both versions kept)").completed();
        let _ = tx.send(event);
    }
}

/// Parameters of a clone.
#[derive(Debug, Clone)]
pub struct CloneRequest {
    pub url: String,
    /// Directory the clone is created in
    pub parent: PathBuf,
    /// Name of the new repository directory
    pub name: String,
    /// Description of the new local copy for the annex
    pub description: String,
}

/// Clones `request.url` and initialises local content storage in the new copy.
pub fn clone_repo(tools: &Tools, request: CloneRequest) -> EventStream {
    let tools = tools.clone();
    spawn_stream("Clone", move |tx| run_clone(&tools, &request, tx))
}

fn run_clone(tools: &Tools, request: &CloneRequest, tx: &Sender<StatusEvent>) -> Result<()> {
    let git = tools.git(&request.parent);
    let handle = git.spawn(["clone", "--progress", request.url.as_str(), request.name.as_str()])?;
    let parser = GitProgressParser::new(
        request.name.clone(),
        "Downloading repository",
        handle.command_line(),
    );
    let mut stderr = Vec::new();
    for line in handle.stderr().iter() {
        if let Some(event) = parser.parse_line(&line) {
            let _ = tx.send(event);
        }
        stderr.push(line);
    }
    let finished = handle.finish()?;
    if !finished.status.success() {
        return Err(clone_error(&request.name, &stderr.join("\n")));
    }
    let _ = tx.send(StatusEvent::new(request.name.clone(), "Downloading repository").completed());

    let _ = tx.send(StatusEvent::new(request.name.clone(), "Initialising local storage"));
    let dir: &Path = &request.parent.join(&request.name);
    init_repo(
        tools,
        dir,
        &InitOptions {
            description: request.description.clone(),
            bare: false,
        },
    )?;
    let _ = tx.send(StatusEvent::new(request.name.clone(), "Initialising local storage").completed());
    Ok(())
}

fn clone_error(name: &str, stderr: &str) -> GinError {
    if stderr.contains("does not exist") {
        return GinError::described(
            "Clone",
            "Repository download failed.\nMake sure you typed the repository path correctly.\nType 'gin repos' to see a list of repositories you have access to.",
            stderr,
        );
    }
    if stderr.contains("already exists and is not an empty directory") {
        return GinError::described(
            "Clone",
            format!("Repository download failed.\n'{name}' already exists in the current directory and is not empty."),
            stderr,
        );
    }
    classify_error("clone", "Clone", stderr)
}
