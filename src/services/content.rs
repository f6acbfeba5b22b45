use crossbeam_channel::Sender;
use gin_core::{ChangeCode, GinError, Result, StatusEvent};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::repo::find_root;
use super::status::{clean_path, expand_globs};
use super::{spawn_stream, EventStream, RepoContext, Tools};
use crate::adapters::LsFilesKind;
use crate::progress::{transfer_note, JsonProgressParser, NoteRewriter};

/// Oldest git-annex release known to work
pub const MIN_ANNEX_VERSION: &str = "6.20171108";
/// Repository format requested from `git annex init`
pub const ANNEX_REPO_VERSION: &str = "6";
const ANNEX_BACKEND: &str = "MD5";
const UNKNOWN_HOST: &str = "(unknown)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub git_version: String,
    pub annex_version: String,
}

/// Verifies both tools run and that git-annex is recent enough.
pub fn check_environment(tools: &Tools, dir: &Path) -> Result<Environment> {
    let git_version = tools.git(dir).version()?;
    let git_version = git_version
        .strip_prefix("git version ")
        .unwrap_or(&git_version)
        .to_string();
    let annex_version = tools.annex(dir).version()?;
    if !version_at_least(&annex_version, MIN_ANNEX_VERSION) {
        return Err(GinError::VersionTooOld {
            program: "git-annex".to_string(),
            found: annex_version,
            required: MIN_ANNEX_VERSION.to_string(),
        });
    }
    debug!(%git_version, %annex_version, "Environment ok");
    Ok(Environment {
        git_version,
        annex_version,
    })
}

/// Lax version comparison. Components are split on `.`, `-` and `~`; numeric
/// components compare as numbers, anything else as text.
pub fn version_at_least(found: &str, required: &str) -> bool {
    let split = |v: &str| -> Vec<String> {
        v.trim()
            .split(['.', '-', '~'])
            .map(str::to_string)
            .collect()
    };
    let (found, required) = (split(found), split(required));
    for i in 0..found.len().max(required.len()) {
        let a = found.get(i).map(String::as_str).unwrap_or("0");
        let b = required.get(i).map(String::as_str).unwrap_or("0");
        let ordering = match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(b),
        };
        match ordering {
            std::cmp::Ordering::Equal => continue,
            std::cmp::Ordering::Greater => return true,
            std::cmp::Ordering::Less => return false,
        }
    }
    true
}

pub fn hostname() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

fn local_user() -> String {
    ["USER", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "gin".to_string())
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Name of this copy as recorded by the annex
    pub description: String,
    pub bare: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            description: format!("{}@{}", local_user(), hostname()),
            bare: false,
        }
    }
}

/// Makes `dir` a repository ready for content: git repository, local
/// settings, bootstrap commit and annex.
pub fn init_repo(tools: &Tools, dir: &Path, options: &InitOptions) -> Result<()> {
    let git = tools.git(dir);
    let is_repo = if options.bare {
        dir.join("HEAD").is_file()
    } else {
        find_root(dir).is_some()
    };
    if !is_repo {
        git.init(options.bare)?;
    }
    if git.config_get("user.name")?.is_none() {
        if let Err(err) = git.config_set("user.name", &local_user()) {
            warn!("Failed to set local git user configuration: {}", err);
        }
    }
    git.config_set("core.quotepath", "false")?;
    if cfg!(windows) {
        git.config_set("core.symlinks", "false")?;
    }
    if !options.bare {
        commit_if_new(tools, dir)?;
    }
    tools
        .annex(dir)
        .init(&options.description, ANNEX_REPO_VERSION)?;
    if let Err(err) = git.config_set("annex.backends", ANNEX_BACKEND) {
        warn!("Failed to set default annex backend: {}", err);
    }
    info!("Initialised {}", dir.display());
    Ok(())
}

/// Creates the empty bootstrap commit when the repository has no history.
/// Returns whether a commit was made.
pub fn commit_if_new(tools: &Tools, dir: &Path) -> Result<bool> {
    let git = tools.git(dir);
    if git.rev_parse("HEAD")?.is_some() {
        return Ok(false);
    }
    git.commit_empty(&format!("Initial commit: Repository initialised on {}", hostname()))?;
    Ok(true)
}

/// Streams an annex command with per-item JSON output. `on_done` sees every
/// successful item. Returns the number of result lines.
fn annex_json_stream<F>(
    ctx: &RepoContext,
    args: Vec<String>,
    state: &str,
    rewrite: NoteRewriter,
    tx: &Sender<StatusEvent>,
    mut on_done: F,
) -> Result<usize>
where
    F: FnMut(&StatusEvent),
{
    let handle = ctx.annex().spawn(args)?;
    let mut parser = JsonProgressParser::new(state, handle.command_line(), ctx.clock())
        .with_note_rewriter(rewrite);
    for line in handle.stdout().iter() {
        if let Some(event) = parser.parse_line(&line) {
            if event.is_complete() {
                on_done(&event);
            }
            if tx.send(event).is_err() {
                break;
            }
        }
    }
    let finished = handle.finish()?;
    if !finished.status.success() {
        if parser.results() == 0 {
            return Err(GinError::command(state.to_string(), finished.stderr_text()));
        }
        debug!("{} finished with errors: {}", state, finished.stderr_text());
    }
    Ok(parser.results())
}

fn to_args(head: &[&str], paths: &[String]) -> Vec<String> {
    head.iter()
        .map(|s| s.to_string())
        .chain(paths.iter().cloned())
        .collect()
}

/// Adds files: content-tracked files to the annex (recording their names),
/// everything else to git.
pub fn add(ctx: &RepoContext, patterns: Vec<String>) -> EventStream {
    let ctx = ctx.clone();
    spawn_stream("Add", move |tx| {
        let paths = expand_globs(ctx.dir(), &patterns, false)?;
        if paths.is_empty() {
            debug!("No paths to add");
            return Ok(());
        }
        let annex = ctx.annex();
        let mut args = to_args(&["add", "--json"], &paths);
        args.extend(ctx.tools().builder().filter().args());
        annex_json_stream(&ctx, args, "Adding (annex)", transfer_note, tx, |event| {
            if let Err(err) = annex.set_name_metadata(&event.file_name) {
                warn!("Could not record name of {}: {}", event.file_name, err);
            }
        })?;
        git_add(&ctx, &paths, tx)
    })
}

fn git_add(ctx: &RepoContext, paths: &[String], tx: &Sender<StatusEvent>) -> Result<()> {
    let _guard = ctx.bare_off()?;
    let paths = if ctx.is_direct() {
        direct_git_paths(ctx, paths)?
    } else {
        paths.to_vec()
    };
    if paths.is_empty() {
        return Ok(());
    }
    let handle = ctx.git().spawn(to_args(&["add", "--verbose", "--"], &paths))?;
    let raw_input = handle.command_line().to_string();
    for line in handle.stdout().iter() {
        let Some(mut event) = parse_git_add_line(&line) else {
            continue;
        };
        event.raw_input = raw_input.clone();
        let _ = tx.send(event);
    }
    let finished = handle.finish()?;
    if !finished.status.success() {
        return Err(GinError::command("GitAdd", finished.stderr_text()));
    }
    Ok(())
}

/// `add 'name'` and `remove 'name'` lines of `git add --verbose`.
pub fn parse_git_add_line(line: &str) -> Option<StatusEvent> {
    let line = line.trim();
    let (state, rest) = if let Some(rest) = line.strip_prefix("add ") {
        ("Adding (git)", rest)
    } else if let Some(rest) = line.strip_prefix("remove ") {
        ("Removing", rest)
    } else {
        return None;
    };
    let name = rest.trim_matches('\'');
    if name.is_empty() {
        return None;
    }
    debug!("'{}' added to git", name);
    let mut event = StatusEvent::new(name, state).completed();
    event.raw_output = line.to_string();
    Some(event)
}

/// Files under `paths` that belong in git for a direct mode repository:
/// everything on disk that is neither annexed nor content-tracked, plus
/// tracked paths (which covers deletions).
fn direct_git_paths(ctx: &RepoContext, paths: &[String]) -> Result<Vec<String>> {
    let annexed: HashSet<String> = ctx
        .annex()
        .whereis(paths)?
        .into_iter()
        .map(|info| clean_path(&info.file))
        .collect();
    let filter = ctx.tools().builder().filter();
    let mut selected: Vec<String> = Vec::new();
    for path in paths {
        let walker = WalkDir::new(ctx.dir().join(path))
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker.flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(ctx.dir()).unwrap_or(entry.path());
            let relative = clean_path(&relative.to_string_lossy());
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if annexed.contains(&relative) || filter.is_content_tracked(&relative, size) {
                continue;
            }
            if !selected.contains(&relative) {
                selected.push(relative);
            }
        }
    }
    for file in ctx.git().ls_files(LsFilesKind::Cached, paths)? {
        let file = clean_path(&file);
        if !annexed.contains(&file) && !selected.contains(&file) {
            selected.push(file);
        }
    }
    Ok(selected)
}

/// Records staged changes. "Nothing to commit" is reported as [`GinError::NothingToCommit`].
pub fn commit(ctx: &RepoContext, message: &str) -> Result<()> {
    let _guard = ctx.bare_off()?;
    ctx.git().commit(message)
}

fn changes_by_code(ctx: &RepoContext, paths: &[String]) -> Result<BTreeMap<&'static str, Vec<String>>> {
    let mut changes: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    for entry in ctx.annex().status(paths)? {
        let code = match entry.code {
            ChangeCode::Added => "A",
            ChangeCode::Modified => "M",
            ChangeCode::Deleted => "D",
            ChangeCode::TypeChanged => "T",
            ChangeCode::Untracked => "?",
        };
        changes.entry(code).or_default().push(entry.file);
    }
    Ok(changes)
}

/// Change counts, e.g. "New files: 2\nModified files: 1\n".
pub fn describe_index_short(ctx: &RepoContext, paths: &[String]) -> Result<String> {
    let changes = changes_by_code(ctx, paths)?;
    let mut text = String::new();
    for (code, label) in [("A", "New files"), ("M", "Modified files"), ("D", "Deleted files")] {
        let count = changes.get(code).map_or(0, Vec::len);
        if count > 0 {
            text.push_str(&format!("{label}: {count}\n"));
        }
    }
    Ok(text)
}

/// Downloads content of annexed files under `patterns` (everything when empty).
pub fn get_content(ctx: &RepoContext, patterns: Vec<String>) -> EventStream {
    let ctx = ctx.clone();
    spawn_stream("GetContent", move |tx| {
        let paths = expand_globs(ctx.dir(), &patterns, true)?;
        let args = to_args(&["get", "--json-progress"], &paths);
        annex_json_stream(&ctx, args, "Downloading", transfer_note, tx, |_| {})?;
        Ok(())
    })
}

pub fn drop_note(note: &str) -> String {
    if note.contains("unsafe") {
        "unsafe, could not verify remote copy".to_string()
    } else {
        note.trim().to_string()
    }
}

/// Removes local copies of content known to exist elsewhere.
pub fn remove_content(ctx: &RepoContext, patterns: Vec<String>) -> EventStream {
    let ctx = ctx.clone();
    spawn_stream("RemoveContent", move |tx| {
        let paths = expand_globs(ctx.dir(), &patterns, true)?;
        let args = to_args(&["drop", "--json"], &paths);
        annex_json_stream(&ctx, args, "Removing content", drop_note, tx, |_| {})?;
        Ok(())
    })
}

/// Locks unlocked annexed files.
pub fn lock(ctx: &RepoContext, patterns: Vec<String>) -> EventStream {
    let ctx = ctx.clone();
    spawn_stream("Lock", move |tx| {
        let paths = expand_globs(ctx.dir(), &patterns, true)?;
        let mut args = to_args(&["add", "--json", "--update"], &paths);
        args.extend(ctx.tools().builder().filter().args());
        annex_json_stream(&ctx, args, "Locking", transfer_note, tx, |_| {})?;
        Ok(())
    })
}

pub fn unlock_note(_note: &str) -> String {
    "Content not available locally. Use 'gin get-content' to download".to_string()
}

/// Unlocks annexed files for editing.
pub fn unlock(ctx: &RepoContext, patterns: Vec<String>) -> EventStream {
    let ctx = ctx.clone();
    spawn_stream("Unlock", move |tx| {
        let paths = expand_globs(ctx.dir(), &patterns, true)?;
        let args = to_args(&["unlock", "--json"], &paths);
        annex_json_stream(&ctx, args, "Unlocking", unlock_note, tx, |_| {})?;
        Ok(())
    })
}
