use gin_core::ports::{Invocation, ProcessHandle, ProcessOutput, ProcessRunner};
use gin_core::{CommitRecord, DiffStat, GinError, ObjectKind, Result, TreeObject};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, warn};

use super::command::CommandBuilder;

const FIELD_SEP: char = '\u{1f}';
const LOG_FORMAT: &str = "--format=%H%x1f%h%x1f%an%x1f%ae%x1f%aI%x1f%s%x1f%b";

/// Which `git ls-files` listing to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LsFilesKind {
    Cached,
    Modified,
    Others,
    Deleted,
}

impl LsFilesKind {
    fn flag(self) -> &'static str {
        match self {
            LsFilesKind::Cached => "--cached",
            LsFilesKind::Modified => "--modified",
            LsFilesKind::Others => "--others",
            LsFilesKind::Deleted => "--deleted",
        }
    }
}

/// Parameters for a history query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// Limit on the number of revisions; `None` for the whole history
    pub count: Option<usize>,
    pub revrange: Option<String>,
    pub paths: Vec<String>,
    /// Include revisions whose only change to the paths is a deletion
    pub show_deletes: bool,
}

/// Typed queries against the metadata tool for one working directory.
pub struct Git<'a> {
    runner: &'a dyn ProcessRunner,
    builder: &'a CommandBuilder,
    dir: &'a Path,
}

impl<'a> Git<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, builder: &'a CommandBuilder, dir: &'a Path) -> Self {
        Self {
            runner,
            builder,
            dir,
        }
    }

    pub fn invocation<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.builder.git(self.dir, args)
    }

    pub fn run<I, S>(&self, args: I) -> Result<ProcessOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.output(&self.invocation(args))
    }

    pub fn spawn<I, S>(&self, args: I) -> Result<ProcessHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.spawn(&self.invocation(args))
    }

    /// Runs and turns a non-zero exit into a `Command` error carrying stderr.
    fn checked<I, S>(&self, origin: &str, args: I) -> Result<ProcessOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let out = self.run(args)?;
        if out.success() {
            Ok(out)
        } else {
            Err(GinError::command(origin, out.stderr_text()))
        }
    }

    pub fn version(&self) -> Result<String> {
        let out = self.checked("GitVersion", ["version"])?;
        Ok(out.stdout_text().trim().to_string())
    }

    pub fn init(&self, bare: bool) -> Result<()> {
        let mut args = vec!["init"];
        if bare {
            args.push("--bare");
        }
        self.checked("Init", args)?;
        Ok(())
    }

    /// Value of a config key, `None` when the key is unset.
    pub fn config_get(&self, key: &str) -> Result<Option<String>> {
        let out = self.run(["config", "--get", key])?;
        match out.status.code {
            Some(0) => Ok(Some(out.stdout_text().trim().to_string())),
            Some(1) => Ok(None),
            _ => Err(GinError::command("ConfigGet", out.stderr_text())),
        }
    }

    pub fn config_get_local(&self, key: &str) -> Result<Option<String>> {
        let out = self.run(["config", "--local", "--get", key])?;
        match out.status.code {
            Some(0) => Ok(Some(out.stdout_text().trim().to_string())),
            Some(1) => Ok(None),
            _ => Err(GinError::command("ConfigGet", out.stderr_text())),
        }
    }

    pub fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.checked("ConfigSet", ["config", "--local", key, value])?;
        Ok(())
    }

    pub fn config_unset(&self, key: &str) -> Result<()> {
        let out = self.run(["config", "--local", "--unset", key])?;
        // Exit 5 means the key was not set
        match out.status.code {
            Some(0) | Some(5) => Ok(()),
            _ => Err(GinError::command("ConfigUnset", out.stderr_text())),
        }
    }

    pub fn set_bare(&self, bare: bool) -> Result<()> {
        let value = if bare { "true" } else { "false" };
        self.checked("SetBare", ["config", "--local", "--bool", "core.bare", value])?;
        Ok(())
    }

    pub fn ls_files(&self, kind: LsFilesKind, paths: &[String]) -> Result<Vec<String>> {
        let mut args = vec!["ls-files".to_string(), "-z".to_string(), kind.flag().to_string()];
        if kind == LsFilesKind::Others {
            args.push("--exclude-standard".to_string());
        }
        args.push("--".to_string());
        args.extend(paths.iter().cloned());
        let out = self.checked("LsFiles", args)?;
        Ok(split_nul(&out.stdout))
    }

    /// Paths under `paths` that differ from `upstream`.
    pub fn diff_upstream(&self, upstream: &str, paths: &[String]) -> Result<Vec<String>> {
        let mut args = vec![
            "diff".to_string(),
            "-z".to_string(),
            "--name-only".to_string(),
            "--relative".to_string(),
            upstream.to_string(),
            "--".to_string(),
        ];
        args.extend(paths.iter().cloned());
        let out = self.checked("DiffUpstream", args)?;
        Ok(split_nul(&out.stdout))
    }

    /// Full hash of `rev`, `None` when it does not resolve.
    pub fn rev_parse(&self, rev: &str) -> Result<Option<String>> {
        let out = self.run(["rev-parse", "--quiet", "--verify", rev])?;
        if out.success() {
            Ok(Some(out.stdout_text().trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Name of the checked out branch, `None` when detached or unborn.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let out = self.run(["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if out.success() {
            let name = out.stdout_text().trim().to_string();
            Ok(if name.is_empty() { None } else { Some(name) })
        } else {
            Ok(None)
        }
    }

    /// Configured remotes and their URLs.
    pub fn remotes(&self) -> Result<BTreeMap<String, String>> {
        let out = self.checked("RemoteShow", ["remote", "-v", "show", "-n"])?;
        Ok(parse_remotes(&out.stdout_text()))
    }

    pub fn remote_add(&self, name: &str, url: &str) -> Result<()> {
        let out = self.run(["remote", "add", name, url])?;
        if !out.success() {
            let stderr = out.stderr_text();
            if stderr.contains("already exists") {
                return Err(GinError::described(
                    "RemoteAdd",
                    format!("remote with name '{name}' already exists"),
                    stderr,
                ));
            }
            return Err(GinError::command("RemoteAdd", stderr));
        }
        // Retrieve references of the new remote; failures only matter for logs
        let fetch = self.run(["fetch", name])?;
        if !fetch.success() {
            debug!("Fetch after adding remote {} failed: {}", name, fetch.stderr_text());
        }
        Ok(())
    }

    pub fn remote_remove(&self, name: &str) -> Result<()> {
        let out = self.run(["remote", "remove", name])?;
        if !out.success() {
            let stderr = out.stderr_text();
            if stderr.contains("No such remote") {
                return Err(GinError::UnknownRemote {
                    name: name.to_string(),
                });
            }
            return Err(GinError::command("RemoteRemove", stderr));
        }
        Ok(())
    }

    pub fn commit(&self, message: &str) -> Result<()> {
        let out = self.run(["commit".to_string(), format!("--message={message}")])?;
        if out.success() {
            return Ok(());
        }
        let stdout = out.stdout_text();
        if is_nothing_to_commit(&stdout) {
            debug!("Nothing to commit");
            return Err(GinError::NothingToCommit);
        }
        Err(GinError::command("Commit", out.stderr_text()))
    }

    pub fn commit_empty(&self, message: &str) -> Result<()> {
        self.checked(
            "CommitEmpty",
            ["commit".to_string(), "--allow-empty".to_string(), format!("--message={message}")],
        )?;
        Ok(())
    }

    /// Restores `paths` (or the whole tree) from `rev` into the working tree.
    pub fn checkout(&self, rev: &str, paths: &[String]) -> Result<()> {
        let mut args = vec!["checkout".to_string(), rev.to_string(), "--".to_string()];
        if paths.is_empty() {
            args.push(".".to_string());
        } else {
            args.extend(paths.iter().cloned());
        }
        self.checked("Checkout", args)?;
        Ok(())
    }

    /// Aborts an unfinished merge. A plain status run first lets the annex
    /// hooks settle the index; without it the abort can fail.
    pub fn merge_abort(&self) -> Result<()> {
        let _ = self.run(["status"])?;
        let out = self.run(["merge", "--abort"])?;
        if !out.success() {
            warn!("Merge abort failed: {}", out.stderr_text().trim());
        }
        Ok(())
    }

    pub fn merge_in_progress(&self) -> Result<bool> {
        Ok(self.rev_parse("MERGE_HEAD")?.is_some())
    }

    pub fn log(&self, query: &LogQuery) -> Result<Vec<CommitRecord>> {
        let mut args = vec!["log".to_string(), "-z".to_string(), LOG_FORMAT.to_string()];
        push_log_filters(&mut args, query);
        let out = self.run(args)?;
        if !out.success() {
            let stderr = out.stderr_text();
            if stderr.contains("bad revision") || stderr.contains("unknown revision") {
                let rev = query.revrange.clone().unwrap_or_default();
                return Err(GinError::described(
                    "Log",
                    format!("'{rev}' does not match a known version ID or name"),
                    stderr,
                ));
            }
            return Err(GinError::command("Log", stderr));
        }
        let mut commits = parse_log(&out.stdout_text());

        match self.log_diffstat(query) {
            Ok(mut stats) => {
                for commit in &mut commits {
                    if let Some(stat) = stats.remove(&commit.hash) {
                        commit.file_stats = stat;
                    }
                }
            }
            Err(err) => warn!("Failed to get diff stats: {}", err),
        }
        Ok(commits)
    }

    pub fn log_diffstat(&self, query: &LogQuery) -> Result<HashMap<String, DiffStat>> {
        let mut args = vec![
            "log".to_string(),
            "--format=::%H".to_string(),
            "--name-status".to_string(),
        ];
        push_log_filters(&mut args, query);
        let out = self.checked("LogDiffStat", args)?;
        Ok(parse_diffstat(&out.stdout_text()))
    }

    pub fn ls_tree(&self, rev: &str, paths: &[String]) -> Result<Vec<TreeObject>> {
        let mut args = vec![
            "ls-tree".to_string(),
            "--full-tree".to_string(),
            "-z".to_string(),
            "-t".to_string(),
            "-r".to_string(),
            rev.to_string(),
        ];
        args.extend(paths.iter().cloned());
        let out = self.checked("LsTree", args)?;
        Ok(parse_ls_tree(&out.stdout_text()))
    }

    /// Stored content of `path` at `rev`.
    pub fn cat_file(&self, rev: &str, path: &str) -> Result<Vec<u8>> {
        let out = self.checked(
            "CatFile",
            ["cat-file".to_string(), "blob".to_string(), format!("{rev}:{path}")],
        )?;
        Ok(out.stdout)
    }
}

fn push_log_filters(args: &mut Vec<String>, query: &LogQuery) {
    if let Some(count) = query.count.filter(|c| *c > 0) {
        args.push(format!("--max-count={count}"));
    }
    if !query.show_deletes {
        args.push("--diff-filter=d".to_string());
    }
    if let Some(rev) = query.revrange.as_deref().filter(|r| !r.is_empty()) {
        args.push(rev.to_string());
    }
    // Separates revisions from paths even when there are no paths
    args.push("--".to_string());
    args.extend(query.paths.iter().cloned());
}

pub fn is_nothing_to_commit(stdout: &str) -> bool {
    stdout.contains("nothing to commit")
        || stdout.contains("nothing added to commit")
        || stdout.contains("no changes added to commit")
}

pub fn split_nul(bytes: &[u8]) -> Vec<String> {
    bytes
        .split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

/// Parses `remote -v show -n` output into name -> URL.
pub fn parse_remotes(text: &str) -> BTreeMap<String, String> {
    let mut remotes = BTreeMap::new();
    for line in text.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [name, url, _] => {
                remotes.insert(name.to_string(), url.to_string());
            }
            [] => {}
            _ => debug!("Unexpected remote line: {}", line),
        }
    }
    remotes
}

/// Parses NUL-separated records of unit-separator-delimited log fields.
pub fn parse_log(text: &str) -> Vec<CommitRecord> {
    let mut commits = Vec::new();
    for record in text.split('\0') {
        let record = record.trim_start_matches('\n');
        if record.is_empty() {
            continue;
        }
        let fields: Vec<&str> = record.splitn(7, FIELD_SEP).collect();
        let [hash, abbrev, name, email, date, subject, body] = fields.as_slice() else {
            warn!("Could not parse log record: {:?}", record);
            continue;
        };
        commits.push(CommitRecord {
            hash: hash.to_string(),
            abbreviated_hash: abbrev.to_string(),
            author_name: name.to_string(),
            author_email: email.to_string(),
            date: date.to_string(),
            subject: subject.to_string(),
            body: body.trim().to_string(),
            file_stats: DiffStat::default(),
        });
    }
    commits
}

/// Parses `log --format=::%H --name-status` output, keyed by revision hash.
pub fn parse_diffstat(text: &str) -> HashMap<String, DiffStat> {
    let mut stats: HashMap<String, DiffStat> = HashMap::new();
    let mut current: Option<String> = None;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(hash) = line.strip_prefix("::") {
            stats.entry(hash.to_string()).or_default();
            current = Some(hash.to_string());
            continue;
        }
        let Some(hash) = current.as_ref() else {
            continue;
        };
        let Some((code, name)) = line.split_once('\t') else {
            continue;
        };
        let stat = stats.entry(hash.clone()).or_default();
        match code {
            "A" => stat.new_files.push(name.to_string()),
            "M" | "T" => stat.modified_files.push(name.to_string()),
            "D" => stat.deleted_files.push(name.to_string()),
            // Renames and copies are not reported
            c if c.starts_with('R') || c.starts_with('C') => {}
            _ => debug!("Could not parse diffstat line: {}", line),
        }
    }
    stats
}

/// Parses `ls-tree -z` records: `<mode> <type> <hash>\t<name>`.
pub fn parse_ls_tree(text: &str) -> Vec<TreeObject> {
    let mut objects = Vec::new();
    for record in text.split('\0') {
        if record.is_empty() {
            continue;
        }
        let Some((meta, name)) = record.split_once('\t') else {
            continue;
        };
        let words: Vec<&str> = meta.split_whitespace().collect();
        let [mode, kind, hash] = words.as_slice() else {
            continue;
        };
        let Some(kind) = ObjectKind::parse(kind) else {
            continue;
        };
        objects.push(TreeObject {
            name: name.to_string(),
            hash: hash.to_string(),
            kind,
            mode: mode.to_string(),
        });
    }
    objects
}
