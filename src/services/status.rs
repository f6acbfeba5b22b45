//! Per-file sync status.
//!
//! Two algorithms, picked by the repository's operating mode. Both apply their
//! rules in a fixed order into one map, so the last rule to touch a path wins
//! and every path ends up with exactly one status.

use gin_core::{ChangeCode, ContentLocationInfo, FileStatus, GinError, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path};
use tracing::debug;

use super::RepoContext;
use crate::adapters::LsFilesKind;

pub type StatusMap = BTreeMap<String, FileStatus>;

/// Expands glob patterns relative to `dir`.
///
/// With `strict`, a pattern that matches nothing is an error; otherwise the
/// pattern itself is kept so the tools can report on it.
pub fn expand_globs(dir: &Path, patterns: &[String], strict: bool) -> Result<Vec<String>> {
    let mut expanded = Vec::new();
    for pattern in patterns {
        let full = dir.join(pattern);
        let paths = glob::glob(&full.to_string_lossy()).map_err(|err| GinError::BadPattern {
            pattern: pattern.clone(),
            reason: err.msg.to_string(),
        })?;
        let mut matched = false;
        for path in paths.flatten() {
            matched = true;
            let relative = path.strip_prefix(dir).unwrap_or(&path);
            expanded.push(clean_path(&relative.to_string_lossy()));
        }
        if !matched {
            if strict {
                return Err(GinError::NoMatch {
                    pattern: pattern.clone(),
                });
            }
            debug!("No match for {}, passing it on as is", pattern);
            expanded.push(clean_path(pattern));
        }
    }
    expanded.dedup();
    Ok(expanded)
}

/// Lexically normalised path: no `.` components, `..` folded where possible,
/// no trailing separator, forward slashes.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut absolute = false;
    for component in Path::new(path).components() {
        match component {
            Component::RootDir => absolute = true,
            Component::Prefix(prefix) => parts.push(prefix.as_os_str().to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push("..".to_string()),
            },
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Status of content-bearing files from their locations.
fn content_status(info: &ContentLocationInfo) -> FileStatus {
    if !info.present_here() {
        FileStatus::NoContent
    } else if info.only_here() {
        FileStatus::LocalChanges
    } else {
        FileStatus::Synced
    }
}

fn apply_locations(statuses: &mut StatusMap, infos: &[ContentLocationInfo]) {
    for info in infos {
        statuses.insert(clean_path(&info.file), content_status(info));
    }
}

/// Status of every path under `patterns` (all tracked and untracked files when empty).
///
/// Patterns that match nothing on disk are passed on as is, so a deleted
/// tracked file is still reported.
pub fn file_status(ctx: &RepoContext, patterns: &[String]) -> Result<StatusMap> {
    let paths = expand_globs(ctx.dir(), patterns, false)?;
    if ctx.is_direct() {
        direct_status(ctx, &paths)
    } else {
        indirect_status(ctx, &paths)
    }
}

/// Direct mode: locations first, then the annex status codes, then every
/// remaining tracked path compared against the upstream.
pub fn direct_status(ctx: &RepoContext, paths: &[String]) -> Result<StatusMap> {
    let annex = ctx.annex();
    let git = ctx.git();
    let mut statuses = StatusMap::new();

    apply_locations(&mut statuses, &annex.whereis(paths)?);

    let query = if paths.is_empty() {
        vec![".".to_string()]
    } else {
        paths.to_vec()
    };
    for entry in annex.status(&query)? {
        let status = match entry.code {
            ChangeCode::Untracked => FileStatus::Untracked,
            ChangeCode::Modified => FileStatus::Modified,
            ChangeCode::Deleted => FileStatus::Removed,
            _ => continue,
        };
        statuses.insert(clean_path(&entry.file), status);
    }

    let _guard = ctx.bare_off()?;
    let mut unclassified = HashSet::new();
    for file in git.ls_files(LsFilesKind::Cached, paths)? {
        let file = clean_path(&file);
        if !statuses.contains_key(&file) {
            statuses.insert(file.clone(), FileStatus::Synced);
            unclassified.insert(file);
        }
    }
    if unclassified.is_empty() {
        return Ok(statuses);
    }
    match ctx.upstream()? {
        Some(upstream) => {
            for file in git.diff_upstream(&upstream, paths)? {
                let file = clean_path(&file);
                if unclassified.contains(&file) {
                    statuses.insert(file, FileStatus::LocalChanges);
                }
            }
        }
        None => {
            for file in unclassified {
                statuses.insert(file, FileStatus::LocalChanges);
            }
        }
    }
    Ok(statuses)
}

/// Indirect mode: four listings gathered concurrently, then the upstream diff,
/// content locations, working tree changes and finally lock toggles.
pub fn indirect_status(ctx: &RepoContext, paths: &[String]) -> Result<StatusMap> {
    let git = ctx.git();
    let listing = |kind| -> Result<Vec<String>> {
        Ok(git
            .ls_files(kind, paths)?
            .iter()
            .map(|f| clean_path(f))
            .collect())
    };
    let ((cached, modified), (untracked, deleted)) = rayon::join(
        || rayon::join(|| listing(LsFilesKind::Cached), || listing(LsFilesKind::Modified)),
        || rayon::join(|| listing(LsFilesKind::Others), || listing(LsFilesKind::Deleted)),
    );
    let (cached, modified, untracked, deleted) = (cached?, modified?, untracked?, deleted?);
    debug!(
        cached = cached.len(),
        modified = modified.len(),
        untracked = untracked.len(),
        deleted = deleted.len(),
        "Listed working tree"
    );

    let mut statuses = StatusMap::new();
    if !cached.is_empty() {
        let changed: HashSet<String> = match ctx.upstream()? {
            Some(upstream) => git
                .diff_upstream(&upstream, paths)?
                .iter()
                .map(|f| clean_path(f))
                .collect(),
            None => cached.iter().cloned().collect(),
        };
        for file in cached.iter().filter(|f| changed.contains(*f)) {
            statuses.insert(file.clone(), FileStatus::LocalChanges);
        }
        apply_locations(&mut statuses, &ctx.annex().whereis(paths)?);
        for file in &cached {
            statuses.entry(file.clone()).or_insert(FileStatus::Synced);
        }
    }

    for file in modified {
        statuses.insert(file, FileStatus::Modified);
    }
    for file in untracked {
        statuses.insert(file, FileStatus::Untracked);
    }
    for file in deleted {
        statuses.insert(file, FileStatus::Removed);
    }

    for entry in ctx.annex().status(paths)? {
        if entry.code == ChangeCode::TypeChanged {
            statuses.insert(clean_path(&entry.file), FileStatus::TypeChange);
        }
    }
    Ok(statuses)
}

/// Paths grouped by status in display order, sorted by name within a group.
pub fn group_by_status(statuses: &StatusMap) -> BTreeMap<FileStatus, Vec<String>> {
    let mut groups: BTreeMap<FileStatus, Vec<String>> = BTreeMap::new();
    for (file, status) in statuses {
        groups.entry(*status).or_default().push(file.clone());
    }
    groups
}
