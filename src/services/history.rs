//! Version history and restoring files from past revisions.

use crossbeam_channel::{unbounded, Receiver, Sender};
use gin_core::{CheckoutEvent, CheckoutKind, CommitRecord, GinError, ObjectKind, Result, TreeObject};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, warn};

use super::RepoContext;
use crate::adapters::LogQuery;

/// Marker found in the stored text of a pointer to annexed content
pub const ANNEX_POINTER_MARKER: &str = "/annex/objects";
/// How much of a stored object is inspected for the marker
const POINTER_SCAN_LEN: usize = 255;

/// Revisions matching `query`, newest first, each with its file changes.
pub fn log(ctx: &RepoContext, query: &LogQuery) -> Result<Vec<CommitRecord>> {
    let _guard = ctx.bare_off()?;
    ctx.git().log(query)
}

/// Restores `paths` (the whole tree when empty) to their state at `rev`, then
/// re-checks restored annexed content.
pub fn checkout_version(ctx: &RepoContext, rev: &str, paths: &[String]) -> Result<()> {
    let _guard = ctx.bare_off()?;
    ctx.git().checkout(rev, paths)?;
    if let Err(err) = ctx.annex().fsck(paths) {
        warn!("Content check after checkout failed: {}", err);
    }
    Ok(())
}

/// Key named by a content pointer, `None` for ordinary content.
pub fn annex_pointer_key(content: &[u8]) -> Option<String> {
    let head = &content[..content.len().min(POINTER_SCAN_LEN)];
    let text = String::from_utf8_lossy(head);
    if !text.contains(ANNEX_POINTER_MARKER) {
        return None;
    }
    let text = String::from_utf8_lossy(content);
    let key = text.trim().rsplit('/').next()?.trim();
    (!key.is_empty()).then(|| key.to_string())
}

/// `dir/name.ext` becomes `dir/name-suffix.ext`.
pub fn versioned_name(name: &str, suffix: &str) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = match path.extension() {
        Some(ext) => format!("{stem}-{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{suffix}"),
    };
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.join(file).to_string_lossy().replace('\\', "/"),
        None => file,
    }
}

/// Where historical copies go and how they are named.
#[derive(Debug, Clone)]
pub struct CopyTarget {
    pub destination: PathBuf,
    /// Appended to each file stem, e.g. the revision date
    pub suffix: String,
}

/// Copies the entries of `paths` at `rev` under `target` without touching
/// the working tree. Annexed content that is not present is fetched by key.
pub fn checkout_copies(
    ctx: &RepoContext,
    rev: String,
    paths: Vec<String>,
    target: CopyTarget,
) -> Receiver<CheckoutEvent> {
    let (tx, rx) = unbounded();
    let ctx = ctx.clone();
    thread::spawn(move || {
        if let Err(err) = run_checkout_copies(&ctx, &rev, &paths, &target, &tx) {
            let _ = tx.send(CheckoutEvent::failure(err));
        }
    });
    rx
}

fn run_checkout_copies(
    ctx: &RepoContext,
    rev: &str,
    paths: &[String],
    target: &CopyTarget,
    tx: &Sender<CheckoutEvent>,
) -> Result<()> {
    let objects = ctx.git().ls_tree(rev, paths)?;
    debug!("{} objects at {}", objects.len(), rev);
    for object in objects {
        let event = copy_object(ctx, rev, &object, target);
        if tx.send(event).is_err() {
            break;
        }
    }
    Ok(())
}

fn copy_object(ctx: &RepoContext, rev: &str, object: &TreeObject, target: &CopyTarget) -> CheckoutEvent {
    let mut event = CheckoutEvent {
        file_name: object.name.clone(),
        kind: None,
        destination: String::new(),
        error: None,
    };
    match write_object(ctx, rev, object, target) {
        Ok((kind, destination)) => {
            event.kind = Some(kind);
            event.destination = destination;
        }
        Err(err) => event.error = Some(err),
    }
    event
}

fn write_object(
    ctx: &RepoContext,
    rev: &str,
    object: &TreeObject,
    target: &CopyTarget,
) -> Result<(CheckoutKind, String)> {
    if object.kind == ObjectKind::Tree {
        let dir = target.destination.join(&object.name);
        fs::create_dir_all(&dir).map_err(|e| GinError::io(format!("creating {}", dir.display()), &e))?;
        return Ok((CheckoutKind::Tree, dir.to_string_lossy().into_owned()));
    }
    if object.kind != ObjectKind::Blob {
        return Err(GinError::Io {
            context: object.name.clone(),
            reason: format!("cannot copy object of kind {:?}", object.kind),
        });
    }

    let content = ctx.git().cat_file(rev, &object.name)?;
    if let Some(key) = annex_pointer_key(&content) {
        let source = content_path(ctx, &key)?;
        let out = output_path(target, &object.name)?;
        fs::copy(&source, &out).map_err(|e| GinError::io(format!("copying {}", source.display()), &e))?;
        return Ok((CheckoutKind::Annex, out.to_string_lossy().into_owned()));
    }
    if object.is_symlink() {
        return Ok((CheckoutKind::Link, String::from_utf8_lossy(&content).into_owned()));
    }
    let out = output_path(target, &object.name)?;
    fs::write(&out, &content).map_err(|e| GinError::io(format!("writing {}", out.display()), &e))?;
    Ok((CheckoutKind::Git, out.to_string_lossy().into_owned()))
}

/// Local content file for `key`, fetched once if missing.
fn content_path(ctx: &RepoContext, key: &str) -> Result<PathBuf> {
    let annex = ctx.annex();
    if let Some(path) = annex.content_location(key)? {
        return Ok(path);
    }
    debug!("Content for {} not present, fetching", key);
    annex.get_key(key)?;
    annex.content_location(key)?.ok_or_else(|| GinError::Transfer {
        message: format!("content for key {key} is not available"),
    })
}

/// Versioned output file for `name`; never replaces an existing file.
fn output_path(target: &CopyTarget, name: &str) -> Result<PathBuf> {
    let out = target.destination.join(versioned_name(name, &target.suffix));
    if out.exists() {
        return Err(GinError::described(
            "Checkout",
            format!("{} already exists, not overwriting", out.display()),
            "",
        ));
    }
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent).map_err(|e| GinError::io(format!("creating {}", parent.display()), &e))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_detection() {
        assert_eq!(
            annex_pointer_key(b"../../.git/annex/objects/Xk/p2/MD5-s5--d41d8/MD5-s5--d41d8\n"),
            Some("MD5-s5--d41d8".to_string())
        );
        assert_eq!(
            annex_pointer_key(b"/annex/objects/MD5-s12--abc"),
            Some("MD5-s12--abc".to_string())
        );
        assert_eq!(annex_pointer_key(b"just text about annex"), None);

        let mut long = vec![b'x'; 300];
        long.extend_from_slice(b"/annex/objects/KEY");
        assert_eq!(annex_pointer_key(&long), None);
    }

    #[test]
    fn versioned_names() {
        assert_eq!(versioned_name("data/scan.tif", "2020-01-02"), "data/scan-2020-01-02.tif");
        assert_eq!(versioned_name("README", "abc123"), "README-abc123");
        assert_eq!(versioned_name("a.tar.gz", "v1"), "a.tar-v1.gz");
    }
}
