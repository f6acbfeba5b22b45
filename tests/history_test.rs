use anyhow::Result;
use gin_cli::adapters::LogQuery;
use gin_cli::services::history::{checkout_copies, checkout_version, log, CopyTarget};
use gin_cli::services::{RepoContext, Tools};
use gin_cli::testing::{plain_builder, Response, ScriptedRunner};
use gin_core::ports::Tool;
use gin_core::{CheckoutEvent, CheckoutKind};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn scripted(runner: ScriptedRunner) -> (Arc<ScriptedRunner>, Tools) {
    let runner = Arc::new(runner);
    (runner.clone(), Tools::new(runner, plain_builder()))
}

const TREE: &str = "100644 blob h1\tscan.tif\0040000 tree h2\tsub\0100644 blob h3\tsub/notes.txt\0120000 blob h4\tlatest\0";

fn history_runner() -> ScriptedRunner {
    ScriptedRunner::new()
        .git(&["ls-tree"], Response::ok(TREE))
        .git(
            &["cat-file", "blob", "rev1:scan.tif"],
            Response::ok("../.git/annex/objects/Xk/p2/MD5-s5--aa/MD5-s5--aa\n"),
        )
        .git(&["cat-file", "blob", "rev1:sub/notes.txt"], Response::ok("hello"))
        .git(&["cat-file", "blob", "rev1:latest"], Response::ok("sub/notes.txt"))
        .on_sequence(
            Tool::Annex,
            &["contentlocation", "MD5-s5--aa"],
            vec![Response::fail(1, ""), Response::ok(".git/annex/objects/MD5-s5--aa\n")],
        )
}

fn target(dir: &TempDir) -> CopyTarget {
    CopyTarget {
        destination: dir.path().join("restored"),
        suffix: "2024-01-02-030405".to_string(),
    }
}

#[test]
fn test_checkout_copies_writes_versioned_files() -> Result<()> {
    let dir = TempDir::new()?;
    let objects = dir.path().join(".git").join("annex").join("objects");
    fs::create_dir_all(&objects)?;
    fs::write(objects.join("MD5-s5--aa"), "image")?;
    let (runner, tools) = scripted(history_runner());
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let events: Vec<CheckoutEvent> = checkout_copies(&ctx, "rev1".to_string(), vec![], target(&dir))
        .iter()
        .collect();

    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.error.is_none()));
    let restored = dir.path().join("restored");
    assert_eq!(fs::read_to_string(restored.join("scan-2024-01-02-030405.tif"))?, "image");
    assert_eq!(fs::read_to_string(restored.join("sub").join("notes-2024-01-02-030405.txt"))?, "hello");

    let kinds: Vec<Option<CheckoutKind>> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            Some(CheckoutKind::Annex),
            Some(CheckoutKind::Tree),
            Some(CheckoutKind::Git),
            Some(CheckoutKind::Link)
        ]
    );
    assert_eq!(events[3].destination, "sub/notes.txt");
    assert!(!restored.join("latest-2024-01-02-030405").exists());

    // Missing content is fetched exactly once
    assert_eq!(runner.count(Tool::Annex, &["get", "--key=MD5-s5--aa"]), 1);
    Ok(())
}

#[test]
fn test_checkout_copies_never_overwrites() -> Result<()> {
    let dir = TempDir::new()?;
    let objects = dir.path().join(".git").join("annex").join("objects");
    fs::create_dir_all(&objects)?;
    fs::write(objects.join("MD5-s5--aa"), "image")?;
    let existing = dir.path().join("restored").join("sub");
    fs::create_dir_all(&existing)?;
    fs::write(existing.join("notes-2024-01-02-030405.txt"), "mine")?;
    let (_, tools) = scripted(history_runner());
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let events: Vec<CheckoutEvent> = checkout_copies(&ctx, "rev1".to_string(), vec![], target(&dir))
        .iter()
        .collect();

    let failed: Vec<&str> = events
        .iter()
        .filter(|e| e.error.is_some())
        .map(|e| e.file_name.as_str())
        .collect();
    assert_eq!(failed, vec!["sub/notes.txt"]);
    assert_eq!(fs::read_to_string(existing.join("notes-2024-01-02-030405.txt"))?, "mine");
    Ok(())
}

#[test]
fn test_checkout_copies_unknown_revision() -> Result<()> {
    let dir = TempDir::new()?;
    let (_, tools) = scripted(
        ScriptedRunner::new().git(&["ls-tree"], Response::fail(128, "fatal: Not a valid object name nope\n")),
    );
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let events: Vec<CheckoutEvent> = checkout_copies(&ctx, "nope".to_string(), vec![], target(&dir))
        .iter()
        .collect();

    assert_eq!(events.len(), 1);
    assert!(events[0].file_name.is_empty());
    assert!(events[0].error.is_some());
    Ok(())
}

#[test]
fn test_checkout_version_checks_content_afterwards() -> Result<()> {
    let dir = TempDir::new()?;
    let (runner, tools) = scripted(ScriptedRunner::new().annex(&["fsck"], Response::fail(1, "fsck failed")));
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    checkout_version(&ctx, "rev1", &["data".to_string()])?;

    assert_eq!(runner.args_of(Tool::Git, &["checkout"])[0], vec!["checkout", "rev1", "--", "data"]);
    assert_eq!(runner.count(Tool::Annex, &["fsck", "data"]), 1);
    Ok(())
}

#[test]
fn test_log_parses_records() -> Result<()> {
    let dir = TempDir::new()?;
    let text = "a1b2c3\u{1f}a1b\u{1f}Ada\u{1f}ada@example.org\u{1f}2024-03-01T10:00:00+01:00\u{1f}Add data\u{1f}\0";
    let (runner, tools) = scripted(ScriptedRunner::new().git(&["log", "-z"], Response::ok(text)));
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let query = LogQuery {
        count: Some(5),
        paths: vec!["data".to_string()],
        ..LogQuery::default()
    };
    let commits = log(&ctx, &query)?;

    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].subject, "Add data");
    let args = &runner.args_of(Tool::Git, &["log"])[0];
    assert!(args.contains(&"--max-count=5".to_string()));
    assert!(args.contains(&"--diff-filter=d".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("data"));
    Ok(())
}
