use anyhow::Result;
use gin_cli::services::transfer::{clone_repo, pull, push, sync, CloneRequest, GIT_ITEM};
use gin_cli::services::{RepoContext, Tools};
use gin_cli::testing::{plain_builder, Response, ScriptedRunner};
use gin_core::ports::Tool;
use gin_core::{GinError, StatusEvent};
use std::sync::Arc;
use tempfile::TempDir;

fn scripted(runner: ScriptedRunner) -> (Arc<ScriptedRunner>, Tools) {
    let runner = Arc::new(runner);
    (runner.clone(), Tools::new(runner, plain_builder()))
}

fn final_error(events: &[StatusEvent]) -> Option<GinError> {
    events
        .last()
        .filter(|event| event.file_name.is_empty())
        .and_then(|event| event.error.clone())
}

const REJECTED: &str = "To ssh://git@gin.g-node.org:22/alice/exp\n ! [rejected]        master -> master (fetch first)\nerror: failed to push some refs to 'ssh://git@gin.g-node.org:22/alice/exp'\n";

#[test]
fn test_push_rejected_stops_before_content() -> Result<()> {
    let dir = TempDir::new()?;
    let (runner, tools) = scripted(
        ScriptedRunner::new().annex(&["sync", "--no-pull"], Response::fail(1, REJECTED)),
    );
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let events: Vec<_> = push(&ctx, vec![], "origin".to_string()).iter().collect();

    assert_eq!(
        final_error(&events),
        Some(GinError::RemoteAhead {
            operation: "upload".to_string()
        })
    );
    assert_eq!(runner.count(Tool::Annex, &["copy"]), 0);
    assert_eq!(runner.count(Tool::Annex, &["whereis"]), 0);
    Ok(())
}

#[test]
fn test_push_uploads_present_content() -> Result<()> {
    let dir = TempDir::new()?;
    let whereis = [
        r#"{"file":"a.dat","key":"MD5-s4--aa","success":true,"whereis":[{"here":true,"uuid":"1","description":"me"}]}"#,
        r#"{"file":"b.dat","key":"MD5-s4--bb","success":true,"whereis":[{"here":false,"uuid":"2","description":"origin"}]}"#,
    ]
    .join("\n");
    let copy = [
        r#"{"byte-progress":2,"action":{"command":"copy","file":"a.dat","key":"MD5-s4--aa"},"total-size":4,"percent-progress":"50%"}"#,
        r#"{"command":"copy","note":"to origin...","success":true,"key":"MD5-s4--aa","file":"a.dat"}"#,
    ]
    .join("\n");
    let (runner, tools) = scripted(
        ScriptedRunner::new()
            .annex(
                &["sync", "--no-pull"],
                Response::ok("").with_stderr("Writing objects:  50% (1/2)\rWriting objects: 100% (2/2), 1.00 KiB | 1.00 MiB/s, done.\n"),
            )
            .annex(&["whereis"], Response::ok(whereis))
            .annex(&["copy"], Response::ok(copy)),
    );
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let events: Vec<_> = push(&ctx, vec!["a.dat".to_string(), "b.dat".to_string()], "origin".to_string())
        .iter()
        .collect();

    assert!(final_error(&events).is_none());
    assert!(events
        .iter()
        .any(|e| e.file_name == GIT_ITEM && e.state == "Uploading git files (to: origin)" && e.is_complete()));
    assert!(events
        .iter()
        .any(|e| e.file_name == "a.dat" && e.progress == "50%"));
    assert!(events.iter().any(|e| e.file_name == "a.dat" && e.is_complete()));

    // Only content present here is handed to the copy
    let copies = runner.args_of(Tool::Annex, &["copy"]);
    assert_eq!(copies.len(), 1);
    assert!(copies[0].contains(&"--to=origin".to_string()));
    assert!(copies[0].contains(&"a.dat".to_string()));
    assert!(!copies[0].contains(&"b.dat".to_string()));
    Ok(())
}

#[test]
fn test_push_without_transfers_reports_content_not_transferred() -> Result<()> {
    let dir = TempDir::new()?;
    let whereis =
        r#"{"file":"a.dat","key":"MD5-s4--aa","success":true,"whereis":[{"here":true,"uuid":"1","description":"me"}]}"#;
    let (_, tools) = scripted(
        ScriptedRunner::new()
            .annex(&["whereis"], Response::ok(whereis))
            .annex(&["copy"], Response::ok("")),
    );
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let events: Vec<_> = push(&ctx, vec![], "origin".to_string()).iter().collect();

    assert_eq!(
        final_error(&events),
        Some(GinError::ContentNotTransferred {
            remote: "origin".to_string(),
            files: vec!["a.dat".to_string()],
        })
    );
    Ok(())
}

#[test]
fn test_push_with_nothing_present_reports_metadata_upload() -> Result<()> {
    let dir = TempDir::new()?;
    let (runner, tools) = scripted(ScriptedRunner::new());
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let events: Vec<_> = push(&ctx, vec!["notes.txt".to_string()], "origin".to_string())
        .iter()
        .collect();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].file_name, GIT_ITEM);
    assert_eq!(events[0].state, "Uploading git files (to: origin)");
    assert!(events[0].is_complete());
    assert!(events[0].error.is_none());
    assert_eq!(runner.count(Tool::Annex, &["copy"]), 0);
    Ok(())
}

#[test]
fn test_push_item_failure_is_in_band() -> Result<()> {
    let dir = TempDir::new()?;
    let whereis =
        r#"{"file":"a.dat","key":"MD5-s4--aa","success":true,"whereis":[{"here":true,"uuid":"1","description":"me"}]}"#;
    let copy = r#"{"command":"copy","note":"Unable to access these remotes: origin","success":false,"key":"MD5-s4--aa","file":"a.dat"}"#;
    let (_, tools) = scripted(
        ScriptedRunner::new()
            .annex(&["whereis"], Response::ok(whereis))
            .annex(&["copy"], Response::ok(copy).with_stderr("copy: 1 failed\n")),
    );
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let events: Vec<_> = push(&ctx, vec![], "origin".to_string()).iter().collect();

    assert!(final_error(&events).is_none());
    let failed = events.iter().find(|e| e.file_name == "a.dat").and_then(|e| e.error.clone());
    assert_eq!(
        failed,
        Some(GinError::Transfer {
            message: "authorisation failed or remote storage unavailable".to_string()
        })
    );
    Ok(())
}

const OVERWRITE: &str = "error: Your local changes to the following files would be overwritten by merge:\n\tnotes.txt\nPlease commit your changes or stash them before you merge.\nAborting\n";

#[test]
fn test_pull_would_overwrite_lists_files() -> Result<()> {
    let dir = TempDir::new()?;
    let (runner, tools) = scripted(
        ScriptedRunner::new()
            .annex(&["sync", "--no-push"], Response::fail(1, OVERWRITE))
            .git(&["rev-parse", "--quiet", "--verify", "MERGE_HEAD"], Response::fail(1, "")),
    );
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let events: Vec<_> = pull(&ctx, Some("origin".to_string()), false).iter().collect();

    assert_eq!(
        final_error(&events),
        Some(GinError::WouldOverwrite {
            operation: "download".to_string(),
            files: vec!["notes.txt".to_string()],
        })
    );
    assert_eq!(runner.count(Tool::Git, &["merge", "--abort"]), 0);
    let syncs = runner.args_of(Tool::Annex, &["sync"]);
    assert_eq!(syncs[0], vec!["sync", "--no-push", "--no-commit", "origin"]);
    Ok(())
}

#[test]
fn test_pull_merge_conflict_aborts_merge() -> Result<()> {
    let dir = TempDir::new()?;
    let conflict = "CONFLICT (content): Merge conflict in data.csv\nAutomatic merge failed; fix conflicts and then commit the result.\n";
    let (runner, tools) = scripted(
        ScriptedRunner::new().annex(&["sync", "--no-push"], Response::fail(1, "").with_stdout(conflict)),
    );
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let events: Vec<_> = pull(&ctx, None, false).iter().collect();

    assert_eq!(
        final_error(&events),
        Some(GinError::MergeConflict {
            operation: "download".to_string(),
            files: vec!["data.csv".to_string()],
        })
    );
    assert_eq!(runner.count(Tool::Git, &["merge", "--abort"]), 1);
    Ok(())
}

#[test]
fn test_pull_keeps_conflict_error_when_abort_cannot_run() -> Result<()> {
    let dir = TempDir::new()?;
    let conflict = "CONFLICT (content): Merge conflict in data.csv\n";
    let (runner, tools) = scripted(
        ScriptedRunner::new()
            .annex(&["sync", "--no-push"], Response::fail(1, "").with_stdout(conflict))
            .git(&["merge", "--abort"], Response::unstartable()),
    );
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let events: Vec<_> = pull(&ctx, Some("origin".to_string()), false).iter().collect();

    assert_eq!(
        final_error(&events),
        Some(GinError::MergeConflict {
            operation: "download".to_string(),
            files: vec!["data.csv".to_string()],
        })
    );
    assert_eq!(runner.count(Tool::Git, &["merge", "--abort"]), 1);
    Ok(())
}

#[test]
fn test_pull_reports_resolved_conflicts() -> Result<()> {
    let dir = TempDir::new()?;
    let out = "merge synced/master\nadd scan.variant-9f0e.tif ok\nadd scan.variant-1a2b.tif ok\n";
    let (runner, tools) = scripted(ScriptedRunner::new().annex(&["sync", "--no-push"], Response::ok(out)));
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let events: Vec<_> = pull(&ctx, Some("origin".to_string()), false).iter().collect();

    let states: Vec<(&str, &str)> = events
        .iter()
        .map(|e| (e.file_name.as_str(), e.state.as_str()))
        .collect();
    assert_eq!(
        states,
        vec![
            ("scan.tif", "Conflict resolved (both versions kept)"),
            (GIT_ITEM, "Downloading changes")
        ]
    );
    assert!(events.iter().all(|e| e.error.is_none()));
    assert_eq!(runner.count(Tool::Git, &["merge", "--abort"]), 0);
    Ok(())
}

#[test]
fn test_pull_then_content() -> Result<()> {
    let dir = TempDir::new()?;
    let get = r#"{"command":"get","note":"from origin...","success":true,"key":"MD5-s4--aa","file":"a.dat"}"#;
    let (runner, tools) = scripted(ScriptedRunner::new().annex(&["get"], Response::ok(get)));
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let events: Vec<_> = pull(&ctx, Some("origin".to_string()), true).iter().collect();

    let states: Vec<(&str, &str)> = events
        .iter()
        .map(|e| (e.file_name.as_str(), e.state.as_str()))
        .collect();
    assert_eq!(states, vec![(GIT_ITEM, "Downloading changes"), ("a.dat", "Downloading")]);
    assert_eq!(runner.count(Tool::Annex, &["get", "--json-progress"]), 1);
    Ok(())
}

#[test]
fn test_sync_reports_resolved_conflicts() -> Result<()> {
    let dir = TempDir::new()?;
    let out = "merge synced/master\nCONFLICT: both added data.csv\nadd data.variant-a1b2.csv ok\nadd data.variant-c3d4.csv ok\n";
    let (runner, tools) = scripted(ScriptedRunner::new().annex(&["sync", "--resolvemerge"], Response::ok(out)));
    let ctx = RepoContext::with_mode(tools, dir.path(), false);

    let events: Vec<_> = sync(&ctx, true).iter().collect();

    let resolved: Vec<_> = events
        .iter()
        .filter(|e| e.state == "Conflict resolved (both versions kept)")
        .map(|e| e.file_name.clone())
        .collect();
    assert_eq!(resolved, vec!["data.csv".to_string()]);
    assert!(events.last().is_some_and(|e| e.file_name == GIT_ITEM && e.is_complete()));
    assert_eq!(runner.args_of(Tool::Annex, &["sync"])[0], vec!["sync", "--resolvemerge", "--content"]);
    Ok(())
}

#[test]
fn test_clone_missing_repository() -> Result<()> {
    let dir = TempDir::new()?;
    let (runner, tools) = scripted(ScriptedRunner::new().git(
        &["clone"],
        Response::fail(128, "Cloning into 'exp'...\nfatal: remote error: alice/exp does not exist\n"),
    ));
    let request = CloneRequest {
        url: "ssh://git@gin.g-node.org:22/alice/exp".to_string(),
        parent: dir.path().to_path_buf(),
        name: "exp".to_string(),
        description: "alice@laptop".to_string(),
    };

    let events: Vec<_> = clone_repo(&tools, request).iter().collect();

    let message = final_error(&events).map(|e| e.to_string()).unwrap_or_default();
    assert!(message.contains("Make sure you typed the repository path correctly"));
    assert_eq!(runner.count(Tool::Annex, &["init"]), 0);
    Ok(())
}

#[test]
fn test_clone_initialises_new_copy() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::create_dir_all(dir.path().join("exp").join(".git"))?;
    let (runner, tools) = scripted(
        ScriptedRunner::new()
            .git(
                &["clone"],
                Response::ok("").with_stderr("Cloning into 'exp'...\nReceiving objects: 100% (10/10), 2.00 KiB | 2.00 MiB/s, done.\n"),
            )
            .annex(&["version"], Response::ok("8.20200226\n")),
    );
    let request = CloneRequest {
        url: "ssh://git@gin.g-node.org:22/alice/exp".to_string(),
        parent: dir.path().to_path_buf(),
        name: "exp".to_string(),
        description: "alice@laptop".to_string(),
    };

    let events: Vec<_> = clone_repo(&tools, request).iter().collect();

    assert!(final_error(&events).is_none());
    assert!(events
        .iter()
        .any(|e| e.state == "Downloading repository" && e.progress == "100%" && e.rate == "2.00 MiB/s"));
    assert!(events
        .last()
        .is_some_and(|e| e.state == "Initialising local storage" && e.is_complete()));
    assert_eq!(runner.count(Tool::Annex, &["init"]), 1);
    Ok(())
}
