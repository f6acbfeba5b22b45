use anyhow::Result;
use gin_cli::services::content::remove_content;
use gin_cli::services::{RepoContext, Tools};
use gin_cli::testing::{plain_builder, Response, ScriptedRunner};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_unsafe_drop_is_reported_once_as_failed() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("big.dat"), "data")?;
    let drop = r#"{"command":"drop","note":"unsafe\nCould only verify the existence of 0 out of 1 necessary copy","success":false,"key":"MD5-s4--aa","file":"big.dat"}"#;
    let runner = Arc::new(ScriptedRunner::new().annex(&["drop", "--json"], Response::ok(drop)));
    let ctx = RepoContext::with_mode(Tools::new(runner, plain_builder()), dir.path(), false);

    let events: Vec<_> = remove_content(&ctx, vec!["big.dat".to_string()]).iter().collect();

    let message = events
        .iter()
        .find(|e| e.file_name == "big.dat")
        .and_then(|e| e.error.as_ref())
        .map(|err| err.to_string());
    assert_eq!(message.as_deref(), Some("failed: unsafe, could not verify remote copy"));
    Ok(())
}
