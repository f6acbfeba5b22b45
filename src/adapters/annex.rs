use gin_core::ports::{Invocation, ProcessHandle, ProcessOutput, ProcessRunner};
use gin_core::{ChangeCode, ChangeEntry, ContentLocationInfo, GinError, Location, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::command::CommandBuilder;
use crate::progress::{KeyMetadata, KeyName};

/// Metadata field holding the original file name of annexed content
pub const NAME_FIELD: &str = "ginfilename";
/// Companion field the annex maintains for every metadata field
pub const NAME_CHANGED_FIELD: &str = "ginfilename-lastchanged";

#[derive(Debug, Deserialize)]
struct WhereisLine {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    whereis: Vec<WhereisLocation>,
}

#[derive(Debug, Deserialize)]
struct WhereisLocation {
    #[serde(default)]
    here: bool,
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct StatusLine {
    status: String,
    file: String,
}

#[derive(Debug, Deserialize)]
struct MetadataLine {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    fields: std::collections::HashMap<String, Vec<String>>,
}

/// Typed queries against the content-annex tool for one working directory.
pub struct Annex<'a> {
    runner: &'a dyn ProcessRunner,
    builder: &'a CommandBuilder,
    dir: &'a Path,
}

impl<'a> Annex<'a> {
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
        self.builder.annex(self.dir, args)
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

    pub fn version(&self) -> Result<String> {
        let out = self.run(["version", "--raw"])?;
        if !out.success() {
            return Err(GinError::command("AnnexVersion", out.stderr_text()));
        }
        Ok(out.stdout_text().trim().to_string())
    }

    pub fn init(&self, description: &str, version: &str) -> Result<()> {
        let out = self.run([
            "init".to_string(),
            description.to_string(),
            format!("--version={version}"),
        ])?;
        if !out.success() {
            return Err(GinError::described(
                "AnnexInit",
                "Repository annex initialisation failed.",
                out.stderr_text(),
            ));
        }
        Ok(())
    }

    /// Content locations of annexed files among `paths`.
    ///
    /// Lines that fail to parse and per-file failures are skipped: a file with
    /// no usable answer simply has no entry.
    pub fn whereis(&self, paths: &[String]) -> Result<Vec<ContentLocationInfo>> {
        let mut args = vec!["whereis".to_string(), "--json".to_string()];
        args.extend(paths.iter().cloned());
        let out = self.run(args)?;
        if !out.success() {
            debug!("whereis reported failures: {}", out.stderr_text().trim());
        }
        Ok(parse_whereis(&out.stdout_text()))
    }

    /// Per-path change codes. `paths` empty means the whole working tree.
    pub fn status(&self, paths: &[String]) -> Result<Vec<ChangeEntry>> {
        let mut args = vec!["status".to_string(), "--json".to_string()];
        args.extend(paths.iter().cloned());
        let out = self.run(args)?;
        let stdout = out.stdout_text();
        if !out.success() && stdout.trim().is_empty() {
            return Err(GinError::command("AnnexStatus", out.stderr_text()));
        }
        Ok(parse_status(&stdout))
    }

    /// Local path of the content for `key`, `None` when it is not present here.
    pub fn content_location(&self, key: &str) -> Result<Option<PathBuf>> {
        let out = self.run(["contentlocation", key])?;
        let location = out.stdout_text().trim().to_string();
        if !out.success() || location.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.dir.join(location)))
    }

    /// Fetches content for `key` from whichever remote has it.
    pub fn get_key(&self, key: &str) -> Result<()> {
        let out = self.run(["get".to_string(), format!("--key={key}")])?;
        if !out.success() {
            return Err(GinError::command("AnnexGetKey", out.stderr_text()));
        }
        Ok(())
    }

    /// Verifies content of `paths` against their keys.
    pub fn fsck(&self, paths: &[String]) -> Result<()> {
        let mut args = vec!["fsck".to_string()];
        args.extend(paths.iter().cloned());
        let out = self.run(args)?;
        if !out.success() {
            return Err(GinError::command("AnnexFsck", out.stderr_text()));
        }
        Ok(())
    }

    /// Stores the base name of `path` in its name metadata field.
    pub fn set_name_metadata(&self, path: &str) -> Result<()> {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let out = self.run([
            "metadata".to_string(),
            format!("--set={NAME_FIELD}={name}"),
            path.to_string(),
        ])?;
        if !out.success() {
            return Err(GinError::command("AnnexMetadata", out.stderr_text()));
        }
        debug!("{} metadata set to {}", NAME_FIELD, name);
        Ok(())
    }
}

impl KeyMetadata for Annex<'_> {
    fn key_name(&self, key: &str) -> Option<KeyName> {
        let out = match self.run(["metadata".to_string(), "--json".to_string(), format!("--key={key}")]) {
            Ok(out) if out.success() => out,
            Ok(out) => {
                debug!("Metadata lookup for {} failed: {}", key, out.stderr_text().trim());
                return None;
            }
            Err(err) => {
                debug!("Metadata lookup for {} failed: {}", key, err);
                return None;
            }
        };
        parse_metadata(out.stdout_text().trim())
    }
}

pub fn parse_whereis(text: &str) -> Vec<ContentLocationInfo> {
    let mut infos = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let parsed: WhereisLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("Could not parse whereis line {:?}: {}", line, err);
                continue;
            }
        };
        let Some(file) = parsed.file else {
            continue;
        };
        if !parsed.success && parsed.whereis.is_empty() {
            continue;
        }
        infos.push(ContentLocationInfo {
            file,
            key: parsed.key.unwrap_or_default(),
            locations: parsed
                .whereis
                .into_iter()
                .map(|l| Location {
                    uuid: l.uuid,
                    description: l.description,
                    here: l.here,
                })
                .collect(),
        });
    }
    infos
}

pub fn parse_status(text: &str) -> Vec<ChangeEntry> {
    let mut entries = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<StatusLine>(line) {
            Ok(parsed) => match ChangeCode::parse(&parsed.status) {
                Some(code) => entries.push(ChangeEntry {
                    file: parsed.file,
                    code,
                }),
                None => debug!("Unknown status code {:?} for {}", parsed.status, parsed.file),
            },
            Err(err) => warn!("Could not parse status line {:?}: {}", line, err),
        }
    }
    entries
}

pub fn parse_metadata(text: &str) -> Option<KeyName> {
    let parsed: MetadataLine = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!("Could not parse metadata {:?}: {}", text, err);
            return None;
        }
    };
    let changed = parsed
        .fields
        .get(NAME_CHANGED_FIELD)
        .and_then(|values| values.first())
        .cloned();
    match parsed.fields.get(NAME_FIELD).and_then(|values| values.first()) {
        Some(name) => Some(KeyName::new(name.clone(), changed.as_deref())),
        None => parsed
            .file
            .filter(|f| !f.is_empty())
            .map(|file| KeyName::new(file, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whereis_lines_become_locations() {
        let text = r#"{"command":"whereis","file":"a.bin","key":"MD5-s10--abc","success":true,"whereis":[{"here":true,"uuid":"u1","description":"laptop","urls":[]},{"here":false,"uuid":"u2","description":"origin","urls":[]}],"untrusted":[]}
not json at all
{"command":"whereis","file":"b.bin","key":"MD5-s20--def","success":false,"whereis":[],"untrusted":[]}
"#;
        let infos = parse_whereis(text);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].file, "a.bin");
        assert!(infos[0].present_here());
        assert!(!infos[0].only_here());
    }

    #[test]
    fn status_codes_are_typed() {
        let text = "{\"status\":\"?\",\"file\":\"new.txt\"}\n{\"status\":\"T\",\"file\":\"big.dat\"}\n{\"status\":\"Z\",\"file\":\"odd\"}\n";
        let entries = parse_status(text);
        assert_eq!(
            entries,
            vec![
                ChangeEntry {
                    file: "new.txt".to_string(),
                    code: ChangeCode::Untracked
                },
                ChangeEntry {
                    file: "big.dat".to_string(),
                    code: ChangeCode::TypeChanged
                },
            ]
        );
    }

    #[test]
    fn metadata_prefers_stored_name() {
        let text = r#"{"command":"metadata","file":null,"key":"MD5-s1--x","success":true,"fields":{"ginfilename":["scan.tif"],"ginfilename-lastchanged":["2019-05-04@13-02-11"],"lastchanged":["2019-05-04@13-02-11"]}}"#;
        let name = parse_metadata(text).map(|n| n.display());
        assert_eq!(name.as_deref(), Some("scan.tif (version: 2019-05-04 13:02:11)"));

        let fallback = r#"{"command":"metadata","file":"data/raw.bin","key":"k","success":true,"fields":{}}"#;
        assert_eq!(parse_metadata(fallback).map(|n| n.display()).as_deref(), Some("data/raw.bin"));

        assert!(parse_metadata(r#"{"command":"metadata","key":"k","success":true,"fields":{}}"#).is_none());
    }
}
