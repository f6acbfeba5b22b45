//! Printing event streams and listings, and tallying failures.

use gin_core::{CheckoutEvent, CheckoutKind, CommitRecord, FileStatus, GinError, StatusEvent};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};

use crate::services::status::{group_by_status, StatusMap};
use crate::services::EventStream;

/// How events are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputMode {
    pub json: bool,
    pub verbose: bool,
}

/// What happened over one event stream.
#[derive(Debug, Default)]
pub struct Summary {
    pub events: usize,
    /// Files whose last event carried an error
    pub failed: usize,
    /// Errors that ended the operation
    pub errors: Vec<GinError>,
}

impl Summary {
    pub fn merge(&mut self, other: Summary) {
        self.events += other.events;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }

    /// The error the process should exit with, if any.
    pub fn outcome(&self) -> Result<(), String> {
        if let Some(err) = self.errors.first() {
            return Err(err.to_string());
        }
        if self.failed > 0 {
            return Err(format!("{} operation(s) failed", self.failed));
        }
        Ok(())
    }
}

/// Consumes `stream` to its end, printing as it goes.
pub fn print_stream<W: Write>(stream: EventStream, mode: OutputMode, out: &mut W) -> io::Result<Summary> {
    let mut summary = Summary::default();
    let mut last: Option<(String, String)> = None;
    let mut last_input = String::new();
    let mut outcome: HashMap<String, bool> = HashMap::new();

    for event in stream.iter() {
        summary.events += 1;
        if event.file_name.is_empty() {
            if let Some(err) = &event.error {
                summary.errors.push(err.clone());
                if mode.json {
                    writeln!(out, "{}", serde_json::to_string(&event).unwrap_or_default())?;
                }
                continue;
            }
        }
        if event.is_error() {
            outcome.insert(event.file_name.clone(), false);
        } else if event.is_complete() {
            outcome.entry(event.file_name.clone()).or_insert(true);
        }

        if mode.json {
            writeln!(out, "{}", serde_json::to_string(&event).unwrap_or_default())?;
            continue;
        }
        if mode.verbose {
            if !event.raw_input.is_empty() && event.raw_input != last_input {
                writeln!(out, "$ {}", event.raw_input)?;
                last_input = event.raw_input.clone();
            }
            if !event.raw_output.is_empty() {
                writeln!(out, "{}", event.raw_output)?;
            }
        }
        let key = (event.file_name.clone(), event.state.clone());
        let terminal = event.is_error() || event.is_complete();
        if terminal || last.as_ref() != Some(&key) {
            writeln!(out, "{}", event_line(&event))?;
        }
        last = Some(key);
    }

    summary.failed = outcome.values().filter(|ok| !**ok).count();
    if summary.events == 0 && !mode.json {
        writeln!(out, "Nothing to do")?;
    }
    Ok(summary)
}

fn event_line(event: &StatusEvent) -> String {
    let head = format!("{} {}", event.state, event.file_name);
    if let Some(err) = &event.error {
        return format!("{head} {err}");
    }
    if event.is_complete() {
        return format!("{head} OK");
    }
    [head.as_str(), event.progress.as_str(), event.rate.as_str()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Serialize)]
struct CheckoutLine<'a> {
    filename: &'a str,
    kind: Option<CheckoutKind>,
    destination: &'a str,
    err: String,
}

/// Prints historical copies as they are written.
pub fn print_checkout<W: Write>(
    stream: crossbeam_channel::Receiver<CheckoutEvent>,
    mode: OutputMode,
    out: &mut W,
) -> io::Result<Summary> {
    let mut summary = Summary::default();
    for event in stream.iter() {
        summary.events += 1;
        match (&event.error, event.file_name.is_empty()) {
            (Some(err), true) => summary.errors.push(err.clone()),
            (Some(_), false) => summary.failed += 1,
            _ => {}
        }
        if mode.json {
            let line = CheckoutLine {
                filename: &event.file_name,
                kind: event.kind,
                destination: &event.destination,
                err: event.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            };
            writeln!(out, "{}", serde_json::to_string(&line).unwrap_or_default())?;
            continue;
        }
        match (&event.error, event.kind) {
            (Some(err), _) if !event.file_name.is_empty() => {
                writeln!(out, "{}: {}", event.file_name, err)?
            }
            (Some(_), _) => {}
            (None, Some(CheckoutKind::Link)) => {
                writeln!(out, "'{}' is a link to '{}'", event.file_name, event.destination)?
            }
            (None, Some(CheckoutKind::Tree)) => {}
            (None, _) => writeln!(out, "'{}' -> '{}'", event.file_name, event.destination)?,
        }
    }
    if summary.events == 0 && !mode.json {
        writeln!(out, "Nothing to do")?;
    }
    Ok(summary)
}

#[derive(Serialize)]
struct StatusLine<'a> {
    filename: &'a str,
    status: &'static str,
}

/// File status listing: grouped (default), one line per file (`short`) or JSON lines.
pub fn print_status<W: Write>(
    statuses: &StatusMap,
    short: bool,
    mode: OutputMode,
    out: &mut W,
) -> io::Result<()> {
    let groups: BTreeMap<FileStatus, Vec<String>> = group_by_status(statuses);
    for (status, files) in &groups {
        if mode.json {
            for file in files {
                let line = StatusLine {
                    filename: file,
                    status: status.abbrev(),
                };
                writeln!(out, "{}", serde_json::to_string(&line).unwrap_or_default())?;
            }
        } else if short {
            for file in files {
                writeln!(out, "{} {}", status.abbrev(), file)?;
            }
        } else {
            writeln!(out, "{}:", status.description())?;
            for file in files {
                writeln!(out, "  {file}")?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Version history, newest first.
pub fn print_log<W: Write>(commits: &[CommitRecord], mode: OutputMode, out: &mut W) -> io::Result<()> {
    if mode.json {
        let text = serde_json::to_string(commits).map_err(io::Error::other)?;
        return writeln!(out, "{text}");
    }
    for commit in commits {
        writeln!(out, "* {}  {}", commit.abbreviated_hash, commit.date)?;
        writeln!(out, "    {}", commit.subject)?;
        for line in commit.body.lines().filter(|l| !l.trim().is_empty()) {
            writeln!(out, "    {line}")?;
        }
        let stats = &commit.file_stats;
        for (label, files) in [
            ("Added", &stats.new_files),
            ("Modified", &stats.modified_files),
            ("Deleted", &stats.deleted_files),
        ] {
            if !files.is_empty() {
                writeln!(out, "    {label}: {}", files.join(", "))?;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}
