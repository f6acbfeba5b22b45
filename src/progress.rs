//! Turning tool output into [`StatusEvent`]s.
//!
//! The annex reports per-item JSON lines (`--json` / `--json-progress`); git
//! only prints human-oriented progress meters on stderr. Both end up as the
//! same event type. Lines that cannot be understood are logged and skipped.

use chrono::NaiveDateTime;
use gin_core::ports::Clock;
use gin_core::{GinError, StatusEvent};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const METADATA_TIME_FORMAT: &str = "%Y-%m-%d@%H-%M-%S";
const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Name shown for key-only progress lines whose key has no stored name
pub const UNKNOWN_NAME: &str = "(unknown)";

/// `rate = Δbytes / Δt`, human-scaled. Empty for non-positive deltas.
pub fn calc_rate(delta_bytes: i64, elapsed: Duration) -> String {
    let nanos = elapsed.as_nanos();
    if nanos == 0 || delta_bytes <= 0 {
        return String::new();
    }
    let rate = (delta_bytes as u128) * 1_000_000_000 / nanos;
    format!("{}/s", human_bytes(rate as u64))
}

/// Binary-prefixed size: `512 B`, `1.5 KiB`, `20 MiB`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if value < 10.0 {
        format!("{:.1} {}", value, UNITS[unit])
    } else {
        format!("{:.0} {}", value, UNITS[unit])
    }
}

/// Original file name stored against a content key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyName {
    pub file_name: String,
    pub changed: Option<NaiveDateTime>,
}

impl KeyName {
    /// `changed` is the raw metadata timestamp (`2006-01-02@15-04-05`).
    pub fn new(file_name: impl Into<String>, changed: Option<&str>) -> Self {
        let changed = changed.and_then(|raw| {
            NaiveDateTime::parse_from_str(raw, METADATA_TIME_FORMAT)
                .map_err(|err| debug!("Bad metadata timestamp {:?}: {}", raw, err))
                .ok()
        });
        Self {
            file_name: file_name.into(),
            changed,
        }
    }

    pub fn display(&self) -> String {
        match self.changed {
            Some(changed) => format!(
                "{} (version: {})",
                self.file_name,
                changed.format(DISPLAY_TIME_FORMAT)
            ),
            None => self.file_name.clone(),
        }
    }
}

/// Side lookup of stored names for content keys.
pub trait KeyMetadata {
    fn key_name(&self, key: &str) -> Option<KeyName>;
}

/// Caches key name lookups so each key is resolved at most once.
pub struct KeyNameResolver<'a> {
    metadata: &'a dyn KeyMetadata,
    cache: HashMap<String, String>,
}

impl<'a> KeyNameResolver<'a> {
    pub fn new(metadata: &'a dyn KeyMetadata) -> Self {
        Self {
            metadata,
            cache: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, key: &str) -> String {
        if let Some(name) = self.cache.get(key) {
            return name.clone();
        }
        let name = self
            .metadata
            .key_name(key)
            .map(|n| n.display())
            .unwrap_or_else(|| UNKNOWN_NAME.to_string());
        self.cache.insert(key.to_string(), name.clone());
        name
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionInfo {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressLine {
    pub action: ActionInfo,
    #[serde(rename = "byte-progress")]
    pub byte_progress: u64,
    #[serde(rename = "total-size", default)]
    pub total_size: Option<u64>,
    #[serde(rename = "percent-progress", default)]
    pub percent_progress: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultLine {
    pub success: bool,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub note: String,
    #[serde(rename = "error-messages", default)]
    pub error_messages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionLine {
    pub command: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

/// One decoded annex output line. Variants are tried in declaration order.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnnexLine {
    Progress(ProgressLine),
    Result(ResultLine),
    Action(ActionLine),
}

impl AnnexLine {
    pub fn parse(line: &str) -> Option<AnnexLine> {
        match serde_json::from_str(line) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!("Could not parse annex output line {:?}: {}", line, err);
                None
            }
        }
    }
}

/// Maps a failed item's note onto the message shown to the user.
pub type NoteRewriter = fn(&str) -> String;

/// Default per-item failure wording.
pub fn transfer_note(note: &str) -> String {
    if note.contains("Unable to access") {
        "authorisation failed or remote storage unavailable".to_string()
    } else {
        note.trim().to_string()
    }
}

struct Sample {
    bytes: u64,
    at: Instant,
}

/// Converts annex JSON lines of one invocation into status events.
pub struct JsonProgressParser<'a> {
    state: String,
    raw_input: String,
    clock: &'a dyn Clock,
    names: Option<KeyNameResolver<'a>>,
    rewrite: NoteRewriter,
    samples: HashMap<String, Sample>,
    current_key: Option<String>,
    current_name: String,
    results: usize,
}

impl<'a> JsonProgressParser<'a> {
    pub fn new(state: impl Into<String>, raw_input: impl Into<String>, clock: &'a dyn Clock) -> Self {
        Self {
            state: state.into(),
            raw_input: raw_input.into(),
            clock,
            names: None,
            rewrite: transfer_note,
            samples: HashMap::new(),
            current_key: None,
            current_name: String::new(),
            results: 0,
        }
    }

    /// Number of terminal result lines seen so far.
    pub fn results(&self) -> usize {
        self.results
    }

    /// Resolves names for progress lines that carry only a key.
    pub fn with_key_names(mut self, resolver: KeyNameResolver<'a>) -> Self {
        self.names = Some(resolver);
        self
    }

    pub fn with_note_rewriter(mut self, rewrite: NoteRewriter) -> Self {
        self.rewrite = rewrite;
        self
    }

    /// Event for one output line, `None` for blank or unparseable lines.
    pub fn parse_line(&mut self, line: &str) -> Option<StatusEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let parsed = AnnexLine::parse(line)?;
        let event = match parsed {
            AnnexLine::Progress(progress) => self.progress_event(progress),
            AnnexLine::Result(result) => self.result_event(result),
            AnnexLine::Action(action) => {
                let name = self.item_name(action.file.as_deref(), action.key.as_deref());
                self.base_event(name)
            }
        };
        let mut event = event?;
        event.raw_output = line.to_string();
        Some(event)
    }

    fn base_event(&self, name: String) -> Option<StatusEvent> {
        if name.is_empty() {
            return None;
        }
        let mut event = StatusEvent::new(name, self.state.clone());
        event.raw_input = self.raw_input.clone();
        Some(event)
    }

    fn item_name(&mut self, file: Option<&str>, key: Option<&str>) -> String {
        if let Some(file) = file.filter(|f| !f.is_empty()) {
            return file.to_string();
        }
        let Some(key) = key else {
            return String::new();
        };
        if self.current_key.as_deref() == Some(key) {
            return self.current_name.clone();
        }
        let name = match self.names.as_mut() {
            Some(resolver) => resolver.resolve(key),
            None => key.to_string(),
        };
        self.current_key = Some(key.to_string());
        self.current_name = name.clone();
        name
    }

    fn progress_event(&mut self, progress: ProgressLine) -> Option<StatusEvent> {
        let name = self.item_name(progress.action.file.as_deref(), progress.action.key.as_deref());
        let item = progress
            .action
            .key
            .clone()
            .unwrap_or_else(|| name.clone());
        let now = self.clock.now();
        let rate = match self.samples.get(&item) {
            Some(prev) => calc_rate(
                progress.byte_progress as i64 - prev.bytes as i64,
                now.saturating_duration_since(prev.at),
            ),
            None => String::new(),
        };
        self.samples.insert(
            item,
            Sample {
                bytes: progress.byte_progress,
                at: now,
            },
        );
        let percent = progress.percent_progress.clone().unwrap_or_else(|| {
            match progress.total_size.filter(|t| *t > 0) {
                Some(total) => format!("{:.0}%", progress.byte_progress as f64 * 100.0 / total as f64),
                None => String::new(),
            }
        });
        let mut event = self.base_event(name)?.with_progress(percent);
        event.rate = rate;
        Some(event)
    }

    fn result_event(&mut self, result: ResultLine) -> Option<StatusEvent> {
        self.results += 1;
        let name = self.item_name(result.file.as_deref(), result.key.as_deref());
        if let Some(key) = &result.key {
            self.samples.remove(key);
        }
        let event = self.base_event(name)?;
        if result.success {
            debug!("{} {} done", result.command, event.file_name);
            return Some(event.completed());
        }
        let note = if result.note.trim().is_empty() {
            result.error_messages.join("; ")
        } else {
            result.note.clone()
        };
        let message = (self.rewrite)(&note);
        debug!("{} {} failed: {}", result.command, event.file_name, note);
        Some(event.with_error(GinError::Transfer { message }))
    }
}

/// Converts git's stderr progress meters into status events.
///
/// Only lines starting with one of the known phase words are used; the
/// percentage is the first token ending in `%`, the rate the tokens after `|`.
pub struct GitProgressParser {
    file_name: String,
    transfer_state: String,
    raw_input: String,
}

const TRANSFER_PHASES: [&str; 2] = ["Receiving objects", "Writing objects"];
const COMPRESS_PHASE: &str = "Compressing objects";

impl GitProgressParser {
    /// `transfer_state` labels the receiving/writing phase, e.g. "Downloading repository".
    pub fn new(
        file_name: impl Into<String>,
        transfer_state: impl Into<String>,
        raw_input: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            transfer_state: transfer_state.into(),
            raw_input: raw_input.into(),
        }
    }

    pub fn parse_line(&self, line: &str) -> Option<StatusEvent> {
        let line = line.trim();
        let line = line.strip_prefix("remote: ").unwrap_or(line);
        let state = if TRANSFER_PHASES.iter().any(|p| line.starts_with(p)) {
            self.transfer_state.clone()
        } else if line.starts_with(COMPRESS_PHASE) {
            "Compressing".to_string()
        } else {
            return None;
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        let progress = words
            .iter()
            .find(|w| w.ends_with('%'))
            .map(|w| w.to_string())
            .unwrap_or_default();
        let rate = match words.iter().position(|w| *w == "|") {
            Some(bar) => words[bar + 1..]
                .iter()
                .take(2)
                .copied()
                .collect::<Vec<_>>()
                .join(" ")
                .trim_end_matches(',')
                .to_string(),
            None => String::new(),
        };
        let mut event = StatusEvent::new(self.file_name.clone(), state).with_progress(progress);
        event.rate = rate;
        event.raw_input = self.raw_input.clone();
        event.raw_output = line.to_string();
        Some(event)
    }
}
