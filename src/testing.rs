//! Scripted process runner for tests.
//!
//! Invocations are matched by tool and argument prefix against registered
//! rules; the first matching rule answers. A rule holding several responses
//! replays them in order and keeps repeating the last one. Invocations that no
//! rule matches succeed with empty output. Every invocation is recorded.

use crossbeam_channel::unbounded;
use gin_core::ports::{ExitInfo, Invocation, ProcessHandle, ProcessOutput, ProcessRunner, Tool};
use gin_core::{GinError, Result};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use crate::adapters::command::CommandBuilder;

/// Canned result of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
    /// The program cannot be started at all
    pub unstartable: bool,
}

impl Response {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn fail(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            code,
            ..Self::default()
        }
    }

    pub fn unstartable() -> Self {
        Self {
            unstartable: true,
            ..Self::default()
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }
}

struct Rule {
    tool: Tool,
    prefix: Vec<String>,
    responses: VecDeque<Response>,
}

impl Rule {
    fn matches(&self, invocation: &Invocation) -> bool {
        self.tool == invocation.tool && significant_args(invocation).starts_with(&self.prefix)
    }

    fn next(&mut self) -> Response {
        if self.responses.len() > 1 {
            self.responses.pop_front().unwrap_or_default()
        } else {
            self.responses.front().cloned().unwrap_or_default()
        }
    }
}

// Leading `-c key=value` pairs are global options, not part of the command
fn significant_args(invocation: &Invocation) -> &[String] {
    let mut args = invocation.args.as_slice();
    while args.len() >= 2 && args[0] == "-c" {
        args = &args[2..];
    }
    args
}

#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers invocations of `tool` whose arguments start with `prefix`.
    pub fn on(self, tool: Tool, prefix: &[&str], response: Response) -> Self {
        self.on_sequence(tool, prefix, vec![response])
    }

    pub fn on_sequence(self, tool: Tool, prefix: &[&str], responses: Vec<Response>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                tool,
                prefix: prefix.iter().map(|s| s.to_string()).collect(),
                responses: responses.into(),
            });
        }
        self
    }

    pub fn git(self, prefix: &[&str], response: Response) -> Self {
        self.on(Tool::Git, prefix, response)
    }

    pub fn annex(self, prefix: &[&str], response: Response) -> Self {
        self.on(Tool::Annex, prefix, response)
    }

    /// Every invocation seen so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of recorded invocations of `tool` starting with `prefix`.
    pub fn count(&self, tool: Tool, prefix: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|inv| {
                inv.tool == tool
                    && significant_args(inv)
                        .iter()
                        .map(String::as_str)
                        .collect::<Vec<_>>()
                        .starts_with(prefix)
            })
            .count()
    }

    /// Arguments of recorded invocations of `tool` starting with `prefix`.
    pub fn args_of(&self, tool: Tool, prefix: &[&str]) -> Vec<Vec<String>> {
        self.calls()
            .iter()
            .filter(|inv| inv.tool == tool)
            .map(|inv| significant_args(inv).to_vec())
            .filter(|args| {
                args.iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .starts_with(prefix)
            })
            .collect()
    }

    fn respond(&self, invocation: &Invocation) -> Result<Response> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }
        let Ok(mut rules) = self.rules.lock() else {
            return Ok(Response::default());
        };
        let response = rules
            .iter_mut()
            .find(|rule| rule.matches(invocation))
            .map(Rule::next)
            .unwrap_or_default();
        if response.unstartable {
            return Err(GinError::MissingBinary {
                program: invocation.program.to_string_lossy().into_owned(),
                reason: "not started".to_string(),
            });
        }
        Ok(response)
    }
}

impl ProcessRunner for ScriptedRunner {
    fn output(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        let response = self.respond(invocation)?;
        Ok(ProcessOutput {
            stdout: response.stdout.into_bytes(),
            stderr: response.stderr.into_bytes(),
            status: ExitInfo {
                code: Some(response.code),
            },
        })
    }

    fn spawn(&self, invocation: &Invocation) -> Result<ProcessHandle> {
        let response = self.respond(invocation)?;
        let (out_tx, out_rx) = unbounded();
        let (err_tx, err_rx) = unbounded();
        for line in response.stdout.split('\n').filter(|l| !l.is_empty()) {
            let _ = out_tx.send(line.trim_end_matches('\r').to_string());
        }
        for line in response.stderr.split(['\n', '\r']).filter(|l| !l.is_empty()) {
            let _ = err_tx.send(line.to_string());
        }
        let code = response.code;
        Ok(ProcessHandle::new(
            invocation.command_line(),
            out_rx,
            err_rx,
            move || Ok(ExitInfo { code: Some(code) }),
        ))
    }
}

/// Builder with plain program names and no platform overrides.
pub fn plain_builder() -> CommandBuilder {
    CommandBuilder::new("git", "git-annex").with_symlinks_disabled(false)
}

/// Creates an empty `.git` directory so root discovery succeeds.
pub fn fake_repo(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir.join(".git"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_repeat_their_last_response() -> anyhow::Result<()> {
        let runner = ScriptedRunner::new().on_sequence(
            Tool::Git,
            &["rev-parse"],
            vec![Response::fail(1, ""), Response::ok("abc\n")],
        );
        let builder = plain_builder();
        let inv = builder.git(Path::new("/r"), ["rev-parse", "HEAD"]);
        assert_eq!(runner.output(&inv)?.status.code, Some(1));
        assert_eq!(runner.output(&inv)?.stdout_text(), "abc\n");
        assert_eq!(runner.output(&inv)?.stdout_text(), "abc\n");
        assert_eq!(runner.count(Tool::Git, &["rev-parse"]), 3);
        Ok(())
    }

    #[test]
    fn global_options_are_ignored_when_matching() -> anyhow::Result<()> {
        let runner = ScriptedRunner::new().git(&["status"], Response::ok("clean"));
        let builder = plain_builder().with_symlinks_disabled(true);
        let inv = builder.git(Path::new("/r"), ["status"]);
        assert_eq!(runner.output(&inv)?.stdout_text(), "clean");
        Ok(())
    }

    #[test]
    fn spawn_splits_lines() -> anyhow::Result<()> {
        let runner = ScriptedRunner::new().annex(
            &["copy"],
            Response::ok("{\"a\":1}\n{\"b\":2}\n").with_stderr("50%\r100%\n"),
        );
        let inv = plain_builder().annex(Path::new("/r"), ["copy"]);
        let finished = runner.spawn(&inv)?.finish()?;
        assert_eq!(finished.stdout.len(), 2);
        assert_eq!(finished.stderr, vec!["50%", "100%"]);
        Ok(())
    }
}
