use crate::error::Result;
use crossbeam_channel::Receiver;
use std::path::{Path, PathBuf};

/// Which of the two external tools an invocation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// The metadata tool (git)
    Git,
    /// The content-annex tool (git-annex)
    Annex,
}

/// Fully resolved external command: program, arguments, directory, environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub tool: Tool,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    /// Variables added on top of the inherited environment
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(tool: Tool, program: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            program: program.into(),
            args: Vec::new(),
            dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program and arguments joined by spaces, for logs and raw event input.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Exit status of a finished process. `code` is `None` when killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Whole-output capture of a short, non-streaming invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: ExitInfo,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

type Waiter = Box<dyn FnOnce() -> Result<ExitInfo> + Send>;

/// A running process whose two output channels are drained independently.
///
/// Each channel is fed by its own reader, so consuming stdout to the end before
/// looking at stderr cannot stall the child on a full pipe.
pub struct ProcessHandle {
    command_line: String,
    stdout: Receiver<String>,
    stderr: Receiver<String>,
    waiter: Waiter,
}

/// What is left of a process once its output has been consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub status: ExitInfo,
    /// Stdout lines not consumed before `finish` was called
    pub stdout: Vec<String>,
    /// Stderr lines not consumed before `finish` was called
    pub stderr: Vec<String>,
}

impl Finished {
    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }
}

impl ProcessHandle {
    pub fn new(
        command_line: String,
        stdout: Receiver<String>,
        stderr: Receiver<String>,
        waiter: impl FnOnce() -> Result<ExitInfo> + Send + 'static,
    ) -> Self {
        Self {
            command_line,
            stdout,
            stderr,
            waiter: Box::new(waiter),
        }
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Stdout lines, without their terminators. Closes when the process closes stdout.
    pub fn stdout(&self) -> &Receiver<String> {
        &self.stdout
    }

    /// Stderr lines, split on both newline and carriage return.
    pub fn stderr(&self) -> &Receiver<String> {
        &self.stderr
    }

    /// Drains whatever output is left and waits for the exit status.
    pub fn finish(self) -> Result<Finished> {
        let stdout = self.stdout.iter().collect();
        let stderr = self.stderr.iter().collect();
        let status = (self.waiter)()?;
        Ok(Finished {
            status,
            stdout,
            stderr,
        })
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("command_line", &self.command_line)
            .finish_non_exhaustive()
    }
}

/// Port for starting external processes.
///
/// A non-zero exit is not an error at this level; callers inspect the captured
/// error text to decide. Failing to start the process at all is an error.
pub trait ProcessRunner: Send + Sync {
    /// Runs to completion and captures both channels.
    fn output(&self, invocation: &Invocation) -> Result<ProcessOutput>;

    /// Starts the process and hands back line streams for incremental reading.
    fn spawn(&self, invocation: &Invocation) -> Result<ProcessHandle>;
}
