use crossbeam_channel::{unbounded, Sender};
use gin_core::ports::{ExitInfo, Invocation, ProcessHandle, ProcessOutput, ProcessRunner};
use gin_core::{GinError, Result};
use std::io::{self, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Runs invocations as child processes of this one.
///
/// Streaming calls get one reader thread per output pipe, each feeding its own
/// unbounded channel, so a child that fills one pipe while the caller is still
/// reading the other never blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

fn command(invocation: &Invocation) -> Command {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args);
    if let Some(dir) = &invocation.dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &invocation.env {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::null());
    cmd
}

fn start_error(invocation: &Invocation, err: &io::Error) -> GinError {
    let program = invocation.program.display().to_string();
    if err.kind() == io::ErrorKind::NotFound {
        GinError::MissingBinary {
            program,
            reason: err.to_string(),
        }
    } else {
        GinError::io(format!("failed to start {program}"), err)
    }
}

fn exit_info(status: ExitStatus) -> ExitInfo {
    ExitInfo {
        code: status.code(),
    }
}

impl ProcessRunner for SystemRunner {
    fn output(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        debug!(
            dir = ?invocation.dir,
            "Running {}",
            invocation.command_line()
        );
        let output = command(invocation)
            .output()
            .map_err(|err| start_error(invocation, &err))?;
        let result = ProcessOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            status: exit_info(output.status),
        };
        if !result.success() {
            debug!(
                code = ?result.status.code,
                "[stdout]\n{}\n[stderr]\n{}",
                result.stdout_text(),
                result.stderr_text()
            );
        }
        Ok(result)
    }

    fn spawn(&self, invocation: &Invocation) -> Result<ProcessHandle> {
        let command_line = invocation.command_line();
        debug!(dir = ?invocation.dir, "Starting {}", command_line);
        let mut child = command(invocation)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| start_error(invocation, &err))?;

        let (out_tx, out_rx) = unbounded();
        let (err_tx, err_rx) = unbounded();
        let stdout_thread = child
            .stdout
            .take()
            .map(|pipe| spawn_line_reader(pipe, LineSplit::Newline, out_tx));
        let stderr_thread = child
            .stderr
            .take()
            .map(|pipe| spawn_line_reader(pipe, LineSplit::NewlineOrReturn, err_tx));

        let waited_line = command_line.clone();
        let waiter = move || {
            for handle in [stdout_thread, stderr_thread].into_iter().flatten() {
                let _ = handle.join();
            }
            let status = child
                .wait()
                .map_err(|err| GinError::io(format!("failed to wait for {waited_line}"), &err))?;
            debug!(code = ?status.code(), "Finished {}", waited_line);
            Ok(exit_info(status))
        };
        Ok(ProcessHandle::new(command_line, out_rx, err_rx, waiter))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineSplit {
    Newline,
    /// Progress meters redraw with a bare carriage return
    NewlineOrReturn,
}

impl LineSplit {
    fn is_break(self, byte: u8) -> bool {
        match self {
            LineSplit::Newline => byte == b'\n',
            LineSplit::NewlineOrReturn => byte == b'\n' || byte == b'\r',
        }
    }
}

fn spawn_line_reader<R>(mut pipe: R, split: LineSplit, tx: Sender<String>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("Pipe read failed: {}", err);
                    break;
                }
            };
            for &byte in &buf[..n] {
                if split.is_break(byte) {
                    if !emit(&tx, &mut pending, split) {
                        return;
                    }
                } else {
                    pending.push(byte);
                }
            }
        }
        emit(&tx, &mut pending, split);
    })
}

/// Sends the pending line. Empty lines are dropped. Returns false once the
/// receiver is gone.
fn emit(tx: &Sender<String>, pending: &mut Vec<u8>, split: LineSplit) -> bool {
    if split == LineSplit::Newline && pending.last() == Some(&b'\r') {
        pending.pop();
    }
    if pending.is_empty() {
        return true;
    }
    let line = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    tx.send(line).is_ok()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use gin_core::ports::Tool;

    fn sh(script: &str) -> Invocation {
        Invocation::new(Tool::Git, "sh").args(["-c", script])
    }

    #[test]
    fn output_captures_both_channels_and_exit_code() -> anyhow::Result<()> {
        let out = SystemRunner.output(&sh("echo out; echo err >&2; exit 3"))?;
        assert_eq!(out.stdout_text(), "out\n");
        assert_eq!(out.stderr_text(), "err\n");
        assert_eq!(out.status.code, Some(3));
        assert!(!out.success());
        Ok(())
    }

    #[test]
    fn missing_program_is_missing_binary() {
        let inv = Invocation::new(Tool::Annex, "/nonexistent/git-annex-xyz");
        match SystemRunner.output(&inv) {
            Err(GinError::MissingBinary { program, .. }) => {
                assert!(program.ends_with("git-annex-xyz"))
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(matches!(
            SystemRunner.spawn(&inv),
            Err(GinError::MissingBinary { .. })
        ));
    }

    #[test]
    fn stderr_splits_on_carriage_return() -> anyhow::Result<()> {
        let handle = SystemRunner.spawn(&sh(
            "printf 'Writing objects:  50%%\\rWriting objects: 100%%\\n' >&2; printf 'a\\nb\\n'",
        ))?;
        let finished = handle.finish()?;
        assert!(finished.status.success());
        assert_eq!(finished.stdout, vec!["a", "b"]);
        assert_eq!(
            finished.stderr,
            vec!["Writing objects:  50%", "Writing objects: 100%"]
        );
        Ok(())
    }

    #[test]
    fn heavy_output_on_both_pipes_does_not_deadlock() -> anyhow::Result<()> {
        // Each side writes well past a typical 64 KiB pipe buffer
        let script = "i=0; while [ $i -lt 20000 ]; do echo \"stdout line $i\"; \
                      echo \"stderr line $i\" >&2; i=$((i+1)); done";
        let handle = SystemRunner.spawn(&sh(script))?;
        let stdout_count = handle.stdout().iter().count();
        let finished = handle.finish()?;
        assert_eq!(stdout_count, 20000);
        assert_eq!(finished.stderr.len(), 20000);
        assert!(finished.status.success());
        Ok(())
    }

    #[test]
    fn environment_and_directory_are_applied() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let inv = sh("echo \"$GIN_TEST_VALUE\"; pwd")
            .current_dir(dir.path())
            .env("GIN_TEST_VALUE", "hello");
        let out = SystemRunner.output(&inv)?;
        let text = out.stdout_text();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("hello"));
        let pwd = std::path::PathBuf::from(lines.next().unwrap_or_default());
        assert_eq!(pwd.canonicalize()?, dir.path().canonicalize()?);
        Ok(())
    }
}
