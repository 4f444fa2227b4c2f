//! Subprocess execution for the external tools
//!
//! [`SystemRunner`] spawns a tool with both output pipes captured, pushes
//! stdout lines into a caller callback as they arrive, keeps a bounded tail
//! of stderr, and kills the child when cancellation is requested.

use crate::cancel::CancelToken;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Error type for running a tool
#[derive(Debug, Error)]
pub enum RunError {
    /// The executable could not be started
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Waiting on the process failed
    #[error("IO error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Cancellation was requested before or while the process ran
    #[error("Process cancelled")]
    Cancelled,
}

/// A fully assembled tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
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

    /// Value following `flag`, if present
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .windows(2)
            .find(|pair| pair[0] == flag)
            .map(|pair| pair[1].as_str())
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().to_string()
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of a tool that ran to completion
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Tail of the diagnostic stream
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Seam between the orchestrator and actual process execution
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `command` to completion, feeding each stdout line to `on_stdout_line`.
    ///
    /// Returns [`RunError::Cancelled`] without spawning if `cancel` is already
    /// triggered, and kills the process if it fires mid-run.
    async fn run(
        &self,
        command: &ToolCommand,
        on_stdout_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancelToken,
    ) -> Result<ToolOutput, RunError>;
}

/// Runs tools as real OS processes via tokio
#[derive(Debug, Clone)]
pub struct SystemRunner {
    stderr_tail_lines: usize,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(64)
    }
}

impl SystemRunner {
    pub fn new(stderr_tail_lines: usize) -> Self {
        Self {
            stderr_tail_lines: stderr_tail_lines.max(1),
        }
    }
}

#[async_trait]
impl ToolRunner for SystemRunner {
    async fn run(
        &self,
        command: &ToolCommand,
        on_stdout_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancelToken,
    ) -> Result<ToolOutput, RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let program = command.program_name();
        debug!(command = %command, "spawning tool");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: program.clone(),
                source,
            })?;

        let missing_pipe = |name: &str| RunError::Io {
            program: program.clone(),
            source: io::Error::new(io::ErrorKind::BrokenPipe, format!("{} not captured", name)),
        };
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        // Drain stderr on its own task so a chatty tool never blocks on a full pipe
        let tail_limit = self.stderr_tail_lines;
        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(tail_limit);
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            while let Ok(Some(line)) = read_lossy_line(&mut reader, &mut buf).await {
                if tail.len() == tail_limit {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail
        });

        let mut stdout_reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(program = %program, "cancellation requested, killing tool");
                    let _ = child.kill().await;
                    stderr_task.abort();
                    return Err(RunError::Cancelled);
                }
                line = read_lossy_line(&mut stdout_reader, &mut buf) => match line {
                    Ok(Some(line)) => on_stdout_line(&line),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(program = %program, error = %e, "stdout stream failed");
                        break;
                    }
                },
            }
        }
        // Close our end so a child still writing gets EPIPE instead of blocking
        drop(stdout_reader);

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(RunError::Cancelled);
            }
            status = child.wait() => status.map_err(|source| RunError::Io {
                program: program.clone(),
                source,
            })?,
        };

        let stderr = stderr_task
            .await
            .map(|tail| tail.into_iter().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default();

        debug!(program = %program, code = ?status.code(), "tool exited");

        // Resuming after the await is itself a cancellation point
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        Ok(ToolOutput {
            exit_code: status.code(),
            stderr,
        })
    }
}

/// Read one `\n`-terminated line, replacing invalid UTF-8.
///
/// Returns `Ok(None)` at end of stream. Trailing `\r\n` is stripped.
async fn read_lossy_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use std::time::{Duration, Instant};

    fn sh(script: &str) -> ToolCommand {
        ToolCommand::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn test_command_builder_and_lookup() {
        let cmd = ToolCommand::new("vmaf")
            .args(["-r", "ref.yuv"])
            .arg("-o")
            .arg("out.json");
        assert_eq!(cmd.value_of("-o"), Some("out.json"));
        assert_eq!(cmd.value_of("-d"), None);
        assert_eq!(cmd.to_string(), "vmaf -r ref.yuv -o out.json");
    }

    #[tokio::test]
    async fn test_stdout_lines_streamed_in_order() {
        let runner = SystemRunner::default();
        let cancel = CancelSource::new();
        let mut lines = Vec::new();

        let output = runner
            .run(
                &sh("printf 'frame=1\\nfps=2.0\\nspeed=1x\\n'"),
                &mut |line: &str| lines.push(line.to_string()),
                &cancel.token(),
            )
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(lines, vec!["frame=1", "fps=2.0", "speed=1x"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_stderr_tail() {
        let runner = SystemRunner::new(2);
        let cancel = CancelSource::new();

        let output = runner
            .run(
                &sh("echo one >&2; echo two >&2; echo three >&2; exit 3"),
                &mut |_: &str| {},
                &cancel.token(),
            )
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stderr, "two\nthree");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let runner = SystemRunner::default();
        let cancel = CancelSource::new();
        let result = runner
            .run(
                &ToolCommand::new("/nonexistent/definitely-not-a-tool"),
                &mut |_: &str| {},
                &cancel.token(),
            )
            .await;
        assert!(matches!(result, Err(RunError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_spawn() {
        let runner = SystemRunner::default();
        let cancel = CancelSource::new();
        cancel.cancel();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");

        let result = runner
            .run(
                &sh(&format!("touch {}", marker.display())),
                &mut |_: &str| {},
                &cancel.token(),
            )
            .await;

        assert!(matches!(result, Err(RunError::Cancelled)));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_cancel_kills_running_process() {
        let runner = SystemRunner::default();
        let cancel = CancelSource::new();
        let token = cancel.token();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = runner
            .run(&sh("echo started; sleep 30"), &mut |_: &str| {}, &token)
            .await;

        assert!(matches!(result, Err(RunError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    fn process_alive(pid: &str) -> bool {
        std::process::Command::new("kill")
            .args(["-0", pid])
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_drop_later_lines() {
        let runner = SystemRunner::default();
        let cancel = CancelSource::new();
        let mut lines = Vec::new();

        let output = runner
            .run(
                &sh("printf 'width=1920\\nTAG:title=Caf\\351\\n[FORMAT]\\nduration=12.5\\n'"),
                &mut |line: &str| lines.push(line.to_string()),
                &cancel.token(),
            )
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "TAG:title=Caf\u{FFFD}");
        assert_eq!(lines[3], "duration=12.5");
    }

    #[tokio::test]
    async fn test_output_after_invalid_utf8_is_drained() {
        let runner = SystemRunner::default();
        let cancel = CancelSource::new();
        let mut count = 0usize;

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            runner.run(
                &sh("printf 'bad\\377line\\n'; seq 1 8000"),
                &mut |_: &str| count += 1,
                &cancel.token(),
            ),
        )
        .await
        .expect("tool output must be drained to the end");

        assert!(result.unwrap().success());
        assert_eq!(count, 8001);
    }

    #[tokio::test]
    async fn test_stderr_after_invalid_utf8_is_kept() {
        let runner = SystemRunner::default();
        let cancel = CancelSource::new();

        let output = runner
            .run(
                &sh("printf 'Caf\\351\\n' >&2; echo 'Unknown encoder libnothing' >&2; exit 1"),
                &mut |_: &str| {},
                &cancel.token(),
            )
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(1));
        assert!(output.stderr.contains("Unknown encoder libnothing"));
    }

    #[tokio::test]
    async fn test_cancelled_process_is_gone() {
        let runner = SystemRunner::default();
        let cancel = CancelSource::new();
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("tool.pid");

        let trigger = cancel.clone();
        let result = runner
            .run(
                &sh(&format!(
                    "echo $$ > {}; echo started; exec sleep 30",
                    pid_file.display()
                )),
                &mut |_: &str| trigger.cancel(),
                &cancel.token(),
            )
            .await;

        assert!(matches!(result, Err(RunError::Cancelled)));
        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(!process_alive(pid.trim()));
    }
}
