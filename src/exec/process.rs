//! Child process execution with streamed output.
//!
//! - Output is forwarded line by line as it arrives, never buffered whole
//! - Only exit code 0 is success
//! - Children are killed if the run future is dropped (`kill_on_drop`)

use super::{CommandKind, CommandSpec};
use crate::models::ExecError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt as _, AsyncRead, BufReader};
use tracing::debug;

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives child output while the child is running.
pub trait OutputSink: Send + Sync {
    fn line(&self, stream: OutputStream, line: &str);
}

/// Discards all output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn line(&self, _stream: OutputStream, _line: &str) {}
}

/// Result of one external command: `Ok` only on exit code 0.
pub type StepOutcome = std::result::Result<(), ExecError>;

/// Runs external commands to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CommandSpec, sink: &dyn OutputSink) -> StepOutcome;
}

/// [`CommandRunner`] backed by real OS processes.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    /// Shell for [`CommandKind::Shell`] commands
    shell: String,
    /// Optional per-command deadline
    timeout: Option<Duration>,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl ProcessExecutor {
    /// Create an executor with no timeout.
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            timeout: None,
        }
    }

    /// Kill commands that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn build(&self, spec: &CommandSpec) -> tokio::process::Command {
        let mut command = match &spec.kind {
            CommandKind::Program { program, args } => {
                let mut command = tokio::process::Command::new(program);
                command.args(args);
                command
            }
            CommandKind::Shell(script) => {
                let mut command = tokio::process::Command::new(&self.shell);
                command.arg("-c").arg(script);
                command
            }
        };

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        command
    }
}

#[async_trait]
impl CommandRunner for ProcessExecutor {
    async fn run(&self, spec: &CommandSpec, sink: &dyn OutputSink) -> StepOutcome {
        let program = spec.program_name().to_string();

        debug!(command = %spec, "Spawning");
        let mut child = self
            .build(spec)
            .spawn()
            .map_err(|source| ExecError::Launch {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = async {
            tokio::join!(
                forward(stdout, OutputStream::Stdout, sink),
                forward(stderr, OutputStream::Stderr, sink),
            );
            child.wait().await
        };

        let status = match self.timeout {
            None => finished.await,
            Some(after) => {
                let result = tokio::time::timeout(after, finished).await;
                match result {
                    Ok(status) => status,
                    Err(_) => {
                        if let Err(e) = child.kill().await {
                            debug!(error = %e, "Kill after timeout failed");
                        }
                        return Err(ExecError::TimedOut { program, after });
                    }
                }
            }
        }
        .map_err(|source| ExecError::Wait {
            program: program.clone(),
            source,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(ExecError::Exit {
                program,
                code: status.code(),
            })
        }
    }
}

/// Forward one pipe to the sink line by line.
async fn forward<R>(pipe: Option<R>, stream: OutputStream, sink: &dyn OutputSink)
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return;
    };

    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                sink.line(stream, line.trim_end_matches(['\n', '\r']));
            }
            Err(e) => {
                debug!(?stream, error = %e, "Output pipe closed");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CollectSink(Mutex<Vec<(OutputStream, String)>>);

    impl OutputSink for CollectSink {
        fn line(&self, stream: OutputStream, line: &str) {
            self.0.lock().unwrap().push((stream, line.to_string()));
        }
    }

    impl CollectSink {
        fn lines(&self, stream: OutputStream) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|(s, _)| *s == stream)
                .map(|(_, l)| l.clone())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_streams_both_pipes() {
        let sink = CollectSink::default();
        let cmd = CommandSpec::shell("echo one; echo two; echo oops >&2");

        ProcessExecutor::default().run(&cmd, &sink).await.unwrap();

        assert_eq!(sink.lines(OutputStream::Stdout), vec!["one", "two"]);
        assert_eq!(sink.lines(OutputStream::Stderr), vec!["oops"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let cmd = CommandSpec::shell("exit 3");
        let err = ProcessExecutor::default().run(&cmd, &NullSink).await.unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
    }

    #[tokio::test]
    async fn test_program_argv() {
        let sink = CollectSink::default();
        let cmd = CommandSpec::program("echo", ["a b", "c"]);
        ProcessExecutor::default().run(&cmd, &sink).await.unwrap();
        assert_eq!(sink.lines(OutputStream::Stdout), vec!["a b c"]);
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_failure() {
        let cmd = CommandSpec::program("organelle-batch-no-such-tool", ["x"]);
        let err = ProcessExecutor::default().run(&cmd, &NullSink).await.unwrap_err();
        assert!(matches!(err, ExecError::Launch { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();

        let sink = CollectSink::default();
        let cmd = CommandSpec::shell("ls").in_dir(dir.path());
        ProcessExecutor::default().run(&cmd, &sink).await.unwrap();

        assert_eq!(sink.lines(OutputStream::Stdout), vec!["marker.txt"]);
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let executor =
            ProcessExecutor::default().with_timeout(Some(Duration::from_millis(200)));
        let cmd = CommandSpec::program("sleep", ["10"]);

        let started = std::time::Instant::now();
        let err = executor.run(&cmd, &NullSink).await.unwrap_err();

        assert!(matches!(err, ExecError::TimedOut { .. }), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_non_utf8_output_is_lossy() {
        let sink = CollectSink::default();
        let cmd = CommandSpec::shell(r"printf 'ok\377\n'");
        ProcessExecutor::default().run(&cmd, &sink).await.unwrap();
        assert_eq!(sink.lines(OutputStream::Stdout), vec!["ok\u{FFFD}"]);
    }
}
