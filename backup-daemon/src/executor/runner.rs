//! Runs the external dump utility.
//!
//! Standard output is streamed straight into the caller's sink with no
//! framing. Standard error is forwarded line by line to the daemon's own
//! stderr so operators see what the tool complained about; the last few
//! lines are kept for the failure report. Only the exit status decides
//! success.

use super::job::DumpCommand;
use crate::utils::errors::ExecutionError;
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Number of trailing stderr lines attached to an `ExitStatus` error.
const STDERR_TAIL_LINES: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Spawn `command`, copy its stdout into `sink` and wait for it to exit.
    ///
    /// Returns the number of bytes written to `sink`. A single attempt, no
    /// retries. When a timeout is configured and elapses the child is killed.
    pub async fn run<W>(&self, command: &DumpCommand, sink: &mut W) -> Result<u64, ExecutionError>
    where
        W: AsyncWrite + Unpin,
    {
        debug!(command = %command, "Spawning dump process");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &command.env {
            cmd.env(key, value.expose());
        }

        let mut child = cmd.spawn().map_err(|source| ExecutionError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                let mut host_stderr = tokio::io::stderr();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = host_stderr.write_all(line.as_bytes()).await;
                    let _ = host_stderr.write_all(b"\n").await;
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                let _ = host_stderr.flush().await;
                tail.into_iter().collect::<Vec<String>>()
            })
        });

        let Some(mut stdout) = child.stdout.take() else {
            return Err(ExecutionError::Capture(std::io::Error::other(
                "dump process has no stdout handle",
            )));
        };

        let work = async {
            let written = tokio::io::copy(&mut stdout, &mut *sink)
                .await
                .map_err(ExecutionError::Capture)?;
            sink.flush().await.map_err(ExecutionError::Capture)?;
            let status = child.wait().await.map_err(ExecutionError::Capture)?;
            Ok::<_, ExecutionError>((written, status))
        };

        let outcome = match self.timeout {
            Some(limit) => {
                let timed = tokio::time::timeout(limit, work).await;
                match timed {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            command = %command,
                            timeout = ?limit,
                            "Dump timed out, killing process"
                        );
                        if let Err(e) = child.kill().await {
                            warn!("Failed to kill timed out dump process: {}", e);
                        }
                        Err(ExecutionError::TimedOut(limit))
                    }
                }
            }
            None => work.await,
        };

        // A killed dump may leave grandchildren holding stderr open.
        if matches!(outcome, Err(ExecutionError::TimedOut(_))) {
            if let Some(handle) = &stderr_task {
                handle.abort();
            }
        }
        let stderr_tail = match stderr_task {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Vec::new(),
        };

        let (written, status) = outcome?;
        if status.success() {
            debug!(bytes = written, "Dump process exited successfully");
            Ok(written)
        } else {
            Err(ExecutionError::ExitStatus {
                code: status.code(),
                stderr_tail,
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> DumpCommand {
        DumpCommand::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_stdout_captured_verbatim() {
        let runner = CommandRunner::default();
        let mut sink = Vec::new();
        let written = runner
            .run(&sh("printf 'CREATE TABLE t;\\n'; echo 'noise' >&2"), &mut sink)
            .await
            .unwrap();

        assert_eq!(sink, b"CREATE TABLE t;\n");
        assert_eq!(written, sink.len() as u64);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let runner = CommandRunner::default();
        let mut sink = Vec::new();
        let err = runner
            .run(&sh("echo partial; echo 'Access denied' >&2; exit 3"), &mut sink)
            .await
            .unwrap_err();

        match err {
            ExecutionError::ExitStatus { code, stderr_tail } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr_tail, vec!["Access denied".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Partial output still reached the sink; cleanup is the caller's job.
        assert_eq!(sink, b"partial\n");
    }

    #[tokio::test]
    async fn test_stderr_tail_is_bounded() {
        let runner = CommandRunner::default();
        let mut sink = Vec::new();
        let err = runner
            .run(
                &sh("for i in 1 2 3 4 5 6 7 8; do echo line$i >&2; done; exit 1"),
                &mut sink,
            )
            .await
            .unwrap_err();

        match err {
            ExecutionError::ExitStatus { stderr_tail, .. } => {
                assert_eq!(stderr_tail.len(), STDERR_TAIL_LINES);
                assert_eq!(stderr_tail.first().map(String::as_str), Some("line4"));
                assert_eq!(stderr_tail.last().map(String::as_str), Some("line8"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let runner = CommandRunner::default();
        let mut sink = Vec::new();
        let cmd = DumpCommand::new(
            "definitely-not-a-dump-binary-xyz",
            vec!["shop".to_string()],
        );
        let err = runner.run(&cmd, &mut sink).await.unwrap_err();

        assert!(err.is_spawn_failure());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_env_reaches_child() {
        let runner = CommandRunner::default();
        let mut sink = Vec::new();
        let mut cmd = sh("printf '%s' \"$MYSQL_PWD\"");
        cmd.env.push(("MYSQL_PWD".to_string(), crate::config::Secret::new("pw")));
        runner.run(&cmd, &mut sink).await.unwrap();
        assert_eq!(sink, b"pw");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let runner = CommandRunner::new(Some(Duration::from_millis(200)));
        let mut sink = Vec::new();
        let started = std::time::Instant::now();
        let err = runner
            .run(&sh("exec sleep 10"), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
