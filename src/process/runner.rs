//! Subprocess runner backed by `tokio::process`

use crate::core::command::CommandDescriptor;
use crate::process::{CommandOutput, CommandRunner, OutputSink, ProcessError, StreamKind};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Runs commands as real subprocesses
///
/// stdout and stderr are read from separate pipes. Lines keep their order
/// within a stream, but the interleaving of the two streams in the captured
/// output is only as precise as their arrival. Callers that need the exact
/// order wrap the command with `ShellConventions::with_merged_stderr`.
#[derive(Debug, Clone, Default)]
pub struct SubprocessRunner {
    /// Timeout applied when a command sets none
    default_timeout_secs: Option<u64>,
}

impl SubprocessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout_secs = Some(secs);
        self
    }
}

#[async_trait]
impl CommandRunner for SubprocessRunner {
    async fn run(
        &self,
        command: &CommandDescriptor,
        sink: Option<&dyn OutputSink>,
    ) -> Result<CommandOutput, ProcessError> {
        debug!("Spawning: {}", command.display());
        let started = Instant::now();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        let pipe_error = |name: &str| ProcessError::Io {
            command: command.display(),
            source: std::io::Error::other(format!("{} pipe not available", name)),
        };
        let stdout = child.stdout.take().ok_or_else(|| pipe_error("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| pipe_error("stderr"))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_lines(stdout, StreamKind::Stdout, tx.clone()));
        tokio::spawn(forward_lines(stderr, StreamKind::Stderr, tx));

        let collect = async {
            let mut output = String::new();
            while let Some((stream, line)) = rx.recv().await {
                if let Some(sink) = sink {
                    sink.on_line(stream, &line);
                }
                output.push_str(&line);
                output.push('\n');
            }
            output
        };
        let finish = async {
            let (output, status) = tokio::join!(collect, child.wait());
            (output, status)
        };

        let limit = command.timeout_secs.or(self.default_timeout_secs);
        let finished = match limit {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), finish)
                .await
                .ok(),
            None => Some(finish.await),
        };

        let (output, status) = match (finished, limit) {
            (Some(result), _) => result,
            (None, secs) => {
                let secs = secs.unwrap_or_default();
                warn!("Timed out after {}s: {}", secs, command.display());
                let _ = child.kill().await;
                return Err(ProcessError::Timeout {
                    command: command.display(),
                    secs,
                });
            }
        };

        let status = status.map_err(|source| ProcessError::Io {
            command: command.display(),
            source,
        })?;
        let exit_code = status.code().unwrap_or(-1);
        let duration = started.elapsed();

        debug!(
            "'{}' exited with code {} after {:.1}s",
            command.program,
            exit_code,
            duration.as_secs_f64()
        );

        Ok(CommandOutput {
            exit_code,
            output,
            duration,
        })
    }
}

async fn forward_lines<R>(
    reader: R,
    stream: StreamKind,
    tx: mpsc::UnboundedSender<(StreamKind, String)>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Error reading {:?}: {}", stream, e);
                break;
            }
        }
    }
}
