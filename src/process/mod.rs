//! Subprocess execution
//!
//! Every build activity is a chain of external tools. They all go through a
//! [`CommandRunner`], so activities can be exercised against a scripted
//! runner in tests and against [`SubprocessRunner`] for real.

pub mod output;
pub mod runner;

use crate::core::command::CommandDescriptor;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use output::{BufferSink, NullSink, OutputSink, StdoutSink, StreamKind};
pub use runner::SubprocessRunner;

/// Errors raised while running a subprocess
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    #[error("I/O error while running '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a finished subprocess
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 when the process was terminated by a signal)
    pub exit_code: i32,

    /// Interleaved stdout and stderr, in arrival order
    pub output: String,

    /// Wall-clock duration
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait for running commands - allows for scripted implementations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// A non-zero exit code is reported in the output, not as an error.
    async fn run(
        &self,
        command: &CommandDescriptor,
        sink: Option<&dyn OutputSink>,
    ) -> Result<CommandOutput, ProcessError>;
}
