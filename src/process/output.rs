//! Output sinks for streamed subprocess lines

use std::io::Write;
use std::sync::Mutex;

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Receives subprocess output line by line as it arrives
///
/// This trait is object-safe and can be used as `&dyn OutputSink`.
pub trait OutputSink: Send + Sync {
    /// Called once per line; `line` has no trailing newline
    fn on_line(&self, stream: StreamKind, line: &str);
}

/// Discards everything
#[derive(Debug, Clone, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn on_line(&self, _stream: StreamKind, _line: &str) {}
}

/// Echoes lines to the terminal (stdout lines to stdout, stderr to stderr)
#[derive(Debug, Clone, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn on_line(&self, stream: StreamKind, line: &str) {
        match stream {
            StreamKind::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = writeln!(out, "{}", line);
                let _ = out.flush();
            }
            StreamKind::Stderr => {
                let _ = writeln!(std::io::stderr().lock(), "{}", line);
            }
        }
    }
}

/// Collects lines in memory
#[derive(Debug, Default)]
pub struct BufferSink {
    lines: Mutex<Vec<(StreamKind, String)>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured lines in arrival order
    pub fn lines(&self) -> Vec<(StreamKind, String)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Captured text joined with newlines
    pub fn contents(&self) -> String {
        self.lines()
            .into_iter()
            .map(|(_, line)| line + "\n")
            .collect()
    }
}

impl OutputSink for BufferSink {
    fn on_line(&self, stream: StreamKind, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((stream, line.to_string()));
        }
    }
}
