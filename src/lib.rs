//! devtools - developer tooling and CI building blocks
//!
//! Build activities (validate, package, publish, ...), a small pipeline
//! engine that runs them as jobs, coverage aggregation with badges, and the
//! command-line utilities used during development.

pub mod activities;
pub mod cli;
pub mod core;
pub mod coverage;
pub mod execution;
pub mod process;
pub mod tools;

// Re-export commonly used types
pub use activities::{ActivityConfig, ActivityContext, ActivityError};
pub use core::{CommandDescriptor, ExecutionStatus, JobState, Pipeline, RunContext, ShellConventions};
pub use execution::{ExecutionEngine, ExecutionEvent, JobExecutor, SchedulingStrategy};
pub use process::{CommandOutput, CommandRunner, OutputSink, ProcessError, SubprocessRunner};
