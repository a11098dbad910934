//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod scheduler;

pub use engine::{EventBus, EventHandler, ExecutionEngine, ExecutionError, ExecutionEvent};
pub use executor::{job_workspace, JobExecutor, JobResult};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
