//! Execution scheduler - determines which jobs to run next

use crate::core::Pipeline;

/// Strategy for scheduling job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute jobs in dependency order, one at a time
    #[default]
    Sequential,

    /// Execute all ready jobs in parallel
    Parallel,

    /// Limited parallelism (max N concurrent jobs)
    LimitedParallel(usize),
}

/// Scheduler for determining which jobs to run
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Get the next batch of jobs to execute, in execution order
    pub fn next_jobs(&self, pipeline: &Pipeline) -> Vec<String> {
        let limit = match self.strategy {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => usize::MAX,
            SchedulingStrategy::LimitedParallel(max) => {
                let running = pipeline.running_jobs().len();
                max.max(1).saturating_sub(running)
            }
        };

        pipeline
            .ready_jobs()
            .into_iter()
            .take(limit)
            .map(|j| j.id.clone())
            .collect()
    }
}
