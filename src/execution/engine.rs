//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    core::{context::RunContext, ExecutionStatus, JobState, Pipeline},
    execution::{ExecutionScheduler, JobExecutor, JobResult, SchedulingStrategy},
};
use chrono::Utc;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        total_jobs: usize,
    },
    JobStarted {
        job_id: String,
        name: String,
    },
    StepStarted {
        job_id: String,
        step: String,
        index: usize,
        total: usize,
    },
    StepOutput {
        job_id: String,
        line: String,
    },
    JobCompleted {
        job_id: String,
        steps: usize,
    },
    JobFailed {
        job_id: String,
        step: String,
        error: String,
    },
    JobSkipped {
        job_id: String,
        reason: String,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Handlers shared between the engine and its running jobs
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl EventBus {
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.push(Arc::new(handler));
        }
    }

    /// Emit an event to all handlers
    pub fn emit(&self, event: ExecutionEvent) {
        let handlers = match self.handlers.read() {
            Ok(handlers) => handlers.clone(),
            Err(_) => return,
        };
        for handler in handlers {
            handler(event.clone());
        }
    }
}

/// Errors that abort a pipeline run
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Pipeline stuck - no runnable jobs among: {}", .0.join(", "))]
    Stuck(Vec<String>),

    #[error("Job task failed: {0}")]
    Join(String),
}

/// Main pipeline execution engine
pub struct ExecutionEngine {
    scheduler: ExecutionScheduler,
    executor: Arc<JobExecutor>,
    events: EventBus,
}

impl ExecutionEngine {
    pub fn new(executor: JobExecutor, strategy: SchedulingStrategy) -> Self {
        Self {
            scheduler: ExecutionScheduler::new(strategy),
            executor: Arc::new(executor),
            events: EventBus::default(),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler);
    }

    /// Execute the entire pipeline.
    ///
    /// Job failures are reported through the returned status; only a run
    /// that cannot make progress is an error.
    pub async fn execute(
        &self,
        pipeline: &mut Pipeline,
        run: &RunContext,
    ) -> Result<ExecutionStatus, ExecutionError> {
        let execution_id = pipeline.state.execution_id;

        info!("Starting pipeline execution: {} ({})", pipeline.name, execution_id);
        pipeline.state.start(pipeline.jobs.len());
        self.events.emit(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline.name.clone(),
            total_jobs: pipeline.jobs.len(),
        });

        while !pipeline.is_complete() {
            let job_ids = self.scheduler.next_jobs(pipeline);

            if job_ids.is_empty() {
                let pending: Vec<String> = pipeline
                    .execution_order()
                    .iter()
                    .filter(|id| pipeline.job(id).is_some_and(|j| !j.state.is_terminal()))
                    .cloned()
                    .collect();
                error!("No jobs ready to run and none running - pipeline stuck");
                pipeline.state.status = ExecutionStatus::Failed;
                pipeline.state.completed_at = Some(Utc::now());
                self.events.emit(ExecutionEvent::PipelineCompleted {
                    execution_id,
                    status: ExecutionStatus::Failed,
                });
                return Err(ExecutionError::Stuck(pending));
            }

            let mut tasks = JoinSet::new();
            for job_id in job_ids {
                if let Some(reason) = pipeline.skip_reason(&job_id, run) {
                    info!("Skipping job {}: {}", job_id, reason);
                    self.set_state(pipeline, &job_id, JobState::Skipped { reason: reason.clone() });
                    self.events.emit(ExecutionEvent::JobSkipped { job_id, reason });
                    continue;
                }

                let Some(job) = pipeline.job(&job_id).cloned() else {
                    continue;
                };
                let variables = pipeline.variables_for(&job, run);
                let instance_run = pipeline.run_context_for(&job, run);
                let started_at = Utc::now();

                if let Some(job) = pipeline.job_mut(&job_id) {
                    job.state = JobState::Running { started_at };
                }
                self.events.emit(ExecutionEvent::JobStarted {
                    job_id: job.id.clone(),
                    name: job.name.clone(),
                });

                let executor = self.executor.clone();
                let events = self.events.clone();
                tasks.spawn(async move {
                    let result = executor.execute(&job, &variables, instance_run, &events).await;
                    (job.id, started_at, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let (job_id, started_at, result) =
                    joined.map_err(|e| ExecutionError::Join(e.to_string()))?;
                self.finish_job(pipeline, job_id, started_at, result);
            }
        }

        let status = pipeline.state.finish();
        info!(
            "Pipeline {} finished: {} completed, {} failed, {} skipped",
            pipeline.name,
            pipeline.state.completed_jobs,
            pipeline.state.failed_jobs,
            pipeline.state.skipped_jobs
        );
        self.events.emit(ExecutionEvent::PipelineCompleted { execution_id, status });
        Ok(status)
    }

    fn finish_job(
        &self,
        pipeline: &mut Pipeline,
        job_id: String,
        started_at: chrono::DateTime<Utc>,
        result: JobResult,
    ) {
        match result {
            JobResult::Success { steps } => {
                info!("Job {} completed", job_id);
                self.set_state(
                    pipeline,
                    &job_id,
                    JobState::Completed {
                        steps,
                        started_at,
                        completed_at: Utc::now(),
                    },
                );
                self.events.emit(ExecutionEvent::JobCompleted { job_id, steps });
            }
            JobResult::Failure { step, error } => {
                warn!("Job {} failed: {}", job_id, error);
                self.set_state(
                    pipeline,
                    &job_id,
                    JobState::Failed {
                        error: error.clone(),
                        step: step.clone(),
                        started_at,
                        failed_at: Utc::now(),
                    },
                );
                self.events.emit(ExecutionEvent::JobFailed { job_id, step, error });
            }
        }
    }

    fn set_state(&self, pipeline: &mut Pipeline, job_id: &str, state: JobState) {
        pipeline.state.record(&state);
        if let Some(job) = pipeline.job_mut(job_id) {
            job.state = state;
        }
    }
}
