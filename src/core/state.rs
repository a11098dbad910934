//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every job completed or was skipped
    Completed,
    /// At least one job failed
    Failed,
}

/// State of a single job instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting for the jobs it needs
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Completed {
        steps: usize,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// A step failed; later steps did not run
    Failed {
        error: String,
        step: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Not run: a needed job did not succeed or the `when` condition did not hold
    Skipped {
        reason: String,
    },
}

impl JobState {
    /// Check if job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed { .. } | JobState::Failed { .. } | JobState::Skipped { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Completed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running { .. } => "running",
            JobState::Completed { .. } => "completed",
            JobState::Failed { .. } => "failed",
            JobState::Skipped { .. } => "skipped",
        }
    }
}

/// Overall pipeline state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of job instances
    pub total_jobs: usize,

    pub completed_jobs: usize,

    pub failed_jobs: usize,

    pub skipped_jobs: usize,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_jobs: 0,
            completed_jobs: 0,
            failed_jobs: 0,
            skipped_jobs: 0,
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self, total_jobs: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_jobs = total_jobs;
    }

    /// Mark the pipeline finished; failed if any job failed
    pub fn finish(&mut self) -> ExecutionStatus {
        self.status = if self.failed_jobs > 0 {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        self.completed_at = Some(Utc::now());
        self.status
    }

    /// Record a job reaching a terminal state
    pub fn record(&mut self, state: &JobState) {
        match state {
            JobState::Completed { .. } => self.completed_jobs += 1,
            JobState::Failed { .. } => self.failed_jobs += 1,
            JobState::Skipped { .. } => self.skipped_jobs += 1,
            JobState::Pending | JobState::Running { .. } => {}
        }
    }

    /// Calculate progress percentage (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_jobs == 0 {
            return 0.0;
        }
        (self.completed_jobs + self.failed_jobs + self.skipped_jobs) as f64 / self.total_jobs as f64
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
