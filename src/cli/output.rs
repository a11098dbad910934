//! CLI output formatting

use crate::{
    core::{ExecutionStatus, Job, JobState},
    execution::ExecutionEvent,
    tools::match_tests::MatchReport,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Create a progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(template) = ProgressStyle::default_bar().template(PROGRESS_TEMPLATE) {
        progress.set_style(template.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a job state for display
pub fn format_job_state(state: &JobState) -> String {
    match state {
        JobState::Pending => style("PENDING").dim().to_string(),
        JobState::Running { .. } => style("RUNNING").yellow().to_string(),
        JobState::Completed { .. } => style("COMPLETED").green().to_string(),
        JobState::Failed { .. } => style("FAILED").red().to_string(),
        JobState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// One summary line per job
pub fn format_job_summary(job: &Job) -> String {
    let detail = match &job.state {
        JobState::Completed {
            steps,
            started_at,
            completed_at,
        } => format!(
            "{} steps in {}",
            steps,
            format_duration((*completed_at - *started_at).to_std().unwrap_or_default())
        ),
        JobState::Failed { step, error, .. } => format!("{}: {}", step, error),
        JobState::Skipped { reason } => reason.clone(),
        JobState::Pending | JobState::Running { .. } => String::new(),
    };
    format!(
        "  {:<12} {} {}",
        format_job_state(&job.state),
        style(&job.name).bold(),
        style(detail).dim()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            total_jobs,
        } => format!(
            "{} Starting pipeline {} ({}, {} jobs)",
            ROCKET,
            style(pipeline_name).bold(),
            style(&execution_id.to_string()[..8]).dim(),
            total_jobs
        ),
        ExecutionEvent::JobStarted { name, .. } => format!("{} {}", SPINNER, style(name).cyan()),
        ExecutionEvent::StepStarted {
            job_id,
            step,
            index,
            total,
        } => format!(
            "{} {} [{}/{}] {}",
            INFO,
            style(job_id).dim(),
            index,
            total,
            step
        ),
        ExecutionEvent::StepOutput { job_id, line } => {
            format!("  {} {}", style(format!("{} |", job_id)).dim(), line)
        }
        ExecutionEvent::JobCompleted { job_id, .. } => {
            format!("{} {}", CHECK, style(job_id).green())
        }
        ExecutionEvent::JobFailed { job_id, step, error } => format!(
            "{} {} ({}): {}",
            CROSS,
            style(job_id).red(),
            step,
            style(error).dim()
        ),
        ExecutionEvent::JobSkipped { job_id, reason } => format!(
            "{} {} skipped: {}",
            WARN,
            style(job_id).yellow(),
            style(reason).dim()
        ),
        ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        } => {
            let status_str = match status {
                ExecutionStatus::Completed => {
                    format!("{} completed", style("successfully").green())
                }
                ExecutionStatus::Failed => style("failed").red().to_string(),
                _ => format_status(*status),
            };
            format!(
                "{} Pipeline ({}) {}",
                INFO,
                style(&execution_id.to_string()[..8]).dim(),
                status_str
            )
        }
    }
}

/// Format a test matching report; matched pairs only when `verbose`
pub fn format_match_report(report: &MatchReport, verbose: bool) -> String {
    let mut lines = Vec::new();

    if verbose {
        for (source, test) in &report.matched {
            lines.push(format!("{} {} -> {}", CHECK, source, style(test).dim()));
        }
    }
    for source in &report.missing {
        lines.push(format!(
            "{} No test for {}",
            CROSS,
            style(report.source_dir.join(source).display()).red()
        ));
    }
    for test in &report.orphaned {
        lines.push(format!(
            "{} {} does not match a source file ({} expected)",
            WARN,
            style(test.path.display()).yellow(),
            test.source
        ));
    }

    if report.is_clean() {
        lines.push(format!(
            "{} {} source files have tests",
            CHECK,
            report.matched.len()
        ));
    }
    lines.join("\n")
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
