//! Test utilities shared by the integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use devtools::core::config::PipelineConfig;
use devtools::core::{artifact::ArtifactStore, CommandDescriptor, ExecutionStatus, Pipeline, RunContext};
use devtools::execution::{ExecutionEngine, ExecutionEvent, JobExecutor, SchedulingStrategy};
use devtools::process::{CommandOutput, CommandRunner, OutputSink, ProcessError, StreamKind};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted runner: records every command and answers from a script
///
/// A rule matches when the command line (`program args...`) contains its
/// fragment; the first matching rule wins. Unmatched commands succeed with
/// no output.
#[derive(Default)]
pub struct MockRunner {
    commands: Mutex<Vec<CommandDescriptor>>,
    rules: Vec<Rule>,
    delay: Option<Duration>,
}

struct Rule {
    fragment: String,
    exit_code: i32,
    output: String,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `fragment` exit with `exit_code`
    pub fn fail(mut self, fragment: &str, exit_code: i32) -> Self {
        self.rules.push(Rule {
            fragment: fragment.to_string(),
            exit_code,
            output: String::new(),
        });
        self
    }

    /// Commands containing `fragment` print `output` and succeed
    pub fn respond(mut self, fragment: &str, output: &str) -> Self {
        self.rules.push(Rule {
            fragment: fragment.to_string(),
            exit_code: 0,
            output: output.to_string(),
        });
        self
    }

    /// Every command takes at least `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn commands(&self) -> Vec<CommandDescriptor> {
        self.commands.lock().unwrap().clone()
    }

    /// Recorded commands as `program args...`
    pub fn command_lines(&self) -> Vec<String> {
        self.commands()
            .iter()
            .map(|c| format!("{} {}", c.program, c.args.join(" ")).trim_end().to_string())
            .collect()
    }

    pub fn ran(&self, fragment: &str) -> bool {
        self.command_lines().iter().any(|line| line.contains(fragment))
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(
        &self,
        command: &CommandDescriptor,
        sink: Option<&dyn OutputSink>,
    ) -> Result<CommandOutput, ProcessError> {
        self.commands.lock().unwrap().push(command.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let line = format!("{} {}", command.program, command.args.join(" "));
        let (exit_code, output) = self
            .rules
            .iter()
            .find(|rule| line.contains(rule.fragment.as_str()))
            .map(|rule| (rule.exit_code, rule.output.clone()))
            .unwrap_or((0, String::new()));

        if let Some(sink) = sink {
            for line in output.lines() {
                sink.on_line(StreamKind::Stdout, line);
            }
        }

        Ok(CommandOutput {
            exit_code,
            output,
            duration: self.delay.unwrap_or_default(),
        })
    }
}

/// A run on `ubuntu-latest`, push to `main`
pub fn linux_run() -> RunContext {
    RunContext {
        os: "ubuntu-latest".to_string(),
        runtime_version: "3.12".to_string(),
        event: "push".to_string(),
        branch: "main".to_string(),
        revision: "0123abcd".to_string(),
        changed_files: Vec::new(),
    }
}

/// Outcome of a pipeline run under test
pub struct PipelineTestResult {
    pub pipeline: Pipeline,
    pub status: ExecutionStatus,
    pub events: Vec<ExecutionEvent>,
}

impl PipelineTestResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    pub fn state_label(&self, job_id: &str) -> &'static str {
        self.pipeline
            .job(job_id)
            .map(|j| j.state.label())
            .unwrap_or("missing")
    }

    /// Instance ids in the order their jobs started
    pub fn started(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::JobStarted { job_id, .. } => Some(job_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn output_lines(&self, job_id: &str) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::StepOutput { job_id: id, line } if id == job_id => {
                    Some(line.clone())
                }
                _ => None,
            })
            .collect()
    }
}

/// Run a pipeline from YAML against `runner`, in `workspace`
pub async fn run_pipeline(
    yaml: &str,
    runner: Arc<MockRunner>,
    run: &RunContext,
    strategy: SchedulingStrategy,
    workspace: &std::path::Path,
) -> PipelineTestResult {
    run_pipeline_with(yaml, runner, run, strategy, workspace).await
}

/// Like `run_pipeline`, with any runner (for example a real `SubprocessRunner`)
pub async fn run_pipeline_with(
    yaml: &str,
    runner: Arc<dyn CommandRunner>,
    run: &RunContext,
    strategy: SchedulingStrategy,
    workspace: &std::path::Path,
) -> PipelineTestResult {
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    let mut pipeline = config.to_pipeline();

    let store = ArtifactStore::open(workspace.join(".artifacts")).unwrap();
    let executor = JobExecutor::new(runner, workspace)
        .with_artifacts(store)
        .with_default_timeout(pipeline.default_timeout_secs);
    let engine = ExecutionEngine::new(executor, strategy);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let status = engine.execute(&mut pipeline, run).await.unwrap();
    let events = events.lock().unwrap().clone();

    PipelineTestResult {
        pipeline,
        status,
        events,
    }
}
