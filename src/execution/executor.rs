//! Job executor - runs the steps of one job instance

use crate::{
    activities::{ActivityConfig, ActivityContext, ActivityError},
    core::{
        artifact::ArtifactStore,
        command::{render_template, CommandDescriptor},
        config::{RunStep, StepAction, StepConfig},
        context::RunContext,
        files::copy_tree,
        Job,
    },
    execution::engine::{EventBus, ExecutionEvent},
    process::{CommandRunner, OutputSink, StreamKind},
};
use serde_yaml::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Result of executing a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Every step succeeded
    Success { steps: usize },
    /// A step failed; the steps after it did not run
    Failure { step: String, error: String },
}

/// Where job instances get their own copy of the workspace, relative to it
pub const JOBS_DIR: &str = ".devtools/jobs";

/// Working directory of a job instance when the workspace is `workspace`
///
/// `validate[os=ubuntu-latest,runtime=3.12]` runs in
/// `<workspace>/.devtools/jobs/validate_os_ubuntu-latest_runtime_3.12`.
pub fn job_workspace(workspace: &Path, job_id: &str) -> PathBuf {
    workspace.join(JOBS_DIR).join(job_dir_name(job_id))
}

fn job_dir_name(job_id: &str) -> String {
    let name: String = job_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    name.trim_matches('_').to_string()
}

/// Forwards command output to the event handlers
struct StepOutputSink<'a> {
    job_id: &'a str,
    events: &'a EventBus,
}

impl OutputSink for StepOutputSink<'_> {
    fn on_line(&self, _stream: StreamKind, line: &str) {
        self.events.emit(ExecutionEvent::StepOutput {
            job_id: self.job_id.to_string(),
            line: line.to_string(),
        });
    }
}

/// Executes the steps of a job, sequentially
///
/// Every job instance works in a fresh copy of the workspace, so instances
/// running side by side never see each other's files. Jobs exchange files
/// through the artifact store only.
pub struct JobExecutor {
    runner: Arc<dyn CommandRunner>,
    artifacts: Option<ArtifactStore>,
    workspace: PathBuf,
    jobs_root: PathBuf,
    claimed: Mutex<HashSet<PathBuf>>,
    default_timeout_secs: Option<u64>,
}

impl JobExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        Self {
            runner,
            artifacts: None,
            jobs_root: workspace.join(JOBS_DIR),
            workspace,
            claimed: Mutex::new(HashSet::new()),
            default_timeout_secs: None,
        }
    }

    /// Put job working directories below `root` instead of the workspace
    pub fn with_jobs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.jobs_root = root.into();
        self
    }

    pub fn with_artifacts(mut self, store: ArtifactStore) -> Self {
        self.artifacts = Some(store);
        self
    }

    pub fn with_default_timeout(mut self, secs: Option<u64>) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Run every step of `job`; the first failure stops the job
    pub async fn execute(
        &self,
        job: &Job,
        variables: &HashMap<String, String>,
        run: RunContext,
        events: &EventBus,
    ) -> JobResult {
        info!("Executing job: {}", job.id);

        let workspace = match self.prepare_workspace(&job.id).await {
            Ok(workspace) => workspace,
            Err(error) => {
                warn!("Job {} could not prepare its workspace: {}", job.id, error);
                return JobResult::Failure {
                    step: "prepare workspace".to_string(),
                    error: error.to_string(),
                };
            }
        };
        debug!("Job {} runs in {}", job.id, workspace.display());

        let sink = StepOutputSink {
            job_id: &job.id,
            events,
        };
        let mut ctx = ActivityContext::new(self.runner.as_ref(), run, workspace)
            .with_producer(job.id.clone())
            .with_sink(&sink);
        if let Some(store) = &self.artifacts {
            ctx = ctx.with_artifacts(store);
        }

        let total = job.steps.len();
        for (index, step) in job.steps.iter().enumerate() {
            let name = render_template(&step.display_name(), variables);
            events.emit(ExecutionEvent::StepStarted {
                job_id: job.id.clone(),
                step: name.clone(),
                index: index + 1,
                total,
            });

            if let Err(error) = self.execute_step(step, &name, variables, &ctx).await {
                warn!("Job {} failed at step '{}': {}", job.id, name, error);
                return JobResult::Failure {
                    step: name,
                    error: error.to_string(),
                };
            }
        }

        JobResult::Success { steps: total }
    }

    /// Claim a directory for `job_id` and seed it with the workspace
    async fn prepare_workspace(&self, job_id: &str) -> Result<PathBuf, ActivityError> {
        let dir = self.claim_dir(job_id);

        let mut skipped = vec![self.jobs_root.clone(), self.workspace.join(".devtools")];
        if let Some(store) = &self.artifacts {
            skipped.push(store.root().to_path_buf());
        }
        let source = self.workspace.clone();
        let target = dir.clone();
        tokio::task::spawn_blocking(move || seed_workspace(&source, &target, &skipped))
            .await
            .map_err(|e| ActivityError::Invalid(format!("Workspace copy did not finish: {}", e)))??;

        Ok(dir)
    }

    /// Distinct instance ids may map to the same directory name; later
    /// claimants get a numeric suffix
    fn claim_dir(&self, job_id: &str) -> PathBuf {
        let name = job_dir_name(job_id);
        let mut claimed = match self.claimed.lock() {
            Ok(claimed) => claimed,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut dir = self.jobs_root.join(&name);
        let mut suffix = 2;
        while claimed.contains(&dir) {
            dir = self.jobs_root.join(format!("{}-{}", name, suffix));
            suffix += 1;
        }
        claimed.insert(dir.clone());
        dir
    }

    async fn execute_step(
        &self,
        step: &StepConfig,
        name: &str,
        variables: &HashMap<String, String>,
        ctx: &ActivityContext<'_>,
    ) -> Result<(), ActivityError> {
        match &step.action {
            StepAction::Run(run) => {
                let command = self.command_for(run, variables)?;
                ctx.exec(name, command).await.map(|_| ())
            }
            StepAction::Activity { activity } => render_activity(activity, variables)?.run(ctx).await,
            StepAction::Upload { upload } => {
                let artifact_name = render_template(&upload.name, variables);
                let paths: Vec<PathBuf> = upload
                    .paths
                    .iter()
                    .map(|p| ctx.resolve(Path::new(&render_template(p, variables))))
                    .collect();
                ctx.upload(&artifact_name, &paths).map(|_| ())
            }
            StepAction::Download { download } => {
                let dest = ctx.resolve(Path::new(&render_template(&download.dest, variables)));
                match &download.name {
                    Some(artifact_name) => {
                        let artifact_name = render_template(artifact_name, variables);
                        ctx.download(&artifact_name, &dest)?;
                    }
                    None => {
                        let store = ctx.artifacts.ok_or_else(|| {
                            ActivityError::Invalid(
                                "Artifacts were requested but no artifact store is available"
                                    .to_string(),
                            )
                        })?;
                        let files = store.download_all(&dest)?;
                        debug!("Downloaded {} files into {}", files.len(), dest.display());
                    }
                }
                Ok(())
            }
        }
    }

    fn command_for(
        &self,
        run: &RunStep,
        variables: &HashMap<String, String>,
    ) -> Result<CommandDescriptor, ActivityError> {
        let mut command = CommandDescriptor::from_argv(&run.run)
            .ok_or_else(|| ActivityError::Invalid("Empty command".to_string()))?;

        if let Some(cwd) = &run.cwd {
            command = command.current_dir(cwd);
        }
        for (key, value) in &run.env {
            command = command.env(key.clone(), value.clone());
        }
        if let Some(secs) = run.timeout_secs.or(self.default_timeout_secs) {
            command = command.timeout(secs);
        }
        if run.allow_failure {
            command = command.allow_failure();
        }

        Ok(command.render(variables))
    }
}

/// Replace `target` with a copy of `source`, leaving out `skipped` paths
fn seed_workspace(source: &Path, target: &Path, skipped: &[PathBuf]) -> Result<(), ActivityError> {
    if target.exists() {
        fs::remove_dir_all(target).map_err(|e| ActivityError::io(target, e))?;
    }
    fs::create_dir_all(target).map_err(|e| ActivityError::io(target, e))?;

    let canonical = |path: &Path| fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let source = canonical(source);
    let skipped: Vec<PathBuf> = skipped.iter().map(|path| canonical(path.as_path())).collect();

    let copied = copy_tree(&source, target, &|path: &Path| {
        skipped.iter().any(|skip| skip == path)
    })
    .map_err(|e| ActivityError::io(&source, e))?;
    debug!("Seeded {} with {} files", target.display(), copied);
    Ok(())
}

/// Substitute variables in every string option of an activity
pub fn render_activity(
    activity: &ActivityConfig,
    variables: &HashMap<String, String>,
) -> Result<ActivityConfig, ActivityError> {
    let value = serde_yaml::to_value(activity).map_err(|e| ActivityError::Invalid(e.to_string()))?;
    serde_yaml::from_value(render_value(value, variables))
        .map_err(|e| ActivityError::Invalid(format!("Invalid '{}' activity: {}", activity.kind(), e)))
}

fn render_value(value: Value, variables: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(render_template(&s, variables)),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(|item| render_value(item, variables))
                .collect(),
        ),
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, render_value(v, variables)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::testing::RecordingRunner;
    use crate::core::config::PipelineConfig;
    use std::sync::Mutex;

    fn job(yaml: &str) -> Job {
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        let pipeline = config.to_pipeline();
        pipeline.jobs.into_values().next().unwrap()
    }

    fn vars() -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("matrix.os".to_string(), "ubuntu-latest".to_string());
        vars.insert("package".to_string(), "mypkg".to_string());
        vars
    }

    #[tokio::test]
    async fn test_run_steps_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let executor = JobExecutor::new(runner.clone(), dir.path()).with_default_timeout(Some(60));

        let job = job(r#"
name: p
jobs:
  - id: lint
    steps:
      - run: ["black", "--check", "src/{{ package }}"]
      - run: ["pylint", "src"]
        timeout_secs: 5
        env: {PYLINTHOME: "/tmp/pylint"}
"#);
        let result = executor
            .execute(&job, &vars(), RunContext::default(), &EventBus::default())
            .await;
        assert_eq!(result, JobResult::Success { steps: 2 });

        let commands = runner.commands();
        assert_eq!(commands[0].args, vec!["--check", "src/mypkg"]);
        assert_eq!(commands[0].timeout_secs, Some(60));
        assert_eq!(
            commands[0].cwd.as_deref(),
            Some(job_workspace(dir.path(), "lint").as_path())
        );
        assert_eq!(commands[1].timeout_secs, Some(5));
        assert_eq!(commands[1].env.get("PYLINTHOME").map(String::as_str), Some("/tmp/pylint"));
    }

    #[tokio::test]
    async fn test_first_failure_stops_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new().failing("pytest", 2));
        let executor = JobExecutor::new(runner.clone(), dir.path());

        let job = job(r#"
name: p
jobs:
  - id: test
    steps:
      - run: ["black", "src"]
      - name: tests
        run: ["pytest"]
      - run: ["never"]
"#);
        let result = executor
            .execute(&job, &vars(), RunContext::default(), &EventBus::default())
            .await;

        match result {
            JobResult::Failure { step, error } => {
                assert_eq!(step, "tests");
                assert!(error.contains("exited with code 2"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
        assert_eq!(runner.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_allowed_failure_continues() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new().failing("gh release delete", 1));
        let executor = JobExecutor::new(runner.clone(), dir.path());

        let job = job(r#"
name: p
jobs:
  - id: release
    steps:
      - run: ["gh", "release", "delete", "v1", "--yes"]
        allow_failure: true
      - run: ["gh", "release", "create", "v1"]
"#);
        let result = executor
            .execute(&job, &vars(), RunContext::default(), &EventBus::default())
            .await;
        assert_eq!(result, JobResult::Success { steps: 2 });
    }

    #[tokio::test]
    async fn test_upload_and_download_steps() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("coverage.json"), "{}").unwrap();
        let store = ArtifactStore::open(dir.path().join(".artifacts")).unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let executor = JobExecutor::new(runner, dir.path()).with_artifacts(store.clone());

        let job = job(r#"
name: p
jobs:
  - id: shard
    steps:
      - upload:
          name: "coverage-{{ matrix.os }}"
          paths: ["coverage.json"]
      - download:
          name: "coverage-{{ matrix.os }}"
          dest: "restored"
"#);
        let result = executor
            .execute(&job, &vars(), RunContext::default(), &EventBus::default())
            .await;
        assert_eq!(result, JobResult::Success { steps: 2 });

        assert_eq!(store.get("coverage-ubuntu-latest").unwrap().producer, "shard");
        assert!(job_workspace(dir.path(), "shard")
            .join("restored/coverage.json")
            .is_file());
    }

    #[tokio::test]
    async fn test_each_instance_gets_its_own_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/mypkg")).unwrap();
        std::fs::write(dir.path().join("src/mypkg/core.py"), "x = 1\n").unwrap();
        let store = ArtifactStore::open(dir.path().join(".artifacts")).unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let executor = JobExecutor::new(runner.clone(), dir.path()).with_artifacts(store);

        let config = PipelineConfig::from_yaml(
            r#"
name: p
jobs:
  - id: validate
    matrix:
      os: [ubuntu-latest, windows-latest]
    steps:
      - run: ["pytest"]
"#,
        )
        .unwrap();
        let pipeline = config.to_pipeline();
        for job in pipeline.jobs.values() {
            let result = executor
                .execute(job, &vars(), RunContext::default(), &EventBus::default())
                .await;
            assert_eq!(result, JobResult::Success { steps: 1 });
        }

        let mut cwds: Vec<PathBuf> = runner
            .commands()
            .into_iter()
            .filter_map(|c| c.cwd)
            .collect();
        cwds.sort();
        assert_eq!(
            cwds,
            vec![
                job_workspace(dir.path(), "validate[os=ubuntu-latest]"),
                job_workspace(dir.path(), "validate[os=windows-latest]"),
            ]
        );
        for cwd in &cwds {
            assert!(cwd.join("src/mypkg/core.py").is_file());
            assert!(!cwd.join(".artifacts").exists());
            assert!(!cwd.join(".devtools").exists());
        }
    }

    #[test]
    fn test_job_dir_names() {
        assert_eq!(
            job_workspace(Path::new("/repo"), "validate[os=ubuntu-latest,runtime=3.12]"),
            Path::new("/repo/.devtools/jobs/validate_os_ubuntu-latest_runtime_3.12")
        );

        let runner = Arc::new(RecordingRunner::new());
        let executor = JobExecutor::new(runner, "/repo");
        assert_eq!(
            executor.claim_dir("a[x=1]"),
            Path::new("/repo/.devtools/jobs/a_x_1")
        );
        assert_eq!(
            executor.claim_dir("a_x_1"),
            Path::new("/repo/.devtools/jobs/a_x_1-2")
        );
    }

    #[tokio::test]
    async fn test_step_events() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let executor = JobExecutor::new(runner, dir.path());
        let events = EventBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        events.subscribe(move |event| {
            if let ExecutionEvent::StepStarted { step, index, total, .. } = event {
                sink.lock().unwrap().push(format!("{}/{} {}", index, total, step));
            }
        });

        let job = job(r#"
name: p
jobs:
  - id: a
    steps:
      - run: ["echo", "one"]
      - name: "second on {{ matrix.os }}"
        run: ["echo", "two"]
"#);
        executor.execute(&job, &vars(), RunContext::default(), &events).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["1/2 echo one", "2/2 second on ubuntu-latest"]
        );
    }

    #[test]
    fn test_render_activity() {
        let activity: ActivityConfig = serde_yaml::from_str(
            r#"
kind: validate
package_name: "{{ package }}"
pytest_args: ["--junitxml=results-{{ matrix.os }}.xml"]
"#,
        )
        .unwrap();

        let rendered = render_activity(&activity, &vars()).unwrap();
        match rendered {
            ActivityConfig::Validate(options) => {
                assert_eq!(options.package_name.as_deref(), Some("mypkg"));
                assert_eq!(options.pytest_args, vec!["--junitxml=results-ubuntu-latest.xml"]);
            }
            other => panic!("Expected validate, got {:?}", other),
        }
    }
}
