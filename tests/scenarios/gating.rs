//! Test: Gating - `when` conditions against the run context

use crate::common::*;
use devtools::core::{ExecutionStatus, JobState, RunContext};
use devtools::execution::SchedulingStrategy;
use std::sync::Arc;

const YAML: &str = r#"
name: "Test: Gating"
jobs:
  - id: validate
    steps:
      - run: ["pytest"]
  - id: docs
    when:
      paths: ["docs/**", "mkdocs.yml"]
    steps:
      - run: ["mkdocs", "build"]
  - id: publish
    needs: [validate]
    when:
      event: push
      branch: main
    steps:
      - run: ["twine", "upload"]
  - id: announce
    needs: [publish]
    steps:
      - run: ["gh", "release", "create", "v1"]
"#;

async fn run_with(run: RunContext) -> (PipelineTestResult, Arc<MockRunner>) {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let result = run_pipeline(
        YAML,
        runner.clone(),
        &run,
        SchedulingStrategy::Sequential,
        dir.path(),
    )
    .await;
    (result, runner)
}

#[tokio::test]
async fn test_push_to_main_runs_publish() {
    let (result, runner) = run_with(linux_run()).await;

    assert!(result.is_success());
    assert_eq!(result.state_label("publish"), "completed");
    assert_eq!(result.state_label("announce"), "completed");
    assert!(runner.ran("twine upload"));
}

#[tokio::test]
async fn test_other_branch_skips_publish_and_dependents() {
    let run = RunContext {
        branch: "feature/x".to_string(),
        ..linux_run()
    };
    let (result, runner) = run_with(run).await;

    // Skipped jobs do not fail the run
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.state_label("validate"), "completed");
    assert_eq!(
        result.pipeline.job("publish").unwrap().state,
        JobState::Skipped {
            reason: "branch is 'feature/x', not 'main'".to_string()
        }
    );
    assert_eq!(result.state_label("announce"), "skipped");
    assert!(!runner.ran("twine"));
    assert!(!runner.ran("gh release"));
}

#[tokio::test]
async fn test_pull_request_skips_publish() {
    let run = RunContext {
        event: "pull_request".to_string(),
        ..linux_run()
    };
    let (result, _) = run_with(run).await;

    match &result.pipeline.job("publish").unwrap().state {
        JobState::Skipped { reason } => assert!(reason.contains("pull_request")),
        other => panic!("Expected skipped, got {:?}", other),
    }
}

#[tokio::test]
async fn test_paths_filter_on_changed_files() {
    let (result, runner) = run_with(RunContext {
        changed_files: vec!["src/pkg/core.py".to_string()],
        ..linux_run()
    })
    .await;
    assert_eq!(result.state_label("docs"), "skipped");
    assert!(!runner.ran("mkdocs"));

    let (result, runner) = run_with(RunContext {
        changed_files: vec!["src/pkg/core.py".to_string(), "docs/guide/intro.md".to_string()],
        ..linux_run()
    })
    .await;
    assert_eq!(result.state_label("docs"), "completed");
    assert!(runner.ran("mkdocs build"));
}
