//! Test: Failure Handling - a failed step fails its job and skips dependents

use crate::common::*;
use devtools::core::{ExecutionStatus, JobState};
use devtools::execution::{ExecutionEvent, SchedulingStrategy};
use std::sync::Arc;

const YAML: &str = r#"
name: "Test: Failure Handling"
jobs:
  - id: validate
    steps:
      - run: ["black", "--check", "src"]
      - name: "Unit tests"
        run: ["pytest"]
      - run: ["pylint", "src"]
  - id: docs
    steps:
      - run: ["mkdocs", "build"]
  - id: package
    needs: [validate]
    steps:
      - run: ["python", "-m", "build"]
  - id: publish
    needs: [package, docs]
    steps:
      - run: ["twine", "upload"]
"#;

#[tokio::test]
async fn test_failing_step_stops_job() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new().fail("pytest", 1));

    let result = run_pipeline(
        YAML,
        runner.clone(),
        &linux_run(),
        SchedulingStrategy::Sequential,
        dir.path(),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(!runner.ran("pylint"), "steps after the failure must not run");

    match &result.pipeline.job("validate").unwrap().state {
        JobState::Failed { step, error, .. } => {
            assert_eq!(step, "Unit tests");
            assert!(error.contains("exited with code 1"), "{}", error);
        }
        other => panic!("Expected validate to fail, got {:?}", other),
    }
}

#[tokio::test]
async fn test_dependents_are_skipped_and_independent_jobs_run() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new().fail("pytest", 1));

    let result = run_pipeline(
        YAML,
        runner.clone(),
        &linux_run(),
        SchedulingStrategy::Parallel,
        dir.path(),
    )
    .await;

    assert_eq!(result.state_label("validate"), "failed");
    assert_eq!(result.state_label("docs"), "completed");
    assert_eq!(result.state_label("package"), "skipped");
    assert_eq!(result.state_label("publish"), "skipped");
    assert!(runner.ran("mkdocs build"));
    assert!(!runner.ran("python -m build"));
    assert!(!runner.ran("twine"));

    let skipped: Vec<_> = result
        .events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::JobSkipped { job_id, reason } => Some((job_id.as_str(), reason.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(
        skipped,
        vec![
            ("package", "needed job 'validate' failed"),
            ("publish", "needed job 'package' skipped"),
        ]
    );
    assert_eq!(result.pipeline.state.failed_jobs, 1);
    assert_eq!(result.pipeline.state.skipped_jobs, 2);
}

#[tokio::test]
async fn test_allowed_failure_does_not_fail_job() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new().fail("gh release delete", 1));
    let yaml = r#"
name: "release"
jobs:
  - id: release
    steps:
      - run: ["gh", "release", "delete", "v1.0.0", "--yes"]
        allow_failure: true
      - run: ["gh", "release", "create", "v1.0.0"]
"#;

    let result = run_pipeline(
        yaml,
        runner.clone(),
        &linux_run(),
        SchedulingStrategy::Sequential,
        dir.path(),
    )
    .await;

    assert!(result.is_success());
    assert!(runner.ran("gh release create v1.0.0"));
}

#[tokio::test]
async fn test_activity_error_fails_job() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let yaml = r#"
name: "tags"
jobs:
  - id: tags
    steps:
      - activity:
          kind: update_ci_tags
          version: "not-a-version"
"#;

    let result = run_pipeline(
        yaml,
        runner.clone(),
        &linux_run(),
        SchedulingStrategy::Sequential,
        dir.path(),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(runner.commands().is_empty());
    match &result.pipeline.job("tags").unwrap().state {
        JobState::Failed { error, .. } => assert!(error.contains("not in a supported format")),
        other => panic!("Expected failure, got {:?}", other),
    }
}
