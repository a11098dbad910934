//! Test: Success Chain - jobs run in `needs` order

use crate::common::*;
use devtools::execution::{job_workspace, SchedulingStrategy};
use std::sync::Arc;

const YAML: &str = r#"
name: "Test: Success Chain"
jobs:
  - id: publish
    needs: [package]
    steps:
      - run: ["twine", "upload", "dist/*"]
  - id: validate
    steps:
      - run: ["black", "--check", "src"]
      - run: ["pytest"]
  - id: package
    needs: [validate]
    steps:
      - run: ["python", "-m", "build"]
"#;

#[tokio::test]
async fn test_success_chain() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());

    let result = run_pipeline(
        YAML,
        runner.clone(),
        &linux_run(),
        SchedulingStrategy::Sequential,
        dir.path(),
    )
    .await;

    assert!(result.is_success());
    assert_eq!(result.started(), vec!["validate", "package", "publish"]);
    assert_eq!(
        runner.command_lines(),
        vec![
            "black --check src",
            "pytest",
            "python -m build",
            "twine upload dist/*"
        ]
    );
    assert_eq!(result.pipeline.state.completed_jobs, 3);
    assert!((result.pipeline.state.progress() - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_parallel_strategy_keeps_dependency_order() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());

    let result = run_pipeline(
        YAML,
        runner.clone(),
        &linux_run(),
        SchedulingStrategy::Parallel,
        dir.path(),
    )
    .await;

    assert!(result.is_success());
    assert_eq!(result.started(), vec!["validate", "package", "publish"]);
}

#[tokio::test]
async fn test_step_output_is_streamed_as_events() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new().respond("pytest", "collected 3 items\n3 passed"));

    let result = run_pipeline(
        YAML,
        runner,
        &linux_run(),
        SchedulingStrategy::Sequential,
        dir.path(),
    )
    .await;

    assert_eq!(
        result.output_lines("validate"),
        vec!["collected 3 items", "3 passed"]
    );
    assert!(result.output_lines("package").is_empty());
}

#[tokio::test]
async fn test_commands_run_in_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());
    let yaml = r#"
name: "cwd"
jobs:
  - id: docs
    steps:
      - run: ["make", "html"]
        cwd: docs
      - run: ["ls"]
"#;

    run_pipeline(
        yaml,
        runner.clone(),
        &linux_run(),
        SchedulingStrategy::Sequential,
        dir.path(),
    )
    .await;

    let job_dir = job_workspace(dir.path(), "docs");
    let commands = runner.commands();
    assert_eq!(commands[0].cwd.as_deref(), Some(job_dir.join("docs").as_path()));
    assert_eq!(commands[1].cwd.as_deref(), Some(job_dir.as_path()));
}
