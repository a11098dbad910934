//! Test: Matrix Fan-out - one instance per combination, artifacts between jobs

use crate::common::*;
use devtools::core::ExecutionStatus;
use devtools::core::artifact::ArtifactStore;
use devtools::execution::{job_workspace, SchedulingStrategy};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

const MATRIX_YAML: &str = r#"
name: "Test: Matrix"
jobs:
  - id: validate
    matrix:
      os: [ubuntu-latest, windows-latest]
      runtime: ["3.11", "3.12"]
    steps:
      - run: ["bootstrap{{ env.script_extension }}", "--python", "{{ matrix.runtime }}"]
      - run: ["pytest", "--os={{ run.os }}"]
  - id: package
    needs: [validate]
    steps:
      - run: ["python", "-m", "build"]
"#;

#[tokio::test]
async fn test_matrix_expands_per_combination() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());

    let result = run_pipeline(
        MATRIX_YAML,
        runner.clone(),
        &linux_run(),
        SchedulingStrategy::Parallel,
        dir.path(),
    )
    .await;

    assert!(result.is_success());
    assert_eq!(result.pipeline.jobs.len(), 5);
    assert_eq!(
        result.state_label("validate[os=windows-latest,runtime=3.11]"),
        "completed"
    );

    let lines = runner.command_lines();
    assert!(lines.contains(&"bootstrap.cmd --python 3.11".to_string()));
    assert!(lines.contains(&"bootstrap.sh --python 3.12".to_string()));
    assert!(lines.contains(&"pytest --os=windows-latest".to_string()));
    assert_eq!(lines.iter().filter(|l| l.starts_with("pytest")).count(), 4);

    // package waits for every instance
    assert_eq!(result.started().last().map(String::as_str), Some("package"));
}

#[tokio::test]
async fn test_one_failed_instance_skips_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new().fail("bootstrap.cmd --python 3.12", 1));

    let result = run_pipeline(
        MATRIX_YAML,
        runner.clone(),
        &linux_run(),
        SchedulingStrategy::LimitedParallel(2),
        dir.path(),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.pipeline.state.completed_jobs, 3);
    assert_eq!(result.pipeline.state.failed_jobs, 1);
    assert_eq!(
        result.state_label("validate[os=windows-latest,runtime=3.12]"),
        "failed"
    );
    assert_eq!(result.state_label("package"), "skipped");
    assert!(!runner.ran("python -m build"));
}

fn write_shard(path: &Path, executed: &[u32], missing: &[u32]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let content = json!({
        "files": { "src/pkg/core.py": { "executed_lines": executed, "missing_lines": missing } }
    });
    std::fs::write(path, content.to_string()).unwrap();
}

#[tokio::test]
async fn test_coverage_shards_flow_through_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    write_shard(&dir.path().join("shards/ubuntu-latest.json"), &[1, 2], &[3, 4]);
    write_shard(&dir.path().join("shards/windows-latest.json"), &[3], &[1, 2, 4]);

    let yaml = r#"
name: "Test: Coverage"
jobs:
  - id: validate
    matrix:
      os: [ubuntu-latest, windows-latest]
    steps:
      - run: ["pytest", "--cov"]
      - upload:
          name: "coverage-{{ matrix.os }}"
          paths: ["shards/{{ matrix.os }}.json"]
  - id: coverage
    needs: [validate]
    steps:
      - activity:
          kind: coverage
          output: merged.json
          target: 70
          publish: true
          badge:
            store: file
            path: badge.json
"#;

    let runner = Arc::new(MockRunner::new());
    let result = run_pipeline(
        yaml,
        runner,
        &linux_run(),
        SchedulingStrategy::Parallel,
        dir.path(),
    )
    .await;

    assert!(result.is_success(), "{:?}", result.pipeline.job("coverage").map(|j| &j.state));

    let job_dir = job_workspace(dir.path(), "coverage");
    let merged: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(job_dir.join("merged.json")).unwrap())
            .unwrap();
    assert_eq!(merged["totals"]["covered_lines"], 3);
    assert_eq!(merged["totals"]["num_statements"], 4);

    let badge: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(job_dir.join("badge.json")).unwrap())
            .unwrap();
    assert_eq!(badge["message"], "75.0%");
    assert_eq!(badge["color"], "green");
}

#[tokio::test]
async fn test_coverage_below_target_fails_job() {
    let dir = tempfile::tempdir().unwrap();
    write_shard(&dir.path().join("shard.json"), &[1], &[2, 3, 4]);

    let yaml = r#"
name: "Test: Coverage target"
jobs:
  - id: coverage
    steps:
      - activity:
          kind: coverage
          shards: ["shard.json"]
          target: 80
"#;

    let result = run_pipeline(
        yaml,
        Arc::new(MockRunner::new()),
        &linux_run(),
        SchedulingStrategy::Sequential,
        dir.path(),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    match &result.pipeline.job("coverage").unwrap().state {
        devtools::core::JobState::Failed { error, .. } => {
            assert!(error.contains("25.00%"), "{}", error);
            assert!(error.contains("80.00%"), "{}", error);
        }
        other => panic!("Expected failure, got {:?}", other),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_parallel_instances_do_not_share_files() {
    use devtools::process::SubprocessRunner;

    let dir = tempfile::tempdir().unwrap();
    let yaml = r#"
name: "Test: Isolated instances"
jobs:
  - id: shard
    matrix:
      os: [ubuntu-latest, macos-latest]
    steps:
      - run: ["sh", "-c", "echo {{ matrix.os }} > shard.txt; sleep 1"]
      - upload:
          name: "shard-{{ matrix.os }}"
          paths: ["shard.txt"]
"#;

    let result = run_pipeline_with(
        yaml,
        Arc::new(SubprocessRunner::new()),
        &linux_run(),
        SchedulingStrategy::Parallel,
        dir.path(),
    )
    .await;
    assert!(result.is_success());

    let store = ArtifactStore::open(dir.path().join(".artifacts")).unwrap();
    for os in ["ubuntu-latest", "macos-latest"] {
        let copied = store
            .download(&format!("shard-{}", os), &dir.path().join("out").join(os))
            .unwrap();
        assert_eq!(std::fs::read_to_string(&copied[0]).unwrap().trim(), os);
    }
    assert!(!dir.path().join("shard.txt").exists());
}
