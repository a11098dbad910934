//! Test: Variable Substitution - pipeline, matrix and run variables in steps

use crate::common::*;
use devtools::core::config::PipelineConfig;
use devtools::core::artifact::ArtifactStore;
use devtools::execution::{ExecutionEngine, JobExecutor, SchedulingStrategy};
use std::sync::Arc;

const YAML: &str = r#"
name: "Test: Variables"
variables:
  package: mypkg
  min_score: 9.5
jobs:
  - id: lint
    steps:
      - run: ["pylint", "src/{{ package }}", "--fail-under={{ min_score }}"]
      - run: ["echo", "{{ run.branch }}@{{ run.revision }}", "{{ job.id }}", "{{ unknown }}"]
  - id: tags
    steps:
      - activity:
          kind: update_ci_tags
          version: "v{{ version }}"
"#;

#[tokio::test]
async fn test_variables_are_rendered() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(MockRunner::new());

    let mut config = PipelineConfig::from_yaml(YAML).unwrap();
    config.set_variable("version", "1.4.2");
    let mut pipeline = config.to_pipeline();

    let store = ArtifactStore::open(dir.path().join(".artifacts")).unwrap();
    let executor = JobExecutor::new(runner.clone(), dir.path()).with_artifacts(store);
    let engine = ExecutionEngine::new(executor, SchedulingStrategy::Sequential);
    engine.execute(&mut pipeline, &linux_run()).await.unwrap();

    let lines = runner.command_lines();
    assert!(lines.contains(&"pylint src/mypkg --fail-under=9.5".to_string()));
    assert!(lines.contains(&"echo main@0123abcd lint {{ unknown }}".to_string()));
    assert!(lines.contains(&"git tag --force -m 🤖 Updated CI Version v1.4".to_string()));
    assert!(lines.contains(&"git push --force origin v1".to_string()));
}
