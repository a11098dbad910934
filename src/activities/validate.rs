//! Validation: formatter, linter and test suite with optional coverage

use crate::activities::{ActivityContext, ActivityError};
use crate::core::command::CommandDescriptor;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

fn default_source_root() -> PathBuf {
    PathBuf::from("src")
}

fn default_test_root() -> PathBuf {
    PathBuf::from("tests")
}

fn default_min_score() -> f64 {
    9.5
}

fn default_coverage_file() -> PathBuf {
    PathBuf::from("coverage.json")
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateOptions {
    /// Bootstrap script stem run first (`Bootstrap` -> `./Bootstrap.sh`)
    #[serde(default)]
    pub bootstrap: Option<String>,

    #[serde(default)]
    pub bootstrap_args: Vec<String>,

    /// Activation script stem sourced before every tool (`Activate`)
    #[serde(default)]
    pub activate: Option<String>,

    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,

    #[serde(default = "default_test_root")]
    pub test_root: PathBuf,

    /// Package measured by `--cov`
    #[serde(default)]
    pub package_name: Option<String>,

    #[serde(default = "enabled")]
    pub black: bool,

    /// Reformat instead of checking
    #[serde(default)]
    pub format: bool,

    #[serde(default = "enabled")]
    pub pylint: bool,

    #[serde(default = "default_min_score")]
    pub min_score: f64,

    #[serde(default = "enabled")]
    pub pytest: bool,

    #[serde(default)]
    pub code_coverage: bool,

    /// Implies `code_coverage`
    #[serde(default)]
    pub min_coverage: Option<f64>,

    #[serde(default)]
    pub benchmark: bool,

    #[serde(default)]
    pub pytest_args: Vec<String>,

    /// Coverage JSON written by pytest, relative to the test root
    #[serde(default = "default_coverage_file")]
    pub coverage_file: PathBuf,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            bootstrap: None,
            bootstrap_args: Vec::new(),
            activate: None,
            source_root: default_source_root(),
            test_root: default_test_root(),
            package_name: None,
            black: true,
            format: false,
            pylint: true,
            min_score: default_min_score(),
            pytest: true,
            code_coverage: false,
            min_coverage: None,
            benchmark: false,
            pytest_args: Vec::new(),
            coverage_file: default_coverage_file(),
        }
    }
}

impl ValidateOptions {
    pub fn coverage_enabled(&self) -> bool {
        self.code_coverage || self.min_coverage.is_some()
    }

    pub fn black_command(&self, source_root: &std::path::Path) -> CommandDescriptor {
        CommandDescriptor::new("black")
            .arg_if(!self.format, "--check")
            .arg(source_root.display().to_string())
    }

    pub fn pylint_command(&self, source_root: &std::path::Path) -> CommandDescriptor {
        CommandDescriptor::new("pylint")
            .arg(format!("--fail-under={}", self.min_score))
            .arg(source_root.display().to_string())
    }

    pub fn pytest_command(&self, test_root: &std::path::Path) -> Result<CommandDescriptor, ActivityError> {
        let mut command = CommandDescriptor::new("pytest").arg_if(!self.benchmark, "--benchmark-skip");

        if self.coverage_enabled() {
            let package = self.package_name.as_deref().ok_or_else(|| {
                ActivityError::Invalid("Code coverage requires 'package_name'".to_string())
            })?;
            command = command
                .arg(format!("--cov={}", package))
                .arg(format!("--cov-report=json:{}", self.coverage_file.display()));
        }
        if let Some(min) = self.min_coverage {
            command = command.arg(format!("--cov-fail-under={}", min));
        }

        Ok(command
            .args(["--capture=no", "--verbose", "-vv"])
            .args(self.pytest_args.iter().cloned())
            .arg(".")
            .current_dir(test_root))
    }
}

/// Artifact name for a coverage shard of this runner
pub fn coverage_artifact_name(os: &str, runtime: &str) -> String {
    if runtime.is_empty() {
        format!("coverage-{}", os)
    } else {
        format!("coverage-{}-{}", os, runtime)
    }
}

pub async fn run(options: &ValidateOptions, ctx: &ActivityContext<'_>) -> Result<(), ActivityError> {
    let conventions = &ctx.conventions;

    if let Some(bootstrap) = &options.bootstrap {
        let command = conventions.script_command(&ctx.workspace, bootstrap, &options.bootstrap_args);
        ctx.exec("Bootstrapping", command).await?;
    }

    let activate = options.activate.as_ref().map(|stem| {
        ctx.workspace
            .join(conventions.script_name(stem))
            .display()
            .to_string()
    });
    let prepare = |command: CommandDescriptor| match &activate {
        Some(script) => conventions.activated(command, script),
        None => command,
    };

    let source_root = ctx.resolve(&options.source_root);
    let test_root = ctx.resolve(&options.test_root);

    if options.black {
        ctx.exec("Running black", prepare(options.black_command(&source_root)))
            .await?;
    }
    if options.pylint {
        ctx.exec("Running pylint", prepare(options.pylint_command(&source_root)))
            .await?;
    }
    if options.pytest {
        ctx.exec("Running pytest", prepare(options.pytest_command(&test_root)?))
            .await?;

        if options.coverage_enabled() {
            let coverage_file = test_root.join(&options.coverage_file);
            let name = coverage_artifact_name(&ctx.run.os, &ctx.run.runtime_version);
            if ctx.upload(&name, &[coverage_file])?.is_some() {
                info!("Uploaded coverage shard '{}'", name);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::testing::*;
    use crate::core::artifact::ArtifactStore;

    #[tokio::test]
    async fn test_default_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let ctx = linux_context(&runner, dir.path());

        run(&ValidateOptions::default(), &ctx).await.unwrap();

        let commands = runner.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].program, "black");
        assert_eq!(commands[0].args[0], "--check");
        assert_eq!(commands[1].program, "pylint");
        assert_eq!(commands[1].args[0], "--fail-under=9.5");
        assert_eq!(commands[2].program, "pytest");
        assert_eq!(
            commands[2].args,
            vec!["--benchmark-skip", "--capture=no", "--verbose", "-vv", "."]
        );
        assert_eq!(commands[2].cwd, Some(dir.path().join("tests")));
    }

    #[tokio::test]
    async fn test_first_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new().failing("black", 1);
        let ctx = linux_context(&runner, dir.path());

        let err = run(&ValidateOptions::default(), &ctx).await.unwrap_err();
        assert!(matches!(err, ActivityError::CommandFailed { .. }));
        assert_eq!(runner.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_coverage_uploads_shard() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tests")).unwrap();
        std::fs::write(dir.path().join("tests/coverage.json"), "{\"files\": {}}").unwrap();
        let store = ArtifactStore::open(dir.path().join("artifacts")).unwrap();

        let runner = RecordingRunner::new();
        let ctx = linux_context(&runner, dir.path())
            .with_artifacts(&store)
            .with_producer("validate");

        let options = ValidateOptions {
            black: false,
            pylint: false,
            package_name: Some("mypkg".to_string()),
            min_coverage: Some(90.0),
            ..ValidateOptions::default()
        };
        run(&options, &ctx).await.unwrap();

        let pytest = &runner.commands()[0];
        assert!(pytest.args.contains(&"--cov=mypkg".to_string()));
        assert!(pytest.args.contains(&"--cov-report=json:coverage.json".to_string()));
        assert!(pytest.args.contains(&"--cov-fail-under=90".to_string()));

        let artifact = store.get("coverage-ubuntu-latest-3.12").unwrap();
        assert_eq!(artifact.producer, "validate");
    }

    #[tokio::test]
    async fn test_coverage_requires_package_name() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let ctx = linux_context(&runner, dir.path());

        let options = ValidateOptions {
            code_coverage: true,
            black: false,
            pylint: false,
            ..ValidateOptions::default()
        };
        assert!(matches!(
            run(&options, &ctx).await,
            Err(ActivityError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_and_activation() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let ctx = linux_context(&runner, dir.path());

        let options = ValidateOptions {
            bootstrap: Some("Bootstrap".to_string()),
            activate: Some("Activate".to_string()),
            pylint: false,
            pytest: false,
            format: true,
            ..ValidateOptions::default()
        };
        run(&options, &ctx).await.unwrap();

        let commands = runner.commands();
        assert_eq!(commands[0].program, "./Bootstrap.sh");
        assert_eq!(commands[1].program, "bash");
        assert!(commands[1].args[1].contains("Activate.sh"));
        assert_eq!(commands[1].args[2], "black");
        assert!(!commands[1].args.contains(&"--check".to_string()));
    }

    #[test]
    fn test_coverage_artifact_name() {
        assert_eq!(coverage_artifact_name("ubuntu-latest", "3.12"), "coverage-ubuntu-latest-3.12");
        assert_eq!(coverage_artifact_name("macos-14", ""), "coverage-macos-14");
    }
}
