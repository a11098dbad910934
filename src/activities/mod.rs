//! Build activities
//!
//! An activity is a fixed sequence of external tool invocations (formatters,
//! linters, test runners, package builders, container tooling, signing and
//! release tooling). The first failing command aborts the activity.
//!
//! Activities are described in YAML with a `kind` tag and can be run on
//! their own (`devtools activity`) or as pipeline steps.

pub mod binary;
pub mod ci_tags;
pub mod coverage;
pub mod docker;
pub mod install;
pub mod package;
pub mod publish;
pub mod validate;
pub mod version;

use crate::core::artifact::{Artifact, ArtifactError, ArtifactStore};
use crate::core::command::CommandDescriptor;
use crate::core::context::RunContext;
use crate::core::environment::ShellConventions;
use crate::coverage::{BadgeError, CoverageError};
use crate::process::{CommandOutput, CommandRunner, OutputSink, ProcessError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use binary::BinaryBuildOptions;
pub use ci_tags::CiTagsOptions;
pub use coverage::CoverageOptions;
pub use docker::DockerImageOptions;
pub use install::{InstallBinaryOptions, InstallPackageOptions};
pub use package::PackageOptions;
pub use publish::PublishOptions;
pub use validate::ValidateOptions;
pub use version::UpdateVersionOptions;

/// Errors raised by activities
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("{stage} failed: '{command}' exited with code {exit_code}")]
    CommandFailed {
        stage: String,
        command: String,
        exit_code: i32,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Coverage(#[from] CoverageError),

    #[error(transparent)]
    Badge(#[from] BadgeError),

    #[error("Environment variable '{0}' is not set")]
    MissingSecret(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

impl ActivityError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// An activity as described in YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityConfig {
    Validate(ValidateOptions),
    UpdateVersion(UpdateVersionOptions),
    Package(PackageOptions),
    BinaryBuild(BinaryBuildOptions),
    DockerImage(DockerImageOptions),
    InstallPackage(InstallPackageOptions),
    InstallBinary(InstallBinaryOptions),
    Coverage(CoverageOptions),
    Publish(PublishOptions),
    UpdateCiTags(CiTagsOptions),
}

impl ActivityConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validate(_) => "validate",
            Self::UpdateVersion(_) => "update_version",
            Self::Package(_) => "package",
            Self::BinaryBuild(_) => "binary_build",
            Self::DockerImage(_) => "docker_image",
            Self::InstallPackage(_) => "install_package",
            Self::InstallBinary(_) => "install_binary",
            Self::Coverage(_) => "coverage",
            Self::Publish(_) => "publish",
            Self::UpdateCiTags(_) => "update_ci_tags",
        }
    }

    /// Load a single activity from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context;
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read '{}'", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse activity '{}'", path.display()))
    }

    pub async fn run(&self, ctx: &ActivityContext<'_>) -> Result<(), ActivityError> {
        info!("Running activity '{}'", self.kind());
        match self {
            Self::Validate(options) => validate::run(options, ctx).await,
            Self::UpdateVersion(options) => version::run(options, ctx).await.map(|_| ()),
            Self::Package(options) => package::run(options, ctx).await,
            Self::BinaryBuild(options) => binary::run(options, ctx).await,
            Self::DockerImage(options) => docker::run(options, ctx).await,
            Self::InstallPackage(options) => install::run_package(options, ctx).await,
            Self::InstallBinary(options) => install::run_binary(options, ctx).await,
            Self::Coverage(options) => coverage::run(options, ctx).await.map(|_| ()),
            Self::Publish(options) => publish::run(options, ctx).await,
            Self::UpdateCiTags(options) => ci_tags::run(options, ctx).await.map(|_| ()),
        }
    }
}

/// Everything an activity needs from its surroundings
pub struct ActivityContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub sink: Option<&'a dyn OutputSink>,
    pub run: RunContext,
    pub conventions: ShellConventions,
    pub artifacts: Option<&'a ArtifactStore>,
    /// Directory relative paths are resolved against
    pub workspace: PathBuf,
    /// Job id recorded as artifact producer
    pub producer: String,
    /// Secrets by environment variable name; falls back to the process environment
    pub secrets: HashMap<String, String>,
}

impl<'a> ActivityContext<'a> {
    pub fn new(runner: &'a dyn CommandRunner, run: RunContext, workspace: impl Into<PathBuf>) -> Self {
        let conventions = run.conventions();
        Self {
            runner,
            sink: None,
            run,
            conventions,
            artifacts: None,
            workspace: workspace.into(),
            producer: "activity".to_string(),
            secrets: HashMap::new(),
        }
    }

    pub fn with_sink(mut self, sink: &'a dyn OutputSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_artifacts(mut self, artifacts: &'a ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = producer.into();
        self
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }

    /// Resolve a path against the workspace
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    /// Value of a secret named by an environment variable
    pub fn secret(&self, env_name: &str) -> Result<String, ActivityError> {
        if let Some(value) = self.secrets.get(env_name) {
            return Ok(value.clone());
        }
        std::env::var(env_name)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ActivityError::MissingSecret(env_name.to_string()))
    }

    /// Run a command; a non-zero exit fails the stage unless the command
    /// allows failure
    pub async fn exec(
        &self,
        stage: &str,
        command: CommandDescriptor,
    ) -> Result<CommandOutput, ActivityError> {
        let cwd = match command.cwd.as_deref() {
            Some(cwd) => self.resolve(cwd),
            None => self.workspace.clone(),
        };
        let command = command.current_dir(cwd);
        info!("{}: {}", stage, command.display());

        let output = self.runner.run(&command, self.sink).await?;
        if output.success() {
            return Ok(output);
        }

        if command.allow_failure {
            warn!(
                "{}: '{}' exited with code {} (allowed)",
                stage, command.program, output.exit_code
            );
            Ok(output)
        } else {
            Err(ActivityError::CommandFailed {
                stage: stage.to_string(),
                command: command.display(),
                exit_code: output.exit_code,
            })
        }
    }

    /// Upload an artifact when the activity runs with an artifact store
    pub fn upload(&self, name: &str, paths: &[PathBuf]) -> Result<Option<Artifact>, ActivityError> {
        match self.artifacts {
            Some(store) => Ok(Some(store.upload(name, &self.producer, paths)?)),
            None => {
                debug!("No artifact store; not uploading '{}'", name);
                Ok(None)
            }
        }
    }

    /// Download an artifact into `dest`
    pub fn download(&self, name: &str, dest: &Path) -> Result<Vec<PathBuf>, ActivityError> {
        let store = self.artifacts.ok_or_else(|| {
            ActivityError::Invalid(format!(
                "Artifact '{}' was requested but no artifact store is available",
                name
            ))
        })?;
        Ok(store.download(name, dest)?)
    }
}

/// Files below `dir` whose name satisfies `predicate`; `dir` must exist
pub(crate) fn find_files<F>(dir: &Path, predicate: F) -> Result<Vec<PathBuf>, ActivityError>
where
    F: Fn(&str) -> bool,
{
    if !dir.is_dir() {
        return Err(ActivityError::Invalid(format!(
            "'{}' is not a valid directory",
            dir.display()
        )));
    }

    let files = crate::core::files::walk_files(dir, |_| false)
        .map_err(|e| ActivityError::io(dir, e))?;
    Ok(files
        .into_iter()
        .filter(|f| {
            f.file_name()
                .map(|n| predicate(&n.to_string_lossy()))
                .unwrap_or(false)
        })
        .collect())
}

/// Exactly one candidate, or an error listing what was found
pub(crate) fn single_candidate(
    what: &str,
    dir: &Path,
    mut candidates: Vec<PathBuf>,
) -> Result<PathBuf, ActivityError> {
    match candidates.len() {
        0 => Err(ActivityError::Invalid(format!(
            "No {} were found in '{}'",
            what,
            dir.display()
        ))),
        1 => Ok(candidates.remove(0)),
        _ => Err(ActivityError::Invalid(format!(
            "Multiple {} were found in '{}':\n{}",
            what,
            dir.display(),
            candidates
                .iter()
                .map(|c| format!("    - {}", c.display()))
                .collect::<Vec<_>>()
                .join("\n")
        ))),
    }
}
