//! Pipeline configuration from YAML

use crate::activities::ActivityConfig;
use crate::core::condition::JobCondition;
use crate::core::Pipeline;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Global variables available to all steps
    #[serde(default)]
    variables: HashMap<String, Value>,

    /// Pipeline jobs
    pub jobs: Vec<JobConfig>,

    /// Default timeout for commands (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique job identifier
    pub id: String,

    /// Human-readable job name
    #[serde(default)]
    pub name: Option<String>,

    /// Jobs (all of their matrix instances) that must succeed first
    #[serde(default)]
    pub needs: Vec<String>,

    /// Matrix axes; one job instance runs per combination
    #[serde(default)]
    pub matrix: BTreeMap<String, Vec<Value>>,

    /// Condition on the run context
    #[serde(default)]
    pub when: Option<JobCondition>,

    pub steps: Vec<StepConfig>,
}

impl JobConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// A single step of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(flatten)]
    pub action: StepAction,
}

impl StepConfig {
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.action {
            StepAction::Run(run) => run.run.join(" "),
            StepAction::Activity { activity } => activity.kind().to_string(),
            StepAction::Upload { upload } => format!("upload {}", upload.name),
            StepAction::Download { download } => match &download.name {
                Some(name) => format!("download {}", name),
                None => "download all artifacts".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepAction {
    Run(RunStep),
    Activity { activity: ActivityConfig },
    Upload { upload: UploadStep },
    Download { download: DownloadStep },
}

/// `run: [program, args...]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStep {
    pub run: Vec<String>,

    #[serde(default)]
    pub cwd: Option<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub allow_failure: bool,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadStep {
    pub name: String,
    pub paths: Vec<String>,
}

/// Download one artifact, or all of them when `name` is unset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadStep {
    #[serde(default)]
    pub name: Option<String>,
    pub dest: String,
}

/// Render a YAML scalar as a plain string
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read '{}'", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid pipeline '{}'", path.display()))
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        // Check that all job IDs are unique
        let mut seen_ids = HashSet::new();
        for job in &self.jobs {
            if job.id.trim().is_empty() {
                anyhow::bail!("Job IDs must not be empty");
            }
            if !seen_ids.insert(&job.id) {
                anyhow::bail!("Duplicate job ID: {}", job.id);
            }
        }

        for job in &self.jobs {
            for need in &job.needs {
                if !seen_ids.contains(need) {
                    anyhow::bail!("Job '{}' needs non-existent job '{}'", job.id, need);
                }
            }

            for (axis, values) in &job.matrix {
                if values.is_empty() {
                    anyhow::bail!("Job '{}' matrix axis '{}' has no values", job.id, axis);
                }
            }

            if job.steps.is_empty() {
                anyhow::bail!("Job '{}' has no steps", job.id);
            }

            for (index, step) in job.steps.iter().enumerate() {
                match &step.action {
                    StepAction::Run(run) => {
                        if run.run.first().map_or(true, |program| program.trim().is_empty()) {
                            anyhow::bail!(
                                "Job '{}' step {} has an empty command",
                                job.id,
                                index + 1
                            );
                        }
                    }
                    StepAction::Upload { upload } => {
                        if upload.paths.is_empty() {
                            anyhow::bail!(
                                "Job '{}' step {} uploads '{}' without paths",
                                job.id,
                                index + 1,
                                upload.name
                            );
                        }
                    }
                    StepAction::Activity { .. } | StepAction::Download { .. } => {}
                }
            }
        }

        self.check_cycles()?;

        Ok(())
    }

    /// Check for cycles in the `needs` graph
    fn check_cycles(&self) -> Result<()> {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();

        for job in &self.jobs {
            if !visited.contains(&job.id) {
                self.dfs_check(&job.id, &mut visited, &mut recursion_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        &self,
        job_id: &str,
        visited: &mut HashSet<String>,
        recursion_stack: &mut HashSet<String>,
    ) -> Result<()> {
        visited.insert(job_id.to_string());
        recursion_stack.insert(job_id.to_string());

        if let Some(job) = self.jobs.iter().find(|j| j.id == job_id) {
            for need in &job.needs {
                if recursion_stack.contains(need) {
                    anyhow::bail!("Cycle detected in dependency graph involving job '{}'", need);
                }
                if !visited.contains(need) {
                    self.dfs_check(need, visited, recursion_stack)?;
                }
            }
        }

        recursion_stack.remove(job_id);
        Ok(())
    }

    /// Get variables as string map
    pub fn variables_as_string_map(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .map(|(k, v)| (k.clone(), scalar_to_string(v)))
            .collect()
    }

    /// Override (or add) a variable
    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), Value::String(value.into()));
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}
