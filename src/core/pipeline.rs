//! Pipeline domain model
//!
//! A pipeline is a set of job instances. A job with a matrix is expanded
//! into one instance per combination of its axes; `needs: [job]` then waits
//! for every instance of that job.

use crate::core::{
    condition::JobCondition,
    config::{scalar_to_string, JobConfig, PipelineConfig, StepConfig},
    context::RunContext,
    state::{JobState, PipelineState},
};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A runnable job instance
#[derive(Debug, Clone)]
pub struct Job {
    /// Instance id (`validate[os=ubuntu-latest,runtime=3.12]`, or the job id
    /// when there is no matrix)
    pub id: String,

    /// Id of the job this instance was expanded from
    pub job_id: String,

    pub name: String,

    /// Instance ids this instance waits for
    pub dependencies: Vec<String>,

    /// Matrix values of this instance
    pub matrix: BTreeMap<String, String>,

    pub condition: Option<JobCondition>,

    pub steps: Vec<StepConfig>,

    pub state: JobState,
}

impl Job {
    /// Check if all dependencies have reached a terminal state
    pub fn dependencies_settled(&self, settled: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|dep| settled.contains(dep))
    }
}

/// A pipeline definition
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Global variables available to all steps
    pub variables: HashMap<String, String>,

    /// Job instances by instance id
    pub jobs: HashMap<String, Job>,

    /// Default command timeout
    pub default_timeout_secs: Option<u64>,

    /// Execution state
    pub state: PipelineState,

    /// Job execution order (topological sort)
    execution_order: Vec<String>,
}

/// Every combination of the matrix axes, in axis order
fn matrix_combinations(matrix: &BTreeMap<String, Vec<String>>) -> Vec<BTreeMap<String, String>> {
    let mut combinations = vec![BTreeMap::new()];
    for (axis, values) in matrix {
        combinations = combinations
            .into_iter()
            .flat_map(|combination| {
                values.iter().map(move |value| {
                    let mut next = combination.clone();
                    next.insert(axis.clone(), value.clone());
                    next
                })
            })
            .collect();
    }
    combinations
}

/// `job[key=value,...]`, or `job` for an empty matrix
pub fn instance_id(job_id: &str, matrix: &BTreeMap<String, String>) -> String {
    if matrix.is_empty() {
        return job_id.to_string();
    }
    let values: Vec<String> = matrix.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}[{}]", job_id, values.join(","))
}

fn expand(config: &JobConfig) -> Vec<(String, BTreeMap<String, String>)> {
    let matrix: BTreeMap<String, Vec<String>> = config
        .matrix
        .iter()
        .map(|(axis, values)| (axis.clone(), values.iter().map(scalar_to_string).collect()))
        .collect();

    matrix_combinations(&matrix)
        .into_iter()
        .map(|combination| (instance_id(&config.id, &combination), combination))
        .collect()
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        let instances: HashMap<&str, Vec<(String, BTreeMap<String, String>)>> = config
            .jobs
            .iter()
            .map(|job| (job.id.as_str(), expand(job)))
            .collect();

        let mut jobs = HashMap::new();
        for job_config in &config.jobs {
            let dependencies: Vec<String> = job_config
                .needs
                .iter()
                .flat_map(|need| {
                    instances
                        .get(need.as_str())
                        .into_iter()
                        .flatten()
                        .map(|(id, _)| id.clone())
                })
                .collect();

            for (id, matrix) in instances.get(job_config.id.as_str()).into_iter().flatten() {
                let name = if matrix.is_empty() {
                    job_config.display_name().to_string()
                } else {
                    let values: Vec<&str> = matrix.values().map(String::as_str).collect();
                    format!("{} ({})", job_config.display_name(), values.join(", "))
                };

                jobs.insert(
                    id.clone(),
                    Job {
                        id: id.clone(),
                        job_id: job_config.id.clone(),
                        name,
                        dependencies: dependencies.clone(),
                        matrix: matrix.clone(),
                        condition: job_config.when.clone(),
                        steps: job_config.steps.clone(),
                        state: JobState::Pending,
                    },
                );
            }
        }

        let execution_order = Self::topological_sort(&jobs);

        Pipeline {
            name: config.name.clone(),
            variables: config.variables_as_string_map(),
            jobs,
            default_timeout_secs: config.default_timeout_secs,
            state: PipelineState::new(),
            execution_order,
        }
    }

    /// Get a job by instance id
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Get a mutable job by instance id
    pub fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    /// Pending jobs whose dependencies are all settled, in execution order
    pub fn ready_jobs(&self) -> Vec<&Job> {
        let settled: HashSet<String> = self
            .jobs
            .values()
            .filter(|j| j.state.is_terminal())
            .map(|j| j.id.clone())
            .collect();

        self.execution_order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .filter(|j| matches!(j.state, JobState::Pending) && j.dependencies_settled(&settled))
            .collect()
    }

    /// Get all currently running jobs
    pub fn running_jobs(&self) -> Vec<&Job> {
        self.jobs
            .values()
            .filter(|j| matches!(j.state, JobState::Running { .. }))
            .collect()
    }

    /// Check if every job reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.jobs.values().all(|j| j.state.is_terminal())
    }

    /// Get execution order (topological sort)
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Why a ready job must be skipped, or `None` when it may run.
    ///
    /// A job runs only when every needed instance completed and its `when`
    /// condition holds for its run context.
    pub fn skip_reason(&self, job_id: &str, run: &RunContext) -> Option<String> {
        let job = self.job(job_id)?;

        for dep in &job.dependencies {
            match self.job(dep).map(|d| &d.state) {
                Some(JobState::Completed { .. }) => {}
                Some(state) => return Some(format!("needed job '{}' {}", dep, state.label())),
                None => return Some(format!("needed job '{}' does not exist", dep)),
            }
        }

        job.condition
            .as_ref()
            .and_then(|condition| condition.skip_reason(&self.run_context_for(job, run)))
    }

    /// The run context of an instance: `os` and `runtime` matrix values
    /// replace the run's own
    pub fn run_context_for(&self, job: &Job, run: &RunContext) -> RunContext {
        run.for_instance(
            job.matrix.get("os").map(String::as_str),
            job.matrix.get("runtime").map(String::as_str),
        )
    }

    /// Variables available to the steps of an instance
    pub fn variables_for(&self, job: &Job, run: &RunContext) -> HashMap<String, String> {
        let mut variables = self.variables.clone();
        for (key, value) in &job.matrix {
            variables.insert(format!("matrix.{}", key), value.clone());
        }
        variables.extend(self.run_context_for(job, run).variables());
        variables.insert("job.id".to_string(), job.id.clone());
        variables
    }

    /// Calculate topological sort of jobs based on dependencies
    fn topological_sort(jobs: &HashMap<String, Job>) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        // Sort for deterministic order
        let mut job_ids: Vec<_> = jobs.keys().cloned().collect();
        job_ids.sort();

        for job_id in job_ids {
            Self::visit(&job_id, jobs, &mut visited, &mut result);
        }

        result
    }

    fn visit(
        job_id: &str,
        jobs: &HashMap<String, Job>,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if !visited.insert(job_id.to_string()) {
            return;
        }

        if let Some(job) = jobs.get(job_id) {
            for dep in &job.dependencies {
                Self::visit(dep, jobs, visited, result);
            }
        }

        result.push(job_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const YAML: &str = r#"
name: "ci"
variables:
  package: mypkg
jobs:
  - id: validate
    matrix:
      os: [ubuntu-latest, windows-latest]
      runtime: ["3.11", "3.12"]
    steps: [{run: ["pytest"]}]
  - id: package
    needs: [validate]
    steps: [{run: ["python", "-m", "build"]}]
  - id: publish
    needs: [package]
    when:
      branch: main
    steps: [{run: ["twine", "upload"]}]
"#;

    fn pipeline() -> Pipeline {
        PipelineConfig::from_yaml(YAML).unwrap().to_pipeline()
    }

    fn complete(pipeline: &mut Pipeline, id: &str) {
        pipeline.job_mut(id).unwrap().state = JobState::Completed {
            steps: 1,
            started_at: Utc::now(),
            completed_at: Utc::now(),
        };
    }

    #[test]
    fn test_matrix_expansion() {
        let pipeline = pipeline();
        assert_eq!(pipeline.jobs.len(), 6);

        let job = pipeline.job("validate[os=windows-latest,runtime=3.11]").unwrap();
        assert_eq!(job.job_id, "validate");
        assert_eq!(job.name, "validate (windows-latest, 3.11)");
        assert_eq!(job.matrix.get("runtime"), Some(&"3.11".to_string()));

        let package = pipeline.job("package").unwrap();
        assert_eq!(package.dependencies.len(), 4);
    }

    #[test]
    fn test_topological_order() {
        let pipeline = pipeline();
        let order = pipeline.execution_order();
        let position = |id: &str| order.iter().position(|x| x == id).unwrap();

        for dep in &pipeline.job("package").unwrap().dependencies {
            assert!(position(dep) < position("package"));
        }
        assert!(position("package") < position("publish"));
    }

    #[test]
    fn test_ready_jobs_wait_for_every_instance() {
        let mut pipeline = pipeline();
        assert_eq!(pipeline.ready_jobs().len(), 4);

        let ids: Vec<String> = pipeline.ready_jobs().iter().map(|j| j.id.clone()).collect();
        for id in &ids[..3] {
            complete(&mut pipeline, id);
        }
        assert_eq!(pipeline.ready_jobs().len(), 1);
        assert!(pipeline.ready_jobs().iter().all(|j| j.job_id == "validate"));

        complete(&mut pipeline, &ids[3]);
        let ready: Vec<_> = pipeline.ready_jobs().iter().map(|j| j.id.clone()).collect();
        assert_eq!(ready, vec!["package"]);
    }

    #[test]
    fn test_skip_reason_for_failed_dependency() {
        let mut pipeline = pipeline();
        pipeline.job_mut("package").unwrap().state = JobState::Failed {
            error: "exit 1".to_string(),
            step: "build".to_string(),
            started_at: Utc::now(),
            failed_at: Utc::now(),
        };

        let reason = pipeline.skip_reason("publish", &RunContext::default()).unwrap();
        assert!(reason.contains("'package' failed"));
    }

    #[test]
    fn test_skip_reason_for_condition() {
        let mut pipeline = pipeline();
        complete(&mut pipeline, "package");

        let feature = RunContext {
            branch: "feature".to_string(),
            ..RunContext::default()
        };
        assert!(pipeline.skip_reason("publish", &feature).is_some());
        assert_eq!(pipeline.skip_reason("publish", &RunContext::default()), None);
    }

    #[test]
    fn test_instance_variables() {
        let pipeline = pipeline();
        let job = pipeline.job("validate[os=windows-latest,runtime=3.12]").unwrap();
        let run = RunContext {
            os: "ubuntu-latest".to_string(),
            revision: "abc".to_string(),
            ..RunContext::default()
        };

        let vars = pipeline.variables_for(job, &run);
        assert_eq!(vars.get("package"), Some(&"mypkg".to_string()));
        assert_eq!(vars.get("matrix.os"), Some(&"windows-latest".to_string()));
        assert_eq!(vars.get("run.os"), Some(&"windows-latest".to_string()));
        assert_eq!(vars.get("run.runtime"), Some(&"3.12".to_string()));
        assert_eq!(vars.get("run.revision"), Some(&"abc".to_string()));
        assert_eq!(vars.get("env.script_extension"), Some(&".cmd".to_string()));
    }

    #[test]
    fn test_instance_id_without_matrix() {
        assert_eq!(instance_id("package", &BTreeMap::new()), "package");
    }
}
