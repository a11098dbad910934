//! Run context - the immutable facts a pipeline run is started with

use crate::core::environment::ShellConventions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Facts about a pipeline run, fixed when the run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// Operating system identifier of the runner (`ubuntu-latest`, ...)
    pub os: String,

    /// Language runtime version (`3.12`, ...)
    pub runtime_version: String,

    /// Triggering event (`push`, `pull_request`, ...)
    pub event: String,

    /// Branch the run is for
    pub branch: String,

    /// Revision (commit sha) the run is for
    pub revision: String,

    /// Files changed by the triggering event
    pub changed_files: Vec<String>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            runtime_version: String::new(),
            event: "push".to_string(),
            branch: "main".to_string(),
            revision: String::new(),
            changed_files: Vec::new(),
        }
    }
}

impl RunContext {
    /// A copy of this context for a different runner and runtime
    pub fn for_instance(&self, os: Option<&str>, runtime: Option<&str>) -> Self {
        Self {
            os: os.map(str::to_string).unwrap_or_else(|| self.os.clone()),
            runtime_version: runtime
                .map(str::to_string)
                .unwrap_or_else(|| self.runtime_version.clone()),
            ..self.clone()
        }
    }

    pub fn conventions(&self) -> ShellConventions {
        ShellConventions::from_os(&self.os)
    }

    /// Variables available to step templates
    ///
    /// Contains `run.*` for the context fields and `env.*` for the shell
    /// conventions derived from the operating system.
    pub fn variables(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("run.os".to_string(), self.os.clone());
        vars.insert("run.runtime".to_string(), self.runtime_version.clone());
        vars.insert("run.event".to_string(), self.event.clone());
        vars.insert("run.branch".to_string(), self.branch.clone());
        vars.insert("run.revision".to_string(), self.revision.clone());

        for (key, value) in self.conventions().outputs() {
            vars.insert(format!("env.{}", key), value.to_string());
        }
        vars
    }
}
