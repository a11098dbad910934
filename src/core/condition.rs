//! Job conditions on the run context

use crate::core::context::RunContext;
use crate::core::files::matches_any;
use serde::{Deserialize, Serialize};

/// `when:` clause of a job. Every given field must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCondition {
    /// Triggering event the job runs for
    #[serde(default)]
    pub event: Option<String>,

    /// Branch the job runs for
    #[serde(default)]
    pub branch: Option<String>,

    /// At least one changed file must match one of these globs
    #[serde(default)]
    pub paths: Vec<String>,
}

impl JobCondition {
    /// Why the job should be skipped, or `None` when it may run
    pub fn skip_reason(&self, run: &RunContext) -> Option<String> {
        if let Some(event) = &self.event {
            if event != &run.event {
                return Some(format!("event is '{}', not '{}'", run.event, event));
            }
        }

        if let Some(branch) = &self.branch {
            if branch != &run.branch {
                return Some(format!("branch is '{}', not '{}'", run.branch, branch));
            }
        }

        if !self.paths.is_empty()
            && !run
                .changed_files
                .iter()
                .any(|file| matches_any(&self.paths, file))
        {
            return Some(format!(
                "no changed file matches {}",
                self.paths.join(", ")
            ));
        }

        None
    }
}
