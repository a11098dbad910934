//! CLI command definitions

use crate::core::context::RunContext;
use crate::execution::SchedulingStrategy;
use crate::tools::commit_emojis::DEFAULT_URL_BASE;
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Facts about the run, shared by `activity` and `pipeline run`
#[derive(Debug, Args, Clone)]
pub struct RunContextArgs {
    /// Operating system of the runner (defaults to this machine's)
    #[arg(long)]
    pub os: Option<String>,

    /// Language runtime version
    #[arg(long, default_value = "")]
    pub runtime: String,

    /// Triggering event
    #[arg(long, default_value = "push")]
    pub event: String,

    /// Branch the run is for
    #[arg(long, default_value = "main")]
    pub branch: String,

    /// Revision the run is for
    #[arg(long, default_value = "")]
    pub revision: String,

    /// File changed by the triggering event (repeatable)
    #[arg(long = "changed-file")]
    pub changed_files: Vec<String>,
}

impl RunContextArgs {
    pub fn to_run_context(&self) -> RunContext {
        let defaults = RunContext::default();
        RunContext {
            os: self.os.clone().unwrap_or(defaults.os),
            runtime_version: self.runtime.clone(),
            event: self.event.clone(),
            branch: self.branch.clone(),
            revision: self.revision.clone(),
            changed_files: self.changed_files.clone(),
        }
    }
}

/// Print the shell conventions of an operating system
#[derive(Debug, Args, Clone)]
pub struct EnvCommand {
    /// Operating system identifier (`ubuntu-latest`, `windows-2022`, ...)
    pub os: String,

    /// Append the outputs to this file (defaults to `$GITHUB_OUTPUT` when set)
    #[arg(long)]
    pub github_output: Option<PathBuf>,
}

/// Run a command and print its output as Markdown
#[derive(Debug, Args, Clone)]
pub struct Output2MarkdownCommand {
    /// Program and arguments (after `--`)
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// List the scripts of a bootstrapped environment
#[derive(Debug, Args, Clone)]
pub struct ShowScriptsCommand {
    /// Generated directory (defaults to `$PYTHON_BOOTSTRAPPER_GENERATED_DIR`)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

/// Gitmoji helpers for commit messages
#[derive(Debug, Args, Clone)]
pub struct CommitEmojisCommand {
    /// Directory holding `gitmojis.json` and `categories.json`
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub action: CommitEmojisAction,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommitEmojisAction {
    /// Print the emoji tables
    Display,

    /// Replace placeholders in a message (or a file containing one)
    Transform { message: String },

    /// Download fresh emoji data
    Update {
        /// Destination directory (defaults to `--data-dir`)
        #[arg(long)]
        dest: Option<PathBuf>,

        #[arg(long, default_value = DEFAULT_URL_BASE)]
        url_base: String,

        /// File to download (repeatable)
        #[arg(long = "filename")]
        filenames: Vec<String>,
    },
}

/// Check that every source file has a test file
#[derive(Debug, Args, Clone)]
pub struct MatchTestsCommand {
    /// Project directory
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Only consider source files matching these globs
    #[arg(long)]
    pub include: Vec<String>,

    /// Ignore source files matching these globs
    #[arg(long)]
    pub exclude: Vec<String>,

    #[arg(long, default_value = "src")]
    pub src_dir_name: String,

    #[arg(long, default_value = "tests")]
    pub test_dir_name: String,
}

/// Regenerate the test launch configurations in `.vscode/launch.json`
#[derive(Debug, Args, Clone)]
pub struct VscodeTestsCommand {
    #[arg(default_value = ".")]
    pub dir: PathBuf,
}

/// Coverage aggregation
#[derive(Debug, Args, Clone)]
pub struct CoverageCommand {
    #[command(subcommand)]
    pub action: CoverageAction,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CoverageAction {
    /// Merge coverage shards
    Merge {
        #[arg(required = true)]
        shards: Vec<PathBuf>,

        #[arg(short, long, default_value = "coverage.json")]
        output: PathBuf,
    },

    /// Merge shards, check the target and update the badge
    Badge(BadgeCommand),
}

#[derive(Debug, Args, Clone)]
pub struct BadgeCommand {
    #[arg(required = true)]
    pub shards: Vec<PathBuf>,

    #[arg(short, long, default_value = "coverage.json")]
    pub output: PathBuf,

    /// `[0, 1)` relative to the published badge, `[1, 100]` absolute
    #[arg(long)]
    pub target: Option<f64>,

    #[arg(long, requires = "gist_file", conflicts_with = "badge_file")]
    pub gist_id: Option<String>,

    #[arg(long)]
    pub gist_file: Option<String>,

    /// Environment variable holding the gist token
    #[arg(long, default_value = "GIST_TOKEN")]
    pub token_env: String,

    /// Keep the badge in a local file instead of a gist
    #[arg(long)]
    pub badge_file: Option<PathBuf>,

    #[arg(long, default_value = "coverage")]
    pub label: String,

    /// Publish the new badge once the target is met
    #[arg(long)]
    pub publish: bool,
}

/// Run a single activity described in YAML
#[derive(Debug, Args, Clone)]
pub struct ActivityCommand {
    /// Path to activity YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Directory relative paths are resolved against (defaults to the current one)
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    /// Artifact store directory
    #[arg(long)]
    pub artifacts: Option<PathBuf>,

    #[command(flatten)]
    pub run: RunContextArgs,
}

/// Pipelines of jobs
#[derive(Debug, Args, Clone)]
pub struct PipelineCommand {
    #[command(subcommand)]
    pub action: PipelineAction,
}

#[derive(Debug, Subcommand, Clone)]
pub enum PipelineAction {
    /// Run a pipeline
    Run(RunCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),
}

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Variable overrides (key=value)
    #[arg(long = "var", value_parser = parse_key_value)]
    pub variables: Vec<(String, String)>,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Sequential)]
    pub strategy: SchedulingStrategyArg,

    /// Jobs running at once with `--strategy parallel-limited`
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_parallel: u64,

    /// Artifact store directory (a temporary one when unset)
    #[arg(long)]
    pub artifacts: Option<PathBuf>,

    #[arg(long)]
    pub workspace: Option<PathBuf>,

    #[command(flatten)]
    pub run: RunContextArgs,
}

impl RunCommand {
    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        match self.strategy {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => {
                SchedulingStrategy::LimitedParallel(self.max_parallel as usize)
            }
        }
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
