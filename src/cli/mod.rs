//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    ActivityCommand, CommitEmojisCommand, CoverageCommand, EnvCommand, MatchTestsCommand,
    Output2MarkdownCommand, PipelineCommand, ShowScriptsCommand, VscodeTestsCommand,
};
use std::ffi::OsString;

/// Developer tooling and CI building blocks
#[derive(Debug, Parser, Clone)]
#[command(name = "devtools")]
#[command(version)]
#[command(about = "Build activities, pipelines, coverage badges and small developer utilities", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable trace logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the shell conventions of an operating system
    Env(EnvCommand),

    /// Run a command and print its output as Markdown
    #[command(name = "output2markdown")]
    Output2Markdown(Output2MarkdownCommand),

    /// List the scripts of a bootstrapped environment
    ShowScripts(ShowScriptsCommand),

    /// Gitmoji helpers for commit messages
    CommitEmojis(CommitEmojisCommand),

    /// Check that every source file has a test file
    MatchTests(MatchTestsCommand),

    /// Regenerate the test launch configurations
    VscodeTests(VscodeTestsCommand),

    /// Merge coverage shards and maintain the badge
    Coverage(CoverageCommand),

    /// Run a single build activity
    Activity(ActivityCommand),

    /// Run or validate a pipeline
    Pipeline(PipelineCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

#[cfg(test)]
mod tests {
    use super::commands::*;
    use super::*;
    use crate::execution::SchedulingStrategy;

    #[test]
    fn test_parse_pipeline_run() {
        let cli = Cli::try_parse_from([
            "devtools",
            "-v",
            "pipeline",
            "run",
            "--file",
            "ci.yaml",
            "--strategy",
            "parallel-limited",
            "--var",
            "package=mypkg",
            "--os",
            "windows-latest",
            "--changed-file",
            "src/a.py",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Command::Pipeline(PipelineCommand {
            action: PipelineAction::Run(run),
        }) = cli.command
        else {
            panic!("Expected pipeline run");
        };
        assert_eq!(run.scheduling_strategy(), SchedulingStrategy::LimitedParallel(4));
        assert_eq!(run.variables, vec![("package".to_string(), "mypkg".to_string())]);

        let ctx = run.run.to_run_context();
        assert_eq!(ctx.os, "windows-latest");
        assert_eq!(ctx.event, "push");
        assert_eq!(ctx.changed_files, vec!["src/a.py"]);
    }

    #[test]
    fn test_parse_max_parallel() {
        let parse = |extra: &[&str]| {
            let mut args = vec!["devtools", "pipeline", "run", "-f", "ci.yaml"];
            args.extend_from_slice(extra);
            Cli::try_parse_from(args)
        };

        let cli = parse(&["--strategy", "parallel-limited", "--max-parallel", "2"]).unwrap();
        let Command::Pipeline(PipelineCommand {
            action: PipelineAction::Run(run),
        }) = cli.command
        else {
            panic!("Expected pipeline run");
        };
        assert_eq!(run.scheduling_strategy(), SchedulingStrategy::LimitedParallel(2));

        // Without parallel-limited the limit has no effect
        let cli = parse(&["--max-parallel", "2"]).unwrap();
        let Command::Pipeline(PipelineCommand {
            action: PipelineAction::Run(run),
        }) = cli.command
        else {
            panic!("Expected pipeline run");
        };
        assert_eq!(run.scheduling_strategy(), SchedulingStrategy::Sequential);

        assert!(parse(&["--max-parallel", "0"]).is_err());
    }

    #[test]
    fn test_parse_output2markdown_trailing_args() {
        let cli = Cli::try_parse_from(["devtools", "output2markdown", "--", "pytest", "-vv", "--cov"])
            .unwrap();
        match cli.command {
            Command::Output2Markdown(cmd) => assert_eq!(cmd.command, vec!["pytest", "-vv", "--cov"]),
            other => panic!("Expected output2markdown, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_coverage_badge() {
        let cli = Cli::try_parse_from([
            "devtools",
            "coverage",
            "badge",
            "a.json",
            "b.json",
            "--target",
            "0.95",
            "--gist-id",
            "abc",
            "--gist-file",
            "coverage.json",
        ])
        .unwrap();
        match cli.command {
            Command::Coverage(CoverageCommand {
                action: CoverageAction::Badge(badge),
            }) => {
                assert_eq!(badge.shards.len(), 2);
                assert_eq!(badge.target, Some(0.95));
                assert_eq!(badge.token_env, "GIST_TOKEN");
                assert!(!badge.publish);
            }
            other => panic!("Expected coverage badge, got {:?}", other),
        }
    }

    #[test]
    fn test_gist_and_badge_file_conflict() {
        let result = Cli::try_parse_from([
            "devtools",
            "coverage",
            "badge",
            "a.json",
            "--gist-id",
            "abc",
            "--gist-file",
            "c.json",
            "--badge-file",
            "badge.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
    }
}
