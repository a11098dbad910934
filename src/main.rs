use anyhow::{Context, Result};
use devtools::{
    activities::{coverage::BadgeLocation, ActivityConfig, ActivityContext, CoverageOptions},
    cli::{commands::*, output::*, Cli, Command},
    core::{
        artifact::ArtifactStore, config::PipelineConfig, CommandDescriptor, RunContext,
        ShellConventions,
    },
    coverage::{report::display_percent, CoverageReport, TargetCheck},
    execution::{ExecutionEngine, ExecutionEvent, JobExecutor},
    process::{StdoutSink, SubprocessRunner},
    tools::{
        commit_emojis::{self, EmojiCatalog, DEFAULT_UPDATE_FILES},
        match_tests::{match_tests, MatchOptions},
        output2markdown, show_scripts, vscode_tests,
    },
    ExecutionStatus,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() {
    let cli = Cli::from_args();

    if let Err(e) = init_logging(&cli) {
        eprintln!("{} {}", CROSS, style(format!("{:#}", e)).red());
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", CROSS, style(format!("{:#}", e)).red());
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Env(cmd) => print_env(cmd),
        Command::Output2Markdown(cmd) => output_to_markdown(cmd).await,
        Command::ShowScripts(cmd) => list_scripts(cmd),
        Command::CommitEmojis(cmd) => emoji_command(cmd).await,
        Command::MatchTests(cmd) => check_tests(cmd, cli.verbose),
        Command::VscodeTests(cmd) => update_vscode_tests(cmd),
        Command::Coverage(cmd) => match &cmd.action {
            CoverageAction::Merge { shards, output } => merge_coverage(shards, output),
            CoverageAction::Badge(badge) => coverage_badge(badge).await,
        },
        Command::Activity(cmd) => run_activity(cmd).await,
        Command::Pipeline(cmd) => match &cmd.action {
            PipelineAction::Run(run) => run_pipeline(run, cli.verbose).await,
            PipelineAction::Validate(validate) => validate_pipeline(validate),
        },
    }
}

fn current_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir.to_path_buf()),
        None => std::env::current_dir().context("Failed to determine the current directory"),
    }
}

fn print_env(cmd: &EnvCommand) -> Result<()> {
    let conventions = ShellConventions::from_os(&cmd.os);
    print!("{}", conventions.to_outputs());

    let output = cmd
        .github_output
        .clone()
        .or_else(|| std::env::var_os("GITHUB_OUTPUT").map(PathBuf::from));
    if let Some(path) = output {
        conventions
            .write_outputs(&path)
            .with_context(|| format!("Failed to write outputs to '{}'", path.display()))?;
        debug!("Wrote outputs to {}", path.display());
    }
    Ok(())
}

async fn output_to_markdown(cmd: &Output2MarkdownCommand) -> Result<()> {
    let command = CommandDescriptor::from_argv(&cmd.command).context("No command given")?;
    let command = ShellConventions::host().with_merged_stderr(command);
    let runner = SubprocessRunner::new();

    let conversion = output2markdown::execute(&runner, &command, Some(&StdoutSink)).await?;
    println!("{}", output2markdown::render_block(&conversion.html));

    if conversion.exit_code != 0 {
        std::process::exit(conversion.exit_code);
    }
    Ok(())
}

fn list_scripts(cmd: &ShowScriptsCommand) -> Result<()> {
    let dir = show_scripts::generated_dir(cmd.dir.as_deref())?;
    let scripts = show_scripts::find_scripts(&dir, cfg!(windows))?;

    let width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80);
    print!("{}", show_scripts::format_columns(&scripts, width));
    Ok(())
}

async fn emoji_command(cmd: &CommitEmojisCommand) -> Result<()> {
    let catalog = || match &cmd.data_dir {
        Some(dir) => EmojiCatalog::load(dir),
        None => EmojiCatalog::embedded(),
    };

    match &cmd.action {
        CommitEmojisAction::Display => print!("{}", catalog()?.display()),
        CommitEmojisAction::Transform { message } => {
            let message = commit_emojis::read_message(message)?;
            print!("{}", catalog()?.transform(&message)?);
        }
        CommitEmojisAction::Update {
            dest,
            url_base,
            filenames,
        } => {
            let dest = dest
                .clone()
                .or_else(|| cmd.data_dir.clone())
                .context("Either --dest or --data-dir is required")?;
            let filenames: Vec<String> = if filenames.is_empty() {
                DEFAULT_UPDATE_FILES.iter().map(|f| f.to_string()).collect()
            } else {
                filenames.clone()
            };

            for path in commit_emojis::update(&dest, url_base, &filenames).await? {
                println!("{} {}", CHECK, path.display());
            }
        }
    }
    Ok(())
}

fn check_tests(cmd: &MatchTestsCommand, verbose: bool) -> Result<()> {
    let options = MatchOptions {
        include: cmd.include.clone(),
        exclude: cmd.exclude.clone(),
        source_dir_name: cmd.src_dir_name.clone(),
        test_dir_name: cmd.test_dir_name.clone(),
    };
    let report = match_tests(&cmd.dir, &options)?;
    println!("{}", format_match_report(&report, verbose));

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

fn update_vscode_tests(cmd: &VscodeTestsCommand) -> Result<()> {
    let update = vscode_tests::update_launch_json(&cmd.dir)?;
    if update.created {
        println!("{} Created {}", INFO, style(update.path.display()).bold());
    }
    println!(
        "{} {} test configurations written to {}",
        CHECK,
        update.tests.len(),
        update.path.display()
    );
    Ok(())
}

fn merge_coverage(shards: &[PathBuf], output: &Path) -> Result<()> {
    let reports = shards
        .iter()
        .map(|shard| CoverageReport::from_file(shard))
        .collect::<Result<Vec<_>, _>>()?;
    let merged = CoverageReport::merge_all(&reports)?;
    merged.write(output)?;

    println!(
        "{} Merged {} shards into {}: {}/{} lines ({}%)",
        CHECK,
        reports.len(),
        output.display(),
        merged.covered_lines(),
        merged.num_statements(),
        display_percent(merged.percent())
    );
    Ok(())
}

async fn coverage_badge(cmd: &BadgeCommand) -> Result<()> {
    let badge = match (&cmd.gist_id, &cmd.gist_file, &cmd.badge_file) {
        (Some(gist_id), Some(file_name), _) => Some(BadgeLocation::Gist {
            gist_id: gist_id.clone(),
            file_name: file_name.clone(),
            token_env: cmd.token_env.clone(),
        }),
        (_, _, Some(path)) => Some(BadgeLocation::File { path: path.clone() }),
        _ => None,
    };
    let options = CoverageOptions {
        shards: cmd.shards.clone(),
        output: cmd.output.clone(),
        target: cmd.target,
        badge,
        label: cmd.label.clone(),
        publish: cmd.publish,
        ..CoverageOptions::default()
    };

    let runner = SubprocessRunner::new();
    let ctx = ActivityContext::new(&runner, RunContext::default(), current_dir(None)?);
    let summary = devtools::activities::coverage::run(&options, &ctx).await?;

    println!(
        "{} Coverage {:.2}% from {} shards",
        CHECK, summary.percent, summary.shards
    );
    if let Some(previous) = summary.previous {
        println!("{} Previously published: {:.2}%", INFO, previous);
    }
    match summary.check {
        Some(TargetCheck::Met { target }) => {
            println!("{} Target of {:.2}% met", CHECK, target)
        }
        Some(TargetCheck::NoBaseline) => println!(
            "{} No published coverage to compare the relative target against",
            WARN
        ),
        None => {}
    }
    Ok(())
}

async fn run_activity(cmd: &ActivityCommand) -> Result<()> {
    let activity = ActivityConfig::from_file(&cmd.file)?;
    let workspace = current_dir(cmd.workspace.as_deref())?;
    let store = cmd
        .artifacts
        .as_ref()
        .map(ArtifactStore::open)
        .transpose()?;

    println!("{} Running activity {}", ROCKET, style(activity.kind()).bold());

    let runner = SubprocessRunner::new();
    let mut ctx = ActivityContext::new(&runner, cmd.run.to_run_context(), workspace)
        .with_sink(&StdoutSink);
    if let Some(store) = &store {
        ctx = ctx.with_artifacts(store);
    }
    activity.run(&ctx).await?;

    println!("{} {} completed", CHECK, style(activity.kind()).bold());
    Ok(())
}

async fn run_pipeline(cmd: &RunCommand, verbose: bool) -> Result<()> {
    let mut config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    // Apply variable overrides
    for (key, value) in &cmd.variables {
        config.set_variable(key, value);
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let mut pipeline = config.to_pipeline();
    let run = cmd.run.to_run_context();
    let workspace = current_dir(cmd.workspace.as_deref())?;

    // Artifacts live for the run unless a directory is given
    let scratch = tempfile::tempdir().context("Failed to create artifact directory")?;
    let store = ArtifactStore::open(
        cmd.artifacts
            .clone()
            .unwrap_or_else(|| scratch.path().join("artifacts")),
    )?;

    let executor = JobExecutor::new(Arc::new(SubprocessRunner::new()), workspace)
        .with_artifacts(store)
        .with_default_timeout(pipeline.default_timeout_secs);
    let engine = ExecutionEngine::new(executor, cmd.scheduling_strategy());

    let progress = create_progress_bar(pipeline.jobs.len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| match &event {
        ExecutionEvent::StepOutput { .. } => {
            if verbose {
                bar.println(format_execution_event(&event));
            }
        }
        ExecutionEvent::JobStarted { name, .. } => {
            bar.set_message(name.clone());
            bar.println(format_execution_event(&event));
        }
        ExecutionEvent::JobCompleted { .. }
        | ExecutionEvent::JobFailed { .. }
        | ExecutionEvent::JobSkipped { .. } => {
            bar.inc(1);
            bar.println(format_execution_event(&event));
        }
        _ => bar.println(format_execution_event(&event)),
    });

    let result = engine.execute(&mut pipeline, &run).await;
    progress.finish_and_clear();

    println!();
    for id in pipeline.execution_order() {
        if let Some(job) = pipeline.job(id) {
            println!("{}", format_job_summary(job));
        }
    }

    match result {
        Ok(ExecutionStatus::Completed) => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&pipeline.name).bold(),
                style("successfully").green()
            );
            Ok(())
        }
        Ok(status) => anyhow::bail!("{} {}", style(&pipeline.name).bold(), format_status(status)),
        Err(e) => Err(e.into()),
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            let pipeline = config.to_pipeline();
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Jobs: {}", style(config.jobs.len()).cyan());
            println!("  Job instances: {}", style(pipeline.jobs.len()).cyan());
            println!("  Variables: {}", style(pipeline.variables.len()).cyan());
            println!("  Order: {}", pipeline.execution_order().join(" -> "));

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}
