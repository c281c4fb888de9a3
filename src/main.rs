use anyhow::{Context, Result};
use nia_pipeline::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use nia_pipeline::cli::output::*;
use nia_pipeline::cli::terminal_output::TerminalReporter;
use nia_pipeline::cli::{Cli, Command};
use nia_pipeline::core::config::PipelineConfig;
use nia_pipeline::core::{ExecutionContext, ExecutionStatus, RunResult};
use nia_pipeline::execution::{ExecutionEngine, HttpProbe, SubprocessLauncher};
use nia_pipeline::persistence::{create_summary, InMemoryPersistence, PersistenceBackend, RunSummary};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Upper bound for a single health probe request
const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit code of a run interrupted with Ctrl-C
const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG overrides the verbosity flag
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, cli.stream).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

/// Store used for recording runs
async fn run_store(no_history: bool) -> Result<Box<dyn PersistenceBackend>> {
    if no_history {
        return Ok(Box::new(InMemoryPersistence::new()));
    }
    history_store().await
}

#[cfg(feature = "sqlite")]
async fn history_store() -> Result<Box<dyn PersistenceBackend>> {
    let store = nia_pipeline::persistence::SqliteRunStore::with_default_path().await?;
    Ok(Box::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn history_store() -> Result<Box<dyn PersistenceBackend>> {
    warn!("Built without the sqlite feature; run history is not kept");
    Ok(Box::new(InMemoryPersistence::new()))
}

async fn run_pipeline(cmd: &RunCommand, stream: bool) -> Result<()> {
    // Load pipeline config
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    let event = cmd.trigger_event().map_err(anyhow::Error::msg)?;

    if !cmd.json {
        println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());
    }

    // Create pipeline
    let mut pipeline = config.to_pipeline();

    // Apply variable overrides
    for (key, value) in &cmd.variable {
        pipeline.variables.insert(key.clone(), value.clone());
        if !cmd.json {
            println!(
                "{} Variable override: {} = {}",
                INFO,
                style(key).cyan(),
                style(value).dim()
            );
        }
    }

    if !pipeline.is_triggered_by(&event) {
        if cmd.json {
            let report = skipped_run_json(&pipeline.name, &event);
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
        println!(
            "{} {} does not run on {}, nothing to do",
            SKIP,
            style(&pipeline.name).bold(),
            style(&event).cyan()
        );
        return Ok(());
    }

    let workdir = match &cmd.workdir {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let mut context = ExecutionContext::prepare(&workdir, &pipeline)?;
    let execution_id = context.execution_id;

    let store = run_store(cmd.no_history).await?;

    // Create execution engine
    let probe = HttpProbe::new(PROBE_REQUEST_TIMEOUT)?;
    let mut engine = ExecutionEngine::new(SubprocessLauncher::new(), probe);

    // Set up event handler for console output
    if !cmd.json {
        let reporter = TerminalReporter::new(stream);
        engine.add_event_handler(move |event| reporter.on_event(&event));
    }

    // Execute pipeline; Ctrl-C drops the run, which kills any running child
    let outcome = tokio::select! {
        result = engine.run_if_triggered(&pipeline, &event, &mut context) => result,
        _ = tokio::signal::ctrl_c() => None,
    };
    drop(engine);

    let (result, cancelled) = match outcome {
        Some(result) => (result, false),
        None => {
            let mut result = RunResult::start(execution_id, &pipeline.name, Some(event.clone()));
            result.cancel();
            (result, true)
        }
    };

    // Save to history
    let summary = create_summary(&result);
    match store.save_run(&summary).await {
        Ok(()) if !cmd.no_history && !cmd.json => println!(
            "{} Run saved to history (ID: {})",
            INFO,
            style(&summary.execution_id.to_string()[..8]).dim()
        ),
        Ok(()) => {}
        Err(e) => warn!("Failed to save run history: {:#}", e),
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    // Print final status
    if cancelled {
        eprintln!(
            "\n{} {} {}",
            WARN,
            style(&pipeline.name).bold(),
            style("cancelled").yellow()
        );
        std::process::exit(EXIT_CANCELLED);
    }

    if result.is_success() {
        if !cmd.json {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&pipeline.name).bold(),
                style("successfully").green()
            );
        }
    } else {
        if !cmd.json {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&pipeline.name).bold(),
                style("failed").red()
            );
        }
        if let Some(step) = result.halting_step() {
            error!("Run halted at step '{}'", step.step_id);
            if !cmd.json && !step.output.is_empty() {
                println!("{}", format_output(&step.output, 20));
            }
        }
        std::process::exit(1);
    }

    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    let result = PipelineConfig::from_file(&cmd.file);

    match result {
        Ok(config) => {
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(());
            }

            let pipeline = config.to_pipeline();
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Steps: {}", style(config.steps.len()).cyan());
            println!("  Variables: {}", style(config.variable_count()).cyan());
            for (index, step) in pipeline.steps.iter().enumerate() {
                let mut line = format!(
                    "    {}. {} ({})",
                    index + 1,
                    style(&step.id).cyan(),
                    step.action.kind()
                );
                if step.continue_on_error {
                    line.push_str(&format!(" {}", style("continue on error").dim()));
                }
                println!("{}", line);
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

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = history_store().await?;
    let pipelines = store.list_pipelines().await?;

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let runs = store.list_runs(pipeline).await?;
            json_data.push(serde_json::json!({
                "name": pipeline,
                "run_count": runs.len(),
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);

    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let runs = store.list_runs(pipeline_name).await?;
            let completed = runs.iter().filter(|r| r.status == ExecutionStatus::Completed).count();
            let failed = runs.iter().filter(|r| r.status == ExecutionStatus::Failed).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(pipeline_name).bold(),
                style(runs.len()).cyan(),
                style(completed).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = history_store().await?;

    // If specific execution ID is requested
    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;

        match store.load_run(exec_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => print_run_details(&summary, cmd.verbose)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = match &cmd.pipeline {
        Some(pipeline_name) => {
            let mut runs = store.list_runs(pipeline_name).await?;
            runs.truncate(cmd.limit);
            runs
        }
        None => store.recent_runs(cmd.limit).await?,
    };

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, verbose: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    if let Some(trigger) = &summary.trigger {
        println!("  Trigger: {}", style(trigger).cyan());
    }
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Steps: {}/{} completed",
        summary.completed_steps, summary.total_steps
    );
    if let Some(step) = &summary.failed_step {
        println!("  Halted at: {}", style(step).red());
    }

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
