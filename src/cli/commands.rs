//! CLI command definitions

use crate::core::TriggerEvent;
use clap::{Args, ValueEnum};

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Event to simulate; the run is skipped when the pipeline does not react to it
    #[arg(long, value_enum, default_value_t = EventArg::Dispatch)]
    pub event: EventArg,

    /// Branch the push went to (required with `--event push`)
    #[arg(long)]
    pub branch: Option<String>,

    /// Working directory for the run (defaults to the current directory)
    #[arg(long)]
    pub workdir: Option<String>,

    /// Variable overrides (key=value)
    #[arg(long = "var", value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the run result as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunCommand {
    /// The trigger event described by `--event` and `--branch`
    pub fn trigger_event(&self) -> Result<TriggerEvent, String> {
        match self.event {
            EventArg::Dispatch => Ok(TriggerEvent::WorkflowDispatch),
            EventArg::Push => match &self.branch {
                Some(branch) if !branch.trim().is_empty() => Ok(TriggerEvent::Push {
                    branch: branch.trim().to_string(),
                }),
                _ => Err("--event push requires --branch".to_string()),
            },
        }
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Trigger event argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventArg {
    Push,
    Dispatch,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
