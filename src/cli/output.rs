//! CLI output formatting

use crate::{
    core::{ExecutionStatus, ReadinessPolicy, TriggerEvent},
    execution::{ExecutionEvent, OutputStream},
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a spinner for an open-ended wait
pub fn create_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
        spinner.set_style(template);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Short human form of a duration
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

fn format_policy(policy: &ReadinessPolicy) -> String {
    match policy {
        ReadinessPolicy::Poll { interval, timeout } => format!(
            "polling every {} for up to {}",
            format_duration(*interval),
            format_duration(*timeout)
        ),
        ReadinessPolicy::FixedDelay { delay } => {
            format!("single probe after {}", format_duration(*delay))
        }
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// `--json` report for a run the trigger event does not select
pub fn skipped_run_json(pipeline_name: &str, event: &TriggerEvent) -> serde_json::Value {
    serde_json::json!({
        "pipeline_name": pipeline_name,
        "trigger": event,
        "skipped": true,
    })
}

/// Format a history entry for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Cancelled => WARN,
    };

    let mut line = format!(
        "{} {} - {} - {} ({}/{}) - {}",
        status_icon,
        style(short_id(&summary.execution_id)).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.completed_steps,
        summary.total_steps,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    );

    if let Some(step) = &summary.failed_step {
        line.push_str(&format!(" - halted at {}", style(step).red()));
    }

    line
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            total_steps,
        } => format!(
            "{} Starting pipeline {} ({} steps, {})",
            ROCKET,
            style(pipeline_name).bold(),
            total_steps,
            style(short_id(execution_id)).dim()
        ),
        ExecutionEvent::StepStarted {
            name, index, total, ..
        } => format!(
            "[{}/{}] {}",
            style(index).cyan(),
            style(total).dim(),
            style(name).bold()
        ),
        ExecutionEvent::CommandStarted { command, .. } => {
            format!("  {} {}", style("$").dim(), command)
        }
        ExecutionEvent::StepOutput { stream, line, .. } => match stream {
            OutputStream::Stdout => format!("  {}", style(line).dim()),
            OutputStream::Stderr => format!("  {}", style(line).yellow()),
        },
        ExecutionEvent::ServiceLaunched { command, pid, .. } => match pid {
            Some(pid) => format!("  {} Launched {} (pid {})", INFO, command, pid),
            None => format!("  {} Launched {}", INFO, command),
        },
        ExecutionEvent::ReadinessWaiting { url, policy, .. } => format!(
            "{} Waiting for {} ({})",
            SPINNER,
            style(url).cyan(),
            format_policy(policy)
        ),
        ExecutionEvent::ServiceReady {
            status,
            attempts,
            waited,
            ..
        } => format!(
            "  {} Service answered HTTP {} after {} attempt(s) in {}",
            CHECK,
            style(status).green(),
            attempts,
            format_duration(*waited)
        ),
        ExecutionEvent::ServiceStopped { .. } => {
            format!("  {} Service stopped", INFO)
        }
        ExecutionEvent::Message { text, .. } => style(text).bold().green().to_string(),
        ExecutionEvent::StepCompleted { step_id, duration } => format!(
            "{} {} {}",
            CHECK,
            style(step_id).green(),
            style(format_duration(*duration)).dim()
        ),
        ExecutionEvent::StepFailed {
            step_id,
            error,
            kind,
            best_effort,
        } => {
            if *best_effort {
                format!(
                    "{} {} failed ({}), continuing: {}",
                    WARN,
                    style(step_id).yellow(),
                    kind,
                    style(error).dim()
                )
            } else {
                format!(
                    "{} {} failed ({}): {}",
                    CROSS,
                    style(step_id).red(),
                    kind,
                    style(error).dim()
                )
            }
        }
        ExecutionEvent::StepSkipped { step_id, reason } => format!(
            "{} {} not run: {}",
            SKIP,
            style(step_id).dim(),
            style(reason).dim()
        ),
        ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        } => format!(
            "{} Pipeline ({}) {}",
            INFO,
            style(short_id(execution_id)).dim(),
            format_status(*status)
        ),
    }
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let tail = lines[lines.len() - max_lines..].join("\n");
        format!(
            "{}... ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            tail
        )
    }
}
