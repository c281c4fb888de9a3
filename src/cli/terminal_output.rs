//! Terminal reporter for pipeline execution events
//!
//! Turns [`ExecutionEvent`]s into console output:
//!
//! - Step headers with progress indicators: `[1/6] Build`
//! - Horizontal separators between steps
//! - A spinner while the smoke-test service is coming up
//! - Command output lines as they arrive (with `--stream`)
//!
//! # Example
//!
//! ```no_run
//! use nia_pipeline::cli::terminal_output::TerminalReporter;
//! use nia_pipeline::execution::ExecutionEvent;
//!
//! let reporter = TerminalReporter::new(true);
//! reporter.on_event(&ExecutionEvent::ServiceStopped { step_id: "smoke_test".into() });
//! ```

use crate::cli::output::{create_spinner, format_execution_event};
use crate::execution::ExecutionEvent;
use indicatif::ProgressBar;
use std::io::{self, Write};
use std::sync::Mutex;

/// Prints execution events to the terminal
pub struct TerminalReporter {
    stream: bool,
    spinner: Mutex<Option<ProgressBar>>,
}

impl TerminalReporter {
    /// Create a reporter; `stream` echoes command output live
    pub fn new(stream: bool) -> Self {
        Self {
            stream,
            spinner: Mutex::new(None),
        }
    }

    /// Print a step header
    ///
    /// Format: `[N/M] Step Name`
    fn print_step_header(&self, header: &str) {
        self.print_separator();
        println!("{}", header);
    }

    /// A horizontal rule spanning the terminal width
    fn print_separator(&self) {
        let width = term_size::dimensions_stdout()
            .map(|(w, _)| w)
            .unwrap_or(80);
        println!("{}", "─".repeat(width));
    }

    fn start_spinner(&self, message: String) {
        if let Ok(mut spinner) = self.spinner.lock() {
            if let Some(previous) = spinner.take() {
                previous.finish_and_clear();
            }
            *spinner = Some(create_spinner(message));
        }
    }

    fn stop_spinner(&self) {
        if let Ok(mut spinner) = self.spinner.lock() {
            if let Some(spinner) = spinner.take() {
                spinner.finish_and_clear();
            }
        }
    }

    /// Print a line without tearing an active spinner
    fn print_line(&self, line: &str) {
        match self.spinner.lock() {
            Ok(spinner) => match spinner.as_ref() {
                Some(spinner) => spinner.suspend(|| println!("{}", line)),
                None => println!("{}", line),
            },
            Err(_) => println!("{}", line),
        }
        let _ = io::stdout().flush();
    }

    #[cfg(test)]
    fn is_spinning(&self) -> bool {
        self.spinner.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Handle one event
    pub fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::StepStarted { .. } => {
                self.print_step_header(&format_execution_event(event));
            }
            ExecutionEvent::StepOutput { .. } => {
                if self.stream {
                    self.print_line(&format_execution_event(event));
                }
            }
            ExecutionEvent::ReadinessWaiting { .. } => {
                self.start_spinner(format_execution_event(event));
            }
            ExecutionEvent::ServiceStopped { .. } => {
                self.stop_spinner();
                self.print_line(&format_execution_event(event));
            }
            ExecutionEvent::PipelineCompleted { .. } => {
                self.stop_spinner();
                self.print_separator();
                self.print_line(&format_execution_event(event));
            }
            _ => self.print_line(&format_execution_event(event)),
        }
    }
}

impl Drop for TerminalReporter {
    fn drop(&mut self) {
        self.stop_spinner();
    }
}
