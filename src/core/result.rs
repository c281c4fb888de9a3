//! Run results

use crate::core::{
    state::{ExecutionStatus, StepState},
    trigger::TriggerEvent,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_id: String,
    pub name: String,
    pub state: StepState,
    /// Captured stdout/stderr (or the message text for report steps)
    pub output: String,
    pub duration_ms: u64,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.state, StepState::Completed { .. })
    }

    pub fn failed(&self) -> bool {
        matches!(self.state, StepState::Failed { .. })
    }
}

/// Result of one pipeline run, built step by step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub execution_id: Uuid,
    pub pipeline_name: String,
    pub trigger: Option<TriggerEvent>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// One entry per step, in declaration order
    pub outcomes: Vec<StepOutcome>,
}

impl RunResult {
    /// Start a new result in the running state
    pub fn start(execution_id: Uuid, pipeline_name: &str, trigger: Option<TriggerEvent>) -> Self {
        Self {
            execution_id,
            pipeline_name: pipeline_name.to_string(),
            trigger,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            outcomes: Vec::new(),
        }
    }

    /// Append the outcome of the next step
    pub fn record(&mut self, outcome: StepOutcome) {
        self.outcomes.push(outcome);
    }

    /// Whether a step failed in a way that halts the run
    pub fn has_fatal_failure(&self) -> bool {
        self.outcomes.iter().any(|o| o.state.is_fatal_failure())
    }

    /// Finalize: failed iff a non-best-effort step failed
    pub fn finish(&mut self) {
        self.status = if self.has_fatal_failure() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        self.completed_at = Some(Utc::now());
    }

    /// Mark the run as aborted from outside
    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Outcome for a step ID
    pub fn outcome(&self, step_id: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.step_id == step_id)
    }

    /// IDs of the steps that were actually invoked, in order
    pub fn invoked_steps(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.state.was_invoked())
            .map(|o| o.step_id.as_str())
            .collect()
    }

    /// The step that halted the run
    pub fn halting_step(&self) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.state.is_fatal_failure())
    }

    pub fn completed_steps(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed_steps(&self) -> usize {
        self.outcomes.iter().filter(|o| o.failed()).count()
    }

    /// Output of the last step that completed
    pub fn final_output(&self) -> Option<&str> {
        self.outcomes
            .iter()
            .rev()
            .find(|o| o.succeeded())
            .map(|o| o.output.as_str())
    }
}
