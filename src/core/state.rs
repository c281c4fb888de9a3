//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Run is in progress
    Running,
    /// Every required step succeeded
    Completed,
    /// A required step failed
    Failed,
    /// Run was aborted from outside (Ctrl-C)
    Cancelled,
}

impl ExecutionStatus {
    /// Parse the `Debug` name back into a status (used by the history store)
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Running" => Some(ExecutionStatus::Running),
            "Completed" => Some(ExecutionStatus::Completed),
            "Failed" => Some(ExecutionStatus::Failed),
            "Cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

/// Why a step failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The program could not be started
    Spawn,
    /// The program ran and exited unsuccessfully (`None` when killed by a signal)
    ExitStatus(Option<i32>),
    /// The step exceeded its `timeout_secs`
    Timeout,
    /// Checkout preconditions were not met
    Checkout,
    /// The installed runtime does not match the requested version
    VersionMismatch,
    /// The service never answered the health probe within the readiness window
    ReadinessTimeout,
    /// The service process exited before it became ready
    ServiceExited,
    /// The health probe request itself failed (fixed-delay mode)
    Probe,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Spawn => write!(f, "spawn error"),
            FailureKind::ExitStatus(Some(code)) => write!(f, "exit code {}", code),
            FailureKind::ExitStatus(None) => write!(f, "terminated by signal"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Checkout => write!(f, "checkout error"),
            FailureKind::VersionMismatch => write!(f, "version mismatch"),
            FailureKind::ReadinessTimeout => write!(f, "readiness timeout"),
            FailureKind::ServiceExited => write!(f, "service exited"),
            FailureKind::Probe => write!(f, "probe failed"),
        }
    }
}

/// State of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepState {
    /// Step completed successfully
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Step failed; `best_effort` failures do not fail the run
    Failed {
        error: String,
        kind: FailureKind,
        best_effort: bool,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Step was never invoked because an earlier step halted the run
    NotRun {
        reason: String,
    },
}

impl StepState {
    /// A failure that halts the run
    pub fn is_fatal_failure(&self) -> bool {
        matches!(self, StepState::Failed { best_effort: false, .. })
    }

    /// Whether the step was actually invoked
    pub fn was_invoked(&self) -> bool {
        matches!(self, StepState::Completed { .. } | StepState::Failed { .. })
    }
}
