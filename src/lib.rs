//! nia-pipeline - runs the Nia build, test and deploy pipeline locally

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use core::{
    ExecutionContext, ExecutionStatus, FailureKind, Pipeline, RunResult, Step, StepAction,
    StepState, TriggerEvent,
};
pub use execution::{ExecutionEngine, ExecutionEvent, HttpProbe, SubprocessLauncher};
