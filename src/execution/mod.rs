//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod probe;
pub mod process;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{ExecutionResult, StepExecutor};
pub use probe::{HealthProbe, HttpProbe, ProbeError, ProbeReport};
pub use process::{
    CommandOutput, Invocation, OutputSink, OutputStream, ProcessError, ProcessLauncher,
    ServiceExit, ServiceHandle, SubprocessLauncher,
};
