//! Test utilities: a scripted process launcher and a clock-driven health probe

use async_trait::async_trait;
use nia_pipeline::core::config::PipelineConfig;
use nia_pipeline::core::{ExecutionContext, ExecutionStatus, Pipeline, RunResult, StepState};
use nia_pipeline::execution::{
    CommandOutput, ExecutionEngine, HealthProbe, Invocation, OutputSink, OutputStream,
    ProbeError, ProcessError, ProcessLauncher, ServiceExit, ServiceHandle,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const NIA_PIPELINE: &str = include_str!("../../pipelines/deploy-nia.yaml");

/// The bundled Deploy Nia pipeline
pub fn nia_pipeline() -> Pipeline {
    PipelineConfig::from_yaml(NIA_PIPELINE)
        .expect("bundled pipeline parses")
        .to_pipeline()
}

/// Pipeline from an inline YAML definition
pub fn pipeline_from_yaml(yaml: &str) -> Pipeline {
    PipelineConfig::from_yaml(yaml).expect("test pipeline parses").to_pipeline()
}

/// State shared between the launcher, its services and the probe
#[derive(Default)]
struct Shared {
    invocations: Mutex<Vec<Invocation>>,
    service_launched_at: Mutex<Option<Instant>>,
    service_stopped: AtomicBool,
}

/// Process launcher that never touches the OS
///
/// Every command succeeds with empty output unless scripted otherwise.
/// `python --version` answers `Python 3.11.9`.
#[derive(Clone)]
pub struct ScriptedLauncher {
    shared: Arc<Shared>,
    /// Exit codes keyed by a prefix of the rendered command line
    exit_codes: Arc<HashMap<String, i32>>,
    /// Output keyed by a prefix of the rendered command line
    outputs: Arc<HashMap<String, String>>,
    /// Programs that cannot be started
    missing: Arc<Vec<String>>,
    /// Commands that print their output and then never exit
    hanging: Arc<Vec<String>>,
    /// The service exits by itself after this long
    service_exits_after: Option<Duration>,
}

impl Default for ScriptedLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        let mut outputs = HashMap::new();
        outputs.insert("python --version".to_string(), "Python 3.11.9\n".to_string());

        Self {
            shared: Arc::default(),
            exit_codes: Arc::new(HashMap::new()),
            outputs: Arc::new(outputs),
            missing: Arc::new(Vec::new()),
            hanging: Arc::new(Vec::new()),
            service_exits_after: None,
        }
    }

    /// Commands starting with `prefix` exit with `code`
    pub fn exit_with(mut self, prefix: &str, code: i32) -> Self {
        Arc::make_mut(&mut self.exit_codes).insert(prefix.to_string(), code);
        self
    }

    /// Commands starting with `prefix` print `output`
    pub fn respond(mut self, prefix: &str, output: &str) -> Self {
        Arc::make_mut(&mut self.outputs).insert(prefix.to_string(), output.to_string());
        self
    }

    /// `program` cannot be found
    pub fn missing(mut self, program: &str) -> Self {
        Arc::make_mut(&mut self.missing).push(program.to_string());
        self
    }

    /// Commands starting with `prefix` print their output and then hang
    pub fn hang(mut self, prefix: &str) -> Self {
        Arc::make_mut(&mut self.hanging).push(prefix.to_string());
        self
    }

    /// The launched service crashes after `after`
    pub fn service_crashes_after(mut self, after: Duration) -> Self {
        self.service_exits_after = Some(after);
        self
    }

    /// Rendered command lines, in invocation order
    pub fn commands(&self) -> Vec<String> {
        self.invocations().iter().map(ToString::to_string).collect()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.shared.invocations.lock().unwrap().clone()
    }

    pub fn service_launched(&self) -> bool {
        self.shared.service_launched_at.lock().unwrap().is_some()
    }

    pub fn service_stopped(&self) -> bool {
        self.shared.service_stopped.load(Ordering::SeqCst)
    }

    /// A probe that answers once the service has been up for `after`
    pub fn probe_ready_after(&self, after: Duration) -> ServiceProbe {
        ServiceProbe {
            shared: self.shared.clone(),
            ready_after: Some(after),
        }
    }

    /// A probe that never gets an answer
    pub fn probe_never_ready(&self) -> ServiceProbe {
        ServiceProbe {
            shared: self.shared.clone(),
            ready_after: None,
        }
    }

    fn lookup<'a, T>(table: &'a HashMap<String, T>, command: &str) -> Option<&'a T> {
        table
            .iter()
            .filter(|(prefix, _)| command.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, value)| value)
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn run(
        &self,
        invocation: &Invocation,
        sink: Option<&dyn OutputSink>,
    ) -> Result<CommandOutput, ProcessError> {
        self.shared.invocations.lock().unwrap().push(invocation.clone());

        if self.missing.contains(&invocation.program) {
            return Err(ProcessError::Spawn {
                program: invocation.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            });
        }

        let command = invocation.to_string();
        let output = Self::lookup(&self.outputs, &command).cloned().unwrap_or_default();
        if let Some(sink) = sink {
            for line in output.lines() {
                sink.on_line(OutputStream::Stdout, line);
            }
        }

        if self.hanging.iter().any(|prefix| command.starts_with(prefix.as_str())) {
            std::future::pending::<()>().await;
        }

        let code = Self::lookup(&self.exit_codes, &command).copied().unwrap_or(0);
        Ok(CommandOutput {
            code: Some(code),
            success: code == 0,
            output,
        })
    }

    async fn spawn_service(
        &self,
        invocation: &Invocation,
    ) -> Result<Box<dyn ServiceHandle>, ProcessError> {
        self.shared.invocations.lock().unwrap().push(invocation.clone());

        if self.missing.contains(&invocation.program) {
            return Err(ProcessError::Spawn {
                program: invocation.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            });
        }

        let launched_at = Instant::now();
        *self.shared.service_launched_at.lock().unwrap() = Some(launched_at);

        Ok(Box::new(ScriptedService {
            shared: self.shared.clone(),
            launched_at,
            exits_after: self.service_exits_after,
        }))
    }
}

struct ScriptedService {
    shared: Arc<Shared>,
    launched_at: Instant,
    exits_after: Option<Duration>,
}

#[async_trait]
impl ServiceHandle for ScriptedService {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn exited(&mut self) -> Option<ServiceExit> {
        match self.exits_after {
            Some(after) if self.launched_at.elapsed() >= after => Some(ServiceExit { code: Some(1) }),
            _ => None,
        }
    }

    async fn stop(&mut self) -> Result<(), ProcessError> {
        self.shared.service_stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Health probe driven by the scripted service's uptime
pub struct ServiceProbe {
    shared: Arc<Shared>,
    ready_after: Option<Duration>,
}

#[async_trait]
impl HealthProbe for ServiceProbe {
    async fn check(&self, url: &str) -> Result<u16, ProbeError> {
        let launched_at = *self.shared.service_launched_at.lock().unwrap();
        match (launched_at, self.ready_after) {
            (Some(launched_at), Some(after)) if launched_at.elapsed() >= after => Ok(200),
            _ => Err(ProbeError::Request {
                url: url.to_string(),
                message: "connection refused".to_string(),
            }),
        }
    }
}

/// Run `pipeline` on a fresh context with the given launcher and probe
pub async fn run_with(
    pipeline: &Pipeline,
    launcher: &ScriptedLauncher,
    probe: ServiceProbe,
) -> RunResult {
    run_in(std::env::temp_dir(), pipeline, launcher, probe).await
}

/// Run `pipeline` with `working_dir` as the working directory
pub async fn run_in(
    working_dir: PathBuf,
    pipeline: &Pipeline,
    launcher: &ScriptedLauncher,
    probe: ServiceProbe,
) -> RunResult {
    let engine = ExecutionEngine::new(launcher.clone(), probe);
    let mut context = ExecutionContext::new(working_dir, pipeline);
    engine.run(pipeline, &mut context).await
}

/// A fresh directory under the system temp dir, not yet created
pub fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("nia-pipeline-scenario-{}", uuid::Uuid::new_v4()))
}

/// Assert the run completed successfully
pub fn assert_run_completed(result: &RunResult) {
    assert_eq!(
        result.status,
        ExecutionStatus::Completed,
        "expected run to complete, halted at {:?}",
        result.halting_step().map(|o| &o.step_id)
    );
}

/// Assert the run failed at `step_id`
pub fn assert_run_halted_at(result: &RunResult, step_id: &str) {
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(
        result.halting_step().map(|o| o.step_id.as_str()),
        Some(step_id)
    );
}

/// Assert the listed steps were never invoked
pub fn assert_not_run(result: &RunResult, step_ids: &[&str]) {
    for id in step_ids {
        let outcome = result
            .outcome(id)
            .unwrap_or_else(|| panic!("no outcome recorded for {}", id));
        assert!(
            matches!(outcome.state, StepState::NotRun { .. }),
            "expected {} not to run, got {:?}",
            id,
            outcome.state
        );
    }
}

/// Step classification as plain strings, for comparing runs
pub fn classification(result: &RunResult) -> Vec<(String, &'static str)> {
    result
        .outcomes
        .iter()
        .map(|o| {
            let class = match &o.state {
                StepState::Completed { .. } => "completed",
                StepState::Failed { best_effort: true, .. } => "failed (best effort)",
                StepState::Failed { .. } => "failed",
                StepState::NotRun { .. } => "not run",
            };
            (o.step_id.clone(), class)
        })
        .collect()
}
