//! Step executor - runs individual steps against the execution context

use crate::{
    core::{CommandSpec, ExecutionContext, FailureKind, ReadinessPolicy, Step, StepAction},
    execution::{
        engine::ExecutionEvent,
        probe::{wait_until_ready, HealthProbe, ProbeError},
        process::{Invocation, OutputSink, OutputStream, ProcessError, ProcessLauncher},
    },
};
use regex::Regex;
use std::sync::{Mutex, OnceLock, PoisonError};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Callback the executor reports progress through
pub type Emit<'a> = &'a (dyn Fn(ExecutionEvent) + Send + Sync);

/// Result of executing a step
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// Step completed successfully
    Success { output: String },
    /// Step failed
    Failed {
        error: String,
        kind: FailureKind,
        output: String,
    },
}

impl ExecutionResult {
    fn failed(error: String, kind: FailureKind, output: String) -> Self {
        ExecutionResult::Failed { error, kind, output }
    }
}

/// Forwards command output lines as execution events
struct EventLineSink<'a> {
    step_id: &'a str,
    emit: Emit<'a>,
}

impl OutputSink for EventLineSink<'_> {
    fn on_line(&self, stream: OutputStream, line: &str) {
        (self.emit)(ExecutionEvent::StepOutput {
            step_id: self.step_id.to_string(),
            stream,
            line: line.to_string(),
        });
    }
}

/// Executes a single step
pub struct StepExecutor<L, P> {
    launcher: L,
    probe: P,
}

impl<L: ProcessLauncher, P: HealthProbe> StepExecutor<L, P> {
    pub fn new(launcher: L, probe: P) -> Self {
        Self { launcher, probe }
    }

    /// Execute a step and return the result
    pub async fn execute(
        &self,
        step: &Step,
        context: &mut ExecutionContext,
        emit: Emit<'_>,
    ) -> ExecutionResult {
        info!("Executing step: {} ({})", step.id, step.action.kind());

        let limit = match step.timeout {
            Some(limit) => limit,
            None => return self.execute_action(step, context, emit).await,
        };

        // Lines seen so far outlive the action, which is dropped on timeout
        let transcript = Mutex::new(String::new());
        let recording = |event: ExecutionEvent| {
            if let ExecutionEvent::StepOutput { line, .. } = &event {
                let mut transcript = transcript.lock().unwrap_or_else(PoisonError::into_inner);
                transcript.push_str(line);
                transcript.push('\n');
            }
            emit(event);
        };

        match timeout(limit, self.execute_action(step, context, &recording)).await {
            Ok(result) => result,
            Err(_) => {
                error!("Timeout for step {} after {}s", step.id, limit.as_secs());
                let output = std::mem::take(
                    &mut *transcript.lock().unwrap_or_else(PoisonError::into_inner),
                );
                ExecutionResult::failed(
                    format!("Timeout after {} seconds", limit.as_secs()),
                    FailureKind::Timeout,
                    output,
                )
            }
        }
    }

    async fn execute_action(
        &self,
        step: &Step,
        context: &mut ExecutionContext,
        emit: Emit<'_>,
    ) -> ExecutionResult {
        match &step.action {
            StepAction::Checkout { repository, reference } => {
                self.checkout(step, context, repository.as_deref(), reference.as_deref(), emit)
                    .await
            }
            StepAction::SetupRuntime { name, program, version } => {
                self.setup_runtime(step, context, name, program, version, emit).await
            }
            StepAction::Run { commands } => {
                let mut output = String::new();
                match self.run_commands(step, context, commands, &mut output, emit).await {
                    Ok(()) => ExecutionResult::Success { output },
                    Err(failure) => failure.with_output(output),
                }
            }
            StepAction::SmokeTest { service, url, readiness } => {
                self.smoke_test(step, context, service, url, *readiness, emit).await
            }
            StepAction::Message { text } => {
                let text = crate::core::render_template(text, &context.rendering_variables());
                emit(ExecutionEvent::Message {
                    step_id: step.id.clone(),
                    text: text.clone(),
                });
                ExecutionResult::Success { output: text }
            }
        }
    }

    fn invocation(&self, step: &Step, context: &ExecutionContext, command: &CommandSpec) -> Invocation {
        let rendered = command.render(&context.rendering_variables());
        Invocation {
            program: rendered.program,
            args: rendered.args,
            working_dir: context.resolve_dir(rendered.working_dir.as_deref()),
            env: context.command_env(step),
        }
    }

    /// Run one command; `Ok` carries the captured output of a successful run
    async fn run_command(
        &self,
        step: &Step,
        context: &ExecutionContext,
        command: &CommandSpec,
        output: &mut String,
        emit: Emit<'_>,
    ) -> Result<(), StepFailure> {
        let invocation = self.invocation(step, context, command);
        emit(ExecutionEvent::CommandStarted {
            step_id: step.id.clone(),
            command: invocation.to_string(),
        });

        let sink = EventLineSink {
            step_id: &step.id,
            emit,
        };
        let result = self.launcher.run(&invocation, Some(&sink)).await;

        match result {
            Ok(captured) => {
                output.push_str(&captured.output);
                if captured.success {
                    Ok(())
                } else {
                    let kind = FailureKind::ExitStatus(captured.code);
                    warn!("Step {}: `{}` failed with {}", step.id, invocation, kind);
                    Err(StepFailure::new(format!("`{}` failed with {}", invocation, kind), kind))
                }
            }
            Err(e @ ProcessError::Spawn { .. }) => {
                error!("Step {}: {}", step.id, e);
                Err(StepFailure::new(e.to_string(), FailureKind::Spawn))
            }
            Err(e) => {
                error!("Step {}: {}", step.id, e);
                Err(StepFailure::new(e.to_string(), FailureKind::ExitStatus(None)))
            }
        }
    }

    async fn run_commands(
        &self,
        step: &Step,
        context: &ExecutionContext,
        commands: &[CommandSpec],
        output: &mut String,
        emit: Emit<'_>,
    ) -> Result<(), StepFailure> {
        for command in commands {
            self.run_command(step, context, command, output, emit).await?;
        }
        Ok(())
    }

    async fn checkout(
        &self,
        step: &Step,
        context: &ExecutionContext,
        repository: Option<&str>,
        reference: Option<&str>,
        emit: Emit<'_>,
    ) -> ExecutionResult {
        let mut output = String::new();

        let result = match repository {
            Some(repository) => {
                match std::fs::read_dir(&context.working_dir).map(|mut entries| entries.next().is_none()) {
                    Ok(true) => {}
                    Ok(false) => {
                        return ExecutionResult::failed(
                            format!(
                                "Cannot clone into {}: directory is not empty",
                                context.working_dir.display()
                            ),
                            FailureKind::Checkout,
                            output,
                        );
                    }
                    Err(e) => {
                        return ExecutionResult::failed(
                            format!("Cannot read {}: {}", context.working_dir.display(), e),
                            FailureKind::Checkout,
                            output,
                        );
                    }
                }

                let mut clone = CommandSpec::new("git").arg("clone");
                if let Some(reference) = reference {
                    clone = clone.arg("--branch").arg(reference);
                }
                let clone = clone.arg(repository).arg(".");
                self.run_command(step, context, &clone, &mut output, emit).await
            }
            None => {
                let verify = CommandSpec::new("git").args(["rev-parse", "--is-inside-work-tree"]);
                match self.run_command(step, context, &verify, &mut output, emit).await {
                    Ok(()) => match reference {
                        Some(reference) => {
                            let checkout = CommandSpec::new("git").arg("checkout").arg(reference);
                            self.run_command(step, context, &checkout, &mut output, emit).await
                        }
                        None => Ok(()),
                    },
                    Err(failure) if failure.kind == FailureKind::Spawn => Err(failure),
                    Err(_) => Err(StepFailure::new(
                        format!("{} is not a git work tree", context.working_dir.display()),
                        FailureKind::Checkout,
                    )),
                }
            }
        };

        match result {
            Ok(()) => ExecutionResult::Success { output },
            Err(failure) => failure.with_output(output),
        }
    }

    async fn setup_runtime(
        &self,
        step: &Step,
        context: &mut ExecutionContext,
        name: &str,
        program: &str,
        version: &str,
        emit: Emit<'_>,
    ) -> ExecutionResult {
        let mut output = String::new();
        let probe = CommandSpec::new(program).arg("--version");

        if let Err(failure) = self.run_command(step, context, &probe, &mut output, emit).await {
            return failure.with_output(output);
        }

        let found = match parse_version(&output) {
            Some(found) => found,
            None => {
                return ExecutionResult::failed(
                    format!("Could not read a version from `{} --version`", program),
                    FailureKind::VersionMismatch,
                    output,
                );
            }
        };

        if !version_matches(&found, version) {
            return ExecutionResult::failed(
                format!("{} {} does not satisfy required version {}", program, found, version),
                FailureKind::VersionMismatch,
                output,
            );
        }

        info!("Using {} {} as '{}'", program, found, name);
        context.set_variable(name.to_string(), program.to_string());
        context.set_variable(format!("{}_version", name), found);
        ExecutionResult::Success { output }
    }

    async fn smoke_test(
        &self,
        step: &Step,
        context: &ExecutionContext,
        service: &CommandSpec,
        url: &str,
        readiness: ReadinessPolicy,
        emit: Emit<'_>,
    ) -> ExecutionResult {
        let invocation = self.invocation(step, context, service);
        let url = crate::core::render_template(url, &context.rendering_variables());

        let mut handle = match self.launcher.spawn_service(&invocation).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Step {}: {}", step.id, e);
                return ExecutionResult::failed(e.to_string(), FailureKind::Spawn, String::new());
            }
        };

        info!("Launched `{}` (pid {:?})", invocation, handle.pid());
        emit(ExecutionEvent::ServiceLaunched {
            step_id: step.id.clone(),
            command: invocation.to_string(),
            pid: handle.pid(),
        });
        emit(ExecutionEvent::ReadinessWaiting {
            step_id: step.id.clone(),
            url: url.clone(),
            policy: readiness,
        });

        let readiness_result = wait_until_ready(&self.probe, &url, readiness, handle.as_mut()).await;

        // The service only lives for the duration of the check
        if let Err(e) = handle.stop().await {
            warn!("Failed to stop `{}`: {}", invocation, e);
        }
        emit(ExecutionEvent::ServiceStopped {
            step_id: step.id.clone(),
        });

        match readiness_result {
            Ok(report) => {
                info!(
                    "{} answered HTTP {} after {} attempt(s)",
                    url, report.status, report.attempts
                );
                emit(ExecutionEvent::ServiceReady {
                    step_id: step.id.clone(),
                    status: report.status,
                    attempts: report.attempts,
                    waited: report.waited,
                });
                ExecutionResult::Success {
                    output: format!(
                        "GET {} -> HTTP {} ({} attempt(s), {}ms)\n",
                        url,
                        report.status,
                        report.attempts,
                        report.waited.as_millis()
                    ),
                }
            }
            Err(e) => {
                let kind = match &e {
                    ProbeError::ReadinessTimeout { .. } => FailureKind::ReadinessTimeout,
                    ProbeError::ServiceExited { .. } => FailureKind::ServiceExited,
                    ProbeError::Request { .. } | ProbeError::Status { .. } => FailureKind::Probe,
                };
                error!("Step {}: {}", step.id, e);
                ExecutionResult::failed(e.to_string(), kind, String::new())
            }
        }
    }
}

/// Failure of a command inside a step, before output is attached
#[derive(Debug)]
struct StepFailure {
    error: String,
    kind: FailureKind,
}

impl StepFailure {
    fn new(error: String, kind: FailureKind) -> Self {
        debug!("Step failure: {} ({})", error, kind);
        Self { error, kind }
    }

    fn with_output(self, output: String) -> ExecutionResult {
        ExecutionResult::failed(self.error, self.kind, output)
    }
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("version pattern is valid"))
}

/// Extract the first `major.minor[.patch]` from interpreter output
pub fn parse_version(output: &str) -> Option<String> {
    version_pattern().find(output).map(|m| m.as_str().to_string())
}

/// Component-wise prefix match: `3.11.9` satisfies `3.11`, `3.1` does not
pub fn version_matches(found: &str, wanted: &str) -> bool {
    let found: Vec<&str> = found.split('.').collect();
    let wanted: Vec<&str> = wanted.split('.').collect();
    wanted.len() <= found.len() && wanted.iter().zip(&found).all(|(w, f)| w == f)
}
