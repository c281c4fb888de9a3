//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    core::{
        ExecutionContext, ExecutionStatus, FailureKind, Pipeline, ReadinessPolicy, RunResult,
        StepOutcome, StepState, TriggerEvent,
    },
    execution::{
        executor::{ExecutionResult, StepExecutor},
        probe::HealthProbe,
        process::{OutputStream, ProcessLauncher},
    },
};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        total_steps: usize,
    },
    StepStarted {
        step_id: String,
        name: String,
        /// 1-based position
        index: usize,
        total: usize,
    },
    CommandStarted {
        step_id: String,
        command: String,
    },
    StepOutput {
        step_id: String,
        stream: OutputStream,
        line: String,
    },
    ServiceLaunched {
        step_id: String,
        command: String,
        pid: Option<u32>,
    },
    ReadinessWaiting {
        step_id: String,
        url: String,
        policy: ReadinessPolicy,
    },
    ServiceReady {
        step_id: String,
        status: u16,
        attempts: usize,
        waited: Duration,
    },
    ServiceStopped {
        step_id: String,
    },
    Message {
        step_id: String,
        text: String,
    },
    StepCompleted {
        step_id: String,
        duration: Duration,
    },
    StepFailed {
        step_id: String,
        error: String,
        kind: FailureKind,
        best_effort: bool,
    },
    StepSkipped {
        step_id: String,
        reason: String,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Main pipeline execution engine
pub struct ExecutionEngine<L, P> {
    executor: StepExecutor<L, P>,
    event_handlers: Vec<EventHandler>,
}

impl<L: ProcessLauncher, P: HealthProbe> ExecutionEngine<L, P> {
    pub fn new(launcher: L, probe: P) -> Self {
        Self {
            executor: StepExecutor::new(launcher, probe),
            event_handlers: Vec::new(),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Run the pipeline only if `event` matches its triggers
    pub async fn run_if_triggered(
        &self,
        pipeline: &Pipeline,
        event: &TriggerEvent,
        context: &mut ExecutionContext,
    ) -> Option<RunResult> {
        if !pipeline.is_triggered_by(event) {
            info!("Pipeline {} is not triggered by {}", pipeline.name, event);
            return None;
        }

        Some(self.execute(pipeline, Some(event.clone()), context).await)
    }

    /// Run every step in order, halting at the first required failure
    pub async fn run(&self, pipeline: &Pipeline, context: &mut ExecutionContext) -> RunResult {
        self.execute(pipeline, None, context).await
    }

    async fn execute(
        &self,
        pipeline: &Pipeline,
        trigger: Option<TriggerEvent>,
        context: &mut ExecutionContext,
    ) -> RunResult {
        let execution_id = context.execution_id;
        let total = pipeline.steps.len();

        info!("Starting pipeline execution: {} ({})", pipeline.name, execution_id);
        self.emit_event(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline.name.clone(),
            total_steps: total,
        });

        let mut result = RunResult::start(execution_id, &pipeline.name, trigger);
        let emit = |event: ExecutionEvent| self.emit_event(event);

        for (position, step) in pipeline.steps.iter().enumerate() {
            if let Some(halting) = result.halting_step() {
                let reason = format!("halted after '{}' failed", halting.step_id);
                self.emit_event(ExecutionEvent::StepSkipped {
                    step_id: step.id.clone(),
                    reason: reason.clone(),
                });
                result.record(StepOutcome {
                    step_id: step.id.clone(),
                    name: step.name.clone(),
                    state: StepState::NotRun { reason },
                    output: String::new(),
                    duration_ms: 0,
                });
                continue;
            }

            self.emit_event(ExecutionEvent::StepStarted {
                step_id: step.id.clone(),
                name: step.name.clone(),
                index: position + 1,
                total,
            });

            let started_at = Utc::now();
            let clock = Instant::now();
            let outcome = self.executor.execute(step, context, &emit).await;
            let duration = clock.elapsed();

            let (state, output) = match outcome {
                ExecutionResult::Success { output } => {
                    self.emit_event(ExecutionEvent::StepCompleted {
                        step_id: step.id.clone(),
                        duration,
                    });
                    (
                        StepState::Completed {
                            started_at,
                            completed_at: Utc::now(),
                        },
                        output,
                    )
                }
                ExecutionResult::Failed { error, kind, output } => {
                    let best_effort = step.continue_on_error;
                    if best_effort {
                        warn!("Step {} failed ({}), continuing: {}", step.id, kind, error);
                    } else {
                        error!("Step {} failed ({}): {}", step.id, kind, error);
                    }
                    self.emit_event(ExecutionEvent::StepFailed {
                        step_id: step.id.clone(),
                        error: error.clone(),
                        kind: kind.clone(),
                        best_effort,
                    });
                    (
                        StepState::Failed {
                            error,
                            kind,
                            best_effort,
                            started_at,
                            failed_at: Utc::now(),
                        },
                        output,
                    )
                }
            };

            result.record(StepOutcome {
                step_id: step.id.clone(),
                name: step.name.clone(),
                state,
                output,
                duration_ms: duration.as_millis() as u64,
            });
        }

        result.finish();

        info!(
            "Pipeline execution finished: {} - {:?}",
            pipeline.name, result.status
        );
        self.emit_event(ExecutionEvent::PipelineCompleted {
            execution_id,
            status: result.status,
        });

        result
    }
}
