//! Test: Slow Service - readiness policies against a service that needs 12 seconds

use crate::helpers::*;
use nia_pipeline::core::{FailureKind, Pipeline, ReadinessPolicy, StepAction, StepState};
use std::time::Duration;

const STARTUP: Duration = Duration::from_secs(12);

fn with_readiness(mut pipeline: Pipeline, policy: ReadinessPolicy) -> Pipeline {
    for step in &mut pipeline.steps {
        if let StepAction::SmokeTest { readiness, .. } = &mut step.action {
            *readiness = policy;
        }
    }
    pipeline
}

fn smoke_failure(result: &nia_pipeline::core::RunResult) -> FailureKind {
    match &result.outcome("smoke_test").unwrap().state {
        StepState::Failed { kind, .. } => kind.clone(),
        other => panic!("expected smoke test to fail, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_fixed_delay_reports_false_negative() {
    let pipeline = with_readiness(
        nia_pipeline(),
        ReadinessPolicy::FixedDelay {
            delay: Duration::from_secs(10),
        },
    );
    let launcher = ScriptedLauncher::new();
    let probe = launcher.probe_ready_after(STARTUP);

    let result = run_with(&pipeline, &launcher, probe).await;

    assert_run_halted_at(&result, "smoke_test");
    assert_eq!(smoke_failure(&result), FailureKind::Probe);
    assert_not_run(&result, &["report"]);
    assert!(launcher.service_stopped());
}

#[tokio::test(start_paused = true)]
async fn test_poll_waits_for_slow_service() {
    let pipeline = nia_pipeline();
    let launcher = ScriptedLauncher::new();
    let probe = launcher.probe_ready_after(STARTUP);

    let result = run_with(&pipeline, &launcher, probe).await;

    assert_run_completed(&result);
    assert_eq!(result.final_output(), Some("Nia is ALIVE and deployed!"));
    assert!(launcher.service_stopped());
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_has_its_own_kind() {
    let pipeline = nia_pipeline();
    let launcher = ScriptedLauncher::new();
    let probe = launcher.probe_never_ready();

    let result = run_with(&pipeline, &launcher, probe).await;

    assert_run_halted_at(&result, "smoke_test");
    assert_eq!(smoke_failure(&result), FailureKind::ReadinessTimeout);
    assert!(launcher.service_stopped());
}

#[tokio::test(start_paused = true)]
async fn test_crashed_service_fails_before_timeout() {
    let pipeline = nia_pipeline();
    let launcher = ScriptedLauncher::new().service_crashes_after(Duration::from_secs(2));
    let probe = launcher.probe_ready_after(STARTUP);

    let result = run_with(&pipeline, &launcher, probe).await;

    assert_run_halted_at(&result, "smoke_test");
    assert_eq!(smoke_failure(&result), FailureKind::ServiceExited);
    assert!(launcher.service_stopped());
}

#[tokio::test]
async fn test_service_that_cannot_start_is_a_spawn_failure() {
    let pipeline = nia_pipeline();
    // Every other step uses `python` too, so only the smoke-test program goes missing
    let pipeline = {
        let mut pipeline = pipeline;
        for step in &mut pipeline.steps {
            if let StepAction::SmokeTest { service, .. } = &mut step.action {
                service.program = "uvicorn".to_string();
            }
        }
        pipeline
    };
    let launcher = ScriptedLauncher::new().missing("uvicorn");
    let probe = launcher.probe_ready_after(Duration::ZERO);

    let result = run_with(&pipeline, &launcher, probe).await;

    assert_run_halted_at(&result, "smoke_test");
    assert_eq!(smoke_failure(&result), FailureKind::Spawn);
    assert!(!launcher.service_launched());
}
