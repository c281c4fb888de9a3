//! Test: Trigger Filtering - only pushes to main and manual dispatches run the pipeline

use crate::helpers::*;
use nia_pipeline::core::{ExecutionContext, TriggerEvent};
use nia_pipeline::execution::ExecutionEngine;
use std::time::Duration;

async fn run_on(event: TriggerEvent, launcher: &ScriptedLauncher) -> Option<nia_pipeline::core::RunResult> {
    let pipeline = nia_pipeline();
    let engine = ExecutionEngine::new(launcher.clone(), launcher.probe_ready_after(Duration::ZERO));
    let mut context = ExecutionContext::new(std::env::temp_dir(), &pipeline);
    engine.run_if_triggered(&pipeline, &event, &mut context).await
}

fn push(branch: &str) -> TriggerEvent {
    TriggerEvent::Push {
        branch: branch.to_string(),
    }
}

#[tokio::test]
async fn test_push_to_main_runs() {
    let launcher = ScriptedLauncher::new();

    let result = run_on(push("main"), &launcher).await.expect("push to main runs");

    assert_run_completed(&result);
    assert_eq!(result.trigger, Some(push("main")));
}

#[tokio::test]
async fn test_push_to_other_branch_does_not_run() {
    let launcher = ScriptedLauncher::new();

    let result = run_on(push("feature/memory"), &launcher).await;

    assert!(result.is_none());
    assert!(launcher.commands().is_empty());
}

#[tokio::test]
async fn test_dispatch_runs_regardless_of_branch() {
    let launcher = ScriptedLauncher::new();

    let result = run_on(TriggerEvent::WorkflowDispatch, &launcher)
        .await
        .expect("dispatch runs");

    assert_run_completed(&result);
    assert_eq!(result.trigger, Some(TriggerEvent::WorkflowDispatch));
}

#[tokio::test]
async fn test_pipeline_without_triggers_is_dispatch_only() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Manual"
steps:
  - id: hello
    name: Hello
    message: "hi"
"#,
    );

    assert!(pipeline.is_triggered_by(&TriggerEvent::WorkflowDispatch));
    assert!(!pipeline.is_triggered_by(&push("main")));
}
