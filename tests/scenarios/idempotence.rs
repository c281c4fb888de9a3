//! Test: Idempotence - equivalent fresh contexts give the same run

use crate::helpers::*;
use std::time::Duration;

#[tokio::test]
async fn test_repeated_successful_runs_match() {
    let pipeline = nia_pipeline();

    let first_launcher = ScriptedLauncher::new();
    let first = run_with(&pipeline, &first_launcher, first_launcher.probe_ready_after(Duration::ZERO)).await;

    let second_launcher = ScriptedLauncher::new();
    let second = run_with(&pipeline, &second_launcher, second_launcher.probe_ready_after(Duration::ZERO)).await;

    assert_ne!(first.execution_id, second.execution_id);
    assert_eq!(first.status, second.status);
    assert_eq!(classification(&first), classification(&second));
    assert_eq!(first_launcher.commands(), second_launcher.commands());
}

#[tokio::test]
async fn test_repeated_failing_runs_match() {
    let pipeline = nia_pipeline();

    let first_launcher = ScriptedLauncher::new().exit_with("powershell", 1);
    let first = run_with(&pipeline, &first_launcher, first_launcher.probe_ready_after(Duration::ZERO)).await;

    let second_launcher = ScriptedLauncher::new().exit_with("powershell", 1);
    let second = run_with(&pipeline, &second_launcher, second_launcher.probe_ready_after(Duration::ZERO)).await;

    assert_eq!(classification(&first), classification(&second));
    assert_eq!(
        classification(&first),
        vec![
            ("checkout".to_string(), "completed"),
            ("setup_python".to_string(), "completed"),
            ("install_deps".to_string(), "completed"),
            ("build".to_string(), "failed"),
            ("smoke_test".to_string(), "not run"),
            ("report".to_string(), "not run"),
        ]
    );
}
