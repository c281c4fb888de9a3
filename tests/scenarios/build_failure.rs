//! Test: Fail-fast - a failing step halts the run and later steps never run

use crate::helpers::*;
use nia_pipeline::core::{FailureKind, StepState};
use std::time::Duration;

#[tokio::test]
async fn test_build_failure_halts_run() {
    let pipeline = nia_pipeline();
    let launcher = ScriptedLauncher::new().exit_with("powershell", 1);
    let probe = launcher.probe_ready_after(Duration::ZERO);

    let result = run_with(&pipeline, &launcher, probe).await;

    assert_run_halted_at(&result, "build");
    assert_not_run(&result, &["smoke_test", "report"]);
    assert!(!launcher.service_launched());

    match &result.outcome("build").unwrap().state {
        StepState::Failed { kind, best_effort, .. } => {
            assert_eq!(*kind, FailureKind::ExitStatus(Some(1)));
            assert!(!best_effort);
        }
        other => panic!("expected build to fail, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_command_stops_remaining_commands_of_step() {
    let pipeline = nia_pipeline();
    let launcher = ScriptedLauncher::new().exit_with("pip install -r", 1);
    let probe = launcher.probe_ready_after(Duration::ZERO);

    let result = run_with(&pipeline, &launcher, probe).await;

    assert_run_halted_at(&result, "install_deps");
    assert_not_run(&result, &["build", "smoke_test", "report"]);
    assert!(!launcher
        .commands()
        .contains(&"pip install sentence-transformers torch --quiet".to_string()));
}

#[tokio::test]
async fn test_missing_program_is_a_spawn_failure() {
    let pipeline = nia_pipeline();
    let launcher = ScriptedLauncher::new().missing("powershell");
    let probe = launcher.probe_ready_after(Duration::ZERO);

    let result = run_with(&pipeline, &launcher, probe).await;

    assert_run_halted_at(&result, "build");
    assert!(matches!(
        result.outcome("build").unwrap().state,
        StepState::Failed {
            kind: FailureKind::Spawn,
            ..
        }
    ));
}

#[tokio::test]
async fn test_wrong_python_version_halts_setup() {
    let pipeline = nia_pipeline();
    let launcher = ScriptedLauncher::new().respond("python --version", "Python 3.12.1\n");
    let probe = launcher.probe_ready_after(Duration::ZERO);

    let result = run_with(&pipeline, &launcher, probe).await;

    assert_run_halted_at(&result, "setup_python");
    assert!(matches!(
        result.outcome("setup_python").unwrap().state,
        StepState::Failed {
            kind: FailureKind::VersionMismatch,
            ..
        }
    ));
    assert_not_run(&result, &["install_deps", "build", "smoke_test", "report"]);
}

#[tokio::test]
async fn test_checkout_outside_work_tree_fails() {
    let pipeline = nia_pipeline();
    let launcher = ScriptedLauncher::new().exit_with("git rev-parse", 128);
    let probe = launcher.probe_ready_after(Duration::ZERO);

    let result = run_with(&pipeline, &launcher, probe).await;

    assert_run_halted_at(&result, "checkout");
    assert!(matches!(
        result.outcome("checkout").unwrap().state,
        StepState::Failed {
            kind: FailureKind::Checkout,
            ..
        }
    ));
    assert_eq!(launcher.commands(), vec!["git rev-parse --is-inside-work-tree"]);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_build_times_out_with_partial_output() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Hanging build"
steps:
  - id: "build"
    name: "Build"
    timeout_secs: 60
    run:
      - program: "powershell"
        args: ["-File", "build-nia-repo.ps1"]

  - id: "report"
    name: "Report"
    message: "built"
"#,
    );
    let launcher = ScriptedLauncher::new()
        .respond("powershell", "Restoring packages\nCompiling nia\n")
        .hang("powershell");
    let probe = launcher.probe_ready_after(Duration::ZERO);

    let result = run_with(&pipeline, &launcher, probe).await;

    assert_run_halted_at(&result, "build");
    assert_not_run(&result, &["report"]);
    let build = result.outcome("build").unwrap();
    assert!(matches!(
        build.state,
        StepState::Failed {
            kind: FailureKind::Timeout,
            ..
        }
    ));
    assert_eq!(build.output, "Restoring packages\nCompiling nia\n");
}
