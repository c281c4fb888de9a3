//! Test: Happy Path - every step succeeds and the success message is the final output

use crate::helpers::*;
use std::time::Duration;

#[tokio::test]
async fn test_full_run_reports_success_message() {
    let pipeline = nia_pipeline();
    let launcher = ScriptedLauncher::new();
    let probe = launcher.probe_ready_after(Duration::ZERO);

    let result = run_with(&pipeline, &launcher, probe).await;

    assert_run_completed(&result);
    assert_eq!(result.completed_steps(), 6);
    assert_eq!(result.final_output(), Some("Nia is ALIVE and deployed!"));
}

#[tokio::test]
async fn test_steps_run_in_declaration_order() {
    let pipeline = nia_pipeline();
    let launcher = ScriptedLauncher::new();
    let probe = launcher.probe_ready_after(Duration::ZERO);

    let result = run_with(&pipeline, &launcher, probe).await;

    assert_eq!(
        result.invoked_steps(),
        vec!["checkout", "setup_python", "install_deps", "build", "smoke_test", "report"]
    );
    assert_eq!(
        launcher.commands(),
        vec![
            "git rev-parse --is-inside-work-tree",
            "python --version",
            "python -m venv .venv",
            "pip install -r requirements.txt",
            "pip install sentence-transformers torch --quiet",
            "powershell -File build-nia-repo.ps1",
            "python niabrain/api/main.py",
        ]
    );
}

#[tokio::test]
async fn test_service_is_stopped_after_successful_probe() {
    let pipeline = nia_pipeline();
    let launcher = ScriptedLauncher::new();
    let probe = launcher.probe_ready_after(Duration::ZERO);

    run_with(&pipeline, &launcher, probe).await;

    assert!(launcher.service_launched());
    assert!(launcher.service_stopped());
}

#[tokio::test]
async fn test_dependency_env_is_activated() {
    let pipeline = nia_pipeline();
    let launcher = ScriptedLauncher::new();
    let probe = launcher.probe_ready_after(Duration::ZERO);

    run_with(&pipeline, &launcher, probe).await;

    let invocations = launcher.invocations();
    let pip = invocations
        .iter()
        .find(|inv| inv.program == "pip")
        .expect("pip was invoked");
    let venv = pip.env.get("VIRTUAL_ENV").expect("VIRTUAL_ENV is set");
    assert!(venv.ends_with(".venv"));

    let bin = if cfg!(windows) { "Scripts" } else { "bin" };
    let first_path_entry = std::env::split_paths(&pip.env["PATH"]).next().unwrap();
    assert!(first_path_entry.ends_with(std::path::Path::new(".venv").join(bin)));
    assert_eq!(pip.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));

    // Version check happens before activation
    let version_check = invocations
        .iter()
        .find(|inv| inv.to_string() == "python --version")
        .unwrap();
    assert!(!version_check.env.contains_key("VIRTUAL_ENV"));
}

#[tokio::test]
async fn test_variable_override_changes_build_script() {
    let mut pipeline = nia_pipeline();
    pipeline
        .variables
        .insert("build_script".to_string(), "build-nia-ci.ps1".to_string());
    let launcher = ScriptedLauncher::new();
    let probe = launcher.probe_ready_after(Duration::ZERO);

    let result = run_with(&pipeline, &launcher, probe).await;

    assert_run_completed(&result);
    assert!(launcher
        .commands()
        .contains(&"powershell -File build-nia-ci.ps1".to_string()));
}
