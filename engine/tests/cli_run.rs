//! CLI tests for `plan-engine run` and `plan-engine validate`.
//!
//! Spawns the binary against plans written into a temp directory and checks
//! exit codes, side effects, and the JSON report.

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use plan_engine::core::execution::ExecutionResult;
use plan_engine::core::types::Step;
use plan_engine::exit_codes;
use plan_engine::io::plan_store::write_plan;
use plan_engine::test_support::{plan_of, sudo_step};

fn plan_engine(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_plan-engine"))
        .current_dir(dir)
        .args(args)
        .env("RUST_LOG", "off")
        .stdin(Stdio::null())
        .output()
        .expect("spawn plan-engine")
}

#[test]
fn validate_accepts_a_well_formed_plan() {
    let temp = tempfile::tempdir().expect("tempdir");
    let plan = plan_of(vec![Step::new("install", "npm ci"), Step::new("run", "npm run dev")]);
    write_plan(&temp.path().join("plan.json"), &plan).expect("write plan");

    let output = plan_engine(temp.path(), &["validate", "plan.json"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "plan ok: 2 steps\n");
}

#[test]
fn validate_rejects_duplicate_step_ids() {
    let temp = tempfile::tempdir().expect("tempdir");
    let raw = r#"{
        "version": "1",
        "projectType": "node",
        "steps": [
            {"id": "install", "cmd": "npm ci"},
            {"id": "install", "cmd": "npm install"}
        ]
    }"#;
    fs::write(temp.path().join("plan.json"), raw).expect("write plan");

    let output = plan_engine(temp.path(), &["validate", "plan.json"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("install"));
}

#[test]
fn missing_plan_file_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = plan_engine(temp.path(), &["run", "absent.json"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn run_without_execute_is_a_dry_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let plan = plan_of(vec![Step::new("create", "touch marker")]);
    write_plan(&temp.path().join("plan.json"), &plan).expect("write plan");

    let output = plan_engine(temp.path(), &["run", "plan.json"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(!temp.path().join("marker").exists());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[dry-run] create"), "{stdout}");
    assert!(stdout.contains("Plan finished: success"), "{stdout}");
}

#[test]
fn unanswered_sudo_prompt_aborts_and_reports() {
    let temp = tempfile::tempdir().expect("tempdir");
    let plan = plan_of(vec![
        sudo_step("install", "sudo apt-get install -y nodejs"),
        Step::new("after", "touch after"),
    ]);
    write_plan(&temp.path().join("plan.json"), &plan).expect("write plan");

    let output = plan_engine(
        temp.path(),
        &["run", "plan.json", "--execute", "--yes", "--report", "report.json"],
    );

    assert_eq!(output.status.code(), Some(exit_codes::ABORTED));
    assert!(!temp.path().join("after").exists());
    let report: ExecutionResult = serde_json::from_str(
        &fs::read_to_string(temp.path().join("report.json")).expect("read report"),
    )
    .expect("parse report");
    assert!(report.aborted_by_user);
    assert_eq!(report.total_steps, 1);
}

#[cfg(unix)]
#[test]
fn failed_step_with_yes_exits_failed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let plan = plan_of(vec![Step::new("broken", "exit 4"), Step::new("after", "touch after")]);
    write_plan(&temp.path().join("plan.json"), &plan).expect("write plan");

    let output = plan_engine(temp.path(), &["run", "plan.json", "--execute", "--yes", "--quiet"]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(temp.path().join("after").exists());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("command exited with code 4"), "{stdout}");
}

#[cfg(unix)]
#[test]
fn huge_global_timeout_runs_unbounded() {
    let temp = tempfile::tempdir().expect("tempdir");
    let plan = plan_of(vec![Step::new("create", "touch marker")]);
    write_plan(&temp.path().join("plan.json"), &plan).expect("write plan");
    let max = u64::MAX.to_string();

    let output = plan_engine(
        temp.path(),
        &["run", "plan.json", "--execute", "--global-timeout", max.as_str()],
    );

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(temp.path().join("marker").exists());
}

#[cfg(unix)]
#[test]
fn settings_file_environment_reaches_steps() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("plan-engine.toml"),
        "stream_output = false\n\n[environment]\nGREETING = \"hello from settings\"\n",
    )
    .expect("write settings");
    let plan = plan_of(vec![Step::new("greet", r#"echo "$GREETING" > greeting.txt"#)]);
    write_plan(&temp.path().join("plan.json"), &plan).expect("write plan");

    let output = plan_engine(temp.path(), &["run", "plan.json", "--execute"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        fs::read_to_string(temp.path().join("greeting.txt")).expect("read greeting"),
        "hello from settings\n"
    );
}
