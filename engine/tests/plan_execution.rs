//! End-to-end plan runs against real shell processes.
//!
//! Covers dry runs, timeouts that must take descendants down with them,
//! readiness auto-stop, auto-recovery through a fake `npm`, environment
//! layering, and run-wide cancellation.
#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use plan_engine::core::error::{StepError, StepErrorKind};
use plan_engine::core::invariants::validate_counters;
use plan_engine::core::types::{Mode, Plan, Step, StepResult};
use plan_engine::io::executor::ShellRunner;
use plan_engine::runner::{PlanRunner, RunHooks, RunnerConfig};
use plan_engine::test_support::{TestWorkspace, plan_of};

fn step_with_timeout(id: &str, cmd: &str, timeout_seconds: u64) -> Step {
    Step {
        timeout_seconds,
        ..Step::new(id, cmd)
    }
}

/// Record `start:<id>` / `done:<id>` for every attempt.
fn recording_hooks(log: &Arc<Mutex<Vec<String>>>) -> RunHooks {
    let starts = Arc::clone(log);
    let completions = Arc::clone(log);
    RunHooks {
        on_step_start: Some(Arc::new(move |step: &Step| {
            starts.lock().expect("lock").push(format!("start:{}", step.id));
        })),
        on_step_complete: Some(Arc::new(move |step: &Step, _result: &StepResult| {
            completions.lock().expect("lock").push(format!("done:{}", step.id));
        })),
        on_output: None,
    }
}

/// Install a fake `npm` whose `start` fails until `run build` has created a build.
fn install_fake_npm(workspace: &TestWorkspace, build_script: &str) -> RunnerConfig {
    let bin = workspace.join("bin");
    fs::create_dir_all(&bin).expect("bin dir");
    let npm = bin.join("npm");
    let script = format!(
        r#"#!/bin/sh
case "$1" in
  start)
    if [ -f .next/BUILD_ID ]; then
      echo "serving production build"
    else
      echo "Error: Could not find a production build in the '.next' directory." >&2
      exit 1
    fi
    ;;
  run)
    {build_script}
    ;;
esac
"#
    );
    fs::write(&npm, script).expect("write npm");
    fs::set_permissions(&npm, fs::Permissions::from_mode(0o755)).expect("chmod npm");

    let mut config = workspace.config();
    let path = std::env::var("PATH").unwrap_or_default();
    config
        .environment
        .insert("PATH".to_string(), format!("{}:{path}", bin.display()));
    config.auto_yes = true;
    config
}

fn run(config: &RunnerConfig, plan: &Plan) -> plan_engine::core::execution::ExecutionResult {
    PlanRunner::new(&ShellRunner::new(), config).run(plan)
}

#[test]
fn dry_run_never_executes() {
    let workspace = TestWorkspace::new();
    let config = RunnerConfig {
        mode: Mode::DryRun,
        ..workspace.config()
    };
    let plan = plan_of(vec![
        Step::new("create", "touch marker"),
        Step::new("build", "touch other"),
    ]);

    let report = run(&config, &plan);

    assert!(report.success);
    assert_eq!(report.completed, report.total_steps);
    assert_eq!(report.total_steps, 2);
    assert!(!workspace.join("marker").exists());
    assert!(!workspace.join("other").exists());
}

/// A backgrounded writer must die with the timed-out step.
#[test]
fn timeout_kills_descendants() {
    let workspace = TestWorkspace::new();
    let config = RunnerConfig {
        auto_yes: true,
        ..workspace.config()
    };
    let plan = plan_of(vec![step_with_timeout(
        "slow",
        "(sleep 2; touch marker) & sleep 30",
        1,
    )]);

    let started = Instant::now();
    let report = run(&config, &plan);

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!report.success);
    let result = &report.step_results[0];
    assert_eq!(
        result.error.as_ref().map(StepError::kind),
        Some(StepErrorKind::Timeout)
    );
    assert!(!result.cancelled);

    thread::sleep(Duration::from_millis(2500));
    assert!(!workspace.join("marker").exists());
}

#[test]
fn background_children_do_not_outlive_a_finished_step() {
    let workspace = TestWorkspace::new();
    let plan = plan_of(vec![Step::new("spawn", "(sleep 1; touch late) & echo done")]);

    let report = run(&workspace.config(), &plan);

    assert!(report.success, "{report:?}");
    assert_eq!(report.step_results[0].stdout, "done\n");
    thread::sleep(Duration::from_millis(1500));
    assert!(!workspace.join("late").exists());
}

#[test]
fn readiness_marker_stops_run_step() {
    let workspace = TestWorkspace::new();
    let plan = plan_of(vec![step_with_timeout(
        "run",
        "echo compiling; echo 'ready - started server on 0.0.0.0:3000'; sleep 30",
        20,
    )]);

    let started = Instant::now();
    let report = run(&workspace.config(), &plan);

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(report.success, "{report:?}");
    let result = &report.step_results[0];
    assert_eq!(result.exit_code, Some(0));
    assert!(result.stdout.contains("ready - started server"));
}

#[test]
fn readiness_is_ignored_for_other_step_ids() {
    let workspace = TestWorkspace::new();
    let plan = plan_of(vec![step_with_timeout(
        "serve",
        "echo 'ready - started server'; sleep 30",
        1,
    )]);
    let config = RunnerConfig {
        auto_yes: true,
        ..workspace.config()
    };

    let report = run(&config, &plan);

    assert_eq!(
        report.step_results[0].error.as_ref().map(StepError::kind),
        Some(StepErrorKind::Timeout)
    );
}

#[test]
fn auto_recovery_builds_then_retries() {
    let workspace = TestWorkspace::new();
    let mut config = install_fake_npm(
        &workspace,
        r#"mkdir -p .next && echo built > .next/BUILD_ID && echo "build finished""#,
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    config.hooks = recording_hooks(&log);
    let plan = plan_of(vec![Step::new("start", "npm start")]);

    let report = run(&config, &plan);

    assert!(report.success, "{report:?}");
    assert_eq!((report.completed, report.failed), (1, 0));
    assert!(workspace.join(".next/BUILD_ID").exists());
    assert_eq!(report.step_results[0].stdout, "serving production build\n");
    assert_eq!(report.recovery_results.len(), 1);
    assert_eq!(report.recovery_results[0].step_id, "start-auto-build");
    assert!(report.recovery_results[0].success);
    assert_eq!(
        *log.lock().expect("lock"),
        vec![
            "start:start",
            "done:start",
            "start:start-auto-build",
            "done:start-auto-build",
            "start:start",
            "done:start",
        ]
    );
    assert!(validate_counters(&report).is_empty());
}

#[test]
fn failed_recovery_build_annotates_original_failure() {
    let workspace = TestWorkspace::new();
    let config = install_fake_npm(&workspace, r#"echo "tsc: not found" >&2; exit 2"#);
    let plan = plan_of(vec![Step::new("start", "npm start"), Step::new("after", "true")]);

    let report = run(&config, &plan);

    assert!(!report.success);
    assert!(!report.aborted_by_user);
    assert_eq!((report.completed, report.failed), (1, 1));
    let error = report.step_results[0].error.as_ref().expect("error");
    assert_eq!(error.kind(), StepErrorKind::AutoRecoveryFailed);
    let message = error.to_string();
    assert!(message.starts_with("command exited with code 1"));
    assert!(message.contains("[auto-recovery] `npm run build` failed: tsc: not found"));
    assert_eq!(report.step_results[0].exit_code, Some(1));
    assert!(!report.recovery_results[0].success);
}

#[test]
fn environment_layers_and_cwd_resolution() {
    let workspace = TestWorkspace::new();
    fs::create_dir_all(workspace.join("web")).expect("web dir");
    let mut config = workspace.config();
    config.environment = BTreeMap::from([
        ("FROM_CONFIG".to_string(), "config".to_string()),
        ("SHARED".to_string(), "config".to_string()),
    ]);
    let mut plan = plan_of(vec![
        Step::new("env", r#"echo "$FROM_CONFIG $SHARED""#),
        Step {
            cwd: "web".to_string(),
            ..Step::new("where", "pwd")
        },
        Step::new("inherited", r#"test -n "$PATH" && echo has-path"#),
    ]);
    plan.env.insert("SHARED".to_string(), "plan".to_string());

    let report = run(&config, &plan);

    assert!(report.success, "{report:?}");
    assert_eq!(report.step_results[0].stdout, "config plan\n");
    assert!(report.step_results[1].stdout.trim_end().ends_with("/web"));
    assert_eq!(report.step_results[2].stdout, "has-path\n");
}

#[test]
fn non_zero_exit_is_recorded_with_code_and_stderr() {
    let workspace = TestWorkspace::new();
    let config = RunnerConfig {
        auto_yes: true,
        ..workspace.config()
    };
    let plan = plan_of(vec![Step::new("broken", "echo nope >&2; exit 7")]);

    let report = run(&config, &plan);

    let result = &report.step_results[0];
    assert_eq!(result.exit_code, Some(7));
    assert_eq!(result.stderr, "nope\n");
    assert_eq!(
        result.error.as_ref().map(ToString::to_string).as_deref(),
        Some("command exited with code 7")
    );
    assert_eq!(report.failed_step.as_ref().map(|s| s.id.as_str()), Some("broken"));
}

#[test]
fn global_timeout_stops_the_run() {
    let workspace = TestWorkspace::new();
    let config = RunnerConfig {
        global_timeout: Duration::from_secs(1),
        ..workspace.config()
    };
    let plan = plan_of(vec![Step::new("slow", "sleep 30"), Step::new("after", "touch after")]);

    let started = Instant::now();
    let report = run(&config, &plan);

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(report.timeout_reached);
    assert!(report.aborted_by_user);
    assert!(!report.success);
    assert_eq!(report.total_steps, 1);
    assert!(report.step_results[0].cancelled);
    assert_eq!(report.step_results[0].error, Some(StepError::GlobalTimeout));
    assert!(!workspace.join("after").exists());
    assert!(validate_counters(&report).is_empty());
}

#[test]
fn cancellation_aborts_the_running_step() {
    let workspace = TestWorkspace::new();
    let config = workspace.config();
    let shell = ShellRunner::new();
    let runner = PlanRunner::new(&shell, &config);
    let cancel = runner.cancel_token();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        cancel.cancel();
    });
    let plan = plan_of(vec![Step::new("slow", "sleep 30"), Step::new("after", "touch after")]);

    let started = Instant::now();
    let report = runner.run(&plan);
    canceller.join().expect("join");

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(report.aborted_by_user);
    assert!(!report.timeout_reached);
    assert!(report.step_results[0].cancelled);
    assert!(!workspace.join("after").exists());
}

#[test]
fn missing_cwd_is_a_launch_failure() {
    let workspace = TestWorkspace::new();
    let config = RunnerConfig {
        auto_yes: true,
        ..workspace.config()
    };
    let plan = plan_of(vec![Step {
        cwd: "does-not-exist".to_string(),
        ..Step::new("x", "true")
    }]);

    let report = run(&config, &plan);

    assert_eq!(
        report.step_results[0].error.as_ref().map(StepError::kind),
        Some(StepErrorKind::ProcessLaunchFailure)
    );
    assert_eq!(report.step_results[0].exit_code, None);
    assert!(!report.aborted_by_user);
}

#[test]
fn unrepresentable_timeouts_run_unbounded() {
    let workspace = TestWorkspace::new();
    let plan = plan_of(vec![Step::new("quick", "echo ok")]);

    let global = RunnerConfig {
        global_timeout: Duration::from_secs(u64::MAX),
        ..workspace.config()
    };
    let report = run(&global, &plan);
    assert!(report.success, "{report:?}");
    assert!(!report.timeout_reached);

    let per_step = RunnerConfig {
        step_timeout: Duration::from_secs(u64::MAX),
        ..workspace.config()
    };
    let report = run(&per_step, &plan);
    assert!(report.success, "{report:?}");
    assert_eq!(report.step_results[0].stdout, "ok\n");
}
