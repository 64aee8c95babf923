//! Test-only helpers: scripted step runners, policies, and plan builders.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::error::StepError;
use crate::core::policy::{
    FailureDecision, FailurePolicy, RepairAdvisor, RepairOutcome, RepairRequest, SudoDecision,
    SudoPolicy,
};
use crate::core::types::{Mode, Plan, Step, StepResult};
use crate::io::executor::{StepRequest, StepRunner};
use crate::runner::RunnerConfig;

/// What a [`RecordingRunner`] saw for one attempt.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub step_id: String,
    pub cmd: String,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub env: BTreeMap<String, String>,
    pub readiness: bool,
}

/// Step runner that records every request and replays scripted results.
///
/// Results are queued per step id and consumed in order; attempts without a
/// queued result succeed.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    script: Mutex<HashMap<String, VecDeque<StepResult>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `result` for the next attempt of `result.step_id`.
    pub fn with_result(self, result: StepResult) -> Self {
        self.script
            .lock()
            .expect("script lock")
            .entry(result.step_id.clone())
            .or_default()
            .push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Step ids in attempt order.
    pub fn attempts(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.step_id).collect()
    }

    /// Commands in attempt order.
    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.cmd).collect()
    }
}

impl StepRunner for RecordingRunner {
    fn run(&self, request: &StepRequest<'_>) -> StepResult {
        self.calls.lock().expect("calls lock").push(RecordedCall {
            step_id: request.step.id.clone(),
            cmd: request.step.cmd.clone(),
            workdir: request.workdir.clone(),
            timeout: request.timeout,
            env: request.env.clone(),
            readiness: request.readiness.is_some(),
        });
        let scripted = self
            .script
            .lock()
            .expect("script lock")
            .get_mut(&request.step.id)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| StepResult::succeeded(request.step.id.as_str()))
    }
}

/// A failed result with exit code `code`.
pub fn failure(step_id: &str, code: i32) -> StepResult {
    StepResult::failed(step_id, StepError::NonZeroExit { code })
}

/// A step flagged as requiring sudo.
pub fn sudo_step(id: &str, cmd: &str) -> Step {
    Step {
        requires_sudo: true,
        ..Step::new(id, cmd)
    }
}

pub fn plan_of(steps: Vec<Step>) -> Plan {
    Plan {
        version: "1".to_string(),
        project_type: "test".to_string(),
        steps,
        ..Plan::default()
    }
}

/// Sudo policy answering the same decision every time and counting calls.
#[derive(Debug)]
pub struct CountingSudoPolicy {
    decision: SudoDecision,
    calls: AtomicUsize,
}

impl CountingSudoPolicy {
    pub fn new(decision: SudoDecision) -> Self {
        Self {
            decision,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SudoPolicy for CountingSudoPolicy {
    fn decide(&self, _step: &Step) -> SudoDecision {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.decision
    }
}

/// Failure policy replaying scripted decisions, then `Abort`.
#[derive(Debug, Default)]
pub struct ScriptedFailurePolicy {
    decisions: Mutex<VecDeque<FailureDecision>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedFailurePolicy {
    pub fn new(decisions: impl IntoIterator<Item = FailureDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Step ids the policy was asked about, in order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("seen lock").clone()
    }
}

impl FailurePolicy for ScriptedFailurePolicy {
    fn decide(&self, step: &Step, _result: &StepResult) -> FailureDecision {
        self.seen.lock().expect("seen lock").push(step.id.clone());
        self.decisions
            .lock()
            .expect("decisions lock")
            .pop_front()
            .unwrap_or(FailureDecision::Abort)
    }
}

/// Repair advisor returning a fixed outcome, or an error when `None`.
#[derive(Debug)]
pub struct FixedAdvisor {
    outcome: Option<RepairOutcome>,
    calls: AtomicUsize,
}

impl FixedAdvisor {
    pub fn new(outcome: RepairOutcome) -> Self {
        Self {
            outcome: Some(outcome),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            outcome: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RepairAdvisor for FixedAdvisor {
    fn repair(&self, _request: &RepairRequest<'_>) -> Result<RepairOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome
            .clone()
            .ok_or_else(|| anyhow!("advisor unavailable"))
    }
}

/// Scratch directory that plan runs are rooted in.
#[derive(Debug)]
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Execute-mode config rooted here with a short step timeout.
    pub fn config(&self) -> RunnerConfig {
        RunnerConfig {
            mode: Mode::Execute,
            working_dir: self.dir.path().to_path_buf(),
            step_timeout: Duration::from_secs(20),
            ..RunnerConfig::default()
        }
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
