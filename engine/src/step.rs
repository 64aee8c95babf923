//! Execution of a single plan step.
//!
//! A step first passes the dry-run short-circuit and the sudo gate; only then
//! is its working directory and timeout resolved and the command handed to a
//! [`StepRunner`].

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::core::budget::effective_timeout;
use crate::core::error::StepError;
use crate::core::path::resolve_workdir;
use crate::core::policy::{SudoApprovals, SudoDecision, SudoPolicy};
use crate::core::types::{Mode, Step, StepResult};
use crate::io::executor::{StepRequest, StepRunner};
use crate::runner::RunnerConfig;

/// Skip reason recorded when the user takes a sudo step over by hand.
pub const MANUAL_SKIP_REASON: &str = "user chose manual execution";

/// Run-wide state shared by every step attempt.
pub struct StepContext<'a> {
    pub config: &'a RunnerConfig,
    /// Fully merged child environment.
    pub env: &'a BTreeMap<String, String>,
    pub run_deadline: Option<Instant>,
    pub cancel: &'a CancelToken,
    pub sudo_policy: &'a dyn SudoPolicy,
    pub approvals: &'a SudoApprovals,
}

/// What the sudo gate allows for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SudoGate {
    Proceed,
    Manual,
    Abort,
}

/// Consult the sudo gate for `step`.
///
/// The policy is asked only when the step requires sudo, the run does not
/// allow sudo outright, and nobody approved all sudo steps yet.
pub fn sudo_gate(
    step: &Step,
    allow_sudo: bool,
    policy: &dyn SudoPolicy,
    approvals: &SudoApprovals,
) -> SudoGate {
    if !step.requires_sudo || allow_sudo || approvals.is_approved_all() {
        return SudoGate::Proceed;
    }
    let decision = policy.decide(step);
    info!(step_id = %step.id, ?decision, "sudo decision");
    match decision {
        SudoDecision::Allow => SudoGate::Proceed,
        SudoDecision::AllowAll => {
            approvals.approve_all();
            SudoGate::Proceed
        }
        SudoDecision::Manual => SudoGate::Manual,
        SudoDecision::Abort => SudoGate::Abort,
    }
}

/// Run one attempt of `step`.
pub fn execute_step<R: StepRunner + ?Sized>(
    runner: &R,
    step: &Step,
    ctx: &StepContext<'_>,
) -> StepResult {
    if ctx.config.mode == Mode::DryRun {
        debug!(step_id = %step.id, cmd = %step.cmd, "dry run, not executing");
        return StepResult {
            exit_code: None,
            ..StepResult::succeeded(step.id.as_str())
        };
    }

    match sudo_gate(step, ctx.config.allow_sudo, ctx.sudo_policy, ctx.approvals) {
        SudoGate::Proceed => {}
        SudoGate::Manual => return StepResult::skipped(step.id.as_str(), MANUAL_SKIP_REASON),
        SudoGate::Abort => {
            warn!(step_id = %step.id, "sudo step refused, aborting run");
            return StepResult::failed(step.id.as_str(), StepError::AbortedByUser);
        }
    }

    let workdir = resolve_workdir(&ctx.config.working_dir, &step.cwd);
    let timeout = effective_timeout(step.timeout_seconds, ctx.config.step_timeout);
    let readiness = Some(&ctx.config.readiness).filter(|probe| probe.applies_to(&step.id));
    debug!(
        step_id = %step.id,
        cwd = %workdir.display(),
        timeout_secs = timeout.as_secs(),
        readiness = readiness.is_some(),
        "resolved step"
    );

    runner.run(&StepRequest {
        step,
        workdir,
        timeout,
        env: ctx.env,
        run_deadline: ctx.run_deadline,
        cancel: ctx.cancel,
        readiness,
        output: ctx.config.hooks.on_output.as_ref(),
    })
}
