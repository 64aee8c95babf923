//! Orchestration of a whole plan run.
//!
//! [`PlanRunner`] walks the plan in order, executes each step through the
//! step executor, and resolves failures: first deterministic auto-recovery,
//! then (unless `auto_yes`) the failure policy, with retry, skip, repair, and
//! abort flowing into the [`ExecutionResult`] counters.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, info_span, warn};

use crate::cancel::CancelToken;
use crate::core::budget::{FALLBACK_STEP_TIMEOUT, deadline_passed, run_deadline};
use crate::core::env::merge_environments;
use crate::core::error::StepError;
use crate::core::execution::ExecutionResult;
use crate::core::policy::{
    AbortPolicy, FailureDecision, FailurePolicy, RepairAdvisor, RepairOutcome, RepairRequest,
    SudoApprovals, SudoPolicy,
};
use crate::core::readiness::ReadinessProbe;
use crate::core::recovery::RecoveryRules;
use crate::core::types::{Mode, Plan, Step, StepResult};
use crate::io::executor::StepRunner;
use crate::io::process::inherited_env;
use crate::io::stream::LineSink;
use crate::step::{StepContext, execute_step};

/// Failure prompts per step before the step is left failed.
pub const MAX_RESOLUTION_ROUNDS: usize = 5;

/// Skip reason recorded when the failure policy answers Skip.
pub const USER_SKIP_REASON: &str = "skipped by user after failure";

pub type StepStartHook = Arc<dyn Fn(&Step) + Send + Sync>;
pub type StepCompleteHook = Arc<dyn Fn(&Step, &StepResult) + Send + Sync>;

/// Live progress callbacks.
#[derive(Clone, Default)]
pub struct RunHooks {
    /// Before every step attempt, including retries and recovery builds.
    pub on_step_start: Option<StepStartHook>,
    /// After every step attempt.
    pub on_step_complete: Option<StepCompleteHook>,
    /// Every output line while a step runs.
    pub on_output: Option<LineSink>,
}

impl fmt::Debug for RunHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunHooks")
            .field("on_step_start", &self.on_step_start.is_some())
            .field("on_step_complete", &self.on_step_complete.is_some())
            .field("on_output", &self.on_output.is_some())
            .finish()
    }
}

/// Runtime configuration of a plan run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub mode: Mode,
    /// Base directory that step `cwd` values are resolved against.
    pub working_dir: PathBuf,
    /// Layered over the process environment, under the plan's own `env`.
    pub environment: BTreeMap<String, String>,
    /// Never consult the failure policy.
    pub auto_yes: bool,
    /// Run sudo steps without consulting the sudo policy.
    pub allow_sudo: bool,
    /// Default for steps without `timeoutSeconds`.
    pub step_timeout: Duration,
    /// Budget for the whole run. Zero means unbounded.
    pub global_timeout: Duration,
    pub readiness: ReadinessProbe,
    pub recovery: RecoveryRules,
    pub hooks: RunHooks,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: Mode::DryRun,
            working_dir: PathBuf::from("."),
            environment: BTreeMap::new(),
            auto_yes: false,
            allow_sudo: false,
            step_timeout: FALLBACK_STEP_TIMEOUT,
            global_timeout: Duration::ZERO,
            readiness: ReadinessProbe::default(),
            recovery: RecoveryRules::default(),
            hooks: RunHooks::default(),
        }
    }
}

/// How the loop proceeds after a step was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Result of one attempt to fix a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Resolved,
    Unresolved,
    Halted,
}

/// Executes plans against a [`StepRunner`].
///
/// Without explicit policies both gates fail closed: a sudo step or a failure
/// that needs a decision aborts the run.
pub struct PlanRunner<'a, R: ?Sized> {
    step_runner: &'a R,
    config: &'a RunnerConfig,
    sudo_policy: &'a dyn SudoPolicy,
    failure_policy: &'a dyn FailurePolicy,
    repair_advisor: Option<&'a dyn RepairAdvisor>,
    approvals: Arc<SudoApprovals>,
    cancel: CancelToken,
}

impl<'a, R: StepRunner + ?Sized> PlanRunner<'a, R> {
    pub fn new(step_runner: &'a R, config: &'a RunnerConfig) -> Self {
        Self {
            step_runner,
            config,
            sudo_policy: &AbortPolicy,
            failure_policy: &AbortPolicy,
            repair_advisor: None,
            approvals: Arc::new(SudoApprovals::new()),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_sudo_policy(mut self, policy: &'a dyn SudoPolicy) -> Self {
        self.sudo_policy = policy;
        self
    }

    pub fn with_failure_policy(mut self, policy: &'a dyn FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_repair_advisor(mut self, advisor: &'a dyn RepairAdvisor) -> Self {
        self.repair_advisor = Some(advisor);
        self
    }

    /// Share the "approve all" flag with embedding code.
    pub fn with_approvals(mut self, approvals: Arc<SudoApprovals>) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that aborts the run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Execute `plan` step by step and report the outcome.
    pub fn run(&self, plan: &Plan) -> ExecutionResult {
        let span = info_span!(
            "plan_run",
            version = %plan.version,
            project_type = %plan.project_type,
            steps = plan.steps.len(),
            mode = ?self.config.mode
        );
        let _enter = span.enter();
        info!("plan run started");

        self.approvals.reset();
        let deadline = run_deadline(Instant::now(), self.config.global_timeout);
        let process_env = inherited_env();
        let env = merge_environments([&process_env, &self.config.environment, &plan.env]);
        let ctx = StepContext {
            config: self.config,
            env: &env,
            run_deadline: deadline,
            cancel: &self.cancel,
            sudo_policy: self.sudo_policy,
            approvals: &self.approvals,
        };

        let mut report = ExecutionResult::for_plan(plan);
        for step in &plan.steps {
            if self.cancel.is_cancelled() {
                warn!(step_id = %step.id, "run cancelled before step");
                report.mark_aborted();
                break;
            }
            if deadline_passed(deadline, Instant::now()) {
                warn!(step_id = %step.id, "global timeout reached before step");
                report.mark_timeout_reached();
                break;
            }

            let result = self.attempt(step, &ctx);
            let halt = result.error.clone().filter(StepError::halts_run);
            let failed = result.is_failure();
            report.add_result(step, result);

            if let Some(err) = halt {
                record_halt(&mut report, &err);
                break;
            }
            if failed && self.resolve_failure(step, plan, &ctx, &mut report) == Flow::Stop {
                break;
            }
        }

        info!(
            success = report.success,
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            aborted = report.aborted_by_user,
            timeout_reached = report.timeout_reached,
            "plan run finished"
        );
        report
    }

    /// One step attempt wrapped in the lifecycle callbacks.
    fn attempt(&self, step: &Step, ctx: &StepContext<'_>) -> StepResult {
        if let Some(hook) = &self.config.hooks.on_step_start {
            hook(step);
        }
        let result = execute_step(self.step_runner, step, ctx);
        if result.skipped {
            info!(step_id = %step.id, reason = ?result.skip_reason, "step skipped");
        } else if result.success {
            info!(step_id = %step.id, duration_ms = result.duration.as_millis(), "step completed");
        } else if let Some(err) = &result.error {
            warn!(step_id = %step.id, err = %err, "step failed");
        }
        if let Some(hook) = &self.config.hooks.on_step_complete {
            hook(step, &result);
        }
        result
    }

    fn resolve_failure(
        &self,
        step: &Step,
        plan: &Plan,
        ctx: &StepContext<'_>,
        report: &mut ExecutionResult,
    ) -> Flow {
        match self.auto_recover(step, ctx, report) {
            Resolution::Resolved => return Flow::Continue,
            Resolution::Halted => return Flow::Stop,
            Resolution::Unresolved => {}
        }
        if self.config.auto_yes {
            info!(step_id = %step.id, "auto-yes: leaving step failed");
            return Flow::Continue;
        }

        for round in 1..=MAX_RESOLUTION_ROUNDS {
            let Some(current) = report.result_for(&step.id).cloned() else {
                break;
            };
            let decision = self.failure_policy.decide(step, &current);
            info!(step_id = %step.id, ?decision, round, "failure decision");
            let resolution = match decision {
                FailureDecision::Continue => return Flow::Continue,
                FailureDecision::Abort => {
                    report.mark_aborted();
                    return Flow::Stop;
                }
                FailureDecision::Skip => {
                    apply(report.resolve_skip(step, USER_SKIP_REASON));
                    return Flow::Continue;
                }
                FailureDecision::Retry => self.retry(step, step, ctx, report),
                FailureDecision::AskAi => match self.ask_advisor(step, &current, plan) {
                    Some(RepairOutcome::Retry(fixed)) => self.retry(step, &fixed, ctx, report),
                    Some(RepairOutcome::Skip { reason }) => {
                        apply(report.resolve_skip(step, &reason));
                        return Flow::Continue;
                    }
                    None => return Flow::Continue,
                },
            };
            match resolution {
                Resolution::Resolved => return Flow::Continue,
                Resolution::Halted => return Flow::Stop,
                Resolution::Unresolved => {}
            }
        }
        warn!(
            step_id = %step.id,
            rounds = MAX_RESOLUTION_ROUNDS,
            "failure still unresolved, leaving step failed"
        );
        Flow::Continue
    }

    /// Run the synthesized build for a recognized failure, then retry once.
    fn auto_recover(
        &self,
        step: &Step,
        ctx: &StepContext<'_>,
        report: &mut ExecutionResult,
    ) -> Resolution {
        let Some(failed) = report.result_for(&step.id).cloned() else {
            return Resolution::Unresolved;
        };
        let Some(build) = self.config.recovery.resolve(step, &failed) else {
            return Resolution::Unresolved;
        };
        info!(step_id = %step.id, build_cmd = %build.cmd, "attempting auto-recovery build");

        let build_result = self.attempt(&build, ctx);
        let build_ok = build_result.success && !build_result.skipped;
        let build_halt = build_result.error.clone().filter(StepError::halts_run);
        let build_stderr = build_result.stderr.trim().to_string();
        report.record_recovery(build_result);

        if let Some(err) = build_halt {
            record_halt(report, &err);
            return Resolution::Halted;
        }
        if !build_ok {
            warn!(step_id = %step.id, build_cmd = %build.cmd, "auto-recovery build failed");
            let original = failed.error.clone().unwrap_or(StepError::NonZeroExit {
                code: failed.exit_code.unwrap_or(-1),
            });
            let annotated = StepResult {
                error: Some(StepError::AutoRecoveryFailed {
                    original: Box::new(original),
                    build_cmd: build.cmd.clone(),
                    build_stderr,
                }),
                ..failed
            };
            apply(report.replace_failure(step, annotated));
            return Resolution::Unresolved;
        }
        self.retry(step, step, ctx, report)
    }

    /// Attempt `attempt_step` in place of the failed `original` step.
    fn retry(
        &self,
        original: &Step,
        attempt_step: &Step,
        ctx: &StepContext<'_>,
        report: &mut ExecutionResult,
    ) -> Resolution {
        let mut result = self.attempt(attempt_step, ctx);
        result.step_id = original.id.clone();

        if result.skipped {
            let reason = result.skip_reason.clone().unwrap_or_default();
            apply(report.resolve_skip(original, &reason));
            return Resolution::Resolved;
        }
        if result.success {
            apply(report.resolve_retry_success(original, result));
            return Resolution::Resolved;
        }
        let halt = result.error.clone().filter(StepError::halts_run);
        apply(report.replace_failure(original, result));
        if let Some(err) = halt {
            record_halt(report, &err);
            return Resolution::Halted;
        }
        Resolution::Unresolved
    }

    fn ask_advisor(&self, step: &Step, result: &StepResult, plan: &Plan) -> Option<RepairOutcome> {
        let Some(advisor) = self.repair_advisor else {
            warn!(step_id = %step.id, "no repair advisor configured, leaving step failed");
            return None;
        };
        match advisor.repair(&RepairRequest { step, result, plan }) {
            Ok(outcome) => {
                info!(step_id = %step.id, ?outcome, "repair advisor answered");
                Some(outcome)
            }
            Err(err) => {
                let err = format!("{err:#}");
                warn!(step_id = %step.id, err = %err, "repair advisor failed, leaving step failed");
                None
            }
        }
    }
}

fn record_halt(report: &mut ExecutionResult, err: &StepError) {
    match err {
        StepError::GlobalTimeout => {
            warn!("global timeout reached, stopping run");
            report.mark_timeout_reached();
        }
        _ => {
            warn!(err = %err, "run aborted");
            report.mark_aborted();
        }
    }
}

/// Bookkeeping rejections mean the runner lost track of a step; log and keep going.
fn apply(update: Result<(), String>) {
    if let Err(err) = update {
        error!(err = %err, "execution result update rejected");
    }
}
