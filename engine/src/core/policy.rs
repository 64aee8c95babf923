//! Decision points for sudo consent and failure resolution.
//!
//! The engine never prompts on its own. Callers plug in a [`SudoPolicy`] and a
//! [`FailurePolicy`] (a terminal prompt, a web UI, a scripted harness); without
//! one the engine fails closed via [`AbortPolicy`].

use std::sync::Mutex;

use anyhow::Result;

use crate::core::types::{Plan, Step, StepResult};

/// Answer to "this step requires sudo, proceed?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SudoDecision {
    /// Run this step only.
    Allow,
    /// Run this step and every later sudo step of the run without asking.
    AllowAll,
    /// Do not run it; the user will run it by hand. Recorded as skipped.
    Manual,
    /// Stop the whole run.
    Abort,
}

/// Answer to "this step failed, what now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Leave the step failed and move on.
    Continue,
    /// Run the same step again.
    Retry,
    /// Mark the step skipped and move on.
    Skip,
    /// Ask the repair advisor for a fixed step or a skip.
    AskAi,
    /// Stop the whole run.
    Abort,
}

pub trait SudoPolicy {
    fn decide(&self, step: &Step) -> SudoDecision;
}

pub trait FailurePolicy {
    fn decide(&self, step: &Step, result: &StepResult) -> FailureDecision;
}

impl<F: Fn(&Step) -> SudoDecision> SudoPolicy for F {
    fn decide(&self, step: &Step) -> SudoDecision {
        self(step)
    }
}

impl<F: Fn(&Step, &StepResult) -> FailureDecision> FailurePolicy for F {
    fn decide(&self, step: &Step, result: &StepResult) -> FailureDecision {
        self(step, result)
    }
}

/// Default policy for headless use: abort on every question.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortPolicy;

impl SudoPolicy for AbortPolicy {
    fn decide(&self, _step: &Step) -> SudoDecision {
        SudoDecision::Abort
    }
}

impl FailurePolicy for AbortPolicy {
    fn decide(&self, _step: &Step, _result: &StepResult) -> FailureDecision {
        FailureDecision::Abort
    }
}

/// Context handed to a [`RepairAdvisor`].
#[derive(Debug, Clone, Copy)]
pub struct RepairRequest<'a> {
    pub step: &'a Step,
    pub result: &'a StepResult,
    pub plan: &'a Plan,
}

/// What the repair advisor wants done with a failed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Retry with this replacement step.
    Retry(Step),
    /// Mark the failed step skipped.
    Skip { reason: String },
}

/// External collaborator consulted through [`FailureDecision::AskAi`].
///
/// Implementations may call remote services; the engine itself never does.
pub trait RepairAdvisor {
    fn repair(&self, request: &RepairRequest<'_>) -> Result<RepairOutcome>;
}

/// Session-scoped "approve all sudo steps" flag.
///
/// Reset by the plan runner at the start of every run. Guarded by a mutex so
/// embedding code may consult the gate from more than one place.
#[derive(Debug, Default)]
pub struct SudoApprovals {
    approve_all: Mutex<bool>,
}

impl SudoApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_approved_all(&self) -> bool {
        *self.lock()
    }

    pub fn approve_all(&self) {
        *self.lock() = true;
    }

    pub fn reset(&self) {
        *self.lock() = false;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        // A bool cannot be left half-written, so a poisoned lock is still usable.
        self.approve_all
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
