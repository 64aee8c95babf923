//! Run-level bookkeeping for a plan execution.
//!
//! [`ExecutionResult`] is created empty, mutated once per step outcome, and
//! handed to the caller when the run ends. Every mutation keeps
//! `total_steps == completed + failed + skipped` and recomputes `success`.

use serde::{Deserialize, Serialize};

use crate::core::types::{Plan, Step, StepResult};

/// Final report of a plan run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub total_steps: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// One entry per processed step, in plan order.
    pub step_results: Vec<StepResult>,
    /// First failure that was never resolved by retry or skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<Step>,
    pub aborted_by_user: bool,
    pub timeout_reached: bool,
    /// Synthesized auto-recovery steps. Not counted in the step counters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery_results: Vec<StepResult>,
    pub ports: Vec<u16>,
    pub notes: Vec<String>,
}

impl ExecutionResult {
    /// Empty result carrying the plan's informational fields.
    pub fn for_plan(plan: &Plan) -> Self {
        let mut result = Self {
            ports: plan.ports.clone(),
            notes: plan.notes.clone(),
            ..Self::default()
        };
        result.refresh_success();
        result
    }

    /// Record the first outcome of `step`.
    pub fn add_result(&mut self, step: &Step, result: StepResult) {
        self.total_steps += 1;
        if result.skipped {
            self.skipped += 1;
        } else if result.success {
            self.completed += 1;
        } else {
            self.failed += 1;
            if self.failed_step.is_none() {
                self.failed_step = Some(step.clone());
            }
        }
        self.step_results.push(result);
        self.refresh_success();
    }

    /// A retry of a failed step succeeded: failed → completed.
    pub fn resolve_retry_success(&mut self, step: &Step, result: StepResult) -> Result<(), String> {
        let index = self.failed_index(&step.id)?;
        self.step_results[index] = result;
        self.failed -= 1;
        self.completed += 1;
        self.clear_failed_step(&step.id);
        self.refresh_success();
        Ok(())
    }

    /// A failed step failed again: the newer result replaces the old one.
    pub fn replace_failure(&mut self, step: &Step, result: StepResult) -> Result<(), String> {
        let index = self.failed_index(&step.id)?;
        self.step_results[index] = result;
        Ok(())
    }

    /// A failed step was skipped by decision: failed → skipped.
    pub fn resolve_skip(&mut self, step: &Step, reason: &str) -> Result<(), String> {
        let index = self.failed_index(&step.id)?;
        let entry = &mut self.step_results[index];
        entry.skipped = true;
        entry.skip_reason = Some(reason.to_string());
        self.failed -= 1;
        self.skipped += 1;
        self.clear_failed_step(&step.id);
        self.refresh_success();
        Ok(())
    }

    pub fn record_recovery(&mut self, result: StepResult) {
        self.recovery_results.push(result);
    }

    pub fn mark_aborted(&mut self) {
        self.aborted_by_user = true;
        self.refresh_success();
    }

    /// The run-wide deadline elapsed. Also counts as an abort.
    pub fn mark_timeout_reached(&mut self) {
        self.timeout_reached = true;
        self.aborted_by_user = true;
        self.refresh_success();
    }

    /// Latest recorded result for `step_id`.
    pub fn result_for(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results
            .iter()
            .rev()
            .find(|result| result.step_id == step_id)
    }

    fn failed_index(&self, step_id: &str) -> Result<usize, String> {
        let index = self
            .step_results
            .iter()
            .rposition(|result| result.step_id == step_id)
            .ok_or_else(|| format!("no result recorded for step '{step_id}'"))?;
        if !self.step_results[index].is_failure() {
            return Err(format!("step '{step_id}' is not in a failed state"));
        }
        Ok(index)
    }

    fn clear_failed_step(&mut self, step_id: &str) {
        if self
            .failed_step
            .as_ref()
            .is_some_and(|failed| failed.id == step_id)
        {
            self.failed_step = None;
        }
    }

    fn refresh_success(&mut self) {
        self.success = self.failed == 0 && !self.aborted_by_user && !self.timeout_reached;
    }
}
