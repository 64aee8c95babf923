//! Structural checks for plans and execution reports.

use std::collections::HashSet;

use crate::core::execution::ExecutionResult;
use crate::core::types::Plan;

/// Check the preconditions the engine relies on:
/// - Step ids are non-empty and unique
/// - Step commands are non-empty
///
/// Risk and sudo flags are taken as given.
pub fn validate_plan(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for (index, step) in plan.steps.iter().enumerate() {
        let position = index + 1;
        if step.id.trim().is_empty() {
            errors.push(format!("step #{position}: id must be non-empty"));
        } else if !seen.insert(step.id.as_str()) {
            errors.push(format!("step #{position}: duplicate id '{}'", step.id));
        }
        if step.cmd.trim().is_empty() {
            errors.push(format!("step #{position} ('{}'): cmd must be non-empty", step.id));
        }
    }
    errors
}

/// Check counter invariants of an execution report:
/// - `total_steps == completed + failed + skipped`
/// - counters agree with the recorded step results
/// - `success` is true exactly when nothing failed and the run did not abort
pub fn validate_counters(result: &ExecutionResult) -> Vec<String> {
    let mut errors = Vec::new();

    let sum = result.completed + result.failed + result.skipped;
    if result.total_steps != sum {
        errors.push(format!(
            "total_steps {} != completed {} + failed {} + skipped {}",
            result.total_steps, result.completed, result.failed, result.skipped
        ));
    }

    if result.step_results.len() != result.total_steps {
        errors.push(format!(
            "{} step results recorded for total_steps {}",
            result.step_results.len(),
            result.total_steps
        ));
    }

    let skipped = result.step_results.iter().filter(|r| r.skipped).count();
    let failed = result.step_results.iter().filter(|r| r.is_failure()).count();
    let completed = result.step_results.len() - skipped - failed;
    if (completed, failed, skipped) != (result.completed, result.failed, result.skipped) {
        errors.push(format!(
            "step results tally completed={completed} failed={failed} skipped={skipped} \
             but counters say completed={} failed={} skipped={}",
            result.completed, result.failed, result.skipped
        ));
    }

    let expected_success = result.failed == 0 && !result.aborted_by_user && !result.timeout_reached;
    if result.success != expected_success {
        errors.push(format!(
            "success is {} but failed={} aborted_by_user={} timeout_reached={}",
            result.success, result.failed, result.aborted_by_user, result.timeout_reached
        ));
    }

    if result.failed == 0 && result.failed_step.is_some() {
        errors.push("failed_step set while no step is failed".to_string());
    }

    errors
}
