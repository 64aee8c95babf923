//! Stable exit codes for plan-engine CLI commands.

use crate::core::execution::ExecutionResult;

/// Plan valid, or every step completed or was skipped.
pub const OK: i32 = 0;
/// Plan, settings, or arguments could not be loaded or failed validation.
pub const INVALID: i32 = 1;
/// The run finished with at least one unresolved failed step.
pub const FAILED: i32 = 2;
/// The run was aborted by a decision, cancellation, or the global timeout.
pub const ABORTED: i32 = 3;

/// Exit code for a finished run.
pub fn for_report(report: &ExecutionResult) -> i32 {
    if report.aborted_by_user || report.timeout_reached {
        ABORTED
    } else if report.success {
        OK
    } else {
        FAILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_outranks_failure() {
        let mut report = ExecutionResult::default();
        assert_eq!(for_report(&report), OK);

        report.failed = 1;
        report.success = false;
        assert_eq!(for_report(&report), FAILED);

        report.mark_aborted();
        assert_eq!(for_report(&report), ABORTED);
    }
}
