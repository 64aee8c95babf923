//! Plain-text run summary printed by the CLI.

use std::fmt::Write as _;

use crate::core::execution::ExecutionResult;

/// Render a human-readable summary of `report`.
pub fn render_summary(report: &ExecutionResult) -> String {
    let mut out = String::new();
    let status = if report.timeout_reached {
        "timed out"
    } else if report.aborted_by_user {
        "aborted"
    } else if report.success {
        "success"
    } else {
        "failed"
    };
    let _ = writeln!(out, "Plan finished: {status}");
    let _ = writeln!(
        out,
        "  steps: {} run, {} completed, {} failed, {} skipped",
        report.total_steps, report.completed, report.failed, report.skipped
    );

    for result in &report.step_results {
        let marker = if result.skipped {
            "skip"
        } else if result.success {
            " ok "
        } else {
            "FAIL"
        };
        let _ = write!(out, "  [{marker}] {} ({:.1}s)", result.step_id, result.duration.as_secs_f64());
        if let Some(reason) = &result.skip_reason {
            let _ = write!(out, ": {reason}");
        } else if let Some(err) = &result.error {
            let first = err.to_string();
            let _ = write!(out, ": {}", first.lines().next().unwrap_or_default());
        }
        out.push('\n');
    }

    for result in &report.recovery_results {
        let outcome = if result.success { "ok" } else { "failed" };
        let _ = writeln!(out, "  auto-recovery {}: {outcome}", result.step_id);
    }

    if let Some(step) = &report.failed_step {
        let _ = writeln!(out, "  first failure: {} (`{}`)", step.id, step.cmd);
    }
    if !report.ports.is_empty() {
        let ports = report
            .ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "  ports: {ports}");
    }
    if !report.notes.is_empty() {
        out.push_str("  notes:\n");
        for note in &report.notes {
            let _ = writeln!(out, "    - {note}");
        }
    }
    out
}
