//! Step timeout resolution and run-wide deadline helpers.

use std::time::{Duration, Instant};

/// Used when neither the step nor the runner specifies a timeout.
pub const FALLBACK_STEP_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Upper bound for per-step timeouts. Larger requests are clamped, not rejected.
pub const MAX_STEP_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Resolve the timeout for a step.
///
/// - `step_timeout_secs > 0`: that value, clamped to [`MAX_STEP_TIMEOUT`].
/// - otherwise the runner default when it is non-zero, clamped the same way.
/// - otherwise [`FALLBACK_STEP_TIMEOUT`].
pub fn effective_timeout(step_timeout_secs: u64, runner_default: Duration) -> Duration {
    if step_timeout_secs > 0 {
        return Duration::from_secs(step_timeout_secs).min(MAX_STEP_TIMEOUT);
    }
    if !runner_default.is_zero() {
        return runner_default.min(MAX_STEP_TIMEOUT);
    }
    FALLBACK_STEP_TIMEOUT
}

/// Deadline for the whole run.
///
/// A zero timeout means unbounded, and so does one too large to represent as
/// an `Instant`.
pub fn run_deadline(started: Instant, global_timeout: Duration) -> Option<Instant> {
    if global_timeout.is_zero() {
        None
    } else {
        started.checked_add(global_timeout)
    }
}

/// True once `deadline` has passed.
pub fn deadline_passed(deadline: Option<Instant>, now: Instant) -> bool {
    deadline.is_some_and(|deadline| now >= deadline)
}
