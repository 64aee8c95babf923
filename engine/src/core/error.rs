//! Classified step failures.
//!
//! Step errors never escape the step executor as `Err`; they are recorded on the
//! [`StepResult`](crate::core::types::StepResult) and interpreted by the plan
//! runner.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a step did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StepError {
    /// Pipes could not be created or the shell could not be started.
    #[error("failed to launch command: {message}")]
    ProcessLaunch { message: String },
    #[error("command exited with code {code}")]
    NonZeroExit { code: i32 },
    /// The step's own deadline elapsed.
    #[error("step timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    /// The run-wide deadline elapsed.
    #[error("global timeout reached")]
    GlobalTimeout,
    #[error("cancelled")]
    Cancelled,
    #[error("aborted by user")]
    AbortedByUser,
    /// The synthesized recovery build failed; the original failure is kept.
    #[error("{original}\n[auto-recovery] `{build_cmd}` failed: {build_stderr}")]
    AutoRecoveryFailed {
        original: Box<StepError>,
        build_cmd: String,
        build_stderr: String,
    },
}

/// Fieldless discriminant of [`StepError`] for matching and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepErrorKind {
    ProcessLaunchFailure,
    NonZeroExit,
    Timeout,
    GlobalTimeout,
    Cancelled,
    AbortedByUser,
    AutoRecoveryFailed,
}

impl StepError {
    pub fn kind(&self) -> StepErrorKind {
        match self {
            StepError::ProcessLaunch { .. } => StepErrorKind::ProcessLaunchFailure,
            StepError::NonZeroExit { .. } => StepErrorKind::NonZeroExit,
            StepError::Timeout { .. } => StepErrorKind::Timeout,
            StepError::GlobalTimeout => StepErrorKind::GlobalTimeout,
            StepError::Cancelled => StepErrorKind::Cancelled,
            StepError::AbortedByUser => StepErrorKind::AbortedByUser,
            StepError::AutoRecoveryFailed { .. } => StepErrorKind::AutoRecoveryFailed,
        }
    }

    /// Errors that stop the whole run rather than just this step.
    pub fn halts_run(&self) -> bool {
        matches!(
            self,
            StepError::GlobalTimeout | StepError::Cancelled | StepError::AbortedByUser
        )
    }

    /// Exit code carried by the error, looking through recovery annotations.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            StepError::NonZeroExit { code } => Some(*code),
            StepError::AutoRecoveryFailed { original, .. } => original.exit_code(),
            _ => None,
        }
    }
}
