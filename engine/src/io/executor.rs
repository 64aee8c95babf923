//! Step execution backends.
//!
//! The [`StepRunner`] trait decouples plan orchestration from process handling.
//! [`ShellRunner`] launches the command in its own process group and races its
//! exit against the step timeout, the run deadline, cancellation, and the
//! readiness probe. Tests substitute scripted runners that never spawn.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::budget::deadline_passed;
use crate::core::error::StepError;
use crate::core::readiness::ReadinessProbe;
use crate::core::types::{Step, StepResult};
use crate::io::process::{ProcessGroup, spawn_group};
use crate::io::stream::{LineHook, LineSink, StreamDrain, StreamKind};

/// How long output readers and the exit waiter get once the group is killed.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A fully resolved step, ready to run.
pub struct StepRequest<'a> {
    pub step: &'a Step,
    /// Absolute or base-relative directory the command runs in.
    pub workdir: PathBuf,
    pub timeout: Duration,
    /// Complete environment of the child process.
    pub env: &'a BTreeMap<String, String>,
    /// Run-wide deadline, if the run has one.
    pub run_deadline: Option<Instant>,
    pub cancel: &'a CancelToken,
    /// Set only when the probe applies to this step.
    pub readiness: Option<&'a ReadinessProbe>,
    /// Live mirror for output lines.
    pub output: Option<&'a LineSink>,
}

/// Abstraction over step execution backends.
pub trait StepRunner {
    /// Run one step to completion. Failures are reported in the result, never as panics.
    fn run(&self, request: &StepRequest<'_>) -> StepResult;
}

/// Runs steps through the platform shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

enum Event {
    Exited(io::Result<ExitStatus>),
    Ready,
    Cancelled,
}

enum Outcome {
    Exited(io::Result<ExitStatus>),
    Ready,
    Cancelled,
    TimedOut,
    GlobalTimeout,
    Lost,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    fn race(&self, events: &Receiver<Event>, started: Instant, request: &StepRequest<'_>) -> Outcome {
        // A timeout too large for an `Instant` never expires.
        let step_deadline = started.checked_add(request.timeout);
        let (deadline, expiry) = match (request.run_deadline, step_deadline) {
            (Some(run), Some(step)) if run < step => (Some(run), Outcome::GlobalTimeout),
            (Some(run), None) => (Some(run), Outcome::GlobalTimeout),
            (_, step) => (step, Outcome::TimedOut),
        };
        let received = match deadline {
            Some(deadline) => events.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => events.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(Event::Exited(status)) => Outcome::Exited(status),
            Ok(Event::Ready) => Outcome::Ready,
            Ok(Event::Cancelled) => Outcome::Cancelled,
            Err(RecvTimeoutError::Timeout) => expiry,
            Err(RecvTimeoutError::Disconnected) => Outcome::Lost,
        }
    }

    fn terminate(&self, group: &ProcessGroup) {
        if let Err(err) = group.kill() {
            warn!(pid = group.leader_pid(), err = %err, "failed to kill step process group");
        }
    }

    /// Wait for the exit event after a kill so the child is reaped.
    fn await_exit(&self, events: &Receiver<Event>) {
        let deadline = Instant::now() + DRAIN_GRACE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(remaining) {
                Ok(Event::Exited(_)) => return,
                Ok(_) => continue,
                Err(_) => {
                    warn!(grace_ms = DRAIN_GRACE.as_millis(), "step process did not exit after kill");
                    return;
                }
            }
        }
    }
}

impl StepRunner for ShellRunner {
    #[instrument(skip_all, fields(step_id = %request.step.id, timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &StepRequest<'_>) -> StepResult {
        let started = Instant::now();
        let step_id = request.step.id.as_str();

        if request.cancel.is_cancelled() {
            return halted(step_id, StepError::Cancelled);
        }
        if deadline_passed(request.run_deadline, started) {
            return halted(step_id, StepError::GlobalTimeout);
        }

        info!(cmd = %request.step.cmd, workdir = %request.workdir.display(), "starting step");
        let (mut child, group) = match spawn_group(&request.step.cmd, &request.workdir, request.env) {
            Ok(spawned) => spawned,
            Err(err) => {
                return StepResult {
                    duration: started.elapsed(),
                    ..StepResult::failed(step_id, StepError::ProcessLaunch { message: format!("{err:#}") })
                };
            }
        };
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            self.terminate(&group);
            let _ = group.reap(&mut child);
            let message = "output pipes were not captured".to_string();
            return StepResult::failed(step_id, StepError::ProcessLaunch { message });
        };

        let (events_tx, events) = mpsc::channel();
        let mut stdout_drain = StreamDrain::spawn(
            stdout,
            StreamKind::Stdout,
            request.output.cloned(),
            readiness_hook(request, &events_tx),
        );
        let mut stderr_drain = StreamDrain::spawn(
            stderr,
            StreamKind::Stderr,
            request.output.cloned(),
            readiness_hook(request, &events_tx),
        );
        let exit_tx = events_tx.clone();
        let reaper = group.clone();
        thread::spawn(move || {
            let _ = exit_tx.send(Event::Exited(reaper.reap(&mut child)));
        });
        let _watch = request.cancel.watch(move || {
            let _ = events_tx.send(Event::Cancelled);
        });

        let outcome = self.race(&events, started, request);
        // Nothing started by the step may outlive it. After a natural exit the
        // waiter already killed the group before reaping, and this is a no-op.
        self.terminate(&group);
        if !matches!(outcome, Outcome::Exited(_)) {
            self.await_exit(&events);
        }
        stdout_drain.wait(DRAIN_GRACE);
        stderr_drain.wait(DRAIN_GRACE);

        let result = StepResult {
            duration: started.elapsed(),
            stdout: stdout_drain.text(),
            stderr: stderr_drain.text(),
            ..classify(step_id, outcome, request.timeout)
        };
        match &result.error {
            None => debug!(duration_ms = result.duration.as_millis(), "step succeeded"),
            Some(err) => warn!(err = %err, duration_ms = result.duration.as_millis(), "step failed"),
        }
        result
    }
}

fn readiness_hook(request: &StepRequest<'_>, events: &Sender<Event>) -> Option<LineHook> {
    let probe = request.readiness?.clone();
    let events = events.clone();
    let mut fired = false;
    Some(Box::new(move |line: &str| {
        if !fired && probe.matches(line) {
            fired = true;
            info!(line, "readiness marker seen, stopping server step");
            let _ = events.send(Event::Ready);
        }
    }))
}

fn halted(step_id: &str, error: StepError) -> StepResult {
    StepResult {
        cancelled: true,
        ..StepResult::failed(step_id, error)
    }
}

fn classify(step_id: &str, outcome: Outcome, timeout: Duration) -> StepResult {
    match outcome {
        Outcome::Exited(Ok(status)) if status.success() => StepResult::succeeded(step_id),
        // Signal deaths carry no exit code.
        Outcome::Exited(Ok(status)) => StepResult::failed(
            step_id,
            StepError::NonZeroExit {
                code: status.code().unwrap_or(-1),
            },
        ),
        Outcome::Exited(Err(err)) => StepResult::failed(
            step_id,
            StepError::ProcessLaunch {
                message: format!("wait for command: {err}"),
            },
        ),
        Outcome::Ready => StepResult::succeeded(step_id),
        Outcome::TimedOut => StepResult::failed(
            step_id,
            StepError::Timeout {
                timeout_secs: timeout.as_secs(),
            },
        ),
        Outcome::GlobalTimeout => halted(step_id, StepError::GlobalTimeout),
        Outcome::Cancelled => halted(step_id, StepError::Cancelled),
        Outcome::Lost => StepResult::failed(
            step_id,
            StepError::ProcessLaunch {
                message: "lost track of the step process".to_string(),
            },
        ),
    }
}
