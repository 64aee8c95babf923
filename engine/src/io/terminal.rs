//! Interactive sudo and failure gates on a line-oriented terminal.

use std::io::{self, BufRead, Stderr, StdinLock, Write};
use std::sync::{Mutex, MutexGuard};

use tracing::warn;

use crate::core::policy::{FailureDecision, FailurePolicy, SudoDecision, SudoPolicy};
use crate::core::types::{Step, StepResult};

/// Trailing stderr lines shown with a failure prompt.
const STDERR_TAIL_LINES: usize = 10;

const SUDO_CHOICES: &[(&str, SudoDecision, &str)] = &[
    ("y", SudoDecision::Allow, "run this step"),
    ("a", SudoDecision::AllowAll, "run all sudo steps"),
    ("m", SudoDecision::Manual, "I'll run it manually"),
    ("q", SudoDecision::Abort, "abort"),
];

const FAILURE_CHOICES: &[(&str, FailureDecision, &str)] = &[
    ("c", FailureDecision::Continue, "continue"),
    ("r", FailureDecision::Retry, "retry"),
    ("s", FailureDecision::Skip, "skip"),
    ("i", FailureDecision::AskAi, "ask for a fix"),
    ("q", FailureDecision::Abort, "abort"),
];

struct Io<R, W> {
    input: R,
    output: W,
}

/// Prompts on `output` and reads one-letter answers from `input`.
///
/// Unrecognized answers re-ask; end of input (or a read error) answers Abort.
pub struct TerminalPrompt<R, W> {
    io: Mutex<Io<R, W>>,
}

impl TerminalPrompt<StdinLock<'static>, Stderr> {
    /// Prompt on stderr, read from stdin.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            io: Mutex::new(Io { input, output }),
        }
    }

    /// Consume the prompt, returning its output sink.
    pub fn into_output(self) -> W {
        self.io
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .output
    }

    fn lock(&self) -> MutexGuard<'_, Io<R, W>> {
        self.io.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ask<D: Copy>(&self, header: &str, choices: &[(&str, D, &str)], abort: D) -> D {
        let mut io = self.lock();
        let menu = choices
            .iter()
            .map(|(key, _, label)| format!("[{key}] {label}"))
            .collect::<Vec<_>>()
            .join("  ");
        if let Err(err) = writeln!(io.output, "{header}") {
            warn!(err = %err, "failed to write prompt");
            return abort;
        }
        loop {
            if write!(io.output, "{menu}\n> ").and_then(|()| io.output.flush()).is_err() {
                return abort;
            }
            let mut answer = String::new();
            match io.input.read_line(&mut answer) {
                Ok(0) => return abort,
                Ok(_) => {}
                Err(err) => {
                    warn!(err = %err, "failed to read answer");
                    return abort;
                }
            }
            let answer = answer.trim().to_ascii_lowercase();
            if let Some((_, decision, _)) = choices.iter().find(|(key, _, _)| *key == answer) {
                return *decision;
            }
            if writeln!(io.output, "unrecognized answer {answer:?}").is_err() {
                return abort;
            }
        }
    }
}

impl<R: BufRead, W: Write> SudoPolicy for TerminalPrompt<R, W> {
    fn decide(&self, step: &Step) -> SudoDecision {
        let header = format!(
            "Step '{}' requires sudo ({} risk):\n  {}\n  $ {}",
            step.id,
            step.risk,
            step.label(),
            step.cmd
        );
        self.ask(&header, SUDO_CHOICES, SudoDecision::Abort)
    }
}

impl<R: BufRead, W: Write> FailurePolicy for TerminalPrompt<R, W> {
    fn decide(&self, step: &Step, result: &StepResult) -> FailureDecision {
        let mut header = format!("Step '{}' failed:\n  $ {}", step.id, step.cmd);
        if let Some(err) = &result.error {
            for line in err.to_string().lines() {
                header.push_str("\n  ");
                header.push_str(line);
            }
        }
        let lines: Vec<&str> = result.stderr.lines().collect();
        let tail = &lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..];
        if !tail.is_empty() {
            header.push_str("\n  stderr:");
            for line in tail {
                header.push_str("\n    ");
                header.push_str(line);
            }
        }
        self.ask(&header, FAILURE_CHOICES, FailureDecision::Abort)
    }
}
