//! Plan execution engine.
//!
//! Runs an ordered plan of shell steps that installs and starts a project:
//! each step in its own process group, bounded by per-step and run-wide
//! deadlines, gated by sudo consent, with deterministic recovery for known
//! failures and a pluggable failure policy for everything else.
//!
//! - **[`core`]**: Pure logic (types, timeouts, readiness and recovery tables,
//!   bookkeeping, policies). No I/O.
//! - **[`io`]**: Side effects (process groups, pipes, settings and plan files,
//!   terminal prompts).
//!
//! [`runner`] and [`step`] orchestrate the two; [`cancel`] carries run-wide
//! cancellation across threads.

pub mod cancel;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod report;
pub mod runner;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
