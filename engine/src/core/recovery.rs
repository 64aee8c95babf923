//! Deterministic auto-recovery for recognized failure signatures.
//!
//! The only built-in class is "started a production server without building
//! first": a `start` invocation of a JavaScript package manager or of the Next.js
//! binary that fails because no production build exists. The resolver
//! synthesizes the matching build step; the plan runner executes it and retries
//! the original step once if the build succeeds.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{Step, StepResult};

/// Suffix appended to the original step id for synthesized build steps.
pub const AUTO_BUILD_SUFFIX: &str = "-auto-build";

/// One start-without-build rule.
#[derive(Debug, Clone)]
pub struct RecoveryRule {
    pub name: String,
    /// Matches the failing step's command. Capture groups feed `build`.
    pub start: Regex,
    /// Any match in stdout or stderr marks the failure as recoverable.
    pub signatures: Vec<Regex>,
    /// Build command template, expanded with `start` captures (`$1`, `${name}`).
    pub build: String,
}

impl RecoveryRule {
    /// Build command for `cmd`, or `None` when the rule does not apply.
    fn build_command(&self, cmd: &str, output: &str) -> Option<String> {
        let captures = self.start.captures(cmd)?;
        if !self.signatures.iter().any(|signature| signature.is_match(output)) {
            return None;
        }
        let mut build = String::new();
        captures.expand(&self.build, &mut build);
        Some(build)
    }
}

static MISSING_BUILD_SIGNATURES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)could not find a production build",
        r"(?i)production build[^\n]*(not found|missing|does not exist)",
        r"(?i)run\s+`?next build`?\s+before",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("valid missing-build signature"))
    .collect()
});

static BUILTIN_RULES: LazyLock<Vec<RecoveryRule>> = LazyLock::new(|| {
    [
        ("npm", r"(?i)^\s*npm\s+(?:run\s+)?start\b", "npm run build"),
        ("yarn", r"(?i)^\s*yarn\s+(?:run\s+)?start\b", "yarn build"),
        ("pnpm", r"(?i)^\s*pnpm\s+(?:run\s+)?start\b", "pnpm run build"),
        ("bun", r"(?i)^\s*bun\s+(?:run\s+)?start\b", "bun run build"),
        ("next", r"(?i)^\s*((?:npx\s+)?next)\s+start\b", "${1} build"),
    ]
    .into_iter()
    .map(|(name, start, build)| RecoveryRule {
        name: name.to_string(),
        start: Regex::new(start).expect("valid start pattern"),
        signatures: MISSING_BUILD_SIGNATURES.clone(),
        build: build.to_string(),
    })
    .collect()
});

/// Ordered rule table; the first matching rule wins.
#[derive(Debug, Clone)]
pub struct RecoveryRules {
    rules: Vec<RecoveryRule>,
}

impl Default for RecoveryRules {
    fn default() -> Self {
        Self {
            rules: BUILTIN_RULES.clone(),
        }
    }
}

impl RecoveryRules {
    pub fn new(rules: Vec<RecoveryRule>) -> Self {
        Self { rules }
    }

    /// A table that never recovers anything.
    pub fn none() -> Self {
        Self { rules: Vec::new() }
    }

    /// Synthesize the corrective build step for a failed `step`, if any rule applies.
    ///
    /// Successful, skipped, and cancelled results never trigger recovery.
    pub fn resolve(&self, step: &Step, result: &StepResult) -> Option<Step> {
        if !result.is_failure() || result.cancelled {
            return None;
        }
        let output = format!("{}\n{}", result.stderr, result.stdout);
        self.rules.iter().find_map(|rule| {
            let build = rule.build_command(&step.cmd, &output)?;
            Some(Step {
                id: format!("{}{AUTO_BUILD_SUFFIX}", step.id),
                cmd: build,
                cwd: step.cwd.clone(),
                risk: Default::default(),
                requires_sudo: false,
                timeout_seconds: step.timeout_seconds,
                description: Some(format!("Build before retrying '{}' ({})", step.id, rule.name)),
            })
        })
    }
}
