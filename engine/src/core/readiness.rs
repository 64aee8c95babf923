//! Readiness detection for long-running foreground server steps.
//!
//! A step named `run` typically starts a dev or production server that never
//! exits on its own. When its output announces the server is up, the executor
//! stops the process group and reports success instead of waiting for the
//! timeout.

use serde::{Deserialize, Serialize};

/// Which steps are watched and which substrings mark readiness.
///
/// A line is a readiness marker when it contains every entry of `markers`,
/// compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessProbe {
    /// Step ids (case-insensitive) whose output is scanned.
    pub step_ids: Vec<String>,
    /// Substrings that must all appear in one line.
    pub markers: Vec<String>,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self {
            step_ids: vec!["run".to_string()],
            markers: vec!["ready".to_string(), "started server".to_string()],
        }
    }
}

impl ReadinessProbe {
    /// A probe that never fires.
    pub fn disabled() -> Self {
        Self {
            step_ids: Vec::new(),
            markers: Vec::new(),
        }
    }

    pub fn applies_to(&self, step_id: &str) -> bool {
        !self.markers.is_empty()
            && self
                .step_ids
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(step_id))
    }

    pub fn matches(&self, line: &str) -> bool {
        if self.markers.is_empty() {
            return false;
        }
        let line = line.to_lowercase();
        self.markers
            .iter()
            .all(|marker| line.contains(&marker.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_only_to_run_steps() {
        let probe = ReadinessProbe::default();
        assert!(probe.applies_to("run"));
        assert!(probe.applies_to("RUN"));
        assert!(!probe.applies_to("run-tests"));
        assert!(!probe.applies_to("start"));
    }

    #[test]
    fn matches_next_style_banner() {
        let probe = ReadinessProbe::default();
        assert!(probe.matches("ready - started server on 0.0.0.0:3000, url: http://localhost:3000"));
        assert!(probe.matches("READY: Started Server"));
    }

    #[test]
    fn requires_every_marker() {
        let probe = ReadinessProbe::default();
        assert!(!probe.matches("ready"));
        assert!(!probe.matches("started server"));
        assert!(!probe.matches("compiling..."));
    }

    #[test]
    fn disabled_probe_never_fires() {
        let probe = ReadinessProbe::disabled();
        assert!(!probe.applies_to("run"));
        assert!(!probe.matches("ready - started server"));
    }
}
