//! Plan, step and result types shared across the engine.
//!
//! These types are the stable contract between the planning pipeline (which
//! produces a [`Plan`]) and the reporting layer (which consumes a
//! [`StepResult`] list). Field names serialize in camelCase to match the plan
//! documents emitted upstream.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::core::error::StepError;

/// Declared risk of a step. Informational for the engine.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl FromStr for Risk {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "low" => Ok(Risk::Low),
            "medium" => Ok(Risk::Medium),
            "high" => Ok(Risk::High),
            "critical" => Ok(Risk::Critical),
            other => Err(format!("unknown risk level '{other}'")),
        }
    }
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Risk::Low => "low",
            Risk::Medium => "medium",
            Risk::High => "high",
            Risk::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Empty or missing risk strings mean `low`.
fn deserialize_risk<'de, D>(deserializer: D) -> Result<Risk, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(Risk::Low),
        Some(raw) => raw.parse().map_err(serde::de::Error::custom),
    }
}

/// Whether a run spawns processes or only reports what it would do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    DryRun,
    Execute,
}

/// One shell command with its execution metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique, non-empty identifier within the plan.
    pub id: String,
    /// Shell command line, run through the platform shell.
    pub cmd: String,
    /// Working directory relative to the runner's base directory. Empty means `.`.
    #[serde(default)]
    pub cwd: String,
    #[serde(default, deserialize_with = "deserialize_risk")]
    pub risk: Risk,
    #[serde(default)]
    pub requires_sudo: bool,
    /// Per-step timeout. Zero selects the runner default.
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cmd: cmd.into(),
            cwd: String::new(),
            risk: Risk::Low,
            requires_sudo: false,
            timeout_seconds: 0,
            description: None,
        }
    }

    /// Label used in prompts and logs: the description when present, else the command.
    pub fn label(&self) -> &str {
        match self.description.as_deref() {
            Some(description) if !description.trim().is_empty() => description,
            _ => &self.cmd,
        }
    }
}

/// Ordered list of steps plus metadata produced by the planning pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub project_type: String,
    /// Execution order is significant.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Plan-level environment; overrides config and process variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Outcome of one step attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl StepResult {
    /// A successful result with no captured output (dry runs, scripted tests).
    pub fn succeeded(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            success: true,
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// A skipped result. Skips are not failures, so `success` stays true.
    pub fn skipped(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            success: true,
            skipped: true,
            skip_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn failed(step_id: impl Into<String>, error: StepError) -> Self {
        Self {
            step_id: step_id.into(),
            exit_code: error.exit_code(),
            error: Some(error),
            ..Self::default()
        }
    }

    /// True when the step neither succeeded nor was skipped.
    pub fn is_failure(&self) -> bool {
        !self.success && !self.skipped
    }
}

/// Serialize durations as fractional seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
