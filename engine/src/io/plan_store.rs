//! Plan and report load/save helpers with invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::execution::ExecutionResult;
use crate::core::invariants::validate_plan;
use crate::core::types::Plan;
use crate::io::config::write_atomic;

/// Load a plan document (JSON) and check its structural invariants.
pub fn load_plan(plan_path: &Path) -> Result<Plan> {
    let contents = fs::read_to_string(plan_path)
        .with_context(|| format!("read plan {}", plan_path.display()))?;
    let plan: Plan = serde_json::from_str(&contents)
        .with_context(|| format!("parse plan {}", plan_path.display()))?;
    ensure_valid(&plan)?;
    Ok(plan)
}

/// Write a plan as pretty JSON.
pub fn write_plan(plan_path: &Path, plan: &Plan) -> Result<()> {
    ensure_valid(plan)?;
    let mut buf = serde_json::to_string_pretty(plan).context("serialize plan")?;
    buf.push('\n');
    write_atomic(plan_path, &buf)
}

/// Write an execution report as pretty JSON.
pub fn write_report(report_path: &Path, report: &ExecutionResult) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(report).context("serialize report")?;
    buf.push('\n');
    write_atomic(report_path, &buf)
}

fn ensure_valid(plan: &Plan) -> Result<()> {
    let errors = validate_plan(plan);
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("plan invariants failed: {}", errors.join("; ")))
}
