//! Working-directory normalization for steps.

use std::path::{Path, PathBuf};

/// Normalize a step `cwd`: empty or whitespace-only means the base directory (`.`).
pub fn normalize_cwd(cwd: &str) -> &str {
    let trimmed = cwd.trim();
    if trimmed.is_empty() { "." } else { trimmed }
}

/// Resolve a step `cwd` against the runner's base working directory.
///
/// `.` resolves to `base` itself so that logs show the base path rather than `base/.`.
pub fn resolve_workdir(base: &Path, cwd: &str) -> PathBuf {
    match normalize_cwd(cwd) {
        "." => base.to_path_buf(),
        relative => base.join(relative),
    }
}
