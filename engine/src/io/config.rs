//! Engine settings stored as TOML, usually next to the plan as `plan-engine.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::MAX_STEP_TIMEOUT;
use crate::core::readiness::ReadinessProbe;
use crate::core::types::Mode;
use crate::runner::RunnerConfig;

/// File name looked up in the working directory when no `--config` is given.
pub const DEFAULT_SETTINGS_FILE: &str = "plan-engine.toml";

/// Engine settings (TOML).
///
/// Meant to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    /// Default timeout for steps that do not set `timeoutSeconds`.
    pub step_timeout_secs: u64,

    /// Budget for the whole run. Zero means unbounded.
    pub global_timeout_secs: u64,

    /// Never prompt on failure; failed steps stay failed and the run continues.
    pub auto_yes: bool,

    /// Run sudo steps without asking.
    pub allow_sudo: bool,

    /// Mirror step output to the terminal while it runs.
    pub stream_output: bool,

    /// Variables layered over the inherited process environment.
    pub environment: BTreeMap<String, String>,

    pub readiness: ReadinessProbe,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            step_timeout_secs: 10 * 60,
            global_timeout_secs: 0,
            auto_yes: false,
            allow_sudo: false,
            stream_output: true,
            environment: BTreeMap::new(),
            readiness: ReadinessProbe::default(),
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<()> {
        if self.step_timeout_secs == 0 {
            return Err(anyhow!("step_timeout_secs must be > 0"));
        }
        if self.step_timeout_secs > MAX_STEP_TIMEOUT.as_secs() {
            return Err(anyhow!(
                "step_timeout_secs must be <= {}",
                MAX_STEP_TIMEOUT.as_secs()
            ));
        }
        for key in self.environment.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(anyhow!("environment key {key:?} is not a valid variable name"));
            }
        }
        if self.readiness.step_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(anyhow!("readiness.step_ids must not contain empty ids"));
        }
        if self.readiness.markers.iter().any(|marker| marker.trim().is_empty()) {
            return Err(anyhow!("readiness.markers must not contain empty markers"));
        }
        Ok(())
    }

    /// Runtime configuration for a run rooted at `working_dir`.
    pub fn into_runner_config(self, mode: Mode, working_dir: PathBuf) -> RunnerConfig {
        RunnerConfig {
            mode,
            working_dir,
            environment: self.environment,
            auto_yes: self.auto_yes,
            allow_sudo: self.allow_sudo,
            step_timeout: Duration::from_secs(self.step_timeout_secs),
            global_timeout: Duration::from_secs(self.global_timeout_secs),
            readiness: self.readiness,
            ..RunnerConfig::default()
        }
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `EngineSettings::default()`.
pub fn load_settings(path: &Path) -> Result<EngineSettings> {
    if !path.exists() {
        let settings = EngineSettings::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: EngineSettings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings
        .validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(settings)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn full_file_loads_every_field() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("plan-engine.toml");
        fs::write(
            &path,
            "step_timeout_secs = 90\nglobal_timeout_secs = 900\nallow_sudo = true\nstream_output = false\n\n[environment]\nNODE_ENV = \"production\"\n",
        )
        .expect("write");

        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.step_timeout_secs, 90);
        assert_eq!(settings.global_timeout_secs, 900);
        assert!(settings.allow_sudo);
        assert!(!settings.stream_output);
        assert!(!settings.auto_yes);
        assert_eq!(settings.environment["NODE_ENV"], "production");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("plan-engine.toml");
        fs::write(
            &path,
            "auto_yes = true\n\n[readiness]\nmarkers = [\"listening on\"]\n",
        )
        .expect("write");

        let settings = load_settings(&path).expect("load");
        assert!(settings.auto_yes);
        assert_eq!(settings.step_timeout_secs, 600);
        assert_eq!(settings.readiness.step_ids, vec!["run".to_string()]);
        assert_eq!(settings.readiness.markers, vec!["listening on".to_string()]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut settings = EngineSettings {
            step_timeout_secs: 0,
            ..EngineSettings::default()
        };
        assert!(settings.validate().is_err());

        settings.step_timeout_secs = 2 * 60 * 60;
        assert!(settings.validate().is_err());

        settings.step_timeout_secs = 60;
        settings.environment.insert("A=B".to_string(), "x".to_string());
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("not a valid variable name"));
    }

    #[test]
    fn into_runner_config_carries_values() {
        let settings = EngineSettings {
            step_timeout_secs: 30,
            global_timeout_secs: 120,
            allow_sudo: true,
            ..EngineSettings::default()
        };
        let config = settings.into_runner_config(Mode::Execute, PathBuf::from("/srv/app"));
        assert_eq!(config.mode, Mode::Execute);
        assert_eq!(config.working_dir, PathBuf::from("/srv/app"));
        assert_eq!(config.step_timeout, Duration::from_secs(30));
        assert_eq!(config.global_timeout, Duration::from_secs(120));
        assert!(config.allow_sudo);
        assert!(!config.auto_yes);
    }
}
