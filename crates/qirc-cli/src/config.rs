//! CLI configuration.
//!
//! Precedence, lowest to highest:
//! 1. built-in defaults
//! 2. YAML file (`--config PATH`, else `<config_dir>/qirc/config.yaml` if present)
//! 3. `QIRC_PROFILE` / `QIRC_TIMEOUT_MS` and command-line flags

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use qirc_compile::TargetProfile;
use qirc_worker::{DEFAULT_DEADLINE_MS, WorkerCommand};

/// Settings for `qirc compile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QircConfig {
    pub profile: TargetProfile,
    pub timeout_ms: u64,
    /// Worker executable. Defaults to this binary's hidden `worker` subcommand.
    pub worker_program: Option<PathBuf>,
}

impl Default for QircConfig {
    fn default() -> Self {
        Self {
            profile: TargetProfile::default(),
            timeout_ms: DEFAULT_DEADLINE_MS,
            worker_program: None,
        }
    }
}

impl QircConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml_ng::from_str(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// `<config_dir>/qirc/config.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("qirc").join("config.yaml"))
    }

    /// Load the explicit file, or the default file if it exists, or defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Apply values given on the command line or through the environment.
    #[must_use]
    pub fn with_overrides(mut self, profile: Option<TargetProfile>, timeout_ms: Option<u64>) -> Self {
        if let Some(profile) = profile {
            self.profile = profile;
        }
        if let Some(timeout_ms) = timeout_ms {
            self.timeout_ms = timeout_ms;
        }
        self
    }

    pub fn worker_command(&self) -> Result<WorkerCommand> {
        match &self.worker_program {
            Some(program) => Ok(WorkerCommand::new(program)),
            None => WorkerCommand::current_exe("worker").context("Could not locate the qirc executable"),
        }
    }
}
