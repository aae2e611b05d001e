//! Application configuration.
//!
//! Layers, lowest first: built-in defaults, an optional TOML file, environment
//! variables, then command-line flags (applied by the binary).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::align::{AlignerConfig, Geometry};
use crate::logging::LoggingConfig;
use crate::pipeline::PipelineConfig;
use crate::scheduler::SchedulerConfig;
use crate::{Error, Result};

/// Installation root of the aligner.
pub const ENV_MARKERFREE_HOME: &str = "MARKERFREE_HOME";
/// Shell snippet that activates the aligner's environment.
pub const ENV_MARKERFREE_ENV_ACTIVATION: &str = "MARKERFREE_ENV_ACTIVATION";
/// Root of the per-item work directories.
pub const ENV_WORK_DIR: &str = "TSALIGN_WORK_DIR";

const DEFAULT_PROJECTIONS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub aligner: AlignerConfig,
    #[serde(default)]
    pub geometry: Geometry,
    /// Projections used in the projection matching phase.
    #[serde(default = "default_projections")]
    pub projections: u32,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_projections() -> u32 {
    DEFAULT_PROJECTIONS
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            aligner: AlignerConfig::default(),
            geometry: Geometry::default(),
            projections: DEFAULT_PROJECTIONS,
            work_dir: default_work_dir(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&text)?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config(format!("invalid config: {e}")))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(format!("cannot serialize config: {e}")))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(home) = get(ENV_MARKERFREE_HOME) {
            self.aligner.home = Some(PathBuf::from(home));
        }
        if let Some(activation) = get(ENV_MARKERFREE_ENV_ACTIVATION) {
            self.aligner.env_activation = Some(activation);
        }
        if let Some(dir) = get(ENV_WORK_DIR) {
            self.work_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_workers == 0 {
            return Err(Error::config("scheduler.max_workers must be at least 1"));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(Error::config("scheduler.poll_interval_ms must be positive"));
        }
        if self.projections == 0 {
            return Err(Error::config("projections must be at least 1"));
        }
        if self.aligner.program.trim().is_empty() {
            return Err(Error::config("aligner.program must not be empty"));
        }
        if self.logging.retention_days < 1 {
            return Err(Error::config("logging.retention_days must be at least 1"));
        }
        Ok(())
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            work_dir: self.work_dir.clone(),
            geometry: self.geometry.clone(),
            projections: self.projections,
        }
    }
}
