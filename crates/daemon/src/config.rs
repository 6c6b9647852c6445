use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dbvault_core::ScheduleConfig;
use dbvault_exec::{DatabaseTarget, ExecLimits, ToolPaths};
use serde::Deserialize;

use crate::scheduler::ScheduleSource;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseTarget,
    pub tools: ToolPaths,
    pub limits: ExecLimits,
    pub schedule: ScheduleConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub root: Option<String>,
    pub database_url: Option<String>,
    pub prefix: Option<String>,
    pub extension: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    pub api_token: Option<String>,
    pub csrf_token: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}

/// Re-reads the `[schedule]` section of a config file on every load.
#[derive(Debug, Clone)]
pub struct FileScheduleSource {
    path: PathBuf,
}

impl FileScheduleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScheduleSource for FileScheduleSource {
    fn load(&self) -> Result<ScheduleConfig> {
        Ok(load_config(&self.path)?.schedule)
    }
}
