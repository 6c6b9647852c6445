pub mod config;
pub mod scheduler;
pub mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use dbvault_core::FilenameCodec;
use dbvault_exec::{DumpExecutor, ProcessRunner, RestoreExecutor};
use dbvault_storage::{open_audit_log, ArchiveStore, BackupManager};

pub use scheduler::{ScheduleSource, Scheduler, SchedulerState, StaticSchedule};
pub use server::{build_router, AppState};

use config::Config;

/// Storage layout under the data root.
pub struct Layout {
    pub backups: PathBuf,
    pub state: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            backups: root.join("backups"),
            state: root.join("state"),
        }
    }
}

/// Wires a manager from configuration around the given process runner.
pub async fn build_manager(
    cfg: &Config,
    layout: &Layout,
    database_url: Option<&str>,
    runner: Arc<dyn ProcessRunner>,
) -> Result<BackupManager> {
    let defaults = FilenameCodec::default();
    let codec = FilenameCodec::new(
        cfg.storage
            .prefix
            .clone()
            .unwrap_or_else(|| defaults.prefix().to_owned()),
        cfg.storage
            .extension
            .clone()
            .unwrap_or_else(|| defaults.extension().to_owned()),
    );
    let store = ArchiveStore::new(&layout.backups, codec)?;
    let audit = open_audit_log(&layout.state, database_url).await?;
    let dumper = DumpExecutor::new(
        runner.clone(),
        cfg.database.clone(),
        cfg.tools.clone(),
        cfg.limits.clone(),
    );
    let restorer = RestoreExecutor::new(
        runner,
        cfg.database.clone(),
        cfg.tools.clone(),
        cfg.limits.clone(),
    );
    Ok(BackupManager::new(store, dumper, restorer, audit))
}
