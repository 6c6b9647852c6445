//! Unattended backups on a cron trigger.
//!
//! The scheduler owns at most one background task. Configuration is read
//! once per `start()`; edits take effect only through `restart()`.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use dbvault_core::{next_fire, BackupError, RetentionPolicy, ScheduleConfig};
use dbvault_storage::BackupManager;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Where the scheduler reads its configuration from.
pub trait ScheduleSource: Send + Sync {
    fn load(&self) -> anyhow::Result<ScheduleConfig>;
}

/// A fixed configuration, for one-shot modes and tests.
#[derive(Debug, Default)]
pub struct StaticSchedule(std::sync::Mutex<ScheduleConfig>);

impl StaticSchedule {
    pub fn new(config: ScheduleConfig) -> Self {
        Self(std::sync::Mutex::new(config))
    }

    /// Replaces the stored configuration. Takes effect on the next restart.
    pub fn set(&self, config: ScheduleConfig) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = config;
    }
}

impl ScheduleSource for StaticSchedule {
    fn load(&self) -> anyhow::Result<ScheduleConfig> {
        Ok(self.0.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    /// Not armed: stopped, never started, or disabled by configuration.
    Idle,
    Armed {
        expression: String,
        next_run: DateTime<Utc>,
    },
    /// A scheduled backup is in flight.
    Running,
}

struct Trigger {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Scheduler {
    manager: Arc<BackupManager>,
    source: Arc<dyn ScheduleSource>,
    state: Arc<watch::Sender<SchedulerState>>,
    trigger: Mutex<Option<Trigger>>,
}

impl Scheduler {
    pub fn new(manager: Arc<BackupManager>, source: Arc<dyn ScheduleSource>) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            manager,
            source,
            state: Arc::new(state),
            trigger: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state.borrow().clone()
    }

    /// The configuration as it currently reads from the source, which may
    /// differ from what the running trigger was armed with.
    pub fn current_config(&self) -> anyhow::Result<ScheduleConfig> {
        self.source.load()
    }

    /// Reads the configuration and arms the trigger. A disabled schedule
    /// leaves the scheduler idle and is not an error. Starting an already
    /// armed scheduler does nothing.
    pub async fn start(&self) -> Result<SchedulerState, BackupError> {
        let mut trigger = self.trigger.lock().await;
        if trigger.is_some() {
            return Ok(self.state());
        }

        let config = self
            .source
            .load()
            .map_err(|e| BackupError::InvalidConfig(format!("{e:#}")))?;
        if !config.enabled {
            info!("scheduled backups disabled");
            self.state.send_replace(SchedulerState::Idle);
            return Ok(SchedulerState::Idle);
        }

        let expression = config.cron_expression()?;
        let schedule = config.schedule()?;
        let next_run = next_fire(&schedule, &Local::now()).ok_or_else(|| {
            BackupError::InvalidSchedule(format!("{expression} never fires"))
        })?;
        let armed = SchedulerState::Armed {
            expression: expression.clone(),
            next_run: next_run.with_timezone(&Utc),
        };
        self.state.send_replace(armed.clone());

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(trigger_loop(
            self.manager.clone(),
            schedule,
            expression.clone(),
            config.retention(),
            self.state.clone(),
            shutdown_rx,
        ));
        *trigger = Some(Trigger { shutdown, task });
        info!(%expression, frequency = %config.frequency, %next_run, "scheduled backups armed");
        Ok(armed)
    }

    /// Disarms the trigger. A firing already in progress runs to completion
    /// before this returns.
    pub async fn stop(&self) {
        let Some(trigger) = self.trigger.lock().await.take() else {
            return;
        };
        let _ = trigger.shutdown.send(true);
        if let Err(e) = trigger.task.await {
            error!(error = %e, "scheduler task ended abnormally");
        }
        self.state.send_replace(SchedulerState::Idle);
        info!("scheduled backups stopped");
    }

    /// Stops, re-reads configuration, and re-arms.
    pub async fn restart(&self) -> Result<SchedulerState, BackupError> {
        self.stop().await;
        self.start().await
    }
}

async fn trigger_loop(
    manager: Arc<BackupManager>,
    schedule: cron::Schedule,
    expression: String,
    retention: Option<RetentionPolicy>,
    state: Arc<watch::Sender<SchedulerState>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let now = Local::now();
        let Some(next) = next_fire(&schedule, &now) else {
            warn!(%expression, "schedule has no future firings");
            state.send_replace(SchedulerState::Idle);
            return;
        };
        state.send_replace(SchedulerState::Armed {
            expression: expression.clone(),
            next_run: next.with_timezone(&Utc),
        });

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => return,
        }

        state.send_replace(SchedulerState::Running);
        info!(%expression, "scheduled backup starting");
        let run = manager.run_scheduled(retention).await;
        match (&run.archive, &run.error) {
            (Some(archive), None) => info!(
                filename = %archive.filename,
                deleted = run.retention.as_ref().map_or(0, |r| r.deleted.len()),
                "scheduled backup finished"
            ),
            (_, error) => error!(error = ?error, "scheduled backup failed"),
        }
    }
}
