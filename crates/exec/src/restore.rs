use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use dbvault_core::{Archive, BackupError, RestoreOperation, RestoreOutcome, RestoreProgress, Result};
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

use crate::runner::ProcessRunner;
use crate::target::{DatabaseTarget, ExecLimits, ToolPaths};

/// Progress sink invoked on every phase transition, `Failed` included.
pub type ProgressFn<'a> = dyn Fn(RestoreProgress) + Send + Sync + 'a;

/// Drives the drop / recreate / load / verify sequence against the target
/// database. There is no rollback: once `Dropping` starts, recovery means
/// restoring the safety backup.
#[derive(Clone)]
pub struct RestoreExecutor {
    runner: Arc<dyn ProcessRunner>,
    target: DatabaseTarget,
    tools: ToolPaths,
    limits: ExecLimits,
}

impl RestoreExecutor {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        target: DatabaseTarget,
        tools: ToolPaths,
        limits: ExecLimits,
    ) -> Self {
        Self {
            runner,
            target,
            tools,
            limits,
        }
    }

    /// Restores `target` from `archive_path`.
    ///
    /// `safety_backup` runs first and must return the archive it wrote; if it
    /// fails the database is never touched.
    pub async fn run<F, Fut>(
        &self,
        target: Archive,
        archive_path: &Path,
        safety_backup: F,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> Result<RestoreOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Archive>>,
    {
        let started = Instant::now();
        let mut op = RestoreOperation::new(target);
        self.target.validate()?;
        report(&op, on_progress);

        match safety_backup().await {
            Ok(safety) => {
                info!(safety_backup = %safety.filename, "safety backup written");
                op.safety_archive = Some(safety);
            }
            Err(e) => {
                op.fail(&e);
                report(&op, on_progress);
                error!(archive = %op.target.filename, error = %e, "safety backup failed, restore aborted");
                return Err(BackupError::SafetyBackup(Box::new(e)));
            }
        }

        op.advance();
        report(&op, on_progress);
        let content = match self.read_archive(&op.target, archive_path).await {
            Ok(content) => content,
            Err(e) => return Err(abort(&mut op, e, on_progress)),
        };

        op.advance();
        report(&op, on_progress);
        if let Err(e) = self.drop_and_recreate().await {
            return Err(abort(&mut op, e, on_progress));
        }

        op.advance();
        report(&op, on_progress);
        if let Err(e) = self.load(content).await {
            return Err(abort(&mut op, e, on_progress));
        }

        op.advance();
        report(&op, on_progress);
        let tables = match self.count_tables().await {
            Ok(tables) => tables,
            Err(e) => return Err(abort(&mut op, e, on_progress)),
        };
        op.tables_restored = Some(tables);

        op.advance();
        report(&op, on_progress);

        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        let outcome = RestoreOutcome::new(
            tables,
            duration_ms,
            op.safety_backup_filename().unwrap_or_default().to_owned(),
        );
        if let Some(warning) = &outcome.warning {
            warn!(archive = %op.target.filename, "{}", warning.message);
        }
        Ok(outcome)
    }

    async fn read_archive(&self, archive: &Archive, path: &Path) -> Result<Vec<u8>> {
        let limit = self.limits.max_restore_bytes;
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| BackupError::fs(format!("open {}", path.display()), e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| BackupError::fs(format!("stat {}", path.display()), e))?
            .len();
        if size > limit {
            return Err(BackupError::ArchiveTooLarge {
                filename: archive.filename.clone(),
                size,
                limit,
            });
        }

        let mut content = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
        file.take(limit.saturating_add(1))
            .read_to_end(&mut content)
            .await
            .map_err(|e| BackupError::fs(format!("read {}", path.display()), e))?;
        if content.len() as u64 > limit {
            return Err(BackupError::ArchiveTooLarge {
                filename: archive.filename.clone(),
                size: content.len() as u64,
                limit,
            });
        }
        Ok(content)
    }

    async fn drop_and_recreate(&self) -> Result<()> {
        let db = quote_ident(&self.target.name);
        let invocation = self
            .target
            .invocation(&self.tools.client_command)
            .arg("-e")
            .arg(format!("DROP DATABASE IF EXISTS {db}; CREATE DATABASE {db}"))
            .timeout(self.limits.drop_timeout());
        self.runner.run(&invocation).await?;
        Ok(())
    }

    async fn load(&self, content: Vec<u8>) -> Result<()> {
        let invocation = self
            .target
            .invocation(&self.tools.client_command)
            .arg(self.target.name.as_str())
            .stdin(content)
            .timeout(self.limits.load_timeout());
        self.runner.run(&invocation).await?;
        Ok(())
    }

    async fn count_tables(&self) -> Result<i64> {
        let invocation = self
            .target
            .invocation(&self.tools.client_command)
            .args(["-N", "-B", "-e"])
            .arg(format!(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = '{}'",
                self.target.name
            ))
            .timeout(self.limits.verify_timeout());
        let output = self.runner.run(&invocation).await?;
        let raw = String::from_utf8_lossy(&output.stdout);
        raw.trim()
            .parse::<i64>()
            .map_err(|_| BackupError::UnexpectedOutput {
                program: self.tools.client_command.clone(),
                output: raw.trim().to_owned(),
            })
    }
}

fn report(op: &RestoreOperation, on_progress: Option<&ProgressFn<'_>>) {
    let progress = RestoreProgress::from(op.phase);
    info!(
        archive = %op.target.filename,
        phase = %progress.phase,
        percent = progress.percent,
        "{}",
        progress.message
    );
    if let Some(callback) = on_progress {
        callback(progress);
    }
}

fn abort(
    op: &mut RestoreOperation,
    err: BackupError,
    on_progress: Option<&ProgressFn<'_>>,
) -> BackupError {
    let phase = op.phase;
    op.fail(&err);
    report(op, on_progress);
    let safety_backup = op.safety_backup_filename().unwrap_or_default().to_owned();
    if phase.is_destructive() {
        error!(
            archive = %op.target.filename,
            %phase,
            %safety_backup,
            error = %err,
            "restore failed after the database was dropped; re-restore the safety backup"
        );
    } else {
        error!(archive = %op.target.filename, %phase, error = %err, "restore failed");
    }
    BackupError::RestoreFailed {
        phase,
        message: err.to_string(),
        safety_backup,
    }
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
