pub mod archive_store;
pub mod manager;
pub mod postgres_store;
pub mod sqlite_store;
pub mod store;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

pub use archive_store::ArchiveStore;
pub use manager::{BackupManager, Download, ScheduledRun, SYSTEM_ACTOR};
pub use postgres_store::PostgresAuditLog;
pub use sqlite_store::SqliteAuditLog;
pub use store::AuditLog;

/// Opens the audit log: Postgres when a URL is configured, otherwise a
/// SQLite file at `<state_dir>/audit.db`.
pub async fn open_audit_log(
    state_dir: &Path,
    database_url: Option<&str>,
) -> anyhow::Result<Arc<dyn AuditLog>> {
    match database_url {
        Some(url) if !url.trim().is_empty() => {
            tracing::info!("using postgres audit log");
            Ok(Arc::new(PostgresAuditLog::new(url).await?))
        }
        _ => {
            std::fs::create_dir_all(state_dir)
                .with_context(|| format!("create state dir {}", state_dir.display()))?;
            let path = state_dir.join("audit.db");
            tracing::info!(path = %path.display(), "using sqlite audit log");
            Ok(Arc::new(SqliteAuditLog::new(path)?))
        }
    }
}
