use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use dbvault_core::AuditEntry;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::store::AuditLog;

const COLUMNS: &str = "id, action, filename, performed_by, status, created_at, safety_backup_filename,
     tables_restored, file_size, duration_ms, error_message, checksum";

/// SQLite-backed audit log. Each call opens a fresh connection on a blocking thread.
/// Timestamps are stored as fixed-width RFC 3339 so text ordering is time ordering.
pub struct SqliteAuditLog {
    db_path: PathBuf,
}

impl SqliteAuditLog {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let store = Self { db_path };
        store.init_db()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path).context("open audit db")
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS backup_audit_log (
                id TEXT PRIMARY KEY,
                action TEXT NOT NULL,
                filename TEXT NOT NULL,
                performed_by TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                safety_backup_filename TEXT,
                tables_restored INTEGER,
                file_size INTEGER,
                duration_ms INTEGER,
                error_message TEXT,
                checksum TEXT
            );
            CREATE INDEX IF NOT EXISTS backup_audit_log_created_at
                ON backup_audit_log (created_at);",
        )?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuditLog for SqliteAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let entry = entry.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open audit db")?;
            conn.execute(
                "INSERT INTO backup_audit_log (id, action, filename, performed_by, status, created_at,
                 safety_backup_filename, tables_restored, file_size, duration_ms, error_message, checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    entry.id.to_string(),
                    entry.action.as_str(),
                    entry.filename,
                    entry.performed_by,
                    entry.status.as_str(),
                    entry.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                    entry.safety_backup_filename,
                    entry.tables_restored,
                    entry.file_size,
                    entry.duration_ms,
                    entry.error_message,
                    entry.checksum,
                ],
            )?;
            Ok(())
        })
        .await?
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let db_path = self.db_path.clone();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open audit db")?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM backup_audit_log ORDER BY created_at DESC, rowid DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map([limit], row_to_entry)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await?
    }

    async fn for_filename(&self, filename: &str) -> Result<Vec<AuditEntry>> {
        let db_path = self.db_path.clone();
        let filename = filename.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open audit db")?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM backup_audit_log
                 WHERE filename = ?1 OR safety_backup_filename = ?1
                 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt.query_map([filename], row_to_entry)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await?
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<AuditEntry> {
    let action: String = row.get(1)?;
    let status: String = row.get(4)?;
    Ok(AuditEntry {
        id: parse_uuid(row.get::<_, String>(0)?),
        action: action.parse().map_err(to_sql_err)?,
        filename: row.get(2)?,
        performed_by: row.get(3)?,
        status: status.parse().map_err(to_sql_err)?,
        created_at: parse_ts(row.get::<_, String>(5)?),
        safety_backup_filename: row.get(6)?,
        tables_restored: row.get(7)?,
        file_size: row.get(8)?,
        duration_ms: row.get(9)?,
        error_message: row.get(10)?,
        checksum: row.get(11)?,
    })
}

fn parse_uuid(raw: String) -> Uuid {
    Uuid::parse_str(&raw).unwrap_or_else(|_| Uuid::nil())
}

fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn to_sql_err(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        message.into(),
    )
}
