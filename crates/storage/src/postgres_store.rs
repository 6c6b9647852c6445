use anyhow::{Context, Result};
use dbvault_core::AuditEntry;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::store::AuditLog;

/// Postgres-backed audit log.
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connect to postgres")?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS backup_audit_log (
                id UUID PRIMARY KEY,
                action TEXT NOT NULL,
                filename TEXT NOT NULL,
                performed_by TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                safety_backup_filename TEXT,
                tables_restored BIGINT,
                file_size BIGINT,
                duration_ms BIGINT,
                error_message TEXT,
                checksum TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .context("create backup_audit_log table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS backup_audit_log_created_at
             ON backup_audit_log (created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .context("create backup_audit_log index")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl AuditLog for PostgresAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO backup_audit_log (id, action, filename, performed_by, status, created_at,
             safety_backup_filename, tables_restored, file_size, duration_ms, error_message, checksum)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(entry.id)
        .bind(entry.action.as_str())
        .bind(&entry.filename)
        .bind(&entry.performed_by)
        .bind(entry.status.as_str())
        .bind(entry.created_at)
        .bind(&entry.safety_backup_filename)
        .bind(entry.tables_restored)
        .bind(entry.file_size)
        .bind(entry.duration_ms)
        .bind(&entry.error_message)
        .bind(&entry.checksum)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT id, action, filename, performed_by, status, created_at, safety_backup_filename,
             tables_restored, file_size, duration_ms, error_message, checksum
             FROM backup_audit_log ORDER BY created_at DESC LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(pg_row_to_entry).collect()
    }

    async fn for_filename(&self, filename: &str) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT id, action, filename, performed_by, status, created_at, safety_backup_filename,
             tables_restored, file_size, duration_ms, error_message, checksum
             FROM backup_audit_log
             WHERE filename = $1 OR safety_backup_filename = $1
             ORDER BY created_at DESC",
        )
        .bind(filename)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(pg_row_to_entry).collect()
    }
}

fn pg_row_to_entry(row: &sqlx::postgres::PgRow) -> Result<AuditEntry> {
    let action: String = row.get("action");
    let status: String = row.get("status");

    Ok(AuditEntry {
        id: row.get("id"),
        action: action.parse().map_err(anyhow::Error::msg)?,
        filename: row.get("filename"),
        performed_by: row.get("performed_by"),
        status: status.parse().map_err(anyhow::Error::msg)?,
        created_at: row.get("created_at"),
        safety_backup_filename: row.get("safety_backup_filename"),
        tables_restored: row.get("tables_restored"),
        file_size: row.get("file_size"),
        duration_ms: row.get("duration_ms"),
        error_message: row.get("error_message"),
        checksum: row.get("checksum"),
    })
}
