use anyhow::Result;
use dbvault_core::AuditEntry;

/// Append-only audit persistence, implemented by both SQLite and Postgres backends.
#[async_trait::async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one entry. Existing entries are never modified.
    async fn append(&self, entry: &AuditEntry) -> Result<()>;

    /// Most recent entries, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>>;

    /// Entries that reference `filename`, newest first.
    async fn for_filename(&self, filename: &str) -> Result<Vec<AuditEntry>>;
}
