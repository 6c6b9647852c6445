use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Download,
    Restore,
    Delete,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failed,
    InProgress,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Download => "download",
            AuditAction::Restore => "restore",
            AuditAction::Delete => "delete",
            AuditAction::Scheduled => "scheduled",
        }
    }
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failed => "failed",
            AuditStatus::InProgress => "in_progress",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "download" => Ok(AuditAction::Download),
            "restore" => Ok(AuditAction::Restore),
            "delete" => Ok(AuditAction::Delete),
            "scheduled" => Ok(AuditAction::Scheduled),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}

impl FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AuditStatus::Success),
            "failed" => Ok(AuditStatus::Failed),
            "in_progress" => Ok(AuditStatus::InProgress),
            other => Err(format!("unknown audit status: {other}")),
        }
    }
}

/// Immutable record of one backup engine action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: AuditAction,
    pub filename: String,
    pub performed_by: String,
    pub status: AuditStatus,
    pub created_at: DateTime<Utc>,
    pub safety_backup_filename: Option<String>,
    pub tables_restored: Option<i64>,
    pub file_size: Option<i64>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub checksum: Option<String>,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        status: AuditStatus,
        filename: impl Into<String>,
        performed_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            filename: filename.into(),
            performed_by: performed_by.into(),
            status,
            created_at: Utc::now(),
            safety_backup_filename: None,
            tables_restored: None,
            file_size: None,
            duration_ms: None,
            error_message: None,
            checksum: None,
        }
    }

    pub fn success(
        action: AuditAction,
        filename: impl Into<String>,
        performed_by: impl Into<String>,
    ) -> Self {
        Self::new(action, AuditStatus::Success, filename, performed_by)
    }

    pub fn failed(
        action: AuditAction,
        filename: impl Into<String>,
        performed_by: impl Into<String>,
        error: impl fmt::Display,
    ) -> Self {
        let mut entry = Self::new(action, AuditStatus::Failed, filename, performed_by);
        entry.error_message = Some(error.to_string());
        entry
    }

    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = Some(i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
        self
    }

    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.file_size = Some(i64::try_from(bytes).unwrap_or(i64::MAX));
        self
    }

    pub fn with_safety_backup(mut self, filename: Option<&str>) -> Self {
        self.safety_backup_filename = filename.map(str::to_owned);
        self
    }

    pub fn with_tables_restored(mut self, tables: i64) -> Self {
        self.tables_restored = Some(tables);
        self
    }

    pub fn with_checksum(mut self, checksum: String) -> Self {
        self.checksum = Some(checksum);
        self
    }
}
