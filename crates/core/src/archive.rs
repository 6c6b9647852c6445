use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why an archive was produced. Encoded as the filename's type suffix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    Manual,
    Scheduled,
    PreRestore,
    /// Legacy files that carry no type suffix.
    Unknown,
}

impl ArchiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveKind::Manual => "manual",
            ArchiveKind::Scheduled => "scheduled",
            ArchiveKind::PreRestore => "pre_restore",
            ArchiveKind::Unknown => "unknown",
        }
    }

    /// Kinds that may appear as a filename suffix.
    pub fn suffixes() -> [ArchiveKind; 3] {
        [
            ArchiveKind::Manual,
            ArchiveKind::Scheduled,
            ArchiveKind::PreRestore,
        ]
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(ArchiveKind::Manual),
            "scheduled" => Ok(ArchiveKind::Scheduled),
            "pre_restore" => Ok(ArchiveKind::PreRestore),
            "unknown" => Ok(ArchiveKind::Unknown),
            other => Err(format!("unknown archive kind: {other}")),
        }
    }
}

/// A single backup artifact on disk. `created_at` and `kind` come from the
/// filename, never from filesystem metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Archive {
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub kind: ArchiveKind,
}

/// Aggregate statistics over the archive directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirStats {
    pub total_size: u64,
    pub total_size_formatted: String,
    pub count: usize,
}

impl DirStats {
    pub fn from_archives(archives: &[Archive]) -> Self {
        let total_size = archives.iter().map(|a| a.size_bytes).sum();
        Self {
            total_size,
            total_size_formatted: format_size(total_size),
            count: archives.len(),
        }
    }
}

pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
