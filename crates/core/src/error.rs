use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::restore::RestorePhase;

pub type Result<T> = std::result::Result<T, BackupError>;

/// Failures surfaced by the backup engine.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("{program} exited with {status}: {stderr}")]
    Subprocess {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} timed out after {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("{program} produced more than {limit} bytes of output")]
    OutputTooLarge { program: String, limit: usize },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("unexpected output from {program}: {output}")]
    UnexpectedOutput { program: String, output: String },

    #[error("{context}: {source}")]
    Filesystem {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid backup filename: {0}")]
    InvalidFilename(String),

    #[error("backup not found: {0}")]
    NotFound(String),

    #[error("backup already exists: {0}")]
    ArchiveExists(String),

    #[error("backup {filename} is {size} bytes, above the {limit} byte restore limit")]
    ArchiveTooLarge {
        filename: String,
        size: u64,
        limit: u64,
    },

    #[error("safety backup failed, restore was not started: {0}")]
    SafetyBackup(#[source] Box<BackupError>),

    #[error("restore failed while {phase}: {message} (safety backup: {safety_backup})")]
    RestoreFailed {
        phase: RestorePhase,
        message: String,
        safety_backup: String,
    },

    #[error("another backup operation is in progress")]
    Busy,

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Subprocess,
    Filesystem,
    Validation,
    NotFound,
    Conflict,
}

impl BackupError {
    pub fn fs(context: impl Into<String>, source: io::Error) -> Self {
        BackupError::Filesystem {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::Subprocess { .. }
            | BackupError::Timeout { .. }
            | BackupError::OutputTooLarge { .. }
            | BackupError::Spawn { .. }
            | BackupError::UnexpectedOutput { .. }
            | BackupError::RestoreFailed { .. } => ErrorKind::Subprocess,
            BackupError::Filesystem { .. } | BackupError::ArchiveTooLarge { .. } => {
                ErrorKind::Filesystem
            }
            BackupError::SafetyBackup(inner) => inner.kind(),
            BackupError::InvalidFilename(_)
            | BackupError::InvalidSchedule(_)
            | BackupError::InvalidConfig(_) => ErrorKind::Validation,
            BackupError::NotFound(_) => ErrorKind::NotFound,
            BackupError::Busy | BackupError::ArchiveExists(_) => ErrorKind::Conflict,
        }
    }

    /// Safety backup to point the operator at when a restore went wrong.
    pub fn safety_backup_filename(&self) -> Option<&str> {
        match self {
            BackupError::RestoreFailed { safety_backup, .. } => Some(safety_backup),
            _ => None,
        }
    }
}
