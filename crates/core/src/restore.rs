//! Restore state machine.
//!
//! ```text
//! SafetyBackup -> Reading -> Dropping -> Restoring -> Verifying -> Complete
//!       \            \           \            \            \
//!        +------------+-----------+------------+------------+--> Failed
//! ```
//!
//! Transitions are pure; the executor that drives the external tools lives in
//! `dbvault-exec`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::archive::Archive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    SafetyBackup,
    Reading,
    Dropping,
    Restoring,
    Verifying,
    Complete,
    Failed,
}

impl RestorePhase {
    /// Phase reached after the current step finished with `succeeded`.
    /// Terminal phases never move.
    pub fn next(self, succeeded: bool) -> RestorePhase {
        use RestorePhase::*;
        match (self, succeeded) {
            (Complete, _) | (Failed, _) => self,
            (_, false) => Failed,
            (SafetyBackup, true) => Reading,
            (Reading, true) => Dropping,
            (Dropping, true) => Restoring,
            (Restoring, true) => Verifying,
            (Verifying, true) => Complete,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RestorePhase::Complete | RestorePhase::Failed)
    }

    /// True once the target database may already have been dropped.
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            RestorePhase::Dropping | RestorePhase::Restoring | RestorePhase::Verifying
        )
    }

    /// Coarse progress checkpoint, in percent.
    pub fn percent(self) -> u8 {
        match self {
            RestorePhase::SafetyBackup => 10,
            RestorePhase::Reading => 30,
            RestorePhase::Dropping => 50,
            RestorePhase::Restoring => 70,
            RestorePhase::Verifying => 90,
            RestorePhase::Complete => 100,
            RestorePhase::Failed => 0,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            RestorePhase::SafetyBackup => "Creating safety backup of the current database",
            RestorePhase::Reading => "Reading backup file",
            RestorePhase::Dropping => "Dropping and recreating database",
            RestorePhase::Restoring => "Loading backup into database",
            RestorePhase::Verifying => "Verifying restored tables",
            RestorePhase::Complete => "Restore complete",
            RestorePhase::Failed => "Restore failed",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RestorePhase::SafetyBackup => "safety_backup",
            RestorePhase::Reading => "reading",
            RestorePhase::Dropping => "dropping",
            RestorePhase::Restoring => "restoring",
            RestorePhase::Verifying => "verifying",
            RestorePhase::Complete => "complete",
            RestorePhase::Failed => "failed",
        }
    }
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a progress callback receives on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreProgress {
    pub phase: RestorePhase,
    pub message: String,
    pub percent: u8,
}

impl From<RestorePhase> for RestoreProgress {
    fn from(phase: RestorePhase) -> Self {
        Self {
            phase,
            message: phase.message().to_owned(),
            percent: phase.percent(),
        }
    }
}

/// A restore attempt from start to its terminal phase.
#[derive(Debug, Clone)]
pub struct RestoreOperation {
    pub target: Archive,
    pub safety_archive: Option<Archive>,
    pub phase: RestorePhase,
    pub tables_restored: Option<i64>,
    pub error: Option<String>,
    /// Phase that was running when the operation failed.
    pub failed_in: Option<RestorePhase>,
}

impl RestoreOperation {
    pub fn new(target: Archive) -> Self {
        Self {
            target,
            safety_archive: None,
            phase: RestorePhase::SafetyBackup,
            tables_restored: None,
            error: None,
            failed_in: None,
        }
    }

    pub fn advance(&mut self) -> RestorePhase {
        self.phase = self.phase.next(true);
        self.phase
    }

    pub fn fail(&mut self, error: impl fmt::Display) {
        if self.phase.is_terminal() {
            return;
        }
        self.failed_in = Some(self.phase);
        self.phase = self.phase.next(false);
        self.error = Some(error.to_string());
    }

    pub fn safety_backup_filename(&self) -> Option<&str> {
        self.safety_archive.as_ref().map(|a| a.filename.as_str())
    }
}

/// Post-restore sanity signal. Not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationWarning {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub tables_restored: i64,
    pub duration_ms: i64,
    pub safety_backup_filename: String,
    pub warning: Option<VerificationWarning>,
}

impl RestoreOutcome {
    pub fn new(tables_restored: i64, duration_ms: i64, safety_backup_filename: String) -> Self {
        let warning = (tables_restored == 0).then(|| VerificationWarning {
            message: "restored database contains no tables".to_owned(),
        });
        Self {
            tables_restored,
            duration_ms,
            safety_backup_filename,
            warning,
        }
    }
}
