pub mod archive;
pub mod audit;
pub mod error;
pub mod filename;
pub mod hash;
pub mod restore;
pub mod retention;
pub mod schedule;

pub use archive::{format_size, Archive, ArchiveKind, DirStats};
pub use audit::{AuditAction, AuditEntry, AuditStatus};
pub use error::{BackupError, ErrorKind, Result};
pub use filename::{FilenameCodec, ParsedName};
pub use hash::content_hash;
pub use restore::{
    RestoreOperation, RestoreOutcome, RestorePhase, RestoreProgress, VerificationWarning,
};
pub use retention::{RetentionDecision, RetentionPolicy};
pub use schedule::{next_fire, Frequency, ScheduleConfig};
