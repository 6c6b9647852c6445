//! Archive naming: `<prefix>_<YYYYMMDD>_<HHMMSS>_<kind>.<ext>`.
//!
//! Two entry points exist on purpose. [`FilenameCodec::decode`] is lenient and
//! used when scanning the archive directory; anything that does not parse is
//! simply not an archive. [`FilenameCodec::validate`] is strict and guards every
//! caller-supplied filename before the filesystem is touched.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::archive::ArchiveKind;
use crate::error::{BackupError, Result};

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const STAMP_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameCodec {
    prefix: String,
    extension: String,
}

/// A filename decoded into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedName {
    pub kind: ArchiveKind,
    pub created_at: DateTime<Utc>,
}

impl Default for FilenameCodec {
    fn default() -> Self {
        Self::new("backup", "sql")
    }
}

impl FilenameCodec {
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Timestamps are truncated to whole seconds.
    pub fn encode(&self, kind: ArchiveKind, created_at: DateTime<Utc>) -> String {
        let stamp = created_at.format(STAMP_FORMAT);
        match kind {
            ArchiveKind::Unknown => format!("{}_{stamp}.{}", self.prefix, self.extension),
            _ => format!("{}_{stamp}_{}.{}", self.prefix, kind, self.extension),
        }
    }

    pub fn decode(&self, filename: &str) -> Option<ParsedName> {
        let rest = filename
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')?
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('_')?;

        if !rest.is_ascii() || rest.len() < STAMP_LEN {
            return None;
        }
        let (stamp, suffix) = rest.split_at(STAMP_LEN);
        if !is_stamp_shape(stamp) {
            return None;
        }
        let created_at = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
            .ok()?
            .and_utc();

        let kind = match suffix {
            "" => ArchiveKind::Unknown,
            _ => {
                let label = suffix.strip_prefix('_')?;
                ArchiveKind::suffixes()
                    .into_iter()
                    .find(|k| k.as_str() == label)?
            }
        };

        Some(ParsedName { kind, created_at })
    }

    pub fn validate(&self, filename: &str) -> Result<ParsedName> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
            || filename.contains('\0')
        {
            return Err(BackupError::InvalidFilename(filename.to_owned()));
        }
        self.decode(filename)
            .ok_or_else(|| BackupError::InvalidFilename(filename.to_owned()))
    }
}

fn is_stamp_shape(stamp: &str) -> bool {
    stamp.bytes().enumerate().all(|(i, b)| match i {
        8 => b == b'_',
        _ => b.is_ascii_digit(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).single().expect("valid time")
    }

    #[test]
    fn encodes_human_readable_names() {
        let codec = FilenameCodec::new("feedback_backup", "sql");
        let name = codec.encode(ArchiveKind::Manual, at(2025, 1, 1, 2, 0, 0));
        assert_eq!(name, "feedback_backup_20250101_020000_manual.sql");

        let name = codec.encode(ArchiveKind::PreRestore, at(2025, 12, 31, 23, 59, 59));
        assert_eq!(name, "feedback_backup_20251231_235959_pre_restore.sql");
    }

    #[test]
    fn decode_inverts_encode() {
        let codec = FilenameCodec::default();
        let times = [
            at(2000, 1, 1, 0, 0, 0),
            at(2024, 2, 29, 12, 30, 45),
            at(2099, 12, 31, 23, 59, 59),
        ];
        for kind in [
            ArchiveKind::Manual,
            ArchiveKind::Scheduled,
            ArchiveKind::PreRestore,
            ArchiveKind::Unknown,
        ] {
            for created_at in times {
                let name = codec.encode(kind, created_at);
                assert_eq!(
                    codec.decode(&name),
                    Some(ParsedName { kind, created_at }),
                    "{name}"
                );
            }
        }
    }

    #[test]
    fn untyped_legacy_names_decode_as_unknown() {
        let codec = FilenameCodec::default();
        let parsed = codec.decode("backup_20240105_080910.sql").expect("legacy");
        assert_eq!(parsed.kind, ArchiveKind::Unknown);
        assert_eq!(parsed.created_at, at(2024, 1, 5, 8, 9, 10));
    }

    #[test]
    fn decode_ignores_foreign_files() {
        let codec = FilenameCodec::default();
        for name in [
            "notes.txt",
            "backup_20240105_080910_manual.sql.tmp",
            "backup_20240105_080910_weekly.sql",
            "backup_20241305_080910_manual.sql",
            "backup_2024010_0809100_manual.sql",
            "other_20240105_080910_manual.sql",
            "backup_20240105_080910_manual.gz",
            "backup_2024０105_080910_manual.sql",
            "",
        ] {
            assert_eq!(codec.decode(name), None, "{name}");
        }
    }

    #[test]
    fn validate_rejects_traversal_before_parsing() {
        let codec = FilenameCodec::default();
        for name in [
            "../../etc/passwd",
            "..",
            "backup_20240105_080910_manual.sql/..",
            "dir/backup_20240105_080910_manual.sql",
            "dir\\backup_20240105_080910_manual.sql",
            "backup_20240105_080910_manual..sql",
            "backup_20240105_080910_manual.sql\0",
        ] {
            assert!(
                matches!(codec.validate(name), Err(BackupError::InvalidFilename(_))),
                "{name:?}"
            );
        }
    }

    #[test]
    fn validate_rejects_names_outside_the_grammar() {
        let codec = FilenameCodec::default();
        assert!(matches!(
            codec.validate("passwd"),
            Err(BackupError::InvalidFilename(_))
        ));
        assert!(codec.validate("backup_20240105_080910_scheduled.sql").is_ok());
    }
}
