use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use dbvault_core::{Archive, ArchiveKind, BackupError, DirStats, FilenameCodec, Result};
use tracing::{debug, warn};

/// Names tried by [`ArchiveStore::write_new`] before giving up.
const NAME_ATTEMPTS: i64 = 5;

/// Directory of backup archives. Files are written once and never modified.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
    codec: FilenameCodec,
}

impl ArchiveStore {
    pub fn new(dir: impl Into<PathBuf>, codec: FilenameCodec) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| BackupError::fs(format!("create archive dir {}", dir.display()), e))?;
        Ok(Self { dir, codec })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn codec(&self) -> &FilenameCodec {
        &self.codec
    }

    /// All archives, newest first. Files outside the naming grammar are skipped.
    pub fn list(&self) -> Result<Vec<Archive>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| BackupError::fs(format!("read archive dir {}", self.dir.display()), e))?;

        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| BackupError::fs(format!("read archive dir {}", self.dir.display()), e))?;
            let Some(filename) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Some(parsed) = self.codec.decode(&filename) else {
                debug!(%filename, "skipping file outside the archive naming scheme");
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                // deleted between read_dir and stat
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(BackupError::fs(format!("stat {filename}"), e)),
            };
            archives.push(Archive {
                filename,
                created_at: parsed.created_at,
                size_bytes: metadata.len(),
                kind: parsed.kind,
            });
        }

        archives.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(archives)
    }

    /// Validates a caller-supplied filename and resolves it to an existing archive.
    pub fn resolve(&self, filename: &str) -> Result<(Archive, PathBuf)> {
        let parsed = self.codec.validate(filename)?;
        let path = self.dir.join(filename);
        let metadata = match fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(BackupError::NotFound(filename.to_owned())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(filename.to_owned()))
            }
            Err(e) => return Err(BackupError::fs(format!("stat {}", path.display()), e)),
        };
        let archive = Archive {
            filename: filename.to_owned(),
            created_at: parsed.created_at,
            size_bytes: metadata.len(),
            kind: parsed.kind,
        };
        Ok((archive, path))
    }

    /// Writes a new archive and flushes it to disk. Never overwrites: an
    /// existing name fails with [`BackupError::ArchiveExists`]. On any write
    /// failure the partial file is removed.
    pub fn write(&self, filename: &str, content: &[u8]) -> Result<Archive> {
        let parsed = self.codec.validate(filename)?;
        let path = self.dir.join(filename);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => BackupError::ArchiveExists(filename.to_owned()),
                _ => BackupError::fs(format!("create {}", path.display()), e),
            })?;

        let written = file.write_all(content).and_then(|_| file.sync_all());
        drop(file);
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %cleanup, "failed to remove partial archive");
            }
            return Err(BackupError::fs(format!("write {}", path.display()), e));
        }

        Ok(Archive {
            filename: filename.to_owned(),
            created_at: parsed.created_at,
            size_bytes: content.len() as u64,
            kind: parsed.kind,
        })
    }

    /// Writes `content` under the first free name at or after `at`, moving
    /// one second forward per taken name. Existing archives are left alone.
    pub fn write_new(
        &self,
        kind: ArchiveKind,
        at: DateTime<Utc>,
        content: &[u8],
    ) -> Result<Archive> {
        let mut taken = None;
        for bump in 0..NAME_ATTEMPTS {
            let filename = self.codec.encode(kind, at + Duration::seconds(bump));
            match self.write(&filename, content) {
                Err(BackupError::ArchiveExists(name)) => {
                    debug!(%name, "archive name taken, trying the next second");
                    taken = Some(name);
                }
                other => return other,
            }
        }
        Err(BackupError::ArchiveExists(taken.unwrap_or_default()))
    }

    pub fn remove(&self, filename: &str) -> Result<()> {
        let (_, path) = self.resolve(filename)?;
        fs::remove_file(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BackupError::NotFound(filename.to_owned()),
            _ => BackupError::fs(format!("remove {}", path.display()), e),
        })
    }

    pub fn stats(&self) -> Result<DirStats> {
        Ok(DirStats::from_archives(&self.list()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ArchiveStore) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store =
            ArchiveStore::new(tmp.path().join("backups"), FilenameCodec::default()).expect("store");
        (tmp, store)
    }

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("rfc3339")
            .with_timezone(&Utc)
    }

    #[test]
    fn list_is_newest_first_and_skips_strangers() {
        let (_tmp, store) = store();
        let codec = store.codec().clone();
        let old = codec.encode(ArchiveKind::Scheduled, ts("2024-01-01T02:00:00Z"));
        let new = codec.encode(ArchiveKind::Manual, ts("2025-06-01T09:30:00Z"));
        store.write(&old, b"old").expect("write old");
        store.write(&new, b"newer").expect("write new");
        fs::write(store.dir().join("README.txt"), "not a backup").expect("stray");
        fs::create_dir(store.dir().join("backup_20990101_000000_manual.sql")).expect("dir");

        let archives = store.list().expect("list");
        let names: Vec<&str> = archives.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec![new.as_str(), old.as_str()]);
        assert_eq!(archives[0].size_bytes, 5);
        assert_eq!(archives[0].kind, ArchiveKind::Manual);
        assert_eq!(archives[1].created_at, ts("2024-01-01T02:00:00Z"));
    }

    #[test]
    fn created_at_comes_from_the_name() {
        let (_tmp, store) = store();
        store
            .write("backup_20200202_020202_manual.sql", b"x")
            .expect("write");
        let archives = store.list().expect("list");
        assert_eq!(archives[0].created_at, ts("2020-02-02T02:02:02Z"));
    }

    #[test]
    fn write_never_overwrites() {
        let (_tmp, store) = store();
        let name = "backup_20250101_020000_manual.sql";
        store.write(name, b"first").expect("write");
        assert!(matches!(
            store.write(name, b"second"),
            Err(BackupError::ArchiveExists(n)) if n == name
        ));
        assert_eq!(fs::read(store.dir().join(name)).expect("read"), b"first");
    }

    #[test]
    fn write_new_steps_past_taken_seconds() {
        let (_tmp, store) = store();
        let at = ts("2025-01-01T02:00:00Z");
        store
            .write("backup_20250101_020000_pre_restore.sql", b"first")
            .expect("write");
        store
            .write("backup_20250101_020001_pre_restore.sql", b"second")
            .expect("write");

        let archive = store
            .write_new(ArchiveKind::PreRestore, at, b"third")
            .expect("write_new");
        assert_eq!(archive.filename, "backup_20250101_020002_pre_restore.sql");
        assert_eq!(
            fs::read(store.dir().join("backup_20250101_020000_pre_restore.sql")).expect("read"),
            b"first"
        );
        assert_eq!(store.list().expect("list").len(), 3);
    }

    #[test]
    fn write_new_gives_up_after_bounded_attempts() {
        let (_tmp, store) = store();
        let at = ts("2025-01-01T02:00:00Z");
        for _ in 0..NAME_ATTEMPTS {
            store
                .write_new(ArchiveKind::Manual, at, b"x")
                .expect("free name");
        }
        assert!(matches!(
            store.write_new(ArchiveKind::Manual, at, b"x"),
            Err(BackupError::ArchiveExists(_))
        ));
        assert_eq!(store.list().expect("list").len(), NAME_ATTEMPTS as usize);
    }

    #[test]
    fn write_rejects_unsafe_names() {
        let (tmp, store) = store();
        assert!(matches!(
            store.write("../escape_20250101_020000_manual.sql", b"x"),
            Err(BackupError::InvalidFilename(_))
        ));
        assert!(!tmp.path().join("escape_20250101_020000_manual.sql").exists());
    }

    #[test]
    fn remove_distinguishes_missing_from_invalid() {
        let (_tmp, store) = store();
        assert!(matches!(
            store.remove("backup_20250101_020000_manual.sql"),
            Err(BackupError::NotFound(_))
        ));
        assert!(matches!(
            store.remove("../../etc/passwd"),
            Err(BackupError::InvalidFilename(_))
        ));

        let name = "backup_20250101_020000_manual.sql";
        store.write(name, b"x").expect("write");
        store.remove(name).expect("remove");
        assert!(!store.dir().join(name).exists());
    }

    #[test]
    fn stats_cover_listed_archives() {
        let (_tmp, store) = store();
        store
            .write("backup_20250101_020000_manual.sql", &[0u8; 1024])
            .expect("write");
        store
            .write("backup_20250102_020000_scheduled.sql", &[0u8; 1024])
            .expect("write");
        fs::write(store.dir().join("ignored.bin"), [0u8; 4096]).expect("stray");

        let stats = store.stats().expect("stats");
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_size, 2048);
        assert_eq!(stats.total_size_formatted, "2.0 KB");
    }
}
