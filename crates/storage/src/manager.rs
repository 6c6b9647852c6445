//! Public backup operations: create, list, download, delete, restore, cleanup.
//!
//! Every operation except `list` and `dir_stats` appends exactly one audit
//! entry. Audit writes are best effort and never change an operation's result.
//! Filename validation failures are rejected before anything is touched and
//! are not audited.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dbvault_core::{
    content_hash, Archive, ArchiveKind, AuditAction, AuditEntry, BackupError, DirStats,
    RestoreOutcome, RetentionDecision, RetentionPolicy, Result,
};
use dbvault_exec::{DumpExecutor, ProgressFn, RestoreExecutor};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::archive_store::ArchiveStore;
use crate::store::AuditLog;

/// Actor recorded for unattended operations.
pub const SYSTEM_ACTOR: &str = "system";

/// An archive resolved for download.
#[derive(Debug, Clone)]
pub struct Download {
    pub archive: Archive,
    pub path: PathBuf,
}

/// Result of one scheduled firing.
#[derive(Debug, Clone)]
pub struct ScheduledRun {
    pub archive: Option<Archive>,
    pub retention: Option<RetentionDecision>,
    pub error: Option<String>,
}

pub struct BackupManager {
    store: ArchiveStore,
    dumper: DumpExecutor,
    restorer: RestoreExecutor,
    audit: Arc<dyn AuditLog>,
    // Dumps, deletes and downloads share the gate; a restore holds it alone.
    gate: RwLock<()>,
}

impl BackupManager {
    pub fn new(
        store: ArchiveStore,
        dumper: DumpExecutor,
        restorer: RestoreExecutor,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            store,
            dumper,
            restorer,
            audit,
            gate: RwLock::new(()),
        }
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    pub fn audit_log(&self) -> &Arc<dyn AuditLog> {
        &self.audit
    }

    pub async fn create(&self, kind: ArchiveKind, actor: &str) -> Result<Archive> {
        let _shared = self.gate.read().await;
        self.create_unlocked(kind, actor).await
    }

    async fn create_unlocked(&self, kind: ArchiveKind, actor: &str) -> Result<Archive> {
        let started = Instant::now();
        let at = Utc::now();

        match self.dump_new(kind, at).await {
            Ok((archive, checksum)) => {
                info!(
                    filename = %archive.filename,
                    %kind,
                    bytes = archive.size_bytes,
                    "backup created"
                );
                self.record(
                    AuditEntry::success(AuditAction::Create, &archive.filename, actor)
                        .with_file_size(archive.size_bytes)
                        .with_checksum(checksum)
                        .with_duration(started.elapsed()),
                )
                .await;
                Ok(archive)
            }
            Err(e) => {
                let filename = self.store.codec().encode(kind, at);
                error!(%filename, %kind, error = %e, "backup failed");
                self.record(
                    AuditEntry::failed(AuditAction::Create, &filename, actor, &e)
                        .with_duration(started.elapsed()),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Dumps once and stores the result under a fresh name. Creates in the
    /// same second land on consecutive seconds instead of colliding.
    async fn dump_new(&self, kind: ArchiveKind, at: DateTime<Utc>) -> Result<(Archive, String)> {
        let bytes = self.dumper.dump().await?;
        let checksum = content_hash(&bytes);
        let store = self.store.clone();
        let archive = tokio::task::spawn_blocking(move || store.write_new(kind, at, &bytes))
            .await
            .map_err(|e| BackupError::fs("archive writer task", std::io::Error::other(e)))??;
        Ok((archive, checksum))
    }

    /// Archives newest first.
    pub fn list(&self) -> Result<Vec<Archive>> {
        self.store.list()
    }

    pub fn dir_stats(&self) -> Result<DirStats> {
        self.store.stats()
    }

    pub async fn download(&self, filename: &str, actor: &str) -> Result<Download> {
        self.store.codec().validate(filename)?;
        let _shared = self.gate.read().await;
        match self.store.resolve(filename) {
            Ok((archive, path)) => {
                self.record(
                    AuditEntry::success(AuditAction::Download, filename, actor)
                        .with_file_size(archive.size_bytes),
                )
                .await;
                Ok(Download { archive, path })
            }
            Err(e) => {
                self.record(AuditEntry::failed(AuditAction::Download, filename, actor, &e))
                    .await;
                Err(e)
            }
        }
    }

    pub async fn delete(&self, filename: &str, actor: &str) -> Result<()> {
        self.store.codec().validate(filename)?;
        let _shared = self.gate.read().await;
        let started = Instant::now();
        let result = self.store.remove(filename);
        let entry = match &result {
            Ok(()) => {
                info!(%filename, %actor, "backup deleted");
                AuditEntry::success(AuditAction::Delete, filename, actor)
            }
            Err(e) => {
                warn!(%filename, error = %e, "backup delete failed");
                AuditEntry::failed(AuditAction::Delete, filename, actor, e)
            }
        };
        self.record(entry.with_duration(started.elapsed())).await;
        result
    }

    /// Restores `filename` over the live database after writing a
    /// `pre_restore` safety backup. Fails with [`BackupError::Busy`] if any
    /// other operation holds the gate.
    pub async fn restore(
        &self,
        filename: &str,
        actor: &str,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> Result<RestoreOutcome> {
        self.store.codec().validate(filename)?;
        let started = Instant::now();
        let Ok(_exclusive) = self.gate.try_write() else {
            let err = BackupError::Busy;
            warn!(%filename, %actor, "restore refused, another operation is running");
            self.record(AuditEntry::failed(AuditAction::Restore, filename, actor, &err))
                .await;
            return Err(err);
        };

        let (target, path) = match self.store.resolve(filename) {
            Ok(found) => found,
            Err(e) => {
                self.record(
                    AuditEntry::failed(AuditAction::Restore, filename, actor, &e)
                        .with_duration(started.elapsed()),
                )
                .await;
                return Err(e);
            }
        };

        info!(%filename, %actor, "restore requested");
        let result = self
            .restorer
            .run(
                target,
                &path,
                || self.create_unlocked(ArchiveKind::PreRestore, actor),
                on_progress,
            )
            .await;

        let entry = match &result {
            Ok(outcome) => {
                info!(
                    %filename,
                    tables = outcome.tables_restored,
                    safety_backup = %outcome.safety_backup_filename,
                    "restore complete"
                );
                AuditEntry::success(AuditAction::Restore, filename, actor)
                    .with_safety_backup(Some(&outcome.safety_backup_filename))
                    .with_tables_restored(outcome.tables_restored)
            }
            Err(e) => AuditEntry::failed(AuditAction::Restore, filename, actor, e)
                .with_safety_backup(e.safety_backup_filename()),
        };
        self.record(entry.with_duration(started.elapsed())).await;
        result
    }

    /// Applies the retention policy. Individual delete failures are logged
    /// and skipped rather than aborting the run.
    pub async fn cleanup(
        &self,
        retention_days: u32,
        min_retained: usize,
        actor: &str,
    ) -> Result<RetentionDecision> {
        let archives = self.store.list()?;
        let policy = RetentionPolicy::new(retention_days, min_retained);
        let decision = self.prune(&archives, policy, actor).await;
        info!(
            deleted = decision.deleted.len(),
            kept = decision.kept,
            retention_days,
            min_retained,
            "retention cleanup finished"
        );
        Ok(decision)
    }

    /// Deletes what `policy` selects from a listing taken earlier. Archives
    /// that vanished since the listing count as neither deleted nor kept.
    async fn prune(
        &self,
        archives: &[Archive],
        policy: RetentionPolicy,
        actor: &str,
    ) -> RetentionDecision {
        let eligible = policy.eligible(archives, Utc::now());
        let mut deleted = Vec::with_capacity(eligible.len());
        let mut vanished = 0;
        for filename in eligible {
            match self.delete(&filename, actor).await {
                Ok(()) => deleted.push(filename),
                Err(BackupError::NotFound(_)) => {
                    debug!(%filename, "archive already gone before cleanup reached it");
                    vanished += 1;
                }
                Err(e) => warn!(%filename, error = %e, "retention cleanup skipped archive"),
            }
        }
        RetentionDecision {
            kept: archives.len() - deleted.len() - vanished,
            deleted,
        }
    }

    /// One unattended run: a scheduled backup, then retention when given.
    /// Always appends an `action=scheduled` entry covering the whole run.
    pub async fn run_scheduled(&self, retention: Option<RetentionPolicy>) -> ScheduledRun {
        let started = Instant::now();
        let mut run = ScheduledRun {
            archive: None,
            retention: None,
            error: None,
        };

        match self.create(ArchiveKind::Scheduled, SYSTEM_ACTOR).await {
            Ok(archive) => run.archive = Some(archive),
            Err(e) => run.error = Some(e.to_string()),
        }

        if let Some(policy) = retention {
            match self
                .cleanup(policy.retention_days, policy.min_retained, SYSTEM_ACTOR)
                .await
            {
                Ok(decision) => run.retention = Some(decision),
                Err(e) => {
                    error!(error = %e, "scheduled retention cleanup failed");
                    run.error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        let filename = run
            .archive
            .as_ref()
            .map(|a| a.filename.clone())
            .unwrap_or_default();
        let entry = match (&run.archive, &run.error) {
            (Some(archive), None) => {
                AuditEntry::success(AuditAction::Scheduled, filename, SYSTEM_ACTOR)
                    .with_file_size(archive.size_bytes)
            }
            (_, error) => AuditEntry::failed(
                AuditAction::Scheduled,
                filename,
                SYSTEM_ACTOR,
                error.as_deref().unwrap_or("scheduled backup failed"),
            ),
        };
        self.record(entry.with_duration(started.elapsed())).await;
        run
    }

    pub async fn audit_trail(&self, limit: usize) -> anyhow::Result<Vec<AuditEntry>> {
        self.audit.recent(limit).await
    }

    /// Entries naming `filename` as the archive or as a restore's safety
    /// backup, newest first. The archive need not exist any more.
    pub async fn audit_for(&self, filename: &str) -> anyhow::Result<Vec<AuditEntry>> {
        self.audit.for_filename(filename).await
    }

    async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.append(&entry).await {
            warn!(
                action = %entry.action,
                filename = %entry.filename,
                error = %e,
                "failed to write audit entry"
            );
        }
    }
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("dir", &self.store.dir())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_store::SqliteAuditLog;
    use dbvault_core::{AuditStatus, FilenameCodec, RestorePhase};
    use dbvault_exec::{DatabaseTarget, ExecLimits, FakeProcessRunner, ToolPaths};

    struct Fixture {
        _tmp: tempfile::TempDir,
        fake: FakeProcessRunner,
        manager: BackupManager,
    }

    fn fixture_with(audit: impl FnOnce(&std::path::Path) -> Arc<dyn AuditLog>) -> Fixture {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = ArchiveStore::new(
            tmp.path().join("backups"),
            FilenameCodec::new("feedback_backup", "sql"),
        )
        .expect("store");
        let fake = FakeProcessRunner::new();
        let target = DatabaseTarget {
            name: "feedback".to_owned(),
            ..DatabaseTarget::default()
        };
        let runner: Arc<dyn dbvault_exec::ProcessRunner> = Arc::new(fake.clone());
        let dumper = DumpExecutor::new(
            runner.clone(),
            target.clone(),
            ToolPaths::default(),
            ExecLimits::default(),
        );
        let restorer =
            RestoreExecutor::new(runner, target, ToolPaths::default(), ExecLimits::default());
        let audit = audit(tmp.path());
        Fixture {
            _tmp: tmp,
            fake,
            manager: BackupManager::new(store, dumper, restorer, audit),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|dir| Arc::new(SqliteAuditLog::new(dir.join("audit.db")).expect("audit")))
    }

    struct BrokenAuditLog;

    #[async_trait::async_trait]
    impl AuditLog for BrokenAuditLog {
        async fn append(&self, _entry: &AuditEntry) -> anyhow::Result<()> {
            anyhow::bail!("audit table is locked")
        }
        async fn recent(&self, _limit: usize) -> anyhow::Result<Vec<AuditEntry>> {
            anyhow::bail!("audit table is locked")
        }
        async fn for_filename(&self, _filename: &str) -> anyhow::Result<Vec<AuditEntry>> {
            anyhow::bail!("audit table is locked")
        }
    }

    const OLD: &str = "feedback_backup_20240101_020000_manual.sql";

    fn seed(f: &Fixture, name: &str, content: &[u8]) {
        f.manager.store().write(name, content).expect("seed archive");
    }

    async fn entries(f: &Fixture, action: AuditAction) -> Vec<AuditEntry> {
        f.manager
            .audit_trail(100)
            .await
            .expect("audit")
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }

    #[tokio::test]
    async fn create_writes_archive_and_records_checksum() {
        let f = fixture();
        f.fake.push_output("CREATE TABLE t (id INT);");

        let archive = f
            .manager
            .create(ArchiveKind::Manual, "admin")
            .await
            .expect("create");
        assert_eq!(archive.kind, ArchiveKind::Manual);
        assert!(archive.filename.ends_with("_manual.sql"));
        assert_eq!(f.manager.list().expect("list"), vec![archive.clone()]);

        let created = entries(&f, AuditAction::Create).await;
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].status, AuditStatus::Success);
        assert_eq!(created[0].filename, archive.filename);
        assert_eq!(created[0].performed_by, "admin");
        assert_eq!(
            created[0].checksum.as_deref(),
            Some(content_hash(b"CREATE TABLE t (id INT);").as_str())
        );
        assert_eq!(created[0].file_size, Some(24));
    }

    #[tokio::test]
    async fn failed_dump_leaves_no_archive() {
        let f = fixture();
        f.fake.push_failure("Access denied for user");

        let err = f
            .manager
            .create(ArchiveKind::Manual, "admin")
            .await
            .expect_err("dump fails");
        assert!(matches!(err, BackupError::Subprocess { .. }));
        assert!(f.manager.list().expect("list").is_empty());

        let created = entries(&f, AuditAction::Create).await;
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].status, AuditStatus::Failed);
        assert!(created[0]
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("Access denied")));
    }

    #[tokio::test]
    async fn restore_takes_safety_backup_before_dropping() {
        let f = fixture();
        seed(&f, OLD, b"CREATE TABLE old (id INT);");
        f.fake
            .push_output("CREATE TABLE live (id INT);")
            .push_output("")
            .push_output("")
            .push_output("4\n");

        let outcome = f.manager.restore(OLD, "admin", None).await.expect("restore");
        assert_eq!(outcome.tables_restored, 4);
        assert!(outcome.safety_backup_filename.ends_with("_pre_restore.sql"));

        let dumped = f.fake.position("--single-transaction").expect("safety dump");
        let dropped = f.fake.position("DROP DATABASE").expect("drop");
        assert!(dumped < dropped);

        let safety = f
            .manager
            .list()
            .expect("list")
            .into_iter()
            .find(|a| a.filename == outcome.safety_backup_filename)
            .expect("safety archive on disk");
        assert_eq!(safety.kind, ArchiveKind::PreRestore);

        let restores = entries(&f, AuditAction::Restore).await;
        assert_eq!(restores.len(), 1);
        assert_eq!(restores[0].status, AuditStatus::Success);
        assert_eq!(restores[0].tables_restored, Some(4));
        assert_eq!(
            restores[0].safety_backup_filename.as_deref(),
            Some(outcome.safety_backup_filename.as_str())
        );
        assert_eq!(entries(&f, AuditAction::Create).await.len(), 1);
    }

    #[tokio::test]
    async fn restore_is_abandoned_when_safety_backup_fails() {
        let f = fixture();
        seed(&f, OLD, b"dump");
        f.fake.push_failure("mysqldump: Got error: 2002");

        let err = f
            .manager
            .restore(OLD, "admin", None)
            .await
            .expect_err("safety backup fails");
        assert!(matches!(err, BackupError::SafetyBackup(_)));
        assert_eq!(f.fake.calls().len(), 1);
        assert!(f.fake.position("DROP DATABASE").is_none());

        let restores = entries(&f, AuditAction::Restore).await;
        assert_eq!(restores.len(), 1);
        assert_eq!(restores[0].status, AuditStatus::Failed);
        assert!(restores[0].safety_backup_filename.is_none());
    }

    #[tokio::test]
    async fn failed_load_points_at_the_safety_backup() {
        let f = fixture();
        seed(&f, OLD, b"CREATE TABLE broken (");
        f.fake
            .push_output("live data")
            .push_output("")
            .push_failure("ERROR 1064 (42000) at line 1: syntax error");

        let err = f
            .manager
            .restore(OLD, "admin", None)
            .await
            .expect_err("load fails");
        let BackupError::RestoreFailed {
            phase,
            safety_backup,
            ..
        } = &err
        else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(*phase, RestorePhase::Restoring);
        assert!(f.manager.store().resolve(safety_backup).is_ok());

        let restores = entries(&f, AuditAction::Restore).await;
        assert_eq!(restores[0].status, AuditStatus::Failed);
        assert_eq!(
            restores[0].safety_backup_filename.as_deref(),
            Some(safety_backup.as_str())
        );
    }

    #[tokio::test]
    async fn restore_refuses_while_gate_is_held() {
        let f = fixture();
        seed(&f, OLD, b"dump");

        let held = f.manager.gate.read().await;
        let err = f
            .manager
            .restore(OLD, "admin", None)
            .await
            .expect_err("busy");
        assert!(matches!(err, BackupError::Busy));
        drop(held);
        assert!(f.fake.calls().is_empty());

        let restores = entries(&f, AuditAction::Restore).await;
        assert_eq!(restores.len(), 1);
        assert_eq!(restores[0].status, AuditStatus::Failed);
        assert_eq!(restores[0].filename, OLD);
        assert!(restores[0]
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("in progress")));
    }

    #[tokio::test]
    async fn concurrent_creates_get_distinct_archives() {
        let f = fixture();
        f.fake.push_output("first").push_output("second");

        let (a, b) = tokio::join!(
            f.manager.create(ArchiveKind::Manual, "alice"),
            f.manager.create(ArchiveKind::Manual, "bob"),
        );
        let (a, b) = (a.expect("first create"), b.expect("second create"));
        assert_ne!(a.filename, b.filename);
        assert_eq!(f.manager.list().expect("list").len(), 2);

        let created = entries(&f, AuditAction::Create).await;
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|e| e.status == AuditStatus::Success));
        assert!(created.iter().any(|e| e.filename == a.filename));
        assert!(created.iter().any(|e| e.filename == b.filename));
    }

    #[tokio::test]
    async fn safety_backup_steps_around_a_same_second_archive() {
        let f = fixture();
        seed(&f, OLD, b"CREATE TABLE old (id INT);");
        f.fake
            .push_output("earlier")
            .push_output("live")
            .push_output("")
            .push_output("")
            .push_output("2\n");

        let earlier = f
            .manager
            .create(ArchiveKind::PreRestore, "admin")
            .await
            .expect("create");
        let outcome = f.manager.restore(OLD, "admin", None).await.expect("restore");
        assert_ne!(outcome.safety_backup_filename, earlier.filename);

        let on_disk = f.manager.list().expect("list");
        assert_eq!(on_disk.len(), 3);
        let (_, path) = f.manager.store().resolve(&earlier.filename).expect("kept");
        assert_eq!(std::fs::read(path).expect("read"), b"earlier");
    }

    #[tokio::test]
    async fn failed_restore_ends_progress_in_failed() {
        let f = fixture();
        seed(&f, OLD, b"CREATE TABLE broken (");
        f.fake
            .push_output("live")
            .push_output("")
            .push_failure("ERROR 1064 (42000) at line 1");
        let last = std::sync::Mutex::new(None);
        let record = |p: dbvault_core::RestoreProgress| *last.lock().unwrap() = Some(p);

        f.manager
            .restore(OLD, "admin", Some(&record as &ProgressFn<'_>))
            .await
            .expect_err("load fails");
        let last = last.lock().unwrap().clone().expect("progress reported");
        assert_eq!(last.phase, RestorePhase::Failed);
    }

    #[tokio::test]
    async fn unsafe_names_are_rejected_without_audit() {
        let f = fixture();
        for name in ["../../etc/passwd", "", "backup_2024.sql"] {
            assert!(matches!(
                f.manager.delete(name, "admin").await,
                Err(BackupError::InvalidFilename(_))
            ));
            assert!(matches!(
                f.manager.download(name, "admin").await,
                Err(BackupError::InvalidFilename(_))
            ));
            assert!(matches!(
                f.manager.restore(name, "admin", None).await,
                Err(BackupError::InvalidFilename(_))
            ));
        }
        assert!(f.manager.audit_trail(100).await.expect("audit").is_empty());
        assert!(f.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn delete_and_download_are_audited() {
        let f = fixture();
        seed(&f, OLD, b"12345");

        let download = f.manager.download(OLD, "alice").await.expect("download");
        assert_eq!(download.archive.size_bytes, 5);
        assert!(download.path.ends_with(OLD));

        f.manager.delete(OLD, "alice").await.expect("delete");
        assert!(matches!(
            f.manager.delete(OLD, "alice").await,
            Err(BackupError::NotFound(_))
        ));

        let downloads = entries(&f, AuditAction::Download).await;
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].file_size, Some(5));
        let deletes = entries(&f, AuditAction::Delete).await;
        assert_eq!(deletes.len(), 2);
        assert!(deletes.iter().any(|e| e.status == AuditStatus::Failed));
        assert!(deletes.iter().any(|e| e.status == AuditStatus::Success));
    }

    #[tokio::test]
    async fn cleanup_keeps_the_newest_floor() {
        let f = fixture();
        for day in 1..=12 {
            seed(&f, &format!("feedback_backup_202401{day:02}_020000_scheduled.sql"), b"x");
        }

        let decision = f.manager.cleanup(10, 5, SYSTEM_ACTOR).await.expect("cleanup");
        assert_eq!(decision.deleted.len(), 7);
        assert_eq!(decision.kept, 5);

        let left: Vec<String> = f
            .manager
            .list()
            .expect("list")
            .into_iter()
            .map(|a| a.filename)
            .collect();
        assert_eq!(left.len(), 5);
        assert_eq!(left[0], "feedback_backup_20240112_020000_scheduled.sql");
        assert_eq!(left[4], "feedback_backup_20240108_020000_scheduled.sql");
        assert_eq!(entries(&f, AuditAction::Delete).await.len(), 7);
    }

    #[tokio::test]
    async fn cleanup_never_touches_recent_archives() {
        let f = fixture();
        f.fake.push_output("fresh");
        f.manager
            .create(ArchiveKind::Manual, "admin")
            .await
            .expect("create");
        seed(&f, OLD, b"stale");

        let decision = f.manager.cleanup(30, 0, SYSTEM_ACTOR).await.expect("cleanup");
        assert_eq!(decision.deleted, vec![OLD.to_owned()]);
        assert_eq!(decision.kept, 1);
    }

    #[tokio::test]
    async fn cleanup_continues_past_archives_that_vanished() {
        let f = fixture();
        for day in 1..=5 {
            seed(&f, &format!("feedback_backup_202401{day:02}_020000_scheduled.sql"), b"x");
        }
        let listed = f.manager.list().expect("list");
        let gone = "feedback_backup_20240102_020000_scheduled.sql";
        std::fs::remove_file(f.manager.store().dir().join(gone)).expect("remove behind its back");

        let decision = f
            .manager
            .prune(&listed, RetentionPolicy::new(30, 1), SYSTEM_ACTOR)
            .await;
        assert_eq!(
            decision.deleted,
            vec![
                "feedback_backup_20240104_020000_scheduled.sql".to_owned(),
                "feedback_backup_20240103_020000_scheduled.sql".to_owned(),
                "feedback_backup_20240101_020000_scheduled.sql".to_owned(),
            ]
        );
        assert_eq!(decision.kept, 1);

        let left = f.manager.list().expect("list");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].filename, "feedback_backup_20240105_020000_scheduled.sql");

        let deletes = entries(&f, AuditAction::Delete).await;
        assert_eq!(deletes.len(), 4);
        assert_eq!(
            deletes
                .iter()
                .filter(|e| e.status == AuditStatus::Failed)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn history_of_one_archive_includes_its_restores() {
        let f = fixture();
        seed(&f, OLD, b"CREATE TABLE old (id INT);");
        f.fake
            .push_output("live")
            .push_output("")
            .push_output("")
            .push_output("1\n");

        f.manager.download(OLD, "alice").await.expect("download");
        let outcome = f.manager.restore(OLD, "alice", None).await.expect("restore");

        let history = f.manager.audit_for(OLD).await.expect("history");
        let actions: Vec<AuditAction> = history.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Restore, AuditAction::Download]);

        let safety = f
            .manager
            .audit_for(&outcome.safety_backup_filename)
            .await
            .expect("history");
        assert!(safety.iter().any(|e| e.action == AuditAction::Create));
        assert!(safety.iter().any(|e| e.action == AuditAction::Restore));
    }

    #[tokio::test]
    async fn scheduled_run_records_one_summary_entry() {
        let f = fixture();
        seed(&f, OLD, b"stale");
        f.fake.push_output("nightly");

        let run = f
            .manager
            .run_scheduled(Some(RetentionPolicy::new(30, 1)))
            .await;
        let archive = run.archive.expect("scheduled archive");
        assert_eq!(archive.kind, ArchiveKind::Scheduled);
        assert!(run.error.is_none());
        assert_eq!(run.retention.expect("retention").deleted, vec![OLD.to_owned()]);

        let scheduled = entries(&f, AuditAction::Scheduled).await;
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].status, AuditStatus::Success);
        assert_eq!(scheduled[0].filename, archive.filename);
        assert_eq!(scheduled[0].performed_by, SYSTEM_ACTOR);
    }

    #[tokio::test]
    async fn scheduled_run_failure_is_recorded() {
        let f = fixture();
        f.fake.push_timeout();

        let run = f.manager.run_scheduled(None).await;
        assert!(run.archive.is_none());
        assert!(run.error.is_some());

        let scheduled = entries(&f, AuditAction::Scheduled).await;
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].status, AuditStatus::Failed);
    }

    #[tokio::test]
    async fn audit_outage_does_not_fail_operations() {
        let f = fixture_with(|_| Arc::new(BrokenAuditLog));
        f.fake.push_output("dump");

        let archive = f
            .manager
            .create(ArchiveKind::Manual, "admin")
            .await
            .expect("create succeeds without audit");
        f.manager
            .delete(&archive.filename, "admin")
            .await
            .expect("delete succeeds without audit");
        assert!(f.manager.audit_trail(10).await.is_err());
    }
}
