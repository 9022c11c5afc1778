use crate::config::UpdateLayout;
use crate::constants::{
    BACKUP_COMPLETE_MARKER, INSTALL_JOURNAL_FILE, IO_BUFFER_SIZE, STAGED_SUFFIX, TEMP_SUFFIX,
};
use crate::core::UpdateError;
use crate::upgrade::backup::BackupManager;
use crate::upgrade::install::{InstallJournal, JournalEntry};
use crate::utils::fs::{atomic_copy, remove_file_if_exists};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// What a rollback did. Failures are collected, never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub restored: usize,
    pub removed: usize,
    /// Paths that could not be restored or removed, with the reason
    pub failures: Vec<(PathBuf, String)>,
}

impl RollbackReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// [`UpdateError::RollbackPartial`] if anything failed.
    #[must_use]
    pub fn partial_error(&self) -> Option<UpdateError> {
        (!self.is_complete()).then(|| UpdateError::RollbackPartial {
            failures: self.failures.len(),
        })
    }

    fn fail(&mut self, path: &Path, err: impl ToString) {
        let reason = err.to_string();
        warn!("Rollback could not handle {}: {}", path.display(), reason);
        self.failures.push((path.to_path_buf(), reason));
    }
}

/// Returns the installation to its pre-attempt state after a failed install.
///
/// Rollback is the last line of defence, so it never stops early: every
/// step runs, every failure is recorded in the [`RollbackReport`], and the
/// best reachable state is left in place.
///
/// 1. Copy every file in the backup root back over the installation
/// 2. Delete files the install journal says were created
/// 3. Sweep `*.new` and `*.tmp` leftovers from the installation tree
/// 4. Delete directories the journal says were created, if now empty
/// 5. Remove the backup root
#[derive(Debug, Clone)]
pub struct RollbackManager {
    install_root: PathBuf,
    backup_root: PathBuf,
}

impl RollbackManager {
    #[must_use]
    pub fn from_layout(layout: &UpdateLayout) -> Self {
        Self {
            install_root: layout.install_root.clone(),
            backup_root: layout.backup_root.clone(),
        }
    }

    pub fn rollback(&self, journal: &InstallJournal) -> RollbackReport {
        warn!("Rolling back installation at {}", self.install_root.display());
        let mut report = RollbackReport::default();

        self.restore_backup(&mut report);

        for entry in journal.entries().iter().rev() {
            if let JournalEntry::File(rel) = entry {
                let path = self.install_root.join(rel);
                match remove_file_if_exists(&path) {
                    Ok(true) => {
                        debug!("Removed new file {}", rel);
                        report.removed += 1;
                    }
                    Ok(false) => {}
                    Err(e) => report.fail(&path, e),
                }
            }
        }

        self.sweep_leftovers(&mut report);

        for entry in journal.entries().iter().rev() {
            if let JournalEntry::Dir(rel) = entry {
                let path = self.install_root.join(rel);
                match fs::remove_dir(&path) {
                    Ok(()) => report.removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => debug!("Leaving directory {}: {}", rel, e),
                }
            }
        }

        match fs::remove_dir_all(&self.backup_root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => report.fail(&self.backup_root, e),
        }

        if report.is_complete() {
            info!(
                "Rollback complete: {} restored, {} removed",
                report.restored, report.removed
            );
        } else if let Some(err) = report.partial_error() {
            error!("{}", err);
        }
        report
    }

    /// Finishes or discards whatever a crashed previous run left behind.
    ///
    /// A backup carrying its completion marker means the previous run died
    /// while installing, so it is rolled back with the persisted journal.
    /// A backup without the marker never protected anything and is deleted.
    pub fn recover_interrupted(layout: &UpdateLayout) -> Option<RollbackReport> {
        let backup = BackupManager::from_layout(layout);
        if !backup.exists() {
            return None;
        }

        if !backup.is_complete() {
            warn!("Discarding incomplete backup from an interrupted run");
            backup.cleanup();
            return None;
        }

        warn!("Previous install was interrupted; restoring backup");
        let journal_path = layout.backup_root.join(INSTALL_JOURNAL_FILE);
        let journal = InstallJournal::load(&journal_path).unwrap_or_else(|e| {
            warn!("Cannot read install journal {}: {}", journal_path.display(), e);
            InstallJournal::in_memory()
        });
        Some(Self::from_layout(layout).rollback(&journal))
    }

    fn restore_backup(&self, report: &mut RollbackReport) {
        let mut buf = vec![0u8; IO_BUFFER_SIZE];

        for entry in WalkDir::new(&self.backup_root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(&self.backup_root).to_path_buf();
                    report.fail(&path, e);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }

            let Ok(rel) = entry.path().strip_prefix(&self.backup_root) else {
                continue;
            };
            if rel == Path::new(BACKUP_COMPLETE_MARKER) || rel == Path::new(INSTALL_JOURNAL_FILE) {
                continue;
            }

            let target = self.install_root.join(rel);
            match atomic_copy(entry.path(), &target, &mut buf) {
                Ok(_) => {
                    debug!("Restored {}", rel.display());
                    report.restored += 1;
                }
                Err(e) => report.fail(&target, e),
            }
        }
    }

    fn sweep_leftovers(&self, report: &mut RollbackReport) {
        let staged = format!(".{STAGED_SUFFIX}");
        let temp = format!(".{TEMP_SUFFIX}");
        let backup_root = self.backup_root.clone();

        let walker = WalkDir::new(&self.install_root)
            .min_depth(1)
            .into_iter()
            .filter_entry(move |e| e.path() != backup_root);

        for entry in walker.filter_map(Result::ok) {
            if entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !name.ends_with(&staged) && !name.ends_with(&temp) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!("Removed leftover {}", entry.path().display());
                    report.removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => report.fail(entry.path(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpdaterConfig;
    use crate::test_utils::snapshot_tree;
    use crate::upgrade::backup::BackupSet;
    use tempfile::TempDir;

    fn setup() -> (TempDir, UpdateLayout) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("app");
        fs::create_dir_all(root.join("assets")).unwrap();
        fs::create_dir_all(root.join("libs")).unwrap();
        fs::write(root.join("MiyooPod"), b"v1 binary").unwrap();
        fs::write(root.join("launch.sh"), b"v1 launcher").unwrap();
        fs::write(root.join("assets/x.ttf"), b"v1 font").unwrap();
        fs::write(root.join("libs/audio.so"), b"v1 lib").unwrap();
        let layout = UpdaterConfig {
            install_root: Some(root.to_string_lossy().into_owned()),
            ..UpdaterConfig::default()
        }
        .layout()
        .unwrap();
        (temp, layout)
    }

    fn damage(layout: &UpdateLayout, journal: &mut InstallJournal) {
        let root = &layout.install_root;
        fs::write(root.join("launch.sh"), b"v2 launcher").unwrap();
        fs::write(root.join("assets/x.ttf"), b"half a fo").unwrap();
        journal.record(JournalEntry::File("libs/audio.so.new".into())).unwrap();
        fs::write(root.join("libs/audio.so.new"), b"v2 lib").unwrap();
        journal.record(JournalEntry::Dir("themes".into())).unwrap();
        fs::create_dir(root.join("themes")).unwrap();
        journal.record(JournalEntry::File("themes/bg.png".into())).unwrap();
        fs::write(root.join("themes/bg.png"), b"png").unwrap();
        fs::write(root.join("assets/y.ttf.tmp"), b"partial").unwrap();
    }

    #[test]
    fn test_rollback_restores_pre_attempt_tree() {
        let (_temp, layout) = setup();
        let before = snapshot_tree(&layout.install_root);

        BackupManager::from_layout(&layout).backup(&BackupSet::standard(&layout)).unwrap();
        let mut journal = InstallJournal::in_memory();
        damage(&layout, &mut journal);

        let report = RollbackManager::from_layout(&layout).rollback(&journal);

        assert!(report.is_complete(), "{:?}", report.failures);
        assert_eq!(snapshot_tree(&layout.install_root), before);
        assert!(!layout.backup_root.exists());
    }

    #[test]
    fn test_recover_interrupted_with_marker() {
        let (_temp, layout) = setup();
        let before = snapshot_tree(&layout.install_root);

        BackupManager::from_layout(&layout).backup(&BackupSet::standard(&layout)).unwrap();
        let mut journal =
            InstallJournal::create(&layout.backup_root.join(INSTALL_JOURNAL_FILE)).unwrap();
        damage(&layout, &mut journal);
        drop(journal);

        let report = RollbackManager::recover_interrupted(&layout).unwrap();
        assert!(report.is_complete());
        assert_eq!(snapshot_tree(&layout.install_root), before);
    }

    #[test]
    fn test_recover_discards_incomplete_backup() {
        let (_temp, layout) = setup();
        fs::create_dir_all(&layout.backup_root).unwrap();
        fs::write(layout.backup_root.join("launch.sh"), b"truncated").unwrap();

        assert!(RollbackManager::recover_interrupted(&layout).is_none());
        assert!(!layout.backup_root.exists());
        assert_eq!(fs::read(layout.install_root.join("launch.sh")).unwrap(), b"v1 launcher");
    }

    #[test]
    fn test_recover_without_backup_is_noop() {
        let (_temp, layout) = setup();
        assert!(RollbackManager::recover_interrupted(&layout).is_none());
    }

    #[test]
    fn test_partial_error() {
        let mut report = RollbackReport::default();
        assert!(report.partial_error().is_none());
        report.failures.push((PathBuf::from("x"), "denied".into()));
        assert!(matches!(
            report.partial_error(),
            Some(UpdateError::RollbackPartial { failures: 1 })
        ));
    }
}
