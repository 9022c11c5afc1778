use crate::config::UpdateLayout;
use crate::constants::{BACKUP_COMPLETE_MARKER, IO_BUFFER_SIZE};
use crate::core::BackupError;
use crate::utils::fs::{atomic_copy, to_slash};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One item of a [`BackupSet`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackupEntry {
    /// A single file, relative to the installation root.
    File(String),
    /// A directory whose files (one level deep) are copied.
    FlatDir(String),
}

impl BackupEntry {
    fn rel(&self) -> &str {
        match self {
            Self::File(rel) | Self::FlatDir(rel) => rel,
        }
    }
}

/// The installation paths snapshotted before an install.
///
/// The standard set covers the executable, the launcher, the configuration
/// file and the flat assets directory. Files the bundle will overwrite
/// directly are added with [`with_archive_targets`](Self::with_archive_targets).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSet {
    entries: Vec<BackupEntry>,
}

impl BackupSet {
    #[must_use]
    pub fn standard(layout: &UpdateLayout) -> Self {
        let mut set = Self::default();
        set.push(BackupEntry::File(layout.executable.clone()));
        if let Ok(launcher) = layout.launcher.strip_prefix(&layout.install_root) {
            set.push(BackupEntry::File(to_slash(launcher)));
        }
        set.push(BackupEntry::File(layout.config_file.clone()));
        set.push(BackupEntry::FlatDir(layout.assets_dir.clone()));
        set
    }

    /// Adds installation-relative files, skipping ones already covered.
    #[must_use]
    pub fn with_archive_targets<I>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        for rel in targets {
            if !self.covers(&rel) {
                self.push(BackupEntry::File(rel));
            }
        }
        self
    }

    /// Whether `rel` is copied by this set.
    #[must_use]
    pub fn covers(&self, rel: &str) -> bool {
        self.entries.iter().any(|entry| match entry {
            BackupEntry::File(file) => file == rel,
            BackupEntry::FlatDir(dir) => rel
                .strip_prefix(dir.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .is_some_and(|name| !name.is_empty() && !name.contains('/')),
        })
    }

    #[must_use]
    pub fn entries(&self) -> &[BackupEntry] {
        &self.entries
    }

    fn push(&mut self, entry: BackupEntry) {
        if !entry.rel().is_empty() && !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
    }
}

/// What a successful backup captured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSummary {
    /// Files copied, relative to the installation root
    pub copied: BTreeSet<String>,
    /// Set entries that did not exist in the installation
    pub absent: Vec<String>,
}

/// Snapshots installation files into the backup root before an install.
///
/// The backup root mirrors the installation layout, so restoring is a walk
/// over the backup root. A `.complete` marker is written only after every
/// copy succeeded; a backup without it is never restored.
///
/// # Examples
///
/// ```rust,no_run
/// use miyoopod_updater::upgrade::backup::{BackupManager, BackupSet};
/// use miyoopod_updater::config::UpdaterConfig;
///
/// # fn example() -> anyhow::Result<()> {
/// let layout = UpdaterConfig::default().layout()?;
/// let manager = BackupManager::from_layout(&layout);
/// let summary = manager.backup(&BackupSet::standard(&layout))?;
/// println!("backed up {} files", summary.copied.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BackupManager {
    install_root: PathBuf,
    backup_root: PathBuf,
}

impl BackupManager {
    #[must_use]
    pub const fn new(install_root: PathBuf, backup_root: PathBuf) -> Self {
        Self {
            install_root,
            backup_root,
        }
    }

    #[must_use]
    pub fn from_layout(layout: &UpdateLayout) -> Self {
        Self::new(layout.install_root.clone(), layout.backup_root.clone())
    }

    /// Copies every entry of `set` into a fresh backup root.
    ///
    /// Any stale backup root is removed first. Entries missing from the
    /// installation are recorded as absent; every other failure aborts the
    /// backup, leaving it without its completion marker.
    pub fn backup(&self, set: &BackupSet) -> Result<BackupSummary, BackupError> {
        self.prepare()?;
        info!("Creating backup at {}", self.backup_root.display());

        let mut summary = BackupSummary::default();
        let mut buf = vec![0u8; IO_BUFFER_SIZE];

        for entry in set.entries() {
            let rel = entry.rel();
            let src = self.install_root.join(rel);

            match fs::symlink_metadata(&src) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Backup entry {} does not exist", rel);
                    summary.absent.push(rel.to_string());
                    continue;
                }
                Err(e) => return Err(copy_error(rel, e)),
                Ok(_) => {}
            }

            match entry {
                BackupEntry::File(_) => {
                    self.copy_one(rel, &mut buf)?;
                    summary.copied.insert(rel.to_string());
                }
                BackupEntry::FlatDir(_) => {
                    for name in flat_file_names(&src).map_err(|e| copy_error(rel, e))? {
                        let file_rel = format!("{rel}/{name}");
                        self.copy_one(&file_rel, &mut buf)?;
                        summary.copied.insert(file_rel);
                    }
                }
            }
        }

        write_marker(&self.backup_root).map_err(|source| BackupError::Marker { source })?;
        info!("Backup complete: {} files", summary.copied.len());
        Ok(summary)
    }

    /// Whether the backup root carries its completion marker.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.backup_root.join(BACKUP_COMPLETE_MARKER).is_file()
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.backup_root.exists()
    }

    /// Removes the backup root, logging instead of failing.
    pub fn cleanup(&self) {
        match fs::remove_dir_all(&self.backup_root) {
            Ok(()) => debug!("Removed backup at {}", self.backup_root.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove backup {}: {}", self.backup_root.display(), e),
        }
    }

    #[must_use]
    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    fn prepare(&self) -> Result<(), BackupError> {
        let prepare_error = |source| BackupError::Prepare {
            path: self.backup_root.clone(),
            source,
        };

        match fs::remove_dir_all(&self.backup_root) {
            Ok(()) => warn!("Discarded stale backup at {}", self.backup_root.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(prepare_error(e)),
        }
        fs::create_dir_all(&self.backup_root).map_err(prepare_error)
    }

    fn copy_one(&self, rel: &str, buf: &mut [u8]) -> Result<(), BackupError> {
        let src = self.install_root.join(rel);
        let dst = self.backup_root.join(rel);
        atomic_copy(&src, &dst, buf).map_err(|e| copy_error(rel, e))?;
        debug!("Backed up {}", rel);
        Ok(())
    }
}

fn flat_file_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            debug!("Skipping nested directory {}", entry.path().display());
            continue;
        }
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

fn write_marker(backup_root: &Path) -> io::Result<()> {
    let marker = fs::File::create(backup_root.join(BACKUP_COMPLETE_MARKER))?;
    marker.sync_all()
}

fn copy_error(rel: &str, source: io::Error) -> BackupError {
    BackupError::Copy {
        path: rel.to_string(),
        source,
    }
}
