use crate::config::UpdateLayout;
use crate::constants::STAGED_SUFFIX;
use crate::utils::fs::strip_suffix;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Outcome of a staged-file swap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapReport {
    /// Originals that now carry the new content
    pub swapped: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

/// Moves staged `<name>.new` files over their originals.
///
/// This is the launcher's job after a successful update: it runs once the
/// updater has exited, so nothing has the originals mapped any more. Rename
/// keeps the staged file's mode.
#[derive(Debug, Clone)]
pub struct StagedSwap {
    install_root: PathBuf,
    backup_root: PathBuf,
}

impl StagedSwap {
    #[must_use]
    pub fn from_layout(layout: &UpdateLayout) -> Self {
        Self {
            install_root: layout.install_root.clone(),
            backup_root: layout.backup_root.clone(),
        }
    }

    /// Every staged file under the installation root, backup excluded.
    #[must_use]
    pub fn find(&self) -> Vec<PathBuf> {
        let backup_root = self.backup_root.clone();
        let mut staged: Vec<PathBuf> = WalkDir::new(&self.install_root)
            .min_depth(1)
            .into_iter()
            .filter_entry(move |e| e.path() != backup_root)
            .filter_map(Result::ok)
            .filter(|e| !e.file_type().is_dir())
            .map(walkdir::DirEntry::into_path)
            .filter(|p| strip_suffix(p, STAGED_SUFFIX).is_some())
            .collect();
        staged.sort();
        staged
    }

    pub fn swap(&self) -> SwapReport {
        let mut report = SwapReport::default();

        for staged in self.find() {
            let Some(target) = strip_suffix(&staged, STAGED_SUFFIX) else {
                continue;
            };
            match fs::rename(&staged, &target) {
                Ok(()) => {
                    info!("Swapped in {}", target.display());
                    report.swapped.push(target);
                }
                Err(e) => {
                    warn!("Failed to swap {}: {}", staged.display(), e);
                    report.failures.push((staged, e.to_string()));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpdaterConfig;
    use tempfile::TempDir;

    fn layout(temp: &TempDir) -> UpdateLayout {
        UpdaterConfig {
            install_root: Some(temp.path().to_string_lossy().into_owned()),
            ..UpdaterConfig::default()
        }
        .layout()
        .unwrap()
    }

    #[test]
    fn test_swap_replaces_originals() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let libs = temp.path().join("libs");
        fs::create_dir_all(&libs).unwrap();
        fs::write(libs.join("audio.so"), b"old").unwrap();
        fs::write(libs.join("audio.so.new"), b"new").unwrap();
        fs::write(temp.path().join("updater.new"), b"new updater").unwrap();
        fs::write(temp.path().join("renew"), b"not staged").unwrap();

        let report = StagedSwap::from_layout(&layout).swap();

        assert!(report.failures.is_empty());
        assert_eq!(report.swapped.len(), 2);
        assert_eq!(fs::read(libs.join("audio.so")).unwrap(), b"new");
        assert!(!libs.join("audio.so.new").exists());
        assert_eq!(fs::read(temp.path().join("updater")).unwrap(), b"new updater");
        assert!(temp.path().join("renew").exists());
    }

    #[test]
    fn test_backup_root_is_skipped() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        fs::create_dir_all(&layout.backup_root).unwrap();
        fs::write(layout.backup_root.join("x.new"), b"backup").unwrap();

        assert!(StagedSwap::from_layout(&layout).find().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let staged = temp.path().join("updater.new");
        fs::write(&staged, b"bin").unwrap();
        fs::set_permissions(&staged, fs::Permissions::from_mode(0o755)).unwrap();

        StagedSwap::from_layout(&layout).swap();

        let mode = fs::metadata(temp.path().join("updater")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
