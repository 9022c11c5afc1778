//! Bundle extraction onto the live installation.
//!
//! A bundle wraps its payload in one top-level directory (`MiyooPod/…`),
//! which is stripped. Every file is written as `<target>.tmp`, synced,
//! given its recorded mode and renamed into place, so an interruption
//! leaves at most one `.tmp` per in-flight file.
//!
//! Files the running process has mapped cannot be overwritten safely. Those
//! are written beside the original as `<target>.new`, and the launcher swaps
//! them in after this process has exited (see [`crate::upgrade::staged`]).

use crate::config::UpdateLayout;
use crate::constants::{DEFAULT_FILE_MODE, IO_BUFFER_SIZE, STAGED_SUFFIX, TEMP_SUFFIX};
use crate::core::InstallError;
use crate::utils::fs::{copy_with_buffer, is_safe_path, normalize_path, to_slash, with_suffix};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Decides which installation files must be staged instead of overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InUseResources {
    prefixes: Vec<String>,
    files: BTreeSet<String>,
}

impl InUseResources {
    pub fn new<P, F>(prefixes: P, files: F) -> Self
    where
        P: IntoIterator<Item = String>,
        F: IntoIterator<Item = String>,
    {
        Self {
            prefixes: prefixes.into_iter().collect(),
            files: files.into_iter().collect(),
        }
    }

    /// Configured prefixes, the updater executable, and whatever this
    /// process actually has mapped from the installation root.
    #[must_use]
    pub fn detect(layout: &UpdateLayout) -> Self {
        let mut files = mapped_files(&layout.install_root);
        files.insert(layout.updater_executable.clone());
        Self::new(layout.staged_prefixes.iter().cloned(), files)
    }

    /// Whether `rel` (installation-relative, `/`-separated) is in use.
    #[must_use]
    pub fn is_in_use(&self, rel: &str) -> bool {
        self.files.contains(rel) || self.prefixes.iter().any(|p| rel.starts_with(p.as_str()))
    }
}

fn mapped_files(install_root: &Path) -> BTreeSet<String> {
    let mut files = BTreeSet::new();

    #[cfg(target_os = "linux")]
    match fs::read_to_string("/proc/self/maps") {
        Ok(maps) => files.extend(parse_maps(&maps, install_root)),
        Err(e) => debug!("Cannot read /proc/self/maps: {}", e),
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Ok(rel) = exe.strip_prefix(install_root) {
            files.insert(to_slash(rel));
        }
    }

    files
}

/// Extracts installation-relative paths from `/proc/<pid>/maps` content.
#[must_use]
pub fn parse_maps(maps: &str, install_root: &Path) -> BTreeSet<String> {
    maps.lines()
        .filter_map(|line| {
            // address perms offset dev inode pathname
            let path = line.splitn(6, char::is_whitespace).nth(5)?.trim();
            let path = path.strip_suffix(" (deleted)").unwrap_or(path);
            if !path.starts_with('/') {
                return None;
            }
            Path::new(path).strip_prefix(install_root).ok().map(to_slash)
        })
        .filter(|rel| !rel.is_empty())
        .collect()
}

/// A path the installer created that did not exist before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    File(String),
    Dir(String),
}

/// Write-ahead record of everything an install created.
///
/// Entries are appended and synced before the path is created, so after a
/// crash the journal is a superset of what exists. Rollback deletes these
/// paths; restoring the backup alone cannot remove files that are new in
/// the bundle.
#[derive(Debug, Default)]
pub struct InstallJournal {
    entries: Vec<JournalEntry>,
    sink: Option<File>,
}

impl InstallJournal {
    /// A journal that is not persisted.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Starts an empty journal persisted at `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        let sink = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            entries: Vec::new(),
            sink: Some(sink),
        })
    }

    /// Reads a persisted journal. A missing file is an empty journal.
    pub fn load(path: &Path) -> io::Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            match line.split_once(' ') {
                Some(("F", rel)) => entries.push(JournalEntry::File(rel.to_string())),
                Some(("D", rel)) => entries.push(JournalEntry::Dir(rel.to_string())),
                // A torn final line from a crash mid-append
                _ => warn!("Ignoring malformed journal line: {:?}", line),
            }
        }
        Ok(Self {
            entries,
            sink: None,
        })
    }

    pub fn record(&mut self, entry: JournalEntry) -> io::Result<()> {
        if let Some(sink) = &mut self.sink {
            let line = match &entry {
                JournalEntry::File(rel) => format!("F {rel}\n"),
                JournalEntry::Dir(rel) => format!("D {rel}\n"),
            };
            sink.write_all(line.as_bytes())?;
            sink.sync_data()?;
        }
        self.entries.push(entry);
        Ok(())
    }

    #[must_use]
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What to do with one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryAction {
    Skip(&'static str),
    Dir(String),
    File { rel: String, staged: bool },
}

/// Summary of a bundle before extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallPreview {
    pub entries: usize,
    /// Existing files the install will overwrite in place
    pub overwrites: Vec<String>,
}

/// Summary of a finished extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub written: Vec<String>,
    /// Relative paths of originals that received a `.new` sibling
    pub staged: Vec<String>,
    pub skipped: usize,
}

/// Unpacks bundles onto the installation root.
#[derive(Debug, Clone)]
pub struct Installer {
    layout: UpdateLayout,
    in_use: InUseResources,
}

impl Installer {
    #[must_use]
    pub fn new(layout: &UpdateLayout, in_use: InUseResources) -> Self {
        Self {
            layout: layout.clone(),
            in_use,
        }
    }

    /// Lists the entry count and the existing files the bundle overwrites,
    /// without writing anything.
    pub fn preview(&self, archive: &Path) -> Result<InstallPreview, InstallError> {
        let zip = open_archive(archive)?;
        let mut preview = InstallPreview {
            entries: zip.len(),
            overwrites: Vec::new(),
        };

        for name in zip.file_names() {
            let is_dir = name.ends_with('/');
            if let EntryAction::File { rel, staged: false } = self.classify(name, is_dir) {
                if self.layout.target(&rel).is_file() {
                    preview.overwrites.push(rel);
                }
            }
        }
        preview.overwrites.sort();
        preview.overwrites.dedup();
        Ok(preview)
    }

    /// Extracts `archive` onto the installation root.
    ///
    /// `progress(done, total)` counts archive entries. Every file and
    /// directory created is recorded in `journal` first.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Entry`] naming the first entry that failed;
    /// nothing is undone here, the caller owns rollback.
    pub fn install<F>(
        &self,
        archive: &Path,
        journal: &mut InstallJournal,
        mut progress: F,
    ) -> Result<InstallReport, InstallError>
    where
        F: FnMut(usize, usize),
    {
        let mut zip = open_archive(archive)?;
        let total = zip.len();
        let mut buf = vec![0u8; IO_BUFFER_SIZE];
        let mut report = InstallReport::default();

        info!("Installing {} entries into {}", total, self.layout.install_root.display());

        for index in 0..total {
            let mut entry = zip.by_index(index)?;
            let name = entry.name().to_string();

            match self.classify(&name, entry.is_dir()) {
                EntryAction::Skip(reason) => {
                    debug!("Skipping {:?}: {}", name, reason);
                    report.skipped += 1;
                }
                EntryAction::Dir(rel) => {
                    self.create_dirs(&rel, journal).map_err(|e| entry_error(&rel, e))?;
                }
                EntryAction::File { rel, staged } => {
                    let mode = entry
                        .unix_mode()
                        .map(|mode| mode & 0o7777)
                        .filter(|mode| *mode != 0)
                        .unwrap_or(DEFAULT_FILE_MODE);
                    self.write_file(&rel, staged, mode, &mut entry, journal, &mut buf)
                        .map_err(|e| entry_error(&rel, e))?;
                    if staged {
                        debug!("Staged {}.{}", rel, STAGED_SUFFIX);
                        report.staged.push(rel);
                    } else {
                        report.written.push(rel);
                    }
                }
            }

            progress(index + 1, total);
        }

        info!(
            "Installed {} files, staged {}, skipped {}",
            report.written.len(),
            report.staged.len(),
            report.skipped
        );
        Ok(report)
    }

    fn classify(&self, name: &str, is_dir: bool) -> EntryAction {
        let Some((_, rest)) = name.split_once('/') else {
            return EntryAction::Skip("outside bundle directory");
        };
        let rel = rest.trim_end_matches('/');
        if rel.is_empty() {
            return EntryAction::Skip("bundle directory");
        }
        if !is_safe_path(&self.layout.install_root, Path::new(rel)) {
            warn!("Skipping archive entry outside installation: {}", name);
            return EntryAction::Skip("path traversal");
        }
        // Everything below decides on the resolved destination
        let rel = to_slash(&normalize_path(Path::new(rel)));
        if rel.is_empty() {
            return EntryAction::Skip("bundle directory");
        }
        if self.layout.is_backup_path(&rel) {
            warn!("Skipping archive entry inside backup directory: {}", name);
            return EntryAction::Skip("backup directory");
        }

        if is_dir {
            EntryAction::Dir(rel)
        } else {
            let staged = self.in_use.is_in_use(&rel);
            EntryAction::File { rel, staged }
        }
    }

    /// Creates `rel` and its missing parents, journaling each one.
    fn create_dirs(&self, rel: &str, journal: &mut InstallJournal) -> io::Result<()> {
        let mut current = PathBuf::new();
        for part in Path::new(rel).components() {
            current.push(part);
            let path = self.layout.install_root.join(&current);
            match fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => continue,
                Ok(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} exists and is not a directory", current.display()),
                    ));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            journal.record(JournalEntry::Dir(to_slash(&current)))?;
            fs::create_dir(&path)?;
        }
        Ok(())
    }

    fn write_file<R: io::Read>(
        &self,
        rel: &str,
        staged: bool,
        mode: u32,
        content: &mut R,
        journal: &mut InstallJournal,
        buf: &mut [u8],
    ) -> io::Result<()> {
        if let Some(parent) = Path::new(rel).parent() {
            if !parent.as_os_str().is_empty() {
                self.create_dirs(&to_slash(parent), journal)?;
            }
        }

        let final_rel = if staged {
            format!("{rel}.{STAGED_SUFFIX}")
        } else {
            rel.to_string()
        };
        let final_path = self.layout.target(&final_rel);
        if fs::symlink_metadata(&final_path).is_err() {
            journal.record(JournalEntry::File(final_rel))?;
        }

        let tmp = with_suffix(&final_path, TEMP_SUFFIX);
        let written = write_atomically(&tmp, &final_path, mode, content, buf);
        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written
    }
}

fn write_atomically<R: io::Read>(
    tmp: &Path,
    final_path: &Path,
    mode: u32,
    content: &mut R,
    buf: &mut [u8],
) -> io::Result<()> {
    let mut out = File::create(tmp)?;
    copy_with_buffer(content, &mut out, buf)?;
    out.sync_all()?;
    drop(out);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    fs::rename(tmp, final_path)
}

fn open_archive(archive: &Path) -> Result<ZipArchive<File>, InstallError> {
    let file = File::open(archive).map_err(zip::result::ZipError::Io)?;
    Ok(ZipArchive::new(file)?)
}

fn entry_error(rel: &str, source: io::Error) -> InstallError {
    InstallError::Entry {
        path: rel.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpdaterConfig;
    use crate::test_utils::BundleBuilder;
    use tempfile::TempDir;

    fn setup() -> (TempDir, UpdateLayout) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("app");
        fs::create_dir_all(&root).unwrap();
        let layout = UpdaterConfig {
            install_root: Some(root.to_string_lossy().into_owned()),
            ..UpdaterConfig::default()
        }
        .layout()
        .unwrap();
        (temp, layout)
    }

    fn installer(layout: &UpdateLayout) -> Installer {
        Installer::new(
            layout,
            InUseResources::new(vec!["libs/".to_string()], vec!["updater".to_string()]),
        )
    }

    #[test]
    fn test_strips_bundle_directory_and_stages_libs() {
        let (temp, layout) = setup();
        let root = &layout.install_root;
        fs::create_dir_all(root.join("libs")).unwrap();
        fs::write(root.join("libs/audio.so"), b"old lib").unwrap();
        fs::write(root.join("launch.sh"), b"old launcher").unwrap();

        let bundle = BundleBuilder::new("MiyooPod")
            .file("launch.sh", b"new launcher")
            .file("assets/x.ttf", b"new font")
            .file("libs/audio.so", b"new lib")
            .file("updater", b"new updater")
            .write(&temp.path().join("bundle.zip"));

        let mut journal = InstallJournal::in_memory();
        let report = installer(&layout).install(&bundle, &mut journal, |_, _| {}).unwrap();

        assert_eq!(fs::read(root.join("launch.sh")).unwrap(), b"new launcher");
        assert_eq!(fs::read(root.join("assets/x.ttf")).unwrap(), b"new font");
        assert_eq!(fs::read(root.join("libs/audio.so")).unwrap(), b"old lib");
        assert_eq!(fs::read(root.join("libs/audio.so.new")).unwrap(), b"new lib");
        assert!(root.join("updater.new").exists());
        assert!(!root.join("updater").exists());
        assert_eq!(report.staged, vec!["libs/audio.so", "updater"]);
        assert!(!root.join("MiyooPod").exists());
    }

    #[test]
    fn test_traversal_and_root_entries_skipped() {
        let (temp, layout) = setup();
        let bundle = BundleBuilder::new("MiyooPod")
            .raw_file("top-level.txt", b"root entry")
            .raw_file("MiyooPod/../../escape.txt", b"evil")
            .raw_file("MiyooPod/.miyoopod_backup/launch.sh", b"poison")
            .file("ok.txt", b"fine")
            .write(&temp.path().join("bundle.zip"));

        let mut journal = InstallJournal::in_memory();
        let report = installer(&layout).install(&bundle, &mut journal, |_, _| {}).unwrap();

        assert!(layout.install_root.join("ok.txt").exists());
        assert!(!temp.path().join("escape.txt").exists());
        assert!(!layout.install_root.join("top-level.txt").exists());
        assert!(!layout.backup_root.exists());
        // bundle dir + top-level + traversal + backup
        assert_eq!(report.skipped, 4);
    }

    #[test]
    fn test_inner_parent_components_resolve_to_destination() {
        let (temp, layout) = setup();
        let root = &layout.install_root;
        fs::write(root.join("launch.sh"), b"old launcher").unwrap();
        fs::write(root.join("config.json"), b"old config").unwrap();
        let bundle = BundleBuilder::new("MiyooPod")
            .raw_file("MiyooPod/x/../launch.sh", b"new launcher")
            .raw_file("MiyooPod/libs/../config.json", b"new config")
            .raw_file("MiyooPod/assets/../.miyoopod_backup/launch.sh", b"poison")
            .write(&temp.path().join("bundle.zip"));

        let installer = installer(&layout);
        let preview = installer.preview(&bundle).unwrap();
        assert_eq!(preview.overwrites, vec!["config.json", "launch.sh"]);

        let mut journal = InstallJournal::in_memory();
        let report = installer.install(&bundle, &mut journal, |_, _| {}).unwrap();

        assert_eq!(fs::read(root.join("launch.sh")).unwrap(), b"new launcher");
        assert_eq!(fs::read(root.join("config.json")).unwrap(), b"new config");
        assert!(!root.join("x").exists());
        assert!(!root.join("libs/config.json.new").exists());
        assert!(report.staged.is_empty());
        assert!(!layout.backup_root.exists());
        assert!(journal.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_modes_applied() {
        use std::os::unix::fs::PermissionsExt;

        let (temp, layout) = setup();
        let bundle = BundleBuilder::new("MiyooPod")
            .file_with_mode("MiyooPod", b"\x7fELF", 0o755)
            .file("config.json", b"{}")
            .write(&temp.path().join("bundle.zip"));

        let mut journal = InstallJournal::in_memory();
        installer(&layout).install(&bundle, &mut journal, |_, _| {}).unwrap();

        let mode = |rel: &str| {
            fs::metadata(layout.install_root.join(rel)).unwrap().permissions().mode() & 0o777
        };
        assert_eq!(mode("MiyooPod"), 0o755);
        assert_eq!(mode("config.json"), 0o644);
    }

    #[test]
    fn test_journal_records_only_new_paths() {
        let (temp, layout) = setup();
        fs::write(layout.install_root.join("launch.sh"), b"old").unwrap();
        let bundle = BundleBuilder::new("MiyooPod")
            .file("launch.sh", b"new")
            .dir("themes")
            .file("themes/dark/bg.png", b"png")
            .write(&temp.path().join("bundle.zip"));

        let journal_path = temp.path().join("journal");
        let mut journal = InstallJournal::create(&journal_path).unwrap();
        installer(&layout).install(&bundle, &mut journal, |_, _| {}).unwrap();

        let expected = vec![
            JournalEntry::Dir("themes".into()),
            JournalEntry::Dir("themes/dark".into()),
            JournalEntry::File("themes/dark/bg.png".into()),
        ];
        assert_eq!(journal.entries(), expected.as_slice());
        assert_eq!(InstallJournal::load(&journal_path).unwrap().entries(), expected.as_slice());
    }

    #[test]
    fn test_failing_entry_is_named() {
        let (temp, layout) = setup();
        // A directory where a file should go makes the final rename fail
        fs::create_dir_all(layout.install_root.join("assets/x.ttf")).unwrap();
        let bundle = BundleBuilder::new("MiyooPod")
            .file("launch.sh", b"new")
            .file("assets/x.ttf", b"font")
            .write(&temp.path().join("bundle.zip"));

        let mut journal = InstallJournal::in_memory();
        let err = installer(&layout).install(&bundle, &mut journal, |_, _| {}).unwrap_err();

        assert_eq!(err.entry_path(), Some("assets/x.ttf"));
        assert!(!layout.install_root.join("assets/x.ttf.tmp").exists());
    }

    #[test]
    fn test_progress_counts_entries() {
        let (temp, layout) = setup();
        let bundle = BundleBuilder::new("MiyooPod")
            .file("a", b"a")
            .file("b", b"b")
            .write(&temp.path().join("bundle.zip"));

        let mut seen = Vec::new();
        let mut journal = InstallJournal::in_memory();
        installer(&layout)
            .install(&bundle, &mut journal, |done, total| seen.push((done, total)))
            .unwrap();

        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn test_preview_lists_overwrites() {
        let (temp, layout) = setup();
        fs::write(layout.install_root.join("launch.sh"), b"old").unwrap();
        fs::create_dir_all(layout.install_root.join("libs")).unwrap();
        fs::write(layout.install_root.join("libs/audio.so"), b"old").unwrap();
        let bundle = BundleBuilder::new("MiyooPod")
            .file("launch.sh", b"new")
            .file("libs/audio.so", b"new")
            .file("brand-new.txt", b"new")
            .write(&temp.path().join("bundle.zip"));

        let preview = installer(&layout).preview(&bundle).unwrap();
        assert_eq!(preview.entries, 4);
        assert_eq!(preview.overwrites, vec!["launch.sh".to_string()]);
    }

    #[test]
    fn test_not_a_zip() {
        let (temp, layout) = setup();
        let bogus = temp.path().join("bundle.zip");
        fs::write(&bogus, b"definitely not a zip").unwrap();

        let mut journal = InstallJournal::in_memory();
        let err = installer(&layout).install(&bogus, &mut journal, |_, _| {}).unwrap_err();
        assert!(matches!(err, InstallError::Archive(_)));
    }

    #[test]
    fn test_parse_maps() {
        let maps = "\
00400000-00452000 r-xp 00000000 08:02 173521      /mnt/SDCARD/App/MiyooPod/updater
7f2c4000-7f2c5000 r-xp 00000000 08:02 173522      /mnt/SDCARD/App/MiyooPod/libs/libSDL2.so (deleted)
7f2c6000-7f2c7000 r-xp 00000000 08:02 100         /lib/libc.so.6
7fff0000-7fff1000 rw-p 00000000 00:00 0           [stack]
7fff2000-7fff3000 rw-p 00000000 00:00 0
";
        let mapped = parse_maps(maps, Path::new("/mnt/SDCARD/App/MiyooPod"));
        let expected: BTreeSet<String> =
            ["libs/libSDL2.so", "updater"].iter().map(|s| (*s).to_string()).collect();
        assert_eq!(mapped, expected);
    }

    #[test]
    fn test_in_use_prefix_and_file() {
        let in_use = InUseResources::new(vec!["libs/".to_string()], vec!["updater".to_string()]);
        assert!(in_use.is_in_use("libs/audio.so"));
        assert!(in_use.is_in_use("updater"));
        assert!(!in_use.is_in_use("updater.sh"));
        assert!(!in_use.is_in_use("assets/libs/x"));
    }

    #[test]
    fn test_load_ignores_torn_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("journal");
        fs::write(&path, "F a.txt\nD themes\nF").unwrap();

        let journal = InstallJournal::load(&path).unwrap();
        assert_eq!(journal.entries().len(), 2);
        assert!(InstallJournal::load(&temp.path().join("missing")).unwrap().is_empty());
    }
}
