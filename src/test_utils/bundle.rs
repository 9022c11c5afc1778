//! Builder for update bundles in the release layout.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

struct BundleEntry {
    name: String,
    data: Option<Vec<u8>>,
    mode: Option<u32>,
}

/// Builds a zip archive whose entries all sit under one top-level directory,
/// the way release bundles are packaged.
///
/// The top-level directory entry is always written first, so it counts as
/// one archive entry.
///
/// ```rust,no_run
/// use miyoopod_updater::test_utils::BundleBuilder;
///
/// let bundle = BundleBuilder::new("MiyooPod")
///     .file("launch.sh", b"#!/bin/sh\n")
///     .file_with_mode("MiyooPod", b"\x7fELF", 0o755)
///     .dir("themes")
///     .to_bytes();
/// ```
pub struct BundleBuilder {
    root: String,
    entries: Vec<BundleEntry>,
}

impl BundleBuilder {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            entries: vec![BundleEntry {
                name: format!("{root}/"),
                data: None,
                mode: None,
            }],
        }
    }

    /// Adds a file at `rel` below the top-level directory.
    pub fn file(self, rel: &str, data: &[u8]) -> Self {
        let name = format!("{}/{rel}", self.root);
        self.push(name, Some(data.to_vec()), None)
    }

    pub fn file_with_mode(self, rel: &str, data: &[u8], mode: u32) -> Self {
        let name = format!("{}/{rel}", self.root);
        self.push(name, Some(data.to_vec()), Some(mode))
    }

    pub fn dir(self, rel: &str) -> Self {
        let name = format!("{}/{}/", self.root, rel.trim_end_matches('/'));
        self.push(name, None, None)
    }

    /// Adds a file under an exact entry name, for malformed bundles.
    pub fn raw_file(self, name: &str, data: &[u8]) -> Self {
        self.push(name.to_string(), Some(data.to_vec()), None)
    }

    fn push(mut self, name: String, data: Option<Vec<u8>>, mode: Option<u32>) -> Self {
        self.entries.push(BundleEntry { name, data, mode });
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        for entry in &self.entries {
            let mut options =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            if let Some(mode) = entry.mode {
                options = options.unix_permissions(mode);
            }
            match &entry.data {
                None => zip.add_directory(entry.name.as_str(), options).unwrap(),
                Some(data) => {
                    zip.start_file(entry.name.as_str(), options).unwrap();
                    zip.write_all(data).unwrap();
                }
            }
        }

        zip.finish().unwrap().into_inner()
    }

    /// Writes the archive to `path` and returns the path.
    pub fn write(&self, path: &Path) -> PathBuf {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, self.to_bytes()).unwrap();
        path.to_path_buf()
    }
}
