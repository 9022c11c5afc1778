//! A throwaway installation for end-to-end update runs.

use crate::config::{UpdateLayout, UpdaterConfig};
use crate::upgrade::fetch::FetchTool;
use crate::upgrade::plan::{Checksum, UpdatePlan};
use crate::upgrade::status::UpdateStatus;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::bundle::BundleBuilder;

/// Files of the "v1" installation every fixture starts from.
pub const V1_FILES: &[(&str, &[u8])] = &[
    ("MiyooPod", b"v1 binary"),
    ("launch.sh", b"#!/bin/sh\necho v1\n"),
    ("config.json", b"{\"version\":\"1.0.0\"}"),
    ("assets/font.ttf", b"v1 font"),
    ("assets/icon.png", b"v1 icon"),
    ("libs/audio.so", b"v1 lib"),
];

/// A temporary directory holding an installation root, a data directory and
/// a "server" directory that bundles are published to.
///
/// Downloads go through `cp`, so plan URLs are plain paths.
pub struct InstallFixture {
    pub temp_dir: TempDir,
    pub install_root: PathBuf,
    pub data_dir: PathBuf,
    pub server_dir: PathBuf,
}

impl InstallFixture {
    pub fn new() -> Self {
        super::init_test_logging(None);

        let temp_dir = TempDir::new().unwrap();
        let install_root = temp_dir.path().join("MiyooPod.pak");
        let data_dir = temp_dir.path().join("data");
        let server_dir = temp_dir.path().join("server");
        for dir in [&install_root, &data_dir, &server_dir] {
            fs::create_dir_all(dir).unwrap();
        }

        Self {
            temp_dir,
            install_root,
            data_dir,
            server_dir,
        }
    }

    /// A fixture with the v1 installation in place.
    pub fn with_v1() -> Self {
        let fixture = Self::new();
        for (rel, data) in V1_FILES {
            fixture.write(rel, data);
        }
        fixture
    }

    /// Configuration pointing every location into the fixture, with fast
    /// polling and no message pause.
    pub fn config(&self) -> UpdaterConfig {
        UpdaterConfig {
            install_root: Some(self.install_root.to_string_lossy().into_owned()),
            data_dir: self.data_dir.to_string_lossy().into_owned(),
            plan_file: "update_request.json".to_string(),
            status_file: "update_status.json".to_string(),
            poll_interval_ms: 5,
            progress_interval_ms: 10,
            message_pause_ms: 0,
            input_device: self.temp_dir.path().join("no-input").to_string_lossy().into_owned(),
            fetch_tools: vec![local_fetch_tool()],
            ..UpdaterConfig::default()
        }
    }

    /// Writes [`Self::config`] as `updater.toml` and returns its path.
    pub fn write_config(&self) -> PathBuf {
        let path = self.temp_dir.path().join("updater.toml");
        fs::write(&path, toml::to_string(&self.config()).unwrap()).unwrap();
        path
    }

    pub fn layout(&self) -> UpdateLayout {
        self.config().layout().unwrap()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.install_root.join(rel)
    }

    pub fn write(&self, rel: &str, data: &[u8]) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, data).unwrap();
    }

    pub fn read(&self, rel: &str) -> Vec<u8> {
        fs::read(self.path(rel)).unwrap()
    }

    /// Puts a bundle on the "server" and returns its URL and checksum.
    pub fn publish(&self, name: &str, bundle: &BundleBuilder) -> (String, Checksum) {
        let bytes = bundle.to_bytes();
        let path = self.server_dir.join(name);
        fs::write(&path, &bytes).unwrap();
        let checksum = Checksum::from_digest(&Sha256::digest(&bytes));
        (path.to_string_lossy().into_owned(), checksum)
    }

    /// Publishes `bundle` and writes a plan that installs it as `version`.
    pub fn plan_update(&self, version: &str, bundle: &BundleBuilder) -> UpdatePlan {
        let (url, checksum) = self.publish(&format!("MiyooPod-{version}.zip"), bundle);
        let size = fs::metadata(&url).unwrap().len();
        let plan = UpdatePlan {
            version: version.to_string(),
            url,
            checksum: checksum.to_string(),
            size: size as i64,
        };
        self.write_plan(&plan);
        plan
    }

    pub fn write_plan(&self, plan: &UpdatePlan) {
        let path = self.layout().plan_path;
        fs::write(path, serde_json::to_vec(plan).unwrap()).unwrap();
    }

    pub fn plan_exists(&self) -> bool {
        self.layout().plan_path.exists()
    }

    /// The status record, read without consuming it.
    pub fn status(&self) -> Option<UpdateStatus> {
        let path = self.layout().status_path;
        let content = fs::read(&path).ok()?;
        Some(serde_json::from_slice(&content).unwrap())
    }

    pub fn status_path(&self) -> PathBuf {
        self.layout().status_path
    }

    pub fn root(&self) -> &Path {
        &self.install_root
    }
}

impl Default for InstallFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A fetch tool that copies a local file, so plan URLs can be paths.
pub fn local_fetch_tool() -> FetchTool {
    FetchTool::new("cp", &["{url}", "{output}"])
}

/// The bundle that upgrades the v1 installation to v2.
pub fn v2_bundle() -> BundleBuilder {
    BundleBuilder::new("MiyooPod")
        .file_with_mode("MiyooPod", b"v2 binary", 0o755)
        .file_with_mode("launch.sh", b"#!/bin/sh\necho v2\n", 0o755)
        .file("config.json", b"{\"version\":\"2.0.0\"}")
        .file("assets/font.ttf", b"v2 font")
        .file("assets/cover.png", b"v2 cover")
        .file("libs/audio.so", b"v2 lib")
        .file("themes/dark/bg.png", b"v2 theme")
}
