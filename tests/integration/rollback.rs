//! Failure at every point of an extraction must leave the pre-update tree.

use miyoopod_updater::constants::INSTALL_JOURNAL_FILE;
use miyoopod_updater::core::UpdateError;
use miyoopod_updater::test_utils::{
    BundleBuilder, InstallFixture, RecordingDisplay, snapshot_dirs, snapshot_tree,
};
use miyoopod_updater::upgrade::{
    BackupManager, BackupSet, InUseResources, InstallJournal, Installer, UpdateState, Updater,
};

/// File entries of a bundle that touches every kind of target: overwritten
/// files, a staged library, new directories and new files.
const ENTRIES: &[(&str, &[u8])] = &[
    ("launch.sh", b"#!/bin/sh\necho v2\n"),
    ("MiyooPod", b"v2 binary"),
    ("assets/font.ttf", b"v2 font"),
    ("libs/audio.so", b"v2 lib"),
    ("themes/dark/bg.png", b"v2 theme"),
    ("assets/cover.png", b"v2 cover"),
    ("config.json", b"{\"version\":\"2.0.0\"}"),
];

/// The bundle with entry `fail_at` replaced by one that cannot be created,
/// because `MiyooPod` is a file rather than a directory.
fn failing_bundle(fail_at: usize) -> BundleBuilder {
    ENTRIES.iter().enumerate().fold(BundleBuilder::new("MiyooPod"), |bundle, (i, (rel, data))| {
        if i == fail_at {
            bundle.file("MiyooPod/blocked", b"never written")
        } else {
            bundle.file(rel, data)
        }
    })
}

#[tokio::test]
async fn test_failure_at_each_entry_rolls_back() {
    for fail_at in 0..ENTRIES.len() {
        let fixture = InstallFixture::with_v1();
        let before = snapshot_tree(fixture.root());
        let dirs_before = snapshot_dirs(fixture.root());
        fixture.plan_update("2.0.0", &failing_bundle(fail_at));

        let completion = Updater::new(fixture.config(), RecordingDisplay::new())
            .unwrap()
            .run()
            .await;

        assert!(
            matches!(completion.outcome, Err(UpdateError::InstallFailed(_))),
            "entry {fail_at}: {:?}",
            completion.outcome
        );
        assert!(completion.trail.contains(&UpdateState::RollingBack));
        assert_eq!(snapshot_tree(fixture.root()), before, "entry {fail_at}");
        assert_eq!(snapshot_dirs(fixture.root()), dirs_before, "entry {fail_at}");
        assert!(!fixture.layout().backup_root.exists(), "entry {fail_at}");

        let status = fixture.status().unwrap();
        assert!(!status.success);
        assert!(status.error.contains("MiyooPod/blocked"), "entry {fail_at}: {}", status.error);
    }
}

#[tokio::test]
async fn test_crash_at_each_entry_recovered_on_next_start() {
    for fail_at in 0..ENTRIES.len() {
        let fixture = InstallFixture::with_v1();
        let layout = fixture.layout();
        let before = snapshot_tree(fixture.root());
        let dirs_before = snapshot_dirs(fixture.root());
        let archive = failing_bundle(fail_at).write(&fixture.temp_dir.path().join("bundle.zip"));

        // The previous run got as far as entry `fail_at` and then died
        let installer = Installer::new(
            &layout,
            InUseResources::new(vec!["libs/".to_string()], vec!["updater".to_string()]),
        );
        let preview = installer.preview(&archive).unwrap();
        let set = BackupSet::standard(&layout).with_archive_targets(preview.overwrites);
        BackupManager::from_layout(&layout).backup(&set).unwrap();
        {
            let mut journal =
                InstallJournal::create(&layout.backup_root.join(INSTALL_JOURNAL_FILE)).unwrap();
            assert!(installer.install(&archive, &mut journal, |_, _| {}).is_err());
        }

        let completion = Updater::new(fixture.config(), RecordingDisplay::new())
            .unwrap()
            .run()
            .await;

        let recovered = completion.recovered.expect("interrupted install recovered");
        assert!(recovered.is_complete(), "entry {fail_at}: {:?}", recovered.failures);
        assert_eq!(snapshot_tree(fixture.root()), before, "entry {fail_at}");
        assert_eq!(snapshot_dirs(fixture.root()), dirs_before, "entry {fail_at}");
        assert!(!layout.backup_root.exists());
    }
}

#[tokio::test]
async fn test_incomplete_backup_is_discarded() {
    let fixture = InstallFixture::with_v1();
    let layout = fixture.layout();
    std::fs::create_dir_all(layout.backup_root.join("assets")).unwrap();
    std::fs::write(layout.backup_root.join("launch.sh"), b"half a backup").unwrap();

    let completion = Updater::new(fixture.config(), RecordingDisplay::new())
        .unwrap()
        .run()
        .await;

    assert!(completion.recovered.is_none());
    assert!(!layout.backup_root.exists());
    assert_eq!(fixture.read("launch.sh"), b"#!/bin/sh\necho v1\n");
}
