use miyoopod_updater::core::UpdateError;
use miyoopod_updater::test_utils::{
    BundleBuilder, InstallFixture, RecordingDisplay, snapshot_tree, v2_bundle,
};
use miyoopod_updater::ui::{PowerButtonMonitor, PowerWarning};
use miyoopod_updater::upgrade::{StagedSwap, UpdateState, Updater};
use std::fs;

#[tokio::test]
async fn test_update_then_launcher_swap() {
    let fixture = InstallFixture::with_v1();
    fixture.plan_update("2.0.0", &v2_bundle());

    let completion = Updater::new(fixture.config(), RecordingDisplay::new())
        .unwrap()
        .run()
        .await;
    assert_eq!(completion.outcome.unwrap(), "2.0.0");
    assert_eq!(fixture.read("libs/audio.so"), b"v1 lib");

    // What the relaunched launcher does first
    let report = StagedSwap::from_layout(&fixture.layout()).swap();

    assert!(report.failures.is_empty());
    assert_eq!(fixture.read("libs/audio.so"), b"v2 lib");
    assert!(!fixture.path("libs/audio.so.new").exists());
}

#[tokio::test]
async fn test_corrupted_bundle_is_rejected() {
    let fixture = InstallFixture::with_v1();
    let before = snapshot_tree(fixture.root());
    let plan = fixture.plan_update("2.0.0", &v2_bundle());

    // Flip a byte on the server after the plan recorded its digest
    let mut bytes = fs::read(&plan.url).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xFF;
    fs::write(&plan.url, bytes).unwrap();

    let completion = Updater::new(fixture.config(), RecordingDisplay::new())
        .unwrap()
        .run()
        .await;

    match completion.outcome {
        Err(UpdateError::ChecksumMismatch { expected, actual }) => {
            assert_eq!(expected, plan.checksum);
            assert_ne!(actual, expected);
        }
        other => panic!("expected checksum mismatch, got {other:?}"),
    }
    assert_eq!(snapshot_tree(fixture.root()), before);
    assert_eq!(fixture.status().unwrap().error, "checksum mismatch");
}

#[tokio::test]
async fn test_uppercase_checksum_accepted() {
    let fixture = InstallFixture::with_v1();
    let mut plan = fixture.plan_update("2.0.0", &v2_bundle());
    plan.checksum = plan.checksum.to_uppercase().replacen("SHA256:", "", 1);
    fixture.write_plan(&plan);

    let completion = Updater::new(fixture.config(), RecordingDisplay::new())
        .unwrap()
        .run()
        .await;

    assert_eq!(completion.outcome.unwrap(), "2.0.0");
}

#[tokio::test]
async fn test_traversal_entries_never_escape() {
    let fixture = InstallFixture::with_v1();
    let bundle = v2_bundle()
        .raw_file("MiyooPod/../../outside.txt", b"evil")
        .raw_file("MiyooPod/.miyoopod_backup/launch.sh", b"poison");
    fixture.plan_update("2.0.0", &bundle);

    let completion = Updater::new(fixture.config(), RecordingDisplay::new())
        .unwrap()
        .run()
        .await;

    assert_eq!(completion.outcome.unwrap(), "2.0.0");
    assert!(!fixture.temp_dir.path().join("outside.txt").exists());
    assert!(!fixture.install_root.parent().unwrap().join("outside.txt").exists());
    assert!(!fixture.layout().backup_root.exists());
}

#[tokio::test]
async fn test_empty_bundle_succeeds_without_changes() {
    let fixture = InstallFixture::with_v1();
    let before = snapshot_tree(fixture.root());
    fixture.plan_update("1.0.1", &BundleBuilder::new("MiyooPod"));

    let completion = Updater::new(fixture.config(), RecordingDisplay::new())
        .unwrap()
        .run()
        .await;

    assert_eq!(completion.outcome.unwrap(), "1.0.1");
    assert_eq!(snapshot_tree(fixture.root()), before);
}

#[tokio::test]
async fn test_power_press_shows_warning() {
    let fixture = InstallFixture::with_v1();
    fixture.plan_update("2.0.0", &v2_bundle());

    let mut event = vec![0u8; 2 * std::mem::size_of::<usize>()];
    event.extend_from_slice(&1u16.to_le_bytes());
    event.extend_from_slice(&116u16.to_le_bytes());
    event.extend_from_slice(&1i32.to_le_bytes());
    let device = fixture.temp_dir.path().join("event0");
    fs::write(&device, event).unwrap();

    let power = PowerWarning::new();
    let monitor = PowerButtonMonitor::start(&device, power.clone()).unwrap();
    // A regular file reaches EOF after the one event
    monitor.join().unwrap();
    assert!(power.is_active());

    let mut display = RecordingDisplay::new();
    let completion = Updater::new(fixture.config(), &mut display)
        .unwrap()
        .with_power_warning(power)
        .run()
        .await;

    assert!(completion.outcome.is_ok());
    assert!(display.power_warning_shown());
}

#[tokio::test]
async fn test_progress_reaches_completion() {
    let fixture = InstallFixture::with_v1();
    fixture.plan_update("2.0.0", &v2_bundle());

    let mut display = RecordingDisplay::new();
    let completion = Updater::new(fixture.config(), &mut display)
        .unwrap()
        .run()
        .await;

    assert_eq!(completion.trail.last(), Some(&UpdateState::Done));
    let frames = display.frames();
    assert!(frames.iter().all(|f| (0.0..=1.0).contains(&f.fraction)));
    assert_eq!(frames.last().map(|f| f.fraction), Some(1.0));
}
