use assert_cmd::Command;
use miyoopod_updater::test_utils::{InstallFixture, v2_bundle};
use miyoopod_updater::upgrade::{StatusReporter, UpdatePlan, UpdateStatus};
use predicates::prelude::*;
use std::fs;

fn updater(fixture: &InstallFixture) -> Command {
    let mut cmd = Command::cargo_bin("updater").unwrap();
    cmd.arg("--config")
        .arg(fixture.write_config())
        .env_remove("RUST_LOG")
        .current_dir(fixture.root());
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("updater")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("request"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("swap-staged"));
}

#[test]
fn test_status_without_record() {
    let fixture = InstallFixture::new();

    updater(&fixture)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No update status recorded"));

    updater(&fixture)
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::diff("null\n"));
}

#[test]
fn test_status_failure_exits_nonzero_once() {
    let fixture = InstallFixture::new();
    StatusReporter::new(fixture.status_path())
        .write_status(&UpdateStatus::failed("1.2.0", "checksum mismatch"))
        .unwrap();

    updater(&fixture)
        .args(["status", "--json"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"error\": \"checksum mismatch\""));

    // Consumed: a second launch sees nothing
    updater(&fixture).arg("status").assert().success();
}

#[test]
fn test_request_writes_plan() {
    let fixture = InstallFixture::new();

    updater(&fixture)
        .args(["request", "--version", "1.2.0", "--url", "https://example.com/MiyooPod.zip"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Update to 1.2.0 requested"));

    let plan = UpdatePlan::load(&fixture.layout().plan_path).unwrap();
    assert_eq!(plan.version, "1.2.0");
    assert_eq!(plan.checksum(), None);
}

#[test]
fn test_request_invalid_checksum() {
    let fixture = InstallFixture::new();

    updater(&fixture)
        .args(["request", "--version", "1.2.0", "--url", "u", "--checksum", "not-a-digest"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));

    assert!(!fixture.plan_exists());
}

#[test]
fn test_missing_config_file() {
    let fixture = InstallFixture::new();

    Command::cargo_bin("updater")
        .unwrap()
        .arg("--config")
        .arg(fixture.temp_dir.path().join("missing.toml"))
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.toml"));
}

#[test]
fn test_config_from_environment() {
    let fixture = InstallFixture::new();
    StatusReporter::new(fixture.status_path())
        .write_status(&UpdateStatus::succeeded("2.0.0"))
        .unwrap();

    Command::cargo_bin("updater")
        .unwrap()
        .env("MIYOOPOD_UPDATER_CONFIG", fixture.write_config())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated to v2.0.0!"));
}

#[test]
fn test_run_without_handoff() {
    let fixture = InstallFixture::with_v1();
    fixture.plan_update("2.0.0", &v2_bundle());

    updater(&fixture)
        .args(["--no-progress", "run", "--no-handoff"])
        .assert()
        .success();

    assert_eq!(fixture.read("MiyooPod"), b"v2 binary");
    assert!(fixture.status().unwrap().success);

    updater(&fixture).arg("swap-staged").assert().success();
    assert_eq!(fixture.read("libs/audio.so"), b"v2 lib");
}

#[test]
fn test_run_hands_off_to_launcher() {
    let fixture = InstallFixture::with_v1();
    fixture.plan_update("2.0.0", &v2_bundle());

    // exec replaces the updater, so the launcher's output is the process's
    updater(&fixture)
        .args(["--no-progress", "run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("v2"));
}

#[test]
fn test_log_file_receives_output() {
    let fixture = InstallFixture::new();
    let log = fixture.temp_dir.path().join("logs/updater.log");
    let mut config = fixture.config();
    config.log_file = Some(log.to_string_lossy().into_owned());
    let config_path = fixture.temp_dir.path().join("logging.toml");
    fs::write(&config_path, toml::to_string(&config).unwrap()).unwrap();

    Command::cargo_bin("updater")
        .unwrap()
        .arg("--config")
        .arg(&config_path)
        .args(["--no-progress", "run", "--no-handoff"])
        .env_remove("RUST_LOG")
        .assert()
        .failure();

    let content = fs::read_to_string(log).unwrap();
    assert!(content.contains("Update failed"));
    assert!(!content.contains('\u{1b}'));
}
