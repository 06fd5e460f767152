use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn run_reports_a_clean_flush_as_json() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("gdsim")
        .unwrap()
        .env("GD_CONFIG", dir.path().join("gd.toml"))
        .args(["run", "-n", "20", "--loss", "0", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"flushed\": true"))
        .stdout(predicate::str::contains("\"delivered\": 20"));
}

#[test]
fn config_shows_environment_overrides() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("gdsim")
        .unwrap()
        .env("GD_CONFIG", dir.path().join("missing.toml"))
        .env("GD_SEND_WINDOW", "7")
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("send_window = 7"));
}

#[test]
fn loss_above_the_limit_is_rejected() {
    Command::cargo_bin("gdsim")
        .unwrap()
        .args(["run", "--loss", "95"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--loss"));
}
