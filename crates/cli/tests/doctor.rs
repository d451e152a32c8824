use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn write_config(dir: &Path, extra: &str) -> std::path::PathBuf {
    let cfg = dir.join("config.toml");
    let toml = format!(
        r#"
version = 1

[database]
path = "{}"

[levels]
max = 4
names = ["guest", "helper", "librarian", "senior", "admin"]

[logging]
level = "warn"
{extra}
"#,
        dir.join("bsl.db").display()
    );
    fs::write(&cfg, toml).unwrap();
    cfg
}

#[test]
fn doctor_reads_provided_config_path() {
    let tmp = tempdir().unwrap();
    let cfg = write_config(
        tmp.path(),
        r#"
[requests]
url_pattern = "^https://openlibrary\\.org/"

[[scripts.repeating]]
name = "reminders"
every = "1d"
"#,
    );

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("bsl"));
    cmd.args(["doctor", "--config", cfg.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("OK   bsl doctor"))
        .stdout(predicate::str::contains("levels: 0..=4"))
        .stdout(predicate::str::contains("  2: librarian"))
        .stdout(predicate::str::contains("requests.url_pattern: ^https://openlibrary"))
        .stdout(predicate::str::contains("scripts.repeating: reminders every 86400s"));
}

#[test]
fn doctor_without_url_pattern_rejects_requests() {
    let tmp = tempdir().unwrap();
    let cfg = write_config(tmp.path(), "");

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("bsl"));
    cmd.args(["doctor", "--config", cfg.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("requests.url_pattern: (none, all requests rejected)"));
}

#[test]
fn doctor_uses_env_config() {
    let tmp = tempdir().unwrap();
    let cfg = write_config(tmp.path(), "");

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("bsl"));
    cmd.env("BUCHSCHLOSS_CONFIG", &cfg);
    cmd.arg("doctor");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(format!("path: {}", cfg.display())));
}

#[test]
fn doctor_fails_on_bad_version() {
    let tmp = tempdir().unwrap();
    let cfg = tmp.path().join("config.toml");
    fs::write(&cfg, "version = 2\n").unwrap();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("bsl"));
    cmd.args(["doctor", "--config", cfg.to_str().unwrap()]);
    cmd.assert().failure().stdout(predicate::str::contains("FAIL bsl doctor"));
}

#[test]
fn doctor_fails_on_bad_interval() {
    let tmp = tempdir().unwrap();
    let cfg = write_config(
        tmp.path(),
        r#"
[[scripts.repeating]]
name = "reminders"
every = "often"
"#,
    );

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("bsl"));
    cmd.args(["doctor", "--config", cfg.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("FAIL bsl doctor"))
        .stdout(predicate::str::contains("often"));
}
