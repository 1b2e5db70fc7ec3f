//! CLI behavior that does not need a running Notes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn notes(config_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("notes").unwrap();
    cmd.env("MACNOTES_CONFIG_DIR", config_dir);
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    notes(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("accounts"))
        .stdout(predicate::str::contains("add"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("cat"))
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("dump"));
}

#[test]
fn test_version() {
    let dir = tempfile::tempdir().unwrap();
    notes(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with(format!(
            "notes {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_config_shows_defaults() {
    let dir = tempfile::tempdir().unwrap();
    notes(dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("format = plaintext"))
        .stdout(predicate::str::contains("editor = $EDITOR"));
}

#[test]
fn test_config_saves_settings() {
    let dir = tempfile::tempdir().unwrap();
    notes(dir.path())
        .args(["config", "--account", "iCloud", "--format", "markdown"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Settings saved to"));

    let saved = fs::read_to_string(dir.path().join("macnotesapp.toml")).unwrap();
    assert!(saved.contains("[defaults]"));
    assert!(saved.contains("account = \"iCloud\""));
    assert!(saved.contains("format = \"Markdown\""));

    notes(dir.path())
        .args(["config", "--folder", "Inbox"])
        .assert()
        .success();
    notes(dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("account = iCloud"))
        .stdout(predicate::str::contains("folder = Inbox"))
        .stdout(predicate::str::contains("format = Markdown"));
}

#[test]
fn test_broken_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("macnotesapp.toml"), "[defaults\n").unwrap();
    notes(dir.path())
        .arg("config")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::starts_with("Error: Config error"));
}

#[test]
fn test_add_rejects_two_formats() {
    let dir = tempfile::tempdir().unwrap();
    notes(dir.path())
        .args(["add", "--html", "--markdown", "Title"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_add_rejects_file_and_url() {
    let dir = tempfile::tempdir().unwrap();
    notes(dir.path())
        .args(["add", "--file", "note.txt", "--url", "https://example.com"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_cat_requires_a_name() {
    let dir = tempfile::tempdir().unwrap();
    notes(dir.path())
        .arg("cat")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("NOTE_NAME"));
}
