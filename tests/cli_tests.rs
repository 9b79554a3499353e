use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;

fn cmd() -> Command {
    Command::cargo_bin("lead-router").unwrap()
}

#[test]
fn test_init_writes_config_and_starter_inputs() {
    let dir = tempfile::tempdir().unwrap();

    cmd()
        .args(["init", "--data-dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));

    assert!(dir.path().join("config.toml").exists());
    assert!(dir.path().join("routing.json").exists());
    assert!(dir.path().join("board").is_dir());
}

#[test]
fn test_commands_require_initialized_data_dir() {
    let dir = tempfile::tempdir().unwrap();

    cmd()
        .args(["dry-run", "board-1", "item-1", "--data-dir"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("routing.json"));
}

#[test]
fn test_dry_run_against_starter_rule() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .args(["init", "--data-dir"])
        .arg(dir.path())
        .assert()
        .success();

    let items = json!([
        {
            "board_id": "board-1",
            "id": "item-1",
            "name": "Acme lead",
            "column_values": {"industry": "SaaS"}
        }
    ]);
    std::fs::write(dir.path().join("board/items.json"), items.to_string()).unwrap();

    cmd()
        .args(["dry-run", "board-1", "item-1", "--output", "json", "--data-dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"matched\": true"));
}

#[test]
fn test_dry_run_unknown_item_fails() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .args(["init", "--data-dir"])
        .arg(dir.path())
        .assert()
        .success();

    cmd()
        .args(["dry-run", "board-1", "item-missing", "--data-dir"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}
