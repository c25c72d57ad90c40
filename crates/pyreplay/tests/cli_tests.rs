use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tracing::info;

const SOURCE: &str = "for i in range(3):\n    s = i\nprint(s)\n";

const EVENTS: &str = r#"{"line": 1, "variables": {}, "event": "line"}
{"line": 2, "variables": {"i": 0}, "event": "line"}
{"line": 1, "variables": {"i": 0, "s": 0}, "event": "line"}
{"line": 2, "variables": {"i": 1, "s": 0}, "event": "line"}
{"line": 1, "variables": {"i": 1, "s": 1}, "event": "line"}
{"line": 2, "variables": {"i": 2, "s": 1}, "event": "line"}
{"line": 1, "variables": {"i": 2, "s": 2}, "event": "line"}
{"line": 3, "variables": {"i": 2, "s": 2}, "event": "line"}
{"line": 3, "variables": {"i": 2, "s": 2}, "event": "return"}
"#;

fn workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("main.py"), SOURCE).unwrap();
    fs::write(dir.path().join("events.jsonl"), EVENTS).unwrap();
    dir
}

#[test]
fn test_help_command() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Testing CLI help command");

    let mut cmd = Command::cargo_bin("pyreplay").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Python Execution Replay"));
}

#[test]
fn test_version_command() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let mut cmd = Command::cargo_bin("pyreplay").unwrap();
    cmd.arg("--version").assert().success().stdout(predicate::str::contains("pyreplay"));
}

#[test]
fn test_replay_subcommand_help() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let mut cmd = Command::cargo_bin("pyreplay").unwrap();
    cmd.arg("replay")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Record a trace event log against a workspace"));
}

#[test]
fn test_missing_subcommand() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let mut cmd = Command::cargo_bin("pyreplay").unwrap();
    cmd.assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_analyze_prints_names() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let dir = workspace();
    let mut cmd = Command::cargo_bin("pyreplay").unwrap();
    cmd.arg("analyze")
        .arg(dir.path().join("main.py"))
        .assert()
        .success()
        .stdout(predicate::str::contains("assigned: s | referenced: i"));
}

#[test]
fn test_replay_walks_every_step() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let dir = workspace();
    let mut cmd = Command::cargo_bin("pyreplay").unwrap();
    cmd.arg("replay")
        .arg("--events")
        .arg(dir.path().join("events.jsonl"))
        .arg("--workspace")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("[1/8] /main.py:1"))
        .stdout(predicate::str::contains("[8/8] /main.py:3"))
        .stdout(predicate::str::contains("s = 2"));
}

#[test]
fn test_replay_single_step_and_output() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let dir = workspace();
    let output = dir.path().join("trace.json");
    let mut cmd = Command::cargo_bin("pyreplay").unwrap();
    cmd.arg("replay")
        .arg("--events")
        .arg(dir.path().join("events.jsonl"))
        .arg("--workspace")
        .arg(dir.path())
        .arg("--step")
        .arg("3")
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("[4/8] /main.py:2"))
        .stdout(predicate::str::contains("s = 1"));

    let written = fs::read_to_string(&output).unwrap();
    let json: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(json["steps"].as_array().map(Vec::len), Some(9));
}

#[test]
fn test_replay_step_out_of_range() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let dir = workspace();
    let mut cmd = Command::cargo_bin("pyreplay").unwrap();
    cmd.arg("replay")
        .arg("--events")
        .arg(dir.path().join("events.jsonl"))
        .arg("--workspace")
        .arg(dir.path())
        .arg("--step")
        .arg("42")
        .assert()
        .failure();
}
