//! CLI integration tests for schema-ferry.
//!
//! These tests verify argument parsing, help output, exit codes, and
//! full analyze/suggest/run/status/history round trips over temp files.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Get a command for the schema-ferry binary.
fn cmd() -> Command {
    Command::cargo_bin("schema-ferry").unwrap()
}

/// Command with a ledger inside `dir` and quiet logs.
fn cmd_in(dir: &Path) -> Command {
    let mut c = cmd();
    c.current_dir(dir)
        .arg("--ledger")
        .arg(dir.join("ledger.json"))
        .args(["--verbosity", "error"]);
    c
}

fn write_users(dir: &Path) -> PathBuf {
    let path = dir.join("users.jsonl");
    std::fs::write(
        &path,
        concat!(
            "{\"ID\": 1, \"First Name\": \"Ada\", \"joined\": \"2024-01-05T10:00:00Z\"}\n",
            "{\"ID\": 2, \"First Name\": \"Grace\", \"joined\": \"2024-02-11T08:30:00Z\"}\n",
            "{\"ID\": 3, \"First Name\": null, \"joined\": \"2024-03-30T23:59:59Z\"}\n",
        ),
    )
    .unwrap();
    path
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("suggest"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("history"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--destination"))
        .stdout(predicate::str::contains("--destination-table"))
        .stdout(predicate::str::contains("--mappings"))
        .stdout(predicate::str::contains("--no-create-table"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("schema-ferry"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_exist() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--ledger"))
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_1() {
    let dir = TempDir::new().unwrap();
    cmd_in(dir.path())
        .args(["--config", "nonexistent_config_file.yaml", "history"])
        .assert()
        .code(1);
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let dir = TempDir::new().unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "engine: [").unwrap();

    cmd_in(dir.path())
        .args(["--config", file.path().to_str().unwrap(), "history"])
        .assert()
        .code(2);
}

#[test]
fn test_invalid_config_value_exits_with_code_2() {
    let dir = TempDir::new().unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "engine:").unwrap();
    writeln!(file, "  batch_size: 0").unwrap();

    cmd_in(dir.path())
        .args(["--config", file.path().to_str().unwrap(), "history"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("batch_size"));
}

#[test]
fn test_missing_source_exits_with_code_4() {
    let dir = TempDir::new().unwrap();
    cmd_in(dir.path())
        .args(["analyze", "missing.jsonl"])
        .assert()
        .code(4);
}

#[test]
fn test_unknown_migration_exits_with_code_5() {
    let dir = TempDir::new().unwrap();
    cmd_in(dir.path())
        .args([
            "--output-json",
            "status",
            "6f1c2d3e-4b5a-4c6d-8e7f-9a0b1c2d3e4f",
        ])
        .assert()
        .code(5)
        .stdout(predicate::str::contains("\"code\": \"not_found\""));
}

// =============================================================================
// Round Trips
// =============================================================================

#[test]
fn test_analyze_infers_schema() {
    let dir = TempDir::new().unwrap();
    let source = write_users(dir.path());

    let output = cmd_in(dir.path())
        .arg("--output-json")
        .arg("analyze")
        .arg(&source)
        .output()
        .unwrap();
    assert!(output.status.success());

    let schema = stdout_json(&output);
    assert_eq!(schema["table"], "users");
    assert_eq!(schema["row_count"], 3);
    let columns = schema["columns"].as_array().unwrap();
    assert_eq!(columns[0]["name"], "ID");
    assert_eq!(columns[0]["type"], "integer64");
    assert_eq!(columns[1]["nullable"], true);
    assert_eq!(columns[2]["type"], "timestamptz");
}

#[test]
fn test_suggest_prints_ddl() {
    let dir = TempDir::new().unwrap();
    let source = write_users(dir.path());

    cmd_in(dir.path())
        .arg("suggest")
        .arg(&source)
        .args(["--destination-table", "people"])
        .assert()
        .success()
        .stdout(predicate::str::contains("first_name"))
        .stdout(predicate::str::contains("CREATE TABLE people ("));
}

#[test]
fn test_suggest_rejects_bad_table_name() {
    let dir = TempDir::new().unwrap();
    let source = write_users(dir.path());

    cmd_in(dir.path())
        .arg("suggest")
        .arg(&source)
        .args(["--destination-table", "bad name"])
        .assert()
        .code(3);
}

#[test]
fn test_run_then_status_and_history() {
    let dir = TempDir::new().unwrap();
    let source = write_users(dir.path());
    let out = dir.path().join("out");

    let output = cmd_in(dir.path())
        .arg("--output-json")
        .arg("run")
        .arg(&source)
        .arg("--destination")
        .arg(&out)
        .args(["--destination-table", "people", "--created-by", "ops"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let migration = stdout_json(&output);
    assert_eq!(migration["status"], "succeeded");
    assert_eq!(migration["progress"]["processed_records"], 3);
    assert_eq!(migration["progress"]["percentage"], 100.0);
    assert_eq!(migration["created_by"], "ops");
    let id = migration["id"].as_str().unwrap().to_string();

    let ddl = std::fs::read_to_string(out.join("people").join("_ddl.sql")).unwrap();
    assert!(ddl.starts_with("CREATE TABLE people ("));
    let batches: Vec<_> = std::fs::read_dir(out.join("people"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".jsonl"))
        .collect();
    assert_eq!(batches.len(), 1);

    cmd_in(dir.path())
        .args(["status", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Status: succeeded"))
        .stdout(predicate::str::contains("Rows: 3/3"));

    let output = cmd_in(dir.path())
        .args(["--output-json", "history", "--status", "succeeded"])
        .output()
        .unwrap();
    let page = stdout_json(&output);
    assert_eq!(page["total"], 1);
    assert_eq!(page["migrations"][0]["id"], id.as_str());

    // Finished migrations cannot be resumed.
    cmd_in(dir.path()).args(["resume", &id]).assert().code(5);
    cmd_in(dir.path())
        .arg("resume")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to resume"));
}

#[test]
fn test_run_with_explicit_mappings() {
    let dir = TempDir::new().unwrap();
    let source = write_users(dir.path());
    let mappings = dir.path().join("mappings.json");
    std::fs::write(
        &mappings,
        r#"[
            {"source_field": "ID", "source_type": "integer64", "destination_field": "user_id",
             "destination_type": "integer64", "skip": false},
            {"source_field": "First Name", "source_type": "text", "destination_field": "name",
             "destination_type": "text", "skip": false},
            {"source_field": "joined", "source_type": "timestamptz", "destination_field": "joined",
             "destination_type": "timestamptz", "skip": true}
        ]"#,
    )
    .unwrap();

    let output = cmd_in(dir.path())
        .arg("--output-json")
        .arg("run")
        .arg(&source)
        .arg("--destination")
        .arg(dir.path().join("out"))
        .args(["--destination-table", "members", "--mappings"])
        .arg(&mappings)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let migration = stdout_json(&output);
    assert_eq!(
        migration["ddl"],
        "CREATE TABLE members (user_id BIGINT NOT NULL, name TEXT)"
    );
}
