//! CLI tests for project creation, approval and status.
//!
//! Spawns the conductor binary against a temp home and checks exit codes and
//! the persisted phase.

use std::path::Path;
use std::process::{Command, Output};

use conductor::exit_codes;

fn conductor(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_conductor"))
        .arg("--home")
        .arg(home)
        .args(args)
        .env_remove("CONDUCTOR_HOME")
        .output()
        .expect("spawn conductor")
}

#[test]
fn status_of_missing_project_fails() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = conductor(temp.path(), &["status", "ghost"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("project 'ghost' not found"), "{stderr}");
}

#[test]
fn new_then_status_reports_brainstorm() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = conductor(temp.path(), &["new", "demo"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let output = conductor(temp.path(), &["status", "demo", "--json"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("status json");
    assert_eq!(json["phase"], "brainstorm");
    assert_eq!(json["version"], "v1");
    assert_eq!(json["counts"]["total"], 0);
}

#[test]
fn creating_a_project_twice_fails() {
    let temp = tempfile::tempdir().expect("tempdir");

    assert_eq!(
        conductor(temp.path(), &["new", "demo"]).status.code(),
        Some(exit_codes::OK)
    );
    assert_eq!(
        conductor(temp.path(), &["new", "demo"]).status.code(),
        Some(exit_codes::INVALID)
    );
}

#[test]
fn run_before_approval_fails_and_keeps_phase() {
    let temp = tempfile::tempdir().expect("tempdir");
    conductor(temp.path(), &["new", "demo"]);

    let output = conductor(temp.path(), &["approve", "demo"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let output = conductor(temp.path(), &["run", "demo", "--yes"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));

    let output = conductor(temp.path(), &["status", "demo"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("phase:   spec_draft"), "{stdout}");
}

#[test]
fn usage_errors_share_the_failure_code() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = conductor(temp.path(), &["frobnicate"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}
