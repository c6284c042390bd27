//! Basic CLI E2E tests.
//!
//! Tests invoke CLI commands via cargo run against the dev data
//! directory and verify outputs.

use std::process::Command;

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(args: &[&str]) -> (String, String, i32) {
    let output = Command::new("cargo")
        .args(["run", "-p", "everkeep-cli", "--"])
        .args(args)
        .env("EVERKEEP_ENV", "dev")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

#[test]
fn test_user_register_and_show() {
    let (stdout, _, code) = run_cli(&["user", "register", "cli-test-user"]);
    assert_eq!(code, 0, "User register failed");
    assert!(stdout.contains("cli-test-user"));

    let (stdout, _, code) = run_cli(&["user", "show", "cli-test-user"]);
    assert_eq!(code, 0, "User show failed");
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("show should print JSON");
    assert_eq!(parsed["profile"]["user_id"], "cli-test-user");
}

#[test]
fn test_checkin_confirm() {
    let _ = run_cli(&["user", "register", "cli-checkin-user"]);
    let (stdout, _, code) = run_cli(&["checkin", "confirm", "cli-checkin-user"]);
    assert_eq!(code, 0, "Check-in confirm failed");
    assert!(stdout.contains("Check-in recorded"));
}

#[test]
fn test_checkin_status() {
    let _ = run_cli(&["user", "register", "cli-status-user"]);
    let (stdout, _, code) = run_cli(&["checkin", "status", "cli-status-user"]);
    assert_eq!(code, 0, "Check-in status failed");
    assert!(stdout.contains("missed periods"));
}

#[test]
fn test_nominee_add_and_list() {
    let _ = run_cli(&["user", "register", "cli-nominee-user"]);
    let (_, _, code) = run_cli(&[
        "nominee",
        "add",
        "cli-nominee-user",
        "Jordan Example",
        "--mobile",
        "+15550123",
    ]);
    assert_eq!(code, 0, "Nominee add failed");

    let (stdout, _, code) = run_cli(&["nominee", "list", "cli-nominee-user"]);
    assert_eq!(code, 0, "Nominee list failed");
    assert!(stdout.contains("Jordan Example"));
}

#[test]
fn test_admin_reviews_empty_ok() {
    let (_, _, code) = run_cli(&["admin", "reviews"]);
    assert_eq!(code, 0, "Admin reviews failed");
}

#[test]
fn test_audit_list() {
    let (_, _, code) = run_cli(&["audit", "list", "--limit", "5"]);
    assert_eq!(code, 0, "Audit list failed");
}

#[test]
fn test_invalid_cadence_rejected() {
    let (_, stderr, code) = run_cli(&[
        "user",
        "register",
        "cli-bad-cadence",
        "--cadence",
        "hourly",
    ]);
    assert_ne!(code, 0, "Invalid cadence unexpectedly accepted");
    assert!(stderr.contains("error:"));
}
