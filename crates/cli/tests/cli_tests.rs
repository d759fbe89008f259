//! CLI integration tests

use std::process::Command;

fn cpctl(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "cpctl-cli", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = cpctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("Compute Provisioner"),
        "Should show app name"
    );
    assert!(stdout.contains("allowed"), "Should show allowed command");
    assert!(stdout.contains("catalog"), "Should show catalog command");
    assert!(stdout.contains("attempts"), "Should show attempts command");
    assert!(stdout.contains("runs"), "Should show runs command");
    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("CPCTL_API_URL"), "Should mention env var");
    assert!(stdout.contains("--format"), "Should show format option");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = cpctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("cpctl"), "Should show binary name");
}

#[test]
fn test_allowed_help() {
    let output = cpctl(&["allowed", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--tool"), "Should show tool option");
    assert!(stdout.contains("--region"), "Should show region option");
    assert!(stdout.contains("--all"), "Should show all option");
}

#[test]
fn test_catalog_help() {
    let output = cpctl(&["catalog", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--region"), "Should show region option");
}

#[test]
fn test_runs_help() {
    let output = cpctl(&["runs", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("register"), "Should show register subcommand");
    assert!(stdout.contains("--status"), "Should show status filter");
}

#[test]
fn test_invalid_format_rejected() {
    let output = cpctl(&["--format", "yaml", "attempts"]);

    assert!(!output.status.success(), "Unknown format should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("yaml"), "Should name the bad value");
}

#[test]
fn test_invalid_command() {
    let output = cpctl(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");
}

#[test]
fn test_unreachable_api_fails() {
    let output = cpctl(&["--api-url", "http://127.0.0.1:9", "attempts"]);

    assert!(!output.status.success(), "Unreachable API should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to send request"));
}
