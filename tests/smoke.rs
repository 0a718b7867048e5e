//! Smoke tests -- verify the binary runs and key subcommands parse.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("sitepilot")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("AI-piloted website testing"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("sitepilot")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("sitepilot"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("sitepilot")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_submit_subcommand_exists() {
    Command::cargo_bin("sitepilot")
        .unwrap()
        .args(["submit", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("--screenshot"));
}

#[test]
fn test_workflow_subcommands_exist() {
    Command::cargo_bin("sitepilot")
        .unwrap()
        .args(["workflow", "list", "--help"])
        .assert()
        .success();
    Command::cargo_bin("sitepilot")
        .unwrap()
        .args(["workflow", "save", "--help"])
        .assert()
        .success();
}

#[test]
fn test_unknown_subcommand_fails() {
    Command::cargo_bin("sitepilot")
        .unwrap()
        .arg("frobnicate")
        .assert()
        .failure();
}
