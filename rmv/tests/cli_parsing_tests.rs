//! CLI Argument Parsing Tests for rmv
//!
//! These tests verify that command-line arguments are parsed correctly and
//! that invalid configurations are rejected before any transfer starts.

use assert_cmd::Command;

#[test]
fn test_help_runs() {
    Command::cargo_bin("rmv")
        .unwrap()
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn test_version_runs() {
    Command::cargo_bin("rmv")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
}

// ============================================================================
// Operation Argument Parsing Tests
// ============================================================================

#[test]
fn test_operation_move_parses() {
    Command::cargo_bin("rmv")
        .unwrap()
        .args(["--operation", "move", "--help"])
        .assert()
        .success();
}

#[test]
fn test_operation_copy_parses() {
    Command::cargo_bin("rmv")
        .unwrap()
        .args(["--operation", "copy", "--help"])
        .assert()
        .success();
}

#[test]
fn test_operation_invalid_value_rejected() {
    Command::cargo_bin("rmv")
        .unwrap()
        .args(["--operation", "link", "--FROM", "a", "--TO", "b"])
        .assert()
        .failure();
}

#[test]
fn test_operation_is_required() {
    Command::cargo_bin("rmv")
        .unwrap()
        .args(["--FROM", "a", "--TO", "b"])
        .assert()
        .failure();
}

// ============================================================================
// Path Argument Parsing Tests
// ============================================================================

#[test]
fn test_from_is_required() {
    Command::cargo_bin("rmv")
        .unwrap()
        .args(["--operation", "copy", "--TO", "b"])
        .assert()
        .failure();
}

#[test]
fn test_to_is_required() {
    Command::cargo_bin("rmv")
        .unwrap()
        .args(["--operation", "copy", "--FROM", "a"])
        .assert()
        .failure();
}

#[test]
fn test_from_accepts_multiple_paths() {
    Command::cargo_bin("rmv")
        .unwrap()
        .args(["--operation", "copy", "--FROM", "a", "b", "c", "--TO", "d", "--help"])
        .assert()
        .success();
}

#[test]
fn test_short_flags_parse() {
    Command::cargo_bin("rmv")
        .unwrap()
        .args(["-o", "copy", "-f", "a", "-t", "b", "--help"])
        .assert()
        .success();
}

// ============================================================================
// Threads Argument Parsing Tests
// ============================================================================

#[test]
fn test_threads_accepts_integer() {
    Command::cargo_bin("rmv")
        .unwrap()
        .args(["--operation", "copy", "--FROM", "a", "--TO", "b", "--threads", "4", "--help"])
        .assert()
        .success();
}

#[test]
fn test_threads_accepts_zero_and_negative() {
    for value in ["0", "-1"] {
        Command::cargo_bin("rmv")
            .unwrap()
            .args(["--operation", "copy", "--FROM", "a", "--TO", "b", "--threads", value, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_threads_rejects_non_integer() {
    Command::cargo_bin("rmv")
        .unwrap()
        .args(["--operation", "copy", "--FROM", "a", "--TO", "b", "--threads", "many"])
        .assert()
        .failure();
}
