//! Integration tests for the `sealwatchd` binary.
//!
//! These exercise the daemon as a subprocess, verifying exit codes and
//! startup validation. They never talk to a real vault, container runtime,
//! keyring, or TPM — monitoring modes are only exercised up to the point
//! where startup validation rejects the invocation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::process::Command;

/// Locate the `sealwatchd` binary built by `cargo test`.
fn sealwatchd_bin() -> String {
    let path = env!("CARGO_BIN_EXE_sealwatchd");
    assert!(
        Path::new(path).exists(),
        "sealwatchd binary not found at {path}"
    );
    path.to_owned()
}

/// Run sealwatchd with args and return (`exit_code`, stdout, stderr).
fn run(args: &[&str]) -> (i32, String, String) {
    let output = Command::new(sealwatchd_bin())
        .args(args)
        .env_remove("SEALWATCH_CONTAINER")
        .env_remove("SEALWATCH_LOG")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to execute sealwatchd");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

// ── Help & version ───────────────────────────────────────────────────

#[test]
fn help_exits_zero_and_lists_flags() {
    let (code, stdout, _) = run(&["--help"]);
    assert_eq!(code, 0, "--help should exit 0");
    assert!(stdout.contains("--key-source"));
    assert!(stdout.contains("--backend"));
    assert!(stdout.contains("--monitor-only"));
    assert!(stdout.contains("--clear-keys"));
}

#[test]
fn version_exits_zero() {
    let (code, stdout, _) = run(&["--version"]);
    assert_eq!(code, 0, "--version should exit 0");
    assert!(stdout.contains("sealwatchd"));
}

// ── Startup validation ───────────────────────────────────────────────

#[test]
fn zero_interval_is_rejected_with_exit_one() {
    let (code, _, stderr) = run(&["--interval", "0"]);
    assert_eq!(code, 1, "zero poll interval must exit 1: {stderr}");
    assert!(stderr.contains("poll interval"));
}

#[test]
fn empty_container_name_is_rejected_with_exit_one() {
    let (code, _, stderr) = run(&["--container", "  "]);
    assert_eq!(code, 1, "blank container name must exit 1: {stderr}");
    assert!(stderr.contains("container name"));
}

#[test]
fn unknown_flag_exits_one() {
    let (code, _, _) = run(&["--definitely-not-a-flag"]);
    assert_eq!(code, 1);
}

#[test]
fn invalid_backend_value_exits_one() {
    let (code, _, _) = run(&["--backend", "floppy"]);
    assert_eq!(code, 1);
}

#[test]
fn clear_keys_conflicts_with_monitor_only() {
    let (code, _, _) = run(&["--clear-keys", "--monitor-only"]);
    assert_eq!(code, 1);
}

// ── One-shot clear mode ──────────────────────────────────────────────

#[test]
fn clear_keys_on_empty_tpm_state_dir_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = dir.path().to_string_lossy().into_owned();
    let (code, _, stderr) = run(&["--clear-keys", "--backend", "tpm", "--state-dir", &state_dir]);
    assert_eq!(code, 0, "idempotent clear must exit 0: {stderr}");
}

#[test]
fn clear_keys_removes_tpm_objects_and_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("primary.ctx"), b"object").unwrap();
    for index in 1..=3 {
        for ext in ["pub", "priv", "ctx"] {
            std::fs::write(dir.path().join(format!("share_{index}.{ext}")), b"object").unwrap();
        }
    }

    let state_dir = dir.path().to_string_lossy().into_owned();
    let (code, _, stderr) = run(&["--clear-keys", "--backend", "tpm", "--state-dir", &state_dir]);
    assert_eq!(code, 0, "clear must exit 0: {stderr}");
    assert!(!dir.path().join("primary.ctx").exists());
    assert!(!dir.path().join("share_1.priv").exists());
}
