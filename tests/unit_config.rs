/// Tests for CLI argument parsing and dispatch.

use std::process::Command;

/// Verify the binary can print help without error.
#[test]
fn cli_help_works() {
    let output = Command::new(env!("CARGO_BIN_EXE_craterun"))
        .arg("--help")
        .output()
        .expect("failed to execute craterun --help");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("craterun") || stdout.contains("CrateRun"),
        "help output should mention craterun"
    );
}

/// Verify `run` requires --rootfs.
#[test]
fn cli_run_requires_rootfs() {
    let output = Command::new(env!("CARGO_BIN_EXE_craterun"))
        .args(["run", "--", "/bin/sh"])
        .output()
        .expect("failed to execute craterun run");

    assert!(
        !output.status.success(),
        "run without --rootfs should fail"
    );
}

/// An empty command defaults to `/bin/sh` rather than being rejected by the
/// CLI, but an invalid rootfs still makes the overall invocation fail.
#[test]
fn cli_run_with_missing_rootfs_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_craterun"))
        .args(["run", "--rootfs", "/nonexistent"])
        .env("HOME", tmp.path())
        .output()
        .expect("failed to execute craterun run");

    assert!(!output.status.success());
}

/// Verify `list` (and its `ps` alias) succeed even with no containers.
#[test]
fn cli_list_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_craterun"))
        .arg("list")
        .env("HOME", tmp.path())
        .output()
        .expect("failed to execute craterun list");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("CONTAINER ID"), "list should print a header");

    let ps_output = Command::new(env!("CARGO_BIN_EXE_craterun"))
        .arg("ps")
        .env("HOME", tmp.path())
        .output()
        .expect("failed to execute craterun ps");
    assert!(ps_output.status.success(), "ps alias should also work");
}

/// Verify `delete` (and its `rm` alias) with a non-existent ID fail gracefully.
#[test]
fn cli_delete_nonexistent() {
    let tmp = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_craterun"))
        .args(["delete", "deadbeef"])
        .env("HOME", tmp.path())
        .output()
        .expect("failed to execute craterun delete");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("no container found"),
        "should report no container found, got: {stderr}"
    );

    let rm_output = Command::new(env!("CARGO_BIN_EXE_craterun"))
        .args(["rm", "deadbeef"])
        .env("HOME", tmp.path())
        .output()
        .expect("failed to execute craterun rm");
    assert!(!rm_output.status.success(), "rm alias should also fail on unknown id");
}

/// Verify `logs` with a non-existent ID fails gracefully.
#[test]
fn cli_logs_nonexistent() {
    let tmp = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_craterun"))
        .args(["logs", "deadbeef"])
        .env("HOME", tmp.path())
        .output()
        .expect("failed to execute craterun logs");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("no container found"),
        "should report no container found, got: {stderr}"
    );
}
