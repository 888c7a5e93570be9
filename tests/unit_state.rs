/// Integration tests for the Record Store's on-disk layout, driven through
/// the CLI since `craterun` is a binary-only crate with no public library
/// surface to unit-test against directly.

use std::path::Path;
use std::process::Command;

fn run(args: &[&str], home: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_craterun"))
        .args(args)
        .env("HOME", home)
        .output()
        .expect("failed to execute craterun")
}

#[test]
fn state_directory_uses_home() {
    let home = tempfile::tempdir().unwrap();
    // create() never touches a privileged path; it always lands under
    // $HOME/.craterun when not running as root.
    let output = run(
        &["create", "--name", "hello", "--rootfs", "/nonexistent"],
        home.path(),
    );
    assert!(
        output.status.success(),
        "create should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(home.path().join(".craterun").join("containers").is_dir());
}

#[test]
fn create_writes_a_greppable_state_file() {
    let home = tempfile::tempdir().unwrap();
    let output = run(
        &["create", "--name", "hello", "--rootfs", "/nonexistent"],
        home.path(),
    );
    assert!(output.status.success());

    let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
    assert_eq!(id.len(), 12);

    let state_path = home
        .path()
        .join(".craterun")
        .join("containers")
        .join(&id)
        .join("state.txt");
    let contents = std::fs::read_to_string(&state_path).unwrap();

    assert!(contents.starts_with(&format!("id={id}\n")));
    assert!(contents.contains("name=hello\n"));
    assert!(contents.contains("state=created\n"));
    assert!(contents.contains("pid=0\n"));
    assert!(contents.contains("---json---"));
}

#[test]
fn list_shows_created_container() {
    let home = tempfile::tempdir().unwrap();
    run(&["create", "--name", "one", "--rootfs", "/nonexistent"], home.path());
    run(&["create", "--name", "two", "--rootfs", "/nonexistent"], home.path());

    let output = run(&["list"], home.path());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("one"));
    assert!(stdout.contains("two"));
    assert!(stdout.contains("created"));
}

#[test]
fn delete_removes_state_directory() {
    let home = tempfile::tempdir().unwrap();
    let output = run(&["create", "--name", "x", "--rootfs", "/nonexistent"], home.path());
    let id = String::from_utf8_lossy(&output.stdout).trim().to_string();

    let del = run(&["delete", &id], home.path());
    assert!(del.status.success(), "delete should succeed");

    let container_dir = home.path().join(".craterun").join("containers").join(&id);
    assert!(!container_dir.exists());
}
