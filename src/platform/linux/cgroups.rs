//! Creates, configures, measures, and destroys one cgroup v2 leaf per
//! container.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::core::error::{Result, RuntimeError};
use crate::core::model::{Metrics, ResourceLimits};

/// The cgroup v2 unified mount point.
const CGROUP_ROOT: &str = "/sys/fs/cgroup";
/// CrateRun's sub-hierarchy under the unified mount point.
const RUNTIME_NAME: &str = "craterun";
/// Controllers this runtime always enables, written one per request.
const CONTROLLERS: &[&str] = &["cpu", "memory", "pids", "io"];

/// Path of the runtime-wide cgroup directory, e.g. `/sys/fs/cgroup/craterun`.
pub fn runtime_root() -> PathBuf {
    Path::new(CGROUP_ROOT).join(RUNTIME_NAME)
}

/// Path of a single container's cgroup leaf.
pub fn cgroup_path(container_id: &str) -> PathBuf {
    runtime_root().join(container_id)
}

/// Refuse to operate if the host has no cgroup v2 unified hierarchy.
fn require_cgroup_v2() -> Result<()> {
    if !Path::new(CGROUP_ROOT).join("cgroup.controllers").exists() {
        return Err(RuntimeError::Cgroup(
            "cgroup v2 unified hierarchy not found (cgroup.controllers missing); \
             is /sys/fs/cgroup mounted as cgroup2?"
                .into(),
        ));
    }
    Ok(())
}

/// Enable every controller in `CONTROLLERS`, one write per controller, in
/// `<dir>/cgroup.subtree_control`. Per-controller failures are warnings —
/// they usually mean "already enabled".
fn enable_controllers(dir: &Path) -> Result<()> {
    let subtree = dir.join("cgroup.subtree_control");
    for controller in CONTROLLERS {
        if let Err(e) = fs::write(&subtree, format!("+{controller}")) {
            log::warn!(
                "enabling controller '{controller}' in {} failed (often harmless, may already \
                 be enabled): {e}",
                subtree.display()
            );
        }
    }
    Ok(())
}

/// Build the runtime's cgroup root (creating and enabling controllers on it
/// if this is the first container on the host) and this container's leaf.
pub fn create_leaf(container_id: &str) -> Result<PathBuf> {
    require_cgroup_v2()?;

    let root = runtime_root();
    if !root.exists() {
        fs::create_dir_all(&root)
            .map_err(|e| RuntimeError::Cgroup(format!("failed to create {}: {e}", root.display())))?;
        enable_controllers(Path::new(CGROUP_ROOT))?;
        enable_controllers(&root)?;
    }

    let leaf = cgroup_path(container_id);
    fs::create_dir_all(&leaf)
        .map_err(|e| RuntimeError::Cgroup(format!("failed to create leaf {}: {e}", leaf.display())))?;
    Ok(leaf)
}

/// Translate `limits` into writes on the leaf's interface files. Every
/// write is independent and best-effort: a failure is logged and the rest
/// of the limits are still attempted.
pub fn apply_limits(leaf: &Path, limits: &ResourceLimits) {
    if let Some(mem) = limits.memory_bytes.filter(|v| *v > 0) {
        write_best_effort(leaf, "memory.max", &mem.to_string());

        if let Some(swap) = limits.swap_bytes.filter(|v| *v >= 0) {
            write_best_effort(leaf, "memory.swap.max", &swap.to_string());
        }
    }

    if let Some(quota) = limits.cpu_quota_us.filter(|v| *v > 0) {
        write_best_effort(leaf, "cpu.max", &format!("{quota} {}", limits.cpu_period_us));
    }

    if let Some(shares) = limits.cpu_shares.filter(|v| *v > 0) {
        let weight = ((shares * 100) / 1024).clamp(1, 10_000);
        write_best_effort(leaf, "cpu.weight", &weight.to_string());
    }

    if let Some(pids) = limits.pids_max.filter(|v| *v > 0) {
        write_best_effort(leaf, "pids.max", &pids.to_string());
    }
}

fn write_best_effort(leaf: &Path, filename: &str, value: &str) {
    let path = leaf.join(filename);
    if let Err(e) = fs::write(&path, value) {
        log::warn!("failed to write '{value}' to {}: {e}", path.display());
    }
}

/// Converts a cgroup v1-style share count onto the v2 weight scale
/// (1-10000), exposed separately so it can be tested without a real
/// cgroup filesystem.
pub fn cpu_shares_to_weight(shares: i64) -> i64 {
    ((shares * 100) / 1024).clamp(1, 10_000)
}

/// Attach a process to the leaf by writing its PID to `cgroup.procs`.
pub fn add_process(leaf: &Path, pid: u32) -> Result<()> {
    fs::write(leaf.join("cgroup.procs"), pid.to_string()).map_err(|e| {
        RuntimeError::Cgroup(format!(
            "failed to add pid {pid} to cgroup {}: {e}",
            leaf.display()
        ))
    })
}

/// Read the point-in-time Cgroup Controller metrics for a leaf.
pub fn read_metrics(leaf: &Path) -> Result<Metrics> {
    let memory_current = read_i64_or_max(leaf, "memory.current").unwrap_or(0);
    let memory_peak = read_i64_or_max(leaf, "memory.peak").unwrap_or(0);
    let memory_limit = read_i64_or_max(leaf, "memory.max").unwrap_or(-1);
    let pids_current = read_i64_or_max(leaf, "pids.current").unwrap_or(0);
    let pids_limit = read_i64_or_max(leaf, "pids.max").unwrap_or(-1);
    let cpu_usage_ns = read_cpu_usage_ns(leaf).unwrap_or(0);

    Ok(Metrics {
        memory_current,
        memory_peak,
        memory_limit,
        cpu_usage_ns,
        pids_current,
        pids_limit,
    })
}

/// Read an interface file whose content is either an integer or the
/// literal `"max"` (mapped to `-1`, unlimited).
fn read_i64_or_max(leaf: &Path, filename: &str) -> Option<i64> {
    let contents = fs::read_to_string(leaf.join(filename)).ok()?;
    let trimmed = contents.trim();
    if trimmed == "max" {
        Some(-1)
    } else {
        trimmed.parse().ok()
    }
}

/// Read `cpu.stat`'s `usage_usec` field and convert microseconds to
/// nanoseconds.
fn read_cpu_usage_ns(leaf: &Path) -> Option<u64> {
    let contents = fs::read_to_string(leaf.join("cpu.stat")).ok()?;
    for line in contents.lines() {
        if let Some(usec) = line.strip_prefix("usage_usec ") {
            return usec.trim().parse::<u64>().ok().map(|v| v * 1000);
        }
    }
    None
}

/// Write `1`/`0` to `cgroup.freeze`.
pub fn freeze(leaf: &Path) -> Result<()> {
    fs::write(leaf.join("cgroup.freeze"), "1")
        .map_err(|e| RuntimeError::Cgroup(format!("failed to freeze {}: {e}", leaf.display())))
}

pub fn thaw(leaf: &Path) -> Result<()> {
    fs::write(leaf.join("cgroup.freeze"), "0")
        .map_err(|e| RuntimeError::Cgroup(format!("failed to thaw {}: {e}", leaf.display())))
}

/// Kill every process in the leaf. Uses `cgroup.kill` (kernel >= 5.14) when
/// present and writable; otherwise iterates `cgroup.procs` and signals each
/// PID directly.
pub fn kill(leaf: &Path) -> Result<()> {
    let kill_file = leaf.join("cgroup.kill");
    if kill_file.exists() {
        match fs::write(&kill_file, "1") {
            Ok(()) => return Ok(()),
            Err(e) => log::warn!(
                "cgroup.kill write failed ({e}), falling back to per-process SIGKILL"
            ),
        }
    }

    let procs = fs::read_to_string(leaf.join("cgroup.procs")).unwrap_or_default();
    for line in procs.lines() {
        if let Ok(pid) = line.trim().parse::<i32>() {
            let _ = signal::kill(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
    Ok(())
}

/// Kill everything in the leaf, give the kernel a moment to reap, then
/// remove the leaf directory. `ENOENT` counts as success, so calling this
/// twice on the same container is harmless.
pub fn teardown(container_id: &str) -> Result<()> {
    let leaf = cgroup_path(container_id);
    if !leaf.exists() {
        return Ok(());
    }

    let _ = kill(&leaf);
    thread::sleep(Duration::from_millis(100));

    match fs::remove_dir(&leaf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RuntimeError::Cgroup(format!(
            "failed to remove cgroup leaf {}: {e}",
            leaf.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_clamp_matches_formula() {
        assert_eq!(cpu_shares_to_weight(1024), 100);
        assert_eq!(cpu_shares_to_weight(1), 1);
        assert_eq!(cpu_shares_to_weight(1_000_000), 10_000);
        assert_eq!(cpu_shares_to_weight(0), 1);
    }

    #[test]
    fn leaf_path_nests_under_runtime_root() {
        let path = cgroup_path("abc123");
        assert_eq!(path, Path::new("/sys/fs/cgroup/craterun/abc123"));
    }
}
