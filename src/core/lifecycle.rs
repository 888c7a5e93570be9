//! The state machine that composes the
//! Record Store, Cgroup Controller, Filesystem Assembler, and Namespace
//! Orchestrator into `create`/`start`/`stop`/`delete`/`exec`/`list`, and
//! keeps the Record Store consistent across all of them.
//!
//! ```text
//! created ──start──▶ running ──stop──▶ stopped ──delete──▶ deleted
//!    │                  │                 │
//!    └────── delete ────┴──── delete ─────┘
//! ```

use std::fs::{self, File, OpenOptions};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use nix::sys::signal::Signal;

use super::error::{Result, RuntimeError};
use super::id;
use super::model::{ContainerConfig, ContainerRecord, ContainerState, Metrics};
use super::state;
use crate::platform::linux::{cgroups, process};

/// How long `stop` waits after SIGTERM before escalating to SIGKILL, when
/// the caller doesn't specify one.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;
/// Poll frequency while waiting for SIGTERM to take effect.
const STOP_POLL_HZ: u64 = 10;

/// Allocate an id (retrying on collision), fill in defaults, initialise
/// the cgroup leaf (best-effort), and persist a `created` record.
pub fn create(config: &ContainerConfig) -> Result<ContainerRecord> {
    let id = match &config.id {
        Some(id) if !id.is_empty() => {
            if state::load(id).is_ok() {
                return Err(RuntimeError::Exists(format!(
                    "container with id '{id}' already exists"
                )));
            }
            id.clone()
        }
        _ => allocate_unique_id()?,
    };

    let name = config.name.clone().unwrap_or_else(|| id.clone());
    let hostname = config.hostname.clone().unwrap_or_else(|| name.clone());

    let container_dir = state::container_dir(&id)?;
    fs::create_dir_all(&container_dir)?;

    let lock = acquire_create_lock(&id)?;

    let cgroup_path = match cgroups::create_leaf(&id) {
        Ok(path) => {
            cgroups::apply_limits(&path, &config.limits);
            path.display().to_string()
        }
        Err(e) => {
            log::warn!("cgroup initialisation failed for '{id}' (continuing without limits): {e}");
            String::new()
        }
    };

    let record = ContainerRecord {
        id: id.clone(),
        name,
        hostname,
        rootfs: config.rootfs.clone(),
        cmd: config.cmd.clone(),
        state: ContainerState::Created,
        pid: 0,
        exit_code: None,
        created_at: Utc::now(),
        started_at: None,
        stopped_at: None,
        cgroup_path,
        state_dir: container_dir.display().to_string(),
        limits: config.limits.clone(),
        env: config.env.clone(),
        enable_network: config.enable_network,
        enable_user_ns: config.enable_user_ns,
        uid_map: config.uid_map,
        gid_map: config.gid_map,
    };

    state::save(&record)?;
    release_create_lock(lock);

    log::info!("created container '{}' ({})", record.name, record.id);
    Ok(record)
}

/// Generate ids until one doesn't collide with an existing record. The
/// generator itself already draws from the OS CSPRNG; this loop is the
/// actual uniqueness guarantee beyond what the CSPRNG alone provides.
fn allocate_unique_id() -> Result<String> {
    for _ in 0..8 {
        let candidate = id::generate_id();
        if state::load(&candidate).is_err() {
            return Ok(candidate);
        }
    }
    Err(RuntimeError::Exists(
        "failed to allocate a unique container id after 8 attempts".into(),
    ))
}

/// Best-effort advisory lock: `O_EXCL`-created file under the container's
/// state directory. Does not protect against crashes or other hosts; it
/// only narrows the window of a concurrent-create race, it doesn't close it.
struct CreateLock {
    path: std::path::PathBuf,
    held: bool,
}

fn acquire_create_lock(id: &str) -> Result<CreateLock> {
    let path = state::container_dir(id)?.join(".lock");
    let held = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .is_ok();
    if !held {
        log::warn!("could not acquire advisory lock for '{id}' (continuing anyway)");
    }
    Ok(CreateLock { path, held })
}

fn release_create_lock(lock: CreateLock) {
    if lock.held {
        let _ = fs::remove_file(&lock.path);
    }
}

/// Reject unless `created` or `stopped`; spawn the Orchestrator's child,
/// attach it to the cgroup leaf before releasing the handshake, then
/// persist `state=running`.
pub fn start(mut record: ContainerRecord) -> Result<ContainerRecord> {
    if !matches!(record.state, ContainerState::Created | ContainerState::Stopped) {
        return Err(RuntimeError::Invalid(format!(
            "cannot start container '{}' in state '{}'",
            record.id, record.state
        )));
    }

    let rootfs = fs::canonicalize(&record.rootfs)
        .map_err(|e| RuntimeError::Filesystem(format!("rootfs '{}' invalid: {e}", record.rootfs)))?;
    if rootfs == std::path::Path::new("/") {
        return Err(RuntimeError::Filesystem(
            "refusing to use '/' as rootfs — this would destroy the host".to_string(),
        ));
    }

    let stdout_path = state::log_path(&record.id, state::STDOUT_LOG)?;
    let stderr_path = state::log_path(&record.id, state::STDERR_LOG)?;
    let stdout_file = File::create(&stdout_path)?;
    let stderr_file = File::create(&stderr_path)?;

    let config = config_from_record(&record);
    let handle = process::spawn(&config, &record.id, &rootfs, stdout_file, stderr_file)?;

    process::install_identity_maps(&handle, &config)?;

    if !record.cgroup_path.is_empty() {
        let leaf = cgroups::cgroup_path(&record.id);
        if let Err(e) = cgroups::add_process(&leaf, handle.pid) {
            log::warn!("failed to attach pid {} to cgroup leaf: {e}", handle.pid);
        }
    }

    let pid = handle.pid;
    process::release(handle)?;

    record.pid = pid;
    record.state = ContainerState::Running;
    record.started_at = Some(Utc::now());
    state::save(&record)?;

    log::info!("started container '{}' (pid {})", record.id, record.pid);
    Ok(record)
}

fn config_from_record(record: &ContainerRecord) -> ContainerConfig {
    ContainerConfig {
        id: Some(record.id.clone()),
        name: Some(record.name.clone()),
        hostname: Some(record.hostname.clone()),
        rootfs: record.rootfs.clone(),
        cmd: record.cmd.clone(),
        env: record.env.clone(),
        limits: record.limits.clone(),
        enable_network: record.enable_network,
        enable_user_ns: record.enable_user_ns,
        uid_map: record.uid_map,
        gid_map: record.gid_map,
    }
}

/// No-op if not running. SIGTERM, poll at 10 Hz up to `timeout_s`, then
/// SIGKILL and poll again. The process running `stop` is not necessarily
/// the init's parent (a separate invocation from the one that called
/// `start`/`run`), so it can't rely on `waitpid` to observe the exit — a
/// reparented init is reaped by whatever adopted it, not by us, and
/// `waitpid` on a pid we never forked just returns `ECHILD`. Liveness is
/// polled with `state::pid_alive` instead, and a pid that's already gone
/// by the time we get here (`ESRCH` on the signal) is treated as already
/// stopped rather than an error.
pub fn stop(mut record: ContainerRecord, timeout_s: u64) -> Result<ContainerRecord> {
    if record.state != ContainerState::Running {
        return Ok(record);
    }

    let delivered = process::send_signal(record.pid, Signal::SIGTERM)?;
    if delivered && !poll_until_dead(record.pid, timeout_s * STOP_POLL_HZ) {
        log::warn!(
            "container '{}' did not exit within {timeout_s}s of SIGTERM, sending SIGKILL",
            record.id
        );
        if process::send_signal(record.pid, Signal::SIGKILL)? {
            poll_until_dead(record.pid, STOP_POLL_HZ);
        }
    }

    record.exit_code = None;
    record.stopped_at = Some(Utc::now());
    record.pid = 0;
    record.state = ContainerState::Stopped;
    state::save(&record)?;

    log::info!("stopped container '{}'", record.id);
    Ok(record)
}

/// Poll `state::pid_alive` at `STOP_POLL_HZ` for up to `ticks` iterations.
/// Returns `true` once the pid disappears.
fn poll_until_dead(pid: u32, ticks: u64) -> bool {
    for _ in 0..ticks {
        if !state::pid_alive(pid) {
            return true;
        }
        thread::sleep(Duration::from_millis(1000 / STOP_POLL_HZ));
    }
    !state::pid_alive(pid)
}

/// If running, stop with the default timeout; tear down the cgroup leaf;
/// remove the state directory. Returns the record with `state=Deleted`
/// (in-memory only — nothing is persisted once a container is deleted).
pub fn delete(record: ContainerRecord) -> Result<ContainerRecord> {
    let mut record = if record.state == ContainerState::Running {
        stop(record, DEFAULT_STOP_TIMEOUT_SECS)?
    } else {
        record
    };

    if let Err(e) = cgroups::teardown(&record.id) {
        log::warn!("cgroup teardown failed for '{}': {e}", record.id);
    }

    state::delete(&record.id)?;
    record.state = ContainerState::Deleted;

    log::info!("deleted container '{}'", record.id);
    Ok(record)
}

/// Reject unless `running` and the PID is live; otherwise invoke the
/// Orchestrator's re-entry contract and return the exit code.
pub fn exec(record: &ContainerRecord, cmd: &[String]) -> Result<i32> {
    if record.state != ContainerState::Running {
        return Err(RuntimeError::Invalid(format!(
            "cannot exec into container '{}': not running",
            record.id
        )));
    }
    if !state::pid_alive(record.pid) {
        return Err(RuntimeError::NotFound(format!(
            "container '{}' has no live process (pid {})",
            record.id, record.pid
        )));
    }

    process::exec_into(&record.id, record.pid, cmd)
}

/// Return every on-disk record.
pub fn list() -> Result<Vec<ContainerRecord>> {
    state::list()
}

/// Read the Cgroup Controller's current metrics for a running container.
pub fn stats(record: &ContainerRecord) -> Result<Metrics> {
    if record.cgroup_path.is_empty() {
        return Err(RuntimeError::Cgroup(format!(
            "container '{}' has no cgroup leaf",
            record.id
        )));
    }
    cgroups::read_metrics(&cgroups::cgroup_path(&record.id))
}

/// `create` + `start` + wait-for-exit + `delete`, for foreground
/// invocations (`run`). Returns the exit code of the container's init
/// process.
pub fn run(config: &ContainerConfig) -> Result<i32> {
    let created = create(config)?;
    let created_id = created.id.clone();

    let record = match start(created) {
        Ok(r) => r,
        Err(e) => {
            // start failed before a live pid existed to stop; just unwind
            // the cgroup leaf and record create() left behind.
            if let Err(teardown_err) = cgroups::teardown(&created_id) {
                log::warn!("cleanup after failed start also failed: {teardown_err}");
            }
            let _ = state::delete(&created_id);
            return Err(e);
        }
    };

    let exit_code = process::wait_blocking_pid(record.pid)?;

    let mut record = record;
    record.exit_code = Some(exit_code);
    record.stopped_at = Some(Utc::now());
    record.pid = 0;
    record.state = ContainerState::Stopped;
    state::save(&record)?;

    delete(record)?;
    Ok(exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ResourceLimits;
    use std::env;

    fn with_tmp_home() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        env::set_var("HOME", tmp.path().to_str().unwrap());
        tmp
    }

    fn base_config(rootfs: &std::path::Path) -> ContainerConfig {
        let mut config = ContainerConfig::new(rootfs.to_str().unwrap());
        config.cmd = vec!["/bin/true".into()];
        config
    }

    #[test]
    fn create_persists_a_created_record() {
        let _tmp = with_tmp_home();
        let rootfs = tempfile::tempdir().unwrap();

        let config = base_config(rootfs.path());
        let record = create(&config).unwrap();

        assert_eq!(record.state, ContainerState::Created);
        assert_eq!(record.pid, 0);
        assert_eq!(record.id.len(), crate::core::id::ID_LEN);

        let reloaded = state::load(&record.id).unwrap();
        assert_eq!(reloaded.id, record.id);
    }

    #[test]
    fn create_rejects_duplicate_explicit_id() {
        let _tmp = with_tmp_home();
        let rootfs = tempfile::tempdir().unwrap();

        let mut config = base_config(rootfs.path());
        config.id = Some("aaaaaaaaaaaa".into());
        create(&config).unwrap();

        let dup = create(&config);
        assert!(matches!(dup, Err(RuntimeError::Exists(_))));
    }

    #[test]
    fn stop_on_created_container_is_noop() {
        let _tmp = with_tmp_home();
        let rootfs = tempfile::tempdir().unwrap();

        let config = base_config(rootfs.path());
        let record = create(&config).unwrap();
        let stopped = stop(record.clone(), 1).unwrap();
        assert_eq!(stopped.state, ContainerState::Created);
    }

    #[test]
    fn start_rejects_running_container() {
        let _tmp = with_tmp_home();
        let rootfs = tempfile::tempdir().unwrap();

        let mut record = create(&base_config(rootfs.path())).unwrap();
        record.state = ContainerState::Running;
        let result = start(record);
        assert!(matches!(result, Err(RuntimeError::Invalid(_))));
    }

    #[test]
    fn exec_rejects_non_running_container() {
        let _tmp = with_tmp_home();
        let rootfs = tempfile::tempdir().unwrap();

        let record = create(&base_config(rootfs.path())).unwrap();
        let result = exec(&record, &["/bin/true".into()]);
        assert!(matches!(result, Err(RuntimeError::Invalid(_))));
    }

    #[test]
    fn stats_without_cgroup_leaf_is_an_error() {
        let _tmp = with_tmp_home();
        let rootfs = tempfile::tempdir().unwrap();

        let mut record = create(&base_config(rootfs.path())).unwrap();
        record.cgroup_path.clear();
        assert!(stats(&record).is_err());
    }

    #[test]
    fn delete_removes_the_record() {
        let _tmp = with_tmp_home();
        let rootfs = tempfile::tempdir().unwrap();

        let record = create(&base_config(rootfs.path())).unwrap();
        let id = record.id.clone();
        delete(record).unwrap();
        assert!(state::load(&id).is_err());
    }

    #[test]
    fn weight_formula_matches_resource_limits_default_period() {
        let limits = ResourceLimits::new();
        assert_eq!(limits.cpu_period_us, ResourceLimits::DEFAULT_CPU_PERIOD_US);
    }
}
