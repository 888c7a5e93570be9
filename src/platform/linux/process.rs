//! Brings a child process into being inside a fresh set of namespaces,
//! synchronises the parent/child handoff, and later re-enters those
//! namespaces from an unrelated process for `exec`.

use std::ffi::CString;
use std::fs::File;
use std::os::unix::io::IntoRawFd;
use std::path::{Path, PathBuf};

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use crate::core::error::{Result, RuntimeError};
use crate::core::model::ContainerConfig;
use crate::platform::linux::{cgroups, mounts, namespaces};

/// Size of the dedicated stack region handed to `clone(2)`.
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// A spawned-but-not-yet-released child. The Lifecycle Manager holds this
/// between "child exists" and "child may proceed past the handshake read",
/// so it can attach the child's PID to the cgroup leaf before the child
/// does any accounted work.
pub struct SpawnHandle {
    pub pid: u32,
    release_fd: std::os::unix::io::RawFd,
    _stack: Box<[u8]>,
}

/// Perform the clone call and the parent-side half of the handshake. The
/// child blocks on the synchronisation read and does not touch
/// mounts/hostname/exec until [`release`] is called.
pub fn spawn(
    config: &ContainerConfig,
    container_id: &str,
    rootfs: &Path,
    stdout_file: File,
    stderr_file: File,
) -> Result<SpawnHandle> {
    let flags = namespaces::container_clone_flags(config);

    let (read_fd, write_fd) = nix::unistd::pipe()
        .map_err(|e| RuntimeError::Process(format!("failed to create sync pipe: {e}")))?;
    let read_raw = read_fd.into_raw_fd();
    let write_raw = write_fd.into_raw_fd();

    let rootfs_owned: PathBuf = rootfs.to_path_buf();
    let cmd = config.cmd.clone();
    let env = config.env.clone();
    let hostname = config
        .hostname
        .clone()
        .unwrap_or_else(|| container_id.to_string());
    let stdout_raw = stdout_file.into_raw_fd();
    let stderr_raw = stderr_file.into_raw_fd();

    let mut stack = vec![0u8; CHILD_STACK_SIZE].into_boxed_slice();

    let child_fn = Box::new(move || -> isize {
        unsafe { libc::close(write_raw) };

        // Block on the single-byte synchronisation read. All namespace
        // setup that must observe uid/gid maps is downstream of this.
        // Raw libc calls, not the nix wrappers: this closure runs across
        // the clone boundary where only a small, signal-safe set of
        // operations is sound.
        let mut buf = [0u8; 1];
        loop {
            let n = unsafe { libc::read(read_raw, buf.as_mut_ptr() as *mut _, 1) };
            if n >= 0 {
                break;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                break;
            }
        }
        unsafe { libc::close(read_raw) };

        match init_container(&hostname, &rootfs_owned, &cmd, &env, stdout_raw, stderr_raw) {
            Ok(()) => unreachable!("execve replaces this process on success"),
            Err(InitFailure::Setup(e)) => {
                log::error!("container init failed: {e}");
                1
            }
            Err(InitFailure::Exec(e)) => {
                log::error!("container init failed: {e}");
                127
            }
        }
    });

    // SAFETY: the child only touches values moved into `child_fn`; no
    // shared mutable state survives the clone boundary.
    let child = unsafe { nix::sched::clone(child_fn, &mut stack, flags, Some(libc::SIGCHLD)) }
        .map_err(|e| RuntimeError::Namespace(format!("clone failed: {e} (are you root?)")))?;

    unsafe { libc::close(read_raw) };

    Ok(SpawnHandle {
        pid: child.as_raw() as u32,
        release_fd: write_raw,
        _stack: stack,
    })
}

/// Install uid/gid maps for a `SpawnHandle`'s child, if user namespaces
/// are enabled. Must be called before [`release`].
pub fn install_identity_maps(handle: &SpawnHandle, config: &ContainerConfig) -> Result<()> {
    if !config.enable_user_ns {
        return Ok(());
    }
    let (Some(uid_map), Some(gid_map)) = (config.uid_map, config.gid_map) else {
        return Ok(());
    };
    namespaces::write_user_maps(handle.pid as i32, uid_map, gid_map)
}

/// Release the child past its synchronisation barrier.
pub fn release(handle: SpawnHandle) -> Result<()> {
    let buf = [0u8; 1];
    let n = unsafe { libc::write(handle.release_fd, buf.as_ptr() as *const _, 1) };
    unsafe { libc::close(handle.release_fd) };
    if n < 0 {
        return Err(RuntimeError::Process(format!(
            "failed to release child: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Distinguishes a setup-stage failure (hostname/mounts/dup2/argv
/// validation, exit code 1) from an exec-stage failure (exit code 127) —
/// the two must exit differently, so the error carries which stage it came
/// from.
enum InitFailure {
    Setup(RuntimeError),
    Exec(RuntimeError),
}

/// Child-side init: hostname, filesystem assembly, environment reset, exec.
/// Runs entirely inside the new namespaces, after the handshake release.
fn init_container(
    hostname: &str,
    rootfs: &Path,
    cmd: &[String],
    extra_env: &[String],
    stdout_raw: std::os::unix::io::RawFd,
    stderr_raw: std::os::unix::io::RawFd,
) -> std::result::Result<(), InitFailure> {
    namespaces::set_hostname(hostname).map_err(InitFailure::Setup)?;

    mounts::pivot_to_rootfs(rootfs).map_err(InitFailure::Setup)?;
    mounts::mount_essentials().map_err(InitFailure::Setup)?;

    nix::unistd::dup2(stdout_raw, 1)
        .map_err(|e| InitFailure::Setup(RuntimeError::Process(format!("dup2 stdout failed: {e}"))))?;
    nix::unistd::dup2(stderr_raw, 2)
        .map_err(|e| InitFailure::Setup(RuntimeError::Process(format!("dup2 stderr failed: {e}"))))?;

    let argv = if cmd.is_empty() {
        vec!["/bin/sh".to_string()]
    } else {
        cmd.to_vec()
    };

    let program = CString::new(argv[0].as_str())
        .map_err(|_| InitFailure::Setup(RuntimeError::Invalid(format!("invalid command: '{}'", argv[0]))))?;
    let args: Vec<CString> = argv
        .iter()
        .map(|a| CString::new(a.as_str()).map_err(|_| RuntimeError::Invalid("invalid argument".into())))
        .collect::<Result<_>>()
        .map_err(InitFailure::Setup)?;

    let mut env_strings = vec![
        "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
        "TERM=xterm-256color".to_string(),
        "HOME=/root".to_string(),
    ];
    env_strings.extend(extra_env.iter().cloned());

    let env: Vec<CString> = env_strings
        .iter()
        .map(|e| CString::new(e.as_str()).map_err(|_| RuntimeError::Invalid("invalid env entry".into())))
        .collect::<Result<_>>()
        .map_err(InitFailure::Setup)?;

    nix::unistd::execve(&program, &args, &env).map_err(|e| {
        InitFailure::Exec(RuntimeError::Process(format!("execve '{}' failed: {e}", argv[0])))
    })?;

    unreachable!("execve does not return on success");
}

/// Re-enter an existing container's namespaces and exec a command inside
/// it. Forks a helper process; the helper
/// enters `mnt, uts, ipc, cgroup` (in that order — `user`/`pid` are
/// deliberately skipped, see `namespaces::EXEC_REENTRY_ORDER`), joins the
/// container's cgroup leaf, chdirs to `/`, and execs. The caller waits for
/// the helper and returns its exit code.
pub fn exec_into(container_id: &str, target_pid: u32, cmd: &[String]) -> Result<i32> {
    match unsafe { nix::unistd::fork() }
        .map_err(|e| RuntimeError::Process(format!("fork for exec helper failed: {e}")))?
    {
        nix::unistd::ForkResult::Parent { child } => wait_blocking(child),
        nix::unistd::ForkResult::Child => {
            namespaces::enter_all_for_exec(target_pid);

            let leaf = cgroups::cgroup_path(container_id);
            if let Err(e) = cgroups::add_process(&leaf, std::process::id()) {
                log::warn!("exec helper could not join cgroup leaf: {e}");
            }

            if let Err(e) = nix::unistd::chdir("/") {
                log::warn!("exec helper chdir / failed: {e}");
            }

            let result = exec_command(cmd);
            if let Err(e) = result {
                log::error!("exec failed: {e}");
                std::process::exit(127);
            }
            unreachable!("execve does not return on success");
        }
    }
}

fn exec_command(cmd: &[String]) -> Result<()> {
    if cmd.is_empty() {
        return Err(RuntimeError::Invalid("exec requires a command".into()));
    }
    let program = CString::new(cmd[0].as_str())
        .map_err(|_| RuntimeError::Invalid(format!("invalid command: '{}'", cmd[0])))?;
    let args: Vec<CString> = cmd
        .iter()
        .map(|a| CString::new(a.as_str()).map_err(|_| RuntimeError::Invalid("invalid argument".into())))
        .collect::<Result<_>>()?;

    let current_env: Vec<CString> = std::env::vars()
        .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
        .collect();

    nix::unistd::execve(&program, &args, &current_env)
        .map_err(|e| RuntimeError::Process(format!("execve '{}' failed: {e}", cmd[0])))?;
    unreachable!()
}

/// Send a signal to a PID. Returns `Ok(true)` if delivered, `Ok(false)` if
/// `pid` is 0 (never-started container) or the process no longer exists
/// (`ESRCH`) — both cases mean the caller should treat the container as
/// already stopped rather than erroring out.
pub fn send_signal(pid: u32, sig: Signal) -> Result<bool> {
    if pid == 0 {
        return Ok(false);
    }
    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::ESRCH) => Ok(false),
        Err(e) => Err(RuntimeError::Process(format!(
            "failed to signal pid {pid} with {sig:?}: {e}"
        ))),
    }
}

/// Blocking wait for `pid`, resilient to `EINTR`.
pub fn wait_blocking(pid: Pid) -> Result<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(128 + sig as i32),
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(RuntimeError::Process(format!("waitpid failed: {e}"))),
        }
    }
}

/// Blocking wait by raw pid, for callers (e.g. lifecycle) that only track
/// `u32` PIDs.
pub fn wait_blocking_pid(pid: u32) -> Result<i32> {
    wait_blocking(Pid::from_raw(pid as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_signal_to_pid_zero_is_noop() {
        assert!(!send_signal(0, Signal::SIGTERM).unwrap());
    }

    #[test]
    fn send_signal_to_dead_pid_reports_not_delivered() {
        // A pid this large is never a live process.
        assert!(!send_signal(i32::MAX as u32, Signal::SIGTERM).unwrap());
    }
}
