//! Builds the clone-flag set for a new container, installs identity maps
//! across the parent/child handshake, and re-enters an existing
//! container's namespaces for `exec`.

use std::fs;
use std::os::unix::io::AsFd;

use nix::sched::CloneFlags;

use crate::core::error::{Result, RuntimeError};
use crate::core::model::{ContainerConfig, IdMapEntry};

/// Namespace flags entered by every container: pid, mount, uts, ipc,
/// cgroup. Network and user namespaces are added conditionally.
pub fn container_clone_flags(config: &ContainerConfig) -> CloneFlags {
    let mut flags = CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWIPC
        | CloneFlags::CLONE_NEWCGROUP;

    if config.enable_network {
        flags |= CloneFlags::CLONE_NEWNET;
    }
    if config.enable_user_ns {
        flags |= CloneFlags::CLONE_NEWUSER;
    }
    flags
}

/// Call `unshare(2)` with the given flags.
pub fn unshare_namespaces(flags: CloneFlags) -> Result<()> {
    nix::sched::unshare(flags)
        .map_err(|e| RuntimeError::Namespace(format!("unshare failed: {e} (are you root?)")))
}

/// Set the hostname inside a UTS namespace.
pub fn set_hostname(name: &str) -> Result<()> {
    nix::unistd::sethostname(name)
        .map_err(|e| RuntimeError::Namespace(format!("sethostname failed: {e}")))
}

/// Install single-row uid/gid maps for a freshly cloned child that is
/// sitting in a new user namespace. Must run after the child exists and
/// before it crosses the synchronisation barrier.
///
/// `setgroups deny` failures are tolerated (the file may already read
/// "deny"); uid_map/gid_map failures are fatal to the handshake.
pub fn write_user_maps(pid: i32, uid_map: IdMapEntry, gid_map: IdMapEntry) -> Result<()> {
    let setgroups_path = format!("/proc/{pid}/setgroups");
    if let Err(e) = fs::write(&setgroups_path, "deny") {
        log::warn!("could not write {setgroups_path} (may already be denied): {e}");
    }

    let uid_map_path = format!("/proc/{pid}/uid_map");
    fs::write(&uid_map_path, format!("{} {} 1\n", uid_map.container, uid_map.host))
        .map_err(|e| RuntimeError::Namespace(format!("failed to write uid_map: {e}")))?;

    let gid_map_path = format!("/proc/{pid}/gid_map");
    fs::write(&gid_map_path, format!("{} {} 1\n", gid_map.container, gid_map.host))
        .map_err(|e| RuntimeError::Namespace(format!("failed to write gid_map: {e}")))?;

    Ok(())
}

/// The namespace kinds re-entered for `exec`, in order. `exec` deliberately
/// omits `user` and `pid` — entering the pid namespace only affects
/// children of the entering process, not the entering process itself, so
/// doing so here would be misleading; this is intentional, documented
/// behaviour, not an oversight.
pub const EXEC_REENTRY_ORDER: &[&str] = &["mnt", "uts", "ipc", "cgroup"];

/// Re-enter one namespace of an existing process. Best-effort: the caller
/// decides whether a failure here is fatal.
pub fn enter_namespace(pid: u32, ns: &str) -> Result<()> {
    let path = format!("/proc/{pid}/ns/{ns}");
    let file = fs::File::open(&path)
        .map_err(|e| RuntimeError::NotFound(format!("namespace file {path} missing: {e}")))?;
    nix::sched::setns(file.as_fd(), CloneFlags::empty())
        .map_err(|e| RuntimeError::Namespace(format!("setns into {ns} of pid {pid} failed: {e}")))
}

/// Re-enter every namespace in `EXEC_REENTRY_ORDER` for `pid`. Each failure
/// is logged as a warning and entry continues into the next namespace
/// kind, per the runtime's lenient re-entry policy.
pub fn enter_all_for_exec(pid: u32) {
    for ns in EXEC_REENTRY_ORDER {
        if let Err(e) = enter_namespace(pid, ns) {
            log::warn!("exec: failed to enter {ns} namespace of pid {pid}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ContainerConfig;

    #[test]
    fn default_flags_exclude_network_and_user() {
        let config = ContainerConfig::new("/tmp/rootfs");
        let flags = container_clone_flags(&config);
        assert!(flags.contains(CloneFlags::CLONE_NEWNS));
        assert!(flags.contains(CloneFlags::CLONE_NEWPID));
        assert!(flags.contains(CloneFlags::CLONE_NEWUTS));
        assert!(flags.contains(CloneFlags::CLONE_NEWIPC));
        assert!(flags.contains(CloneFlags::CLONE_NEWCGROUP));
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(!flags.contains(CloneFlags::CLONE_NEWUSER));
    }

    #[test]
    fn network_and_user_flags_are_additive() {
        let mut config = ContainerConfig::new("/tmp/rootfs");
        config.enable_network = true;
        config.enable_user_ns = true;
        let flags = container_clone_flags(&config);
        assert!(flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(flags.contains(CloneFlags::CLONE_NEWUSER));
    }

    #[test]
    fn exec_reentry_order_omits_user_and_pid() {
        assert!(!EXEC_REENTRY_ORDER.contains(&"user"));
        assert!(!EXEC_REENTRY_ORDER.contains(&"pid"));
        assert_eq!(EXEC_REENTRY_ORDER[0], "mnt");
    }
}
