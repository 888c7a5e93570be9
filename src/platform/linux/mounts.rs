//! Pivot-root and mount-essentials, executed inside the child's
//! already-unshared mount namespace.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::stat::{self, Mode, SFlag};

use crate::core::error::{Result, RuntimeError};

/// Make the entire mount tree recursively private so nothing we do here
/// propagates back to the host, and so `pivot_root` will accept the rootfs
/// as a mount point later.
pub fn make_mount_private() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| RuntimeError::Filesystem(format!("failed to make / private recursively: {e}")))
}

/// Bind-mount `rootfs` onto itself (recursive) so it is itself a mount
/// point, a precondition `pivot_root` enforces.
pub fn bind_mount_rootfs(rootfs: &Path) -> Result<()> {
    mount(
        Some(rootfs),
        rootfs,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| {
        RuntimeError::Filesystem(format!("failed to bind-mount rootfs {}: {e}", rootfs.display()))
    })
}

/// Replace the process's view of `/` with `rootfs`, exiling the old root
/// under `rootfs/.old_root` and detach-unmounting it. A failure to
/// detach-unmount the old root is only a warning — the new root is
/// already in effect by then.
pub fn pivot_to_rootfs(rootfs: &Path) -> Result<()> {
    if !rootfs.is_dir() {
        return Err(RuntimeError::Filesystem(format!(
            "rootfs {} is missing or not a directory",
            rootfs.display()
        )));
    }

    make_mount_private()?;
    bind_mount_rootfs(rootfs)?;

    let old_root = rootfs.join(".old_root");
    fs::create_dir_all(&old_root)
        .map_err(|e| RuntimeError::Filesystem(format!("failed to create {}: {e}", old_root.display())))?;
    fs::set_permissions(&old_root, std::os::unix::fs::PermissionsExt::from_mode(0o700))
        .map_err(|e| RuntimeError::Filesystem(format!("failed to chmod {}: {e}", old_root.display())))?;

    nix::unistd::pivot_root(rootfs, &old_root).map_err(|e| {
        RuntimeError::Filesystem(format!(
            "pivot_root({}, {}) failed: {e}",
            rootfs.display(),
            old_root.display()
        ))
    })?;

    nix::unistd::chdir("/")
        .map_err(|e| RuntimeError::Filesystem(format!("chdir / after pivot_root failed: {e}")))?;

    if let Err(e) = detach_unmount_old_root() {
        log::warn!("failed to detach-unmount old root (new root is already active): {e}");
    }

    Ok(())
}

fn detach_unmount_old_root() -> Result<()> {
    let old_root = Path::new("/.old_root");
    umount2(old_root, MntFlags::MNT_DETACH)
        .map_err(|e| RuntimeError::Filesystem(format!("umount2 {} failed: {e}", old_root.display())))?;
    fs::remove_dir(old_root)
        .map_err(|e| RuntimeError::Filesystem(format!("rmdir {} failed: {e}", old_root.display())))
}

struct EssentialMount {
    path: &'static str,
    fstype: &'static str,
    flags: MsFlags,
    data: Option<&'static str>,
}

/// The essential mount table, in order.
const ESSENTIAL_MOUNTS: &[EssentialMount] = &[
    EssentialMount {
        path: "/proc",
        fstype: "proc",
        flags: MsFlags::from_bits_truncate(
            MsFlags::MS_NOSUID.bits() | MsFlags::MS_NOEXEC.bits() | MsFlags::MS_NODEV.bits(),
        ),
        data: None,
    },
    EssentialMount {
        path: "/sys",
        fstype: "sysfs",
        flags: MsFlags::from_bits_truncate(
            MsFlags::MS_NOSUID.bits()
                | MsFlags::MS_NOEXEC.bits()
                | MsFlags::MS_NODEV.bits()
                | MsFlags::MS_RDONLY.bits(),
        ),
        data: None,
    },
    EssentialMount {
        path: "/dev",
        fstype: "tmpfs",
        flags: MsFlags::from_bits_truncate(MsFlags::MS_NOSUID.bits() | MsFlags::MS_NOEXEC.bits()),
        data: Some("mode=0755"),
    },
    EssentialMount {
        path: "/dev/pts",
        fstype: "devpts",
        flags: MsFlags::from_bits_truncate(MsFlags::MS_NOSUID.bits() | MsFlags::MS_NOEXEC.bits()),
        data: Some("newinstance,ptmxmode=0666"),
    },
    EssentialMount {
        path: "/dev/shm",
        fstype: "tmpfs",
        flags: MsFlags::from_bits_truncate(
            MsFlags::MS_NOSUID.bits() | MsFlags::MS_NOEXEC.bits() | MsFlags::MS_NODEV.bits(),
        ),
        data: Some("mode=1777"),
    },
    EssentialMount {
        path: "/tmp",
        fstype: "tmpfs",
        flags: MsFlags::from_bits_truncate(MsFlags::MS_NOSUID.bits() | MsFlags::MS_NODEV.bits()),
        data: Some("mode=1777"),
    },
];

/// Device node table: (path, major, minor, mode).
const DEVICE_NODES: &[(&str, u64, u64, u32)] = &[
    ("/dev/null", 1, 3, 0o666),
    ("/dev/zero", 1, 5, 0o666),
    ("/dev/random", 1, 8, 0o666),
    ("/dev/urandom", 1, 9, 0o666),
    ("/dev/tty", 5, 0, 0o666),
    ("/dev/console", 5, 1, 0o600),
];

/// Standard fd symlinks created after the device nodes.
const DEVICE_SYMLINKS: &[(&str, &str)] = &[
    ("/dev/fd", "/proc/self/fd"),
    ("/dev/stdin", "/proc/self/fd/0"),
    ("/dev/stdout", "/proc/self/fd/1"),
    ("/dev/stderr", "/proc/self/fd/2"),
];

/// Create and mount `/proc`, `/sys`, `/dev`, `/dev/pts`, `/dev/shm`, `/tmp`
/// inside the new root, in table order, then populate `/dev`'s device
/// nodes and symlinks. Individual mount/mknod failures are warnings — the
/// container is still runnable with a partial `/dev`.
pub fn mount_essentials() -> Result<()> {
    for m in ESSENTIAL_MOUNTS {
        let path = Path::new(m.path);
        if let Err(e) = fs::create_dir_all(path) {
            log::warn!("failed to create {}: {e}", m.path);
            continue;
        }

        if let Err(e) = mount(Some(m.fstype), path, Some(m.fstype), m.flags, m.data) {
            log::warn!("failed to mount {} ({}): {e}", m.path, m.fstype);
        }
    }

    create_device_nodes();
    create_device_symlinks();
    Ok(())
}

fn create_device_nodes() {
    for (path, major, minor, mode) in DEVICE_NODES {
        let perm = Mode::from_bits_truncate(*mode);
        let dev = stat::makedev(*major, *minor);
        if let Err(e) = stat::mknod(Path::new(path), SFlag::S_IFCHR, perm, dev) {
            log::warn!("failed to create device node {path}: {e}");
        }
    }
}

fn create_device_symlinks() {
    for (link, target) in DEVICE_SYMLINKS {
        if let Err(e) = symlink(target, link) {
            log::warn!("failed to create symlink {link} -> {target}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn essential_mount_order_matches_spec_table() {
        let paths: Vec<&str> = ESSENTIAL_MOUNTS.iter().map(|m| m.path).collect();
        assert_eq!(paths, ["/proc", "/sys", "/dev", "/dev/pts", "/dev/shm", "/tmp"]);
    }

    #[test]
    fn device_nodes_use_canonical_major_minor_pairs() {
        let null = DEVICE_NODES.iter().find(|(p, ..)| *p == "/dev/null").unwrap();
        assert_eq!((null.1, null.2, null.3), (1, 3, 0o666));
        let console = DEVICE_NODES.iter().find(|(p, ..)| *p == "/dev/console").unwrap();
        assert_eq!((console.1, console.2, console.3), (5, 1, 0o600));
    }
}
