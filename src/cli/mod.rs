pub mod commands;

use clap::{Parser, Subcommand};

/// CrateRun — a minimal Linux container runtime.
#[derive(Parser, Debug)]
#[command(name = "craterun", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container without starting it.
    Create(ContainerArgs),

    /// Start a previously created (or stopped) container.
    Start {
        /// Container ID, name, or unique prefix.
        id: String,
    },

    /// Stop a running container (SIGTERM, then SIGKILL after a timeout).
    Stop {
        /// Container ID, name, or unique prefix.
        id: String,

        /// Seconds to wait after SIGTERM before sending SIGKILL.
        #[arg(long, default_value_t = crate::core::lifecycle::DEFAULT_STOP_TIMEOUT_SECS)]
        timeout: u64,
    },

    /// Stop (if needed) and remove a container's cgroup and state.
    #[command(alias = "rm")]
    Delete {
        /// Container ID, name, or unique prefix.
        id: String,

        /// Force-remove even if the container is still running.
        #[arg(long)]
        force: bool,
    },

    /// List containers.
    #[command(alias = "ps")]
    List,

    /// Show live resource usage for a container.
    Stats {
        /// Container ID, name, or unique prefix.
        id: String,
    },

    /// Create, start, wait for exit, and remove a container (foreground).
    Run(ContainerArgs),

    /// Execute a command inside a running container.
    Exec {
        /// Container ID, name, or unique prefix.
        id: String,

        /// The command (and arguments) to execute.
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// Open an interactive shell inside a running container (`exec /bin/sh`).
    Shell {
        /// Container ID, name, or unique prefix.
        id: String,
    },

    /// Print the stdout/stderr logs of a container.
    Logs {
        /// Container ID, name, or unique prefix.
        id: String,
    },
}

/// Shared flags for `create` and `run`.
#[derive(clap::Args, Debug)]
pub struct ContainerArgs {
    /// Path to the root filesystem (e.g. an extracted Alpine minirootfs).
    #[arg(long)]
    pub rootfs: String,

    /// Human label for the container (defaults to its id).
    #[arg(long)]
    pub name: Option<String>,

    /// Hostname to set inside the container (defaults to the name).
    #[arg(long)]
    pub hostname: Option<String>,

    /// Memory limit in bytes (e.g. 67108864 for 64 MiB). Passed to cgroup memory.max.
    #[arg(long)]
    pub memory: Option<i64>,

    /// CPU bandwidth as a percentage (0-100) of one core. Translates to
    /// cpu_quota_us = pct * 1000 over the default 100000us period.
    #[arg(long)]
    pub cpus: Option<u32>,

    /// Maximum number of PIDs in the container.
    #[arg(long)]
    pub pids: Option<i64>,

    /// UID to map inside the container (host UID that becomes root inside).
    #[arg(long)]
    pub uid: Option<u32>,

    /// GID to map inside the container.
    #[arg(long)]
    pub gid: Option<u32>,

    /// Run with an isolated (but unconfigured) network namespace.
    #[arg(long)]
    pub network: bool,

    /// A shell string wrapped as `/bin/sh -c <cmd>`, as an alternative to
    /// passing argv after `--`.
    #[arg(long)]
    pub cmd: Option<String>,

    /// The command (and arguments) to execute inside the container.
    /// Everything after `--` is treated as the command; ignored if
    /// `--cmd` is given.
    #[arg(last = true)]
    pub argv: Vec<String>,
}

/// Parse CLI arguments. Called from `main`.
pub fn parse() -> Cli {
    Cli::parse()
}
