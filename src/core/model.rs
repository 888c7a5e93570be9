use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a container in the CrateRun runtime.
///
/// `Deleted` is only ever held in memory: a deleted container has no
/// on-disk record, so this variant never round-trips through the Record
/// Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Stopped,
    /// Reserved by the freeze interface; not reached by the normal
    /// create/start/stop/delete state machine.
    Paused,
    Deleted,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Paused => write!(f, "paused"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Resource limits for a single container. `None` (or a non-positive value
/// supplied on the CLI) means "unlimited for that axis" and results in no
/// write to the corresponding cgroup interface file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory_bytes: Option<i64>,
    pub swap_bytes: Option<i64>,
    pub cpu_quota_us: Option<i64>,
    pub cpu_period_us: i64,
    pub cpu_shares: Option<i64>,
    pub pids_max: Option<i64>,
}

impl ResourceLimits {
    pub const DEFAULT_CPU_PERIOD_US: i64 = 100_000;

    pub fn new() -> Self {
        Self {
            memory_bytes: None,
            swap_bytes: None,
            cpu_quota_us: None,
            cpu_period_us: Self::DEFAULT_CPU_PERIOD_US,
            cpu_shares: None,
            pids_max: None,
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::new()
    }
}

/// A single-row identity map entry, used only when `enable_user_ns` is set.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IdMapEntry {
    pub host: u32,
    pub container: u32,
}

/// Configuration for creating a new container. Immutable once a container
/// is created; owned by the Lifecycle Manager for the duration of one
/// operation.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub id: Option<String>,
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub rootfs: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub limits: ResourceLimits,
    pub enable_network: bool,
    pub enable_user_ns: bool,
    pub uid_map: Option<IdMapEntry>,
    pub gid_map: Option<IdMapEntry>,
}

impl ContainerConfig {
    pub fn new(rootfs: impl Into<String>) -> Self {
        Self {
            id: None,
            name: None,
            hostname: None,
            rootfs: rootfs.into(),
            cmd: Vec::new(),
            env: Vec::new(),
            limits: ResourceLimits::new(),
            enable_network: false,
            enable_user_ns: false,
            uid_map: None,
            gid_map: None,
        }
    }
}

/// Persistent metadata for a single container. Serialised to `state.txt`
/// by the Record Store.
///
/// `env`, `enable_network`, `enable_user_ns`, `uid_map` and `gid_map` are
/// not required to reconstruct the on-disk *state* alone, which covers only what the
/// on-disk *state* must contain; but since `ContainerConfig` itself is
/// never persisted and `start` needs the original spawn configuration
/// (the Orchestrator doesn't run until `start`, which may be a later,
/// separate invocation from `create`), the record is the only place left
/// to carry it between the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub hostname: String,
    pub rootfs: String,
    pub cmd: Vec<String>,
    pub state: ContainerState,
    pub pid: u32,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub cgroup_path: String,
    pub state_dir: String,
    pub limits: ResourceLimits,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub enable_network: bool,
    #[serde(default)]
    pub enable_user_ns: bool,
    #[serde(default)]
    pub uid_map: Option<IdMapEntry>,
    #[serde(default)]
    pub gid_map: Option<IdMapEntry>,
}

/// Derived, not persisted — a point-in-time read of the container's cgroup.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics {
    pub memory_current: i64,
    pub memory_peak: i64,
    /// -1 means unlimited (the cgroup file contained the literal "max").
    pub memory_limit: i64,
    pub cpu_usage_ns: u64,
    pub pids_current: i64,
    /// -1 means unlimited.
    pub pids_limit: i64,
}
