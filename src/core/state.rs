//! The Record Store: durable on-disk representation of each container's
//! identity and last-known state.
//!
//! Layout: `/var/lib/<runtime>/containers/<id>/state.txt`. The file leads
//! with a human-greppable `key=value` header (`id`, `name`, `state`, `pid`)
//! followed by a `---json---` marker and the full serialized
//! `ContainerRecord`, so external tooling can `grep` the header while the
//! runtime itself round-trips the complete record.

use std::fs;
use std::path::{Path, PathBuf};

use super::error::{Result, RuntimeError};
use super::model::ContainerRecord;

/// Name of the per-container state file.
const STATE_FILE: &str = "state.txt";
/// Separator between the key=value header and the JSON body.
const JSON_MARKER: &str = "---json---";
/// Name of the stdout log file.
pub const STDOUT_LOG: &str = "stdout.log";
/// Name of the stderr log file.
pub const STDERR_LOG: &str = "stderr.log";

/// Return the base state directory.
///
/// When running as root (`euid == 0`), use `/var/lib/craterun`. Otherwise
/// use `$HOME/.craterun`, so unprivileged test runs and developer machines
/// don't need root to exercise the Record Store.
pub fn state_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        if nix::unistd::geteuid().is_root() {
            return Ok(PathBuf::from("/var/lib/craterun"));
        }
    }

    let home = std::env::var("HOME")
        .map_err(|_| RuntimeError::Invalid("HOME environment variable not set".into()))?;
    Ok(PathBuf::from(home).join(".craterun"))
}

/// Return the directory for a specific container.
pub fn container_dir(id: &str) -> Result<PathBuf> {
    Ok(state_dir()?.join("containers").join(id))
}

/// Ensure the base state directory exists.
pub fn ensure_state_dir() -> Result<PathBuf> {
    let dir = state_dir()?.join("containers");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Serialize a record to the on-disk text format.
fn render(record: &ContainerRecord) -> Result<String> {
    let json = serde_json::to_string_pretty(record)?;
    Ok(format!(
        "id={}\nname={}\nstate={}\npid={}\n{JSON_MARKER}\n{json}\n",
        record.id, record.name, record.state, record.pid
    ))
}

/// Parse the on-disk text format back into a record.
fn parse(contents: &str) -> Result<ContainerRecord> {
    let (_, json) = contents
        .split_once(JSON_MARKER)
        .ok_or_else(|| RuntimeError::Invalid("state.txt missing JSON body".into()))?;
    Ok(serde_json::from_str(json.trim_start_matches('\n'))?)
}

/// Save a container record to disk. Write-then-rename for atomicity: a
/// reader never observes a half-written file.
pub fn save(record: &ContainerRecord) -> Result<()> {
    let dir = container_dir(&record.id)?;
    fs::create_dir_all(&dir)?;

    let path = dir.join(STATE_FILE);
    let tmp_path = dir.join(format!("{STATE_FILE}.tmp"));
    fs::write(&tmp_path, render(record)?)?;
    fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Load a container record from disk by its full id.
pub fn load(id: &str) -> Result<ContainerRecord> {
    let path = container_dir(id)?.join(STATE_FILE);
    let contents = fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RuntimeError::NotFound(format!("no container with id '{id}'"))
        } else {
            e.into()
        }
    })?;
    parse(&contents)
}

/// List every record whose directory contains a parseable `state.txt`.
/// Directories beginning with `.` are ignored. Unparseable records are
/// logged and skipped rather than silently defaulted to `created` — a
/// corrupt record should surface as a gap, not as phantom state.
pub fn list() -> Result<Vec<ContainerRecord>> {
    let dir = match state_dir() {
        Ok(d) => d.join("containers"),
        Err(_) => return Ok(Vec::new()),
    };
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('.') {
            continue;
        }

        let state_path = entry.path().join(STATE_FILE);
        if !state_path.exists() {
            continue;
        }

        match fs::read_to_string(&state_path).map_err(RuntimeError::from).and_then(|c| parse(&c)) {
            Ok(record) => records.push(record),
            Err(e) => log::warn!("skipping unparseable record at {}: {e}", state_path.display()),
        }
    }
    records.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(records)
}

/// Resolve a potentially abbreviated container ID, or an exact name, to a
/// full container ID. Ambiguous prefixes are reported as an error rather
/// than resolved to an arbitrary match.
pub fn resolve_id(id_or_name: &str) -> Result<String> {
    let all = list()?;

    if let Some(exact) = all.iter().find(|r| r.id == id_or_name) {
        return Ok(exact.id.clone());
    }
    if let Some(by_name) = all.iter().find(|r| r.name == id_or_name) {
        return Ok(by_name.id.clone());
    }

    let matches: Vec<&ContainerRecord> = all
        .iter()
        .filter(|r| r.id.starts_with(id_or_name))
        .collect();

    match matches.len() {
        0 => Err(RuntimeError::NotFound(format!(
            "no container found matching '{id_or_name}'"
        ))),
        1 => Ok(matches[0].id.clone()),
        n => {
            let preview: Vec<&str> = matches.iter().take(5).map(|r| r.id.as_str()).collect();
            Err(RuntimeError::Invalid(format!(
                "ambiguous container id prefix '{id_or_name}': {n} matches ({})",
                preview.join(", ")
            )))
        }
    }
}

/// Remove the state directory for a container (after this,
/// no record exists on disk for `id`).
pub fn delete(id: &str) -> Result<()> {
    let dir = container_dir(id)?;
    if dir.exists() {
        fs::remove_dir_all(&dir)?;
    }
    Ok(())
}

/// Return the path for stdout or stderr log.
pub fn log_path(id: &str, name: &str) -> Result<PathBuf> {
    Ok(container_dir(id)?.join(name))
}

/// Check whether a PID is alive on the host.
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    Path::new(&format!("/proc/{pid}")).exists()
}
