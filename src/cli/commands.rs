use anyhow::{bail, Context, Result};

use crate::cli::{Cli, Command, ContainerArgs};
use crate::core::model::{ContainerConfig, ContainerState, IdMapEntry, ResourceLimits};
use crate::core::{lifecycle, state};

/// Dispatch a parsed CLI command to the appropriate handler. This is a
/// thin adapter: parse args, build a config, call into `core::lifecycle`,
/// format output. All real logic lives below `core`.
pub fn dispatch(cli: Cli) -> Result<()> {
    #[cfg(not(target_os = "linux"))]
    {
        bail!("craterun only runs on Linux");
    }

    #[cfg(target_os = "linux")]
    {
        state::ensure_state_dir().context("failed to prepare state directory")?;

        match cli.command {
            Command::Create(args) => cmd_create(args),
            Command::Start { id } => cmd_start(&id),
            Command::Stop { id, timeout } => cmd_stop(&id, timeout),
            Command::Delete { id, force } => cmd_delete(&id, force),
            Command::List => cmd_list(),
            Command::Stats { id } => cmd_stats(&id),
            Command::Run(args) => cmd_run(args),
            Command::Exec { id, cmd } => cmd_exec(&id, &cmd),
            Command::Shell { id } => cmd_exec(&id, &["/bin/sh".to_string()]),
            Command::Logs { id } => cmd_logs(&id),
        }
    }
}

/// Build a `ContainerConfig` from the CLI's shared container flags.
fn build_config(args: ContainerArgs) -> ContainerConfig {
    let cmd = match args.cmd {
        Some(shell) => vec!["/bin/sh".to_string(), "-c".to_string(), shell],
        None => args.argv,
    };

    let limits = ResourceLimits {
        memory_bytes: args.memory.filter(|v| *v > 0),
        swap_bytes: None,
        cpu_quota_us: args.cpus.filter(|p| *p > 0).map(|pct| (pct as i64) * 1000),
        cpu_period_us: ResourceLimits::DEFAULT_CPU_PERIOD_US,
        cpu_shares: None,
        pids_max: args.pids.filter(|v| *v > 0),
    };

    let enable_user_ns = args.uid.is_some() || args.gid.is_some();
    let uid_map = args.uid.map(|host| IdMapEntry { host, container: 0 });
    let gid_map = args.gid.map(|host| IdMapEntry { host, container: 0 });

    ContainerConfig {
        id: None,
        name: args.name,
        hostname: args.hostname,
        rootfs: args.rootfs,
        cmd,
        env: Vec::new(),
        limits,
        enable_network: args.network,
        enable_user_ns,
        uid_map,
        gid_map,
    }
}

fn cmd_create(args: ContainerArgs) -> Result<()> {
    let config = build_config(args);
    let record = lifecycle::create(&config).context("failed to create container")?;
    println!("{}", record.id);
    Ok(())
}

fn cmd_start(id_prefix: &str) -> Result<()> {
    let id = state::resolve_id(id_prefix)?;
    let record = state::load(&id)?;
    lifecycle::start(record).context("failed to start container")?;
    println!("{id}");
    Ok(())
}

fn cmd_stop(id_prefix: &str, timeout: u64) -> Result<()> {
    let id = state::resolve_id(id_prefix)?;
    let record = state::load(&id)?;
    lifecycle::stop(record, timeout).context("failed to stop container")?;
    println!("{id}");
    Ok(())
}

fn cmd_delete(id_prefix: &str, force: bool) -> Result<()> {
    let id = state::resolve_id(id_prefix)?;
    let record = state::load(&id)?;

    if record.state == ContainerState::Running && !force {
        bail!("container {id} is still running; use --force to remove it anyway");
    }

    lifecycle::delete(record).context("failed to delete container")?;
    println!("Removed container {id}");
    Ok(())
}

fn cmd_list() -> Result<()> {
    let records = lifecycle::list()?;

    println!(
        "{:<14} {:<10} {:<10} {:<24} {}",
        "CONTAINER ID", "PID", "STATE", "CREATED", "COMMAND"
    );

    for record in records {
        let pid_str = if record.pid > 0 {
            record.pid.to_string()
        } else {
            "-".to_string()
        };
        let created = record.created_at.format("%Y-%m-%d %H:%M:%S UTC");
        let cmd_str = record.cmd.join(" ");
        let cmd_display = if cmd_str.len() > 40 {
            format!("{}...", &cmd_str[..37])
        } else {
            cmd_str
        };

        println!(
            "{:<14} {:<10} {:<10} {:<24} {}",
            record.id, pid_str, record.state, created, cmd_display
        );
    }

    Ok(())
}

fn cmd_stats(id_prefix: &str) -> Result<()> {
    let id = state::resolve_id(id_prefix)?;
    let record = state::load(&id)?;
    let metrics = lifecycle::stats(&record).context("failed to read container metrics")?;

    println!("memory_current: {} bytes", metrics.memory_current);
    println!("memory_peak:    {} bytes", metrics.memory_peak);
    println!(
        "memory_limit:   {}",
        if metrics.memory_limit < 0 {
            "unlimited".to_string()
        } else {
            format!("{} bytes", metrics.memory_limit)
        }
    );
    println!("cpu_usage:      {} ns", metrics.cpu_usage_ns);
    println!("pids_current:   {}", metrics.pids_current);
    println!(
        "pids_limit:     {}",
        if metrics.pids_limit < 0 {
            "unlimited".to_string()
        } else {
            metrics.pids_limit.to_string()
        }
    );

    Ok(())
}

fn cmd_run(args: ContainerArgs) -> Result<()> {
    let config = build_config(args);
    let exit_code = lifecycle::run(&config).context("failed to run container")?;
    std::process::exit(exit_code);
}

fn cmd_exec(id_prefix: &str, cmd: &[String]) -> Result<()> {
    if cmd.is_empty() {
        bail!("no command specified for exec");
    }
    let id = state::resolve_id(id_prefix)?;
    let record = state::load(&id)?;
    let exit_code = lifecycle::exec(&record, cmd).context("exec failed")?;
    std::process::exit(exit_code);
}

fn cmd_logs(id_prefix: &str) -> Result<()> {
    let id = state::resolve_id(id_prefix)?;

    let stdout_path = state::log_path(&id, state::STDOUT_LOG)?;
    let stderr_path = state::log_path(&id, state::STDERR_LOG)?;

    if stdout_path.exists() {
        let contents = std::fs::read_to_string(&stdout_path).context("failed to read stdout.log")?;
        if !contents.is_empty() {
            print!("{contents}");
        }
    }

    if stderr_path.exists() {
        let contents = std::fs::read_to_string(&stderr_path).context("failed to read stderr.log")?;
        if !contents.is_empty() {
            eprint!("{contents}");
        }
    }

    Ok(())
}
