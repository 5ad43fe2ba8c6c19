use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use crate::autothread::daemon_lock::{daemon_lock_path, read_daemon_lock_payload, stop_sentinel_path};
use crate::autothread::paths::resolve_paths;
use crate::autothread::util::run_command_with_optional_timeout;
use crate::commands::CommandReport;

/// A daemon mid-pass only notices the sentinel once the pass ends, so give
/// the cooperative phase a little headroom before escalating.
const COOPERATIVE_STOP_TIMEOUT: Duration = Duration::from_secs(8);
const SIGTERM_STOP_TIMEOUT: Duration = Duration::from_secs(8);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const COMMAND_TIMEOUT_SECS: u64 = 10;

fn process_alive(pid: u32) -> Result<bool> {
    let mut kill_cmd = Command::new("kill");
    kill_cmd.arg("-0").arg(pid.to_string());
    let kill_out = run_command_with_optional_timeout(&mut kill_cmd, Some(COMMAND_TIMEOUT_SECS))
        .context("failed to probe process state with `kill -0`")?;
    if !kill_out.status.success() {
        return Ok(false);
    }

    let mut ps_cmd = Command::new("ps");
    ps_cmd.arg("-p").arg(pid.to_string()).arg("-o").arg("stat=");
    let ps_out = run_command_with_optional_timeout(&mut ps_cmd, Some(COMMAND_TIMEOUT_SECS))
        .context("failed to inspect process state with `ps`")?;

    if !ps_out.status.success() {
        return Ok(false);
    }

    let proc_state = String::from_utf8_lossy(&ps_out.stdout).trim().to_string();
    if proc_state.starts_with('Z') {
        return Ok(false);
    }

    Ok(true)
}

fn process_command_line(pid: u32) -> Result<String> {
    let mut ps_cmd = Command::new("ps");
    ps_cmd
        .arg("-p")
        .arg(pid.to_string())
        .arg("-o")
        .arg("command=");
    let output = run_command_with_optional_timeout(&mut ps_cmd, Some(COMMAND_TIMEOUT_SECS))
        .context("failed to inspect process command line with `ps`")?;
    if !output.status.success() {
        return Ok(String::new());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn send_sigterm(pid: u32) -> Result<()> {
    let mut kill_cmd = Command::new("kill");
    kill_cmd.arg("-TERM").arg(pid.to_string());
    let out = run_command_with_optional_timeout(&mut kill_cmd, Some(COMMAND_TIMEOUT_SECS))
        .context("failed to send SIGTERM with `kill -TERM`")?;

    if out.status.success() {
        return Ok(());
    }

    if process_alive(pid)? {
        anyhow::bail!("`kill -TERM {pid}` failed and process is still alive");
    }

    Ok(())
}

fn wait_for_exit(pid: u32, timeout: Duration) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !process_alive(pid)? {
            return Ok(true);
        }
        thread::sleep(STOP_POLL_INTERVAL);
    }
    Ok(false)
}

fn cleanup_file(path: &Path, label: &str, report: &mut CommandReport) {
    match fs::remove_file(path) {
        Ok(()) => report.detail(format!("removed {label} {}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => report.detail(format!("failed to remove {label} {}: {err}", path.display())),
    }
}

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("stop");
    let paths = resolve_paths()?;
    let lock_path = daemon_lock_path(&paths);
    let sentinel = stop_sentinel_path(&paths);
    report.detail(format!("daemon_lock={}", lock_path.display()));

    if !lock_path.exists() {
        report.detail("autothread daemon already stopped (lock file not found)".to_string());
        cleanup_file(&sentinel, "stale stop sentinel", &mut report);
        return Ok(report);
    }

    let payload = match read_daemon_lock_payload(&paths) {
        Ok(Some(payload)) => payload,
        Ok(None) => {
            report.detail("autothread daemon already stopped (lock payload missing)".to_string());
            cleanup_file(&lock_path, "empty daemon lock", &mut report);
            return Ok(report);
        }
        Err(err) => {
            report.issue(format!(
                "failed to read daemon lock {}: {err:#}",
                lock_path.display()
            ));
            return Ok(report);
        }
    };
    let pid = payload.pid;
    report.detail(format!("daemon_pid={pid}"));

    if !process_alive(pid)? {
        report.detail(format!("daemon pid {pid} is not running"));
        cleanup_file(&lock_path, "stale daemon lock", &mut report);
        cleanup_file(&sentinel, "stale stop sentinel", &mut report);
        return Ok(report);
    }

    let command_line = process_command_line(pid)?;
    if !command_line.contains("run --daemon") {
        report.issue(format!(
            "refusing to stop pid {pid}; command does not match the autothread daemon: {}",
            if command_line.is_empty() {
                "<unknown>".to_string()
            } else {
                command_line
            }
        ));
        return Ok(report);
    }

    fs::write(&sentinel, b"stop\n")
        .with_context(|| format!("failed to write stop sentinel {}", sentinel.display()))?;
    report.detail(format!("stop_sentinel={}", sentinel.display()));

    if wait_for_exit(pid, COOPERATIVE_STOP_TIMEOUT)? {
        report.detail(format!("daemon pid={pid} exited after the stop request"));
        cleanup_file(&sentinel, "stop sentinel", &mut report);
        cleanup_file(&lock_path, "daemon lock", &mut report);
        return Ok(report);
    }

    report.detail(format!(
        "daemon pid {pid} did not exit within {}s; sending SIGTERM",
        COOPERATIVE_STOP_TIMEOUT.as_secs()
    ));
    send_sigterm(pid)?;

    if wait_for_exit(pid, SIGTERM_STOP_TIMEOUT)? {
        report.detail(format!("stopped autothread daemon pid={pid}"));
        cleanup_file(&sentinel, "stop sentinel", &mut report);
        cleanup_file(&lock_path, "daemon lock", &mut report);
        return Ok(report);
    }

    report.issue(format!(
        "timed out waiting for daemon pid {pid} to stop after {}s",
        (COOPERATIVE_STOP_TIMEOUT + SIGTERM_STOP_TIMEOUT).as_secs()
    ));
    Ok(report)
}
