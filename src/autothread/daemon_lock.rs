use crate::autothread::paths::AutothreadPaths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const DAEMON_LOCK_FILE: &str = "autothread-run.daemon.lock";
pub const DAEMON_STOP_SENTINEL_FILE: &str = "autothread-run.daemon.stop";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonLockPayload {
    pub pid: u32,
    #[serde(default)]
    pub started_at_epoch_secs: u64,
    #[serde(default)]
    pub build_uuid: String,
    #[serde(default)]
    pub state_home: String,
}

pub fn daemon_lock_path(paths: &AutothreadPaths) -> PathBuf {
    paths.logs_dir.join(DAEMON_LOCK_FILE)
}

/// Dropping this file asks a running daemon to exit after its current tick.
pub fn stop_sentinel_path(paths: &AutothreadPaths) -> PathBuf {
    paths.logs_dir.join(DAEMON_STOP_SENTINEL_FILE)
}

pub fn parse_daemon_lock_payload(raw: &str) -> Option<DaemonLockPayload> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(payload) = serde_json::from_str::<DaemonLockPayload>(trimmed) {
        return Some(payload);
    }

    // Backward compatibility: early revisions stored only a PID line.
    let pid = trimmed.lines().next()?.trim().parse::<u32>().ok()?;
    Some(DaemonLockPayload {
        pid,
        started_at_epoch_secs: 0,
        build_uuid: String::new(),
        state_home: String::new(),
    })
}

pub fn read_daemon_lock_payload(paths: &AutothreadPaths) -> Result<Option<DaemonLockPayload>> {
    let lock_path = daemon_lock_path(paths);
    if !lock_path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(&lock_path)
        .with_context(|| format!("failed to read daemon lock {}", lock_path.display()))?;
    Ok(parse_daemon_lock_payload(&raw))
}

#[cfg(test)]
mod tests {
    use super::parse_daemon_lock_payload;

    #[test]
    fn parses_json_payload() {
        let raw = r#"{"pid":42,"started_at_epoch_secs":1700000000,"build_uuid":"abc","state_home":"/tmp/autothread"}"#;
        let payload = parse_daemon_lock_payload(raw).expect("payload");
        assert_eq!(payload.pid, 42);
        assert_eq!(payload.build_uuid, "abc");
        assert_eq!(payload.state_home, "/tmp/autothread");
    }

    #[test]
    fn parses_legacy_pid_payload() {
        let payload = parse_daemon_lock_payload("4242\n").expect("payload");
        assert_eq!(payload.pid, 4242);
        assert!(payload.build_uuid.is_empty());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_daemon_lock_payload("").is_none());
        assert!(parse_daemon_lock_payload("not a pid").is_none());
    }
}
