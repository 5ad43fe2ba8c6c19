use anyhow::Result;

use crate::autothread::config::{self, SECRET_ENV_KEYS, masked_env_secret};
use crate::autothread::daemon_lock::{daemon_lock_path, read_daemon_lock_payload};
use crate::autothread::ledger::ReconciliationLedger;
use crate::autothread::paths::resolve_paths;
use crate::autothread::state::ForumInboxState;
use crate::autothread::store;
use crate::autothread::util::pid_alive;
use crate::commands::CommandReport;

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("app_home={}", paths.app_home.display()));
    report.detail(format!(
        "app_home_source={}",
        if paths.app_home_is_explicit {
            "AUTOTHREAD_HOME"
        } else {
            "default"
        }
    ));
    report.detail(format!("state_dir={}", paths.state_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!(
        "forum_state_file={}",
        paths.forum_state_file.display()
    ));
    report.detail(format!(
        "ledger_file={}",
        paths.daemon_state_file.display()
    ));
    report.detail(format!("session_bin={}", paths.session_bin.display()));
    report.detail(format!(
        "config_file={}",
        config::resolve_config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    ));
    report.detail(format!("build={}", env!("BUILD_UUID")));
    for key in SECRET_ENV_KEYS {
        report.detail(format!("secret.{key}={}", masked_env_secret(key)));
    }

    match config::load_config() {
        Ok(cfg) => {
            report.detail(format!("forums_configured={}", cfg.forums.len()));
            report.detail(format!(
                "poll_interval_secs={} create_cooldown_secs={} global_cooldown_secs={}",
                cfg.engine.poll_interval_secs,
                cfg.engine.create_cooldown_secs,
                cfg.engine.global_cooldown_secs
            ));
            report.detail(format!("inbox_title={}", cfg.inbox.title));
            for (forum, forum_cfg) in &cfg.forums {
                report.detail(format!(
                    "forum={} name={} protected={}",
                    forum,
                    forum_cfg.display_name,
                    forum_cfg
                        .protected_thread_ids
                        .iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join(",")
                ));
            }
        }
        Err(err) => report.issue(format!("config invalid: {err:#}")),
    }

    if !paths.session_bin.exists() && which::which("tg-session-bridge").is_err() {
        report.issue(format!(
            "session bridge binary not found ({} and not on PATH)",
            paths.session_bin.display()
        ));
    }

    match store::strict_read::<ForumInboxState>(&paths.forum_state_file) {
        Ok(None) => report.detail("forum_state=absent (first run pending)"),
        Ok(Some(state)) => {
            report.detail(format!("forum_state_pointers={}", state.forums.len()));
            for (forum, pointer) in &state.forums {
                report.detail(format!("forum={} inbox={}", forum, pointer.inbox_thread_id));
            }
        }
        Err(err) => report.issue(format!("forum state unreadable: {err}")),
    }

    match store::strict_read::<ReconciliationLedger>(&paths.daemon_state_file) {
        Ok(None) => report.detail("ledger=absent (first run pending)"),
        Ok(Some(ledger)) => {
            report.detail(format!(
                "ledger_created={} ledger_processed={}",
                ledger.created.len(),
                ledger.processed.len()
            ));
            report.detail(format!(
                "last_transition={}",
                ledger
                    .last_autothread_timestamp
                    .as_deref()
                    .unwrap_or("never")
            ));
        }
        Err(err) => report.issue(format!("ledger unreadable: {err}")),
    }

    let lock_path = daemon_lock_path(&paths);
    match read_daemon_lock_payload(&paths) {
        Ok(Some(payload)) if pid_alive(payload.pid) => {
            report.detail(format!(
                "daemon=running pid={} started_at_epoch_secs={}",
                payload.pid, payload.started_at_epoch_secs
            ));
            if !payload.build_uuid.is_empty() && payload.build_uuid != env!("BUILD_UUID") {
                report.detail("daemon build differs from this binary".to_string());
            }
        }
        Ok(Some(payload)) => {
            report.issue(format!(
                "stale daemon lock at {} (pid {} not running); run `autothread stop` to clean up",
                lock_path.display(),
                payload.pid
            ));
        }
        Ok(None) => report.detail("daemon=stopped"),
        Err(err) => report.issue(format!("daemon lock unreadable: {err:#}")),
    }

    Ok(report)
}
