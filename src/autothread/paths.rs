use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AutothreadPaths {
    pub app_home: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub forum_state_file: PathBuf,
    pub daemon_state_file: PathBuf,
    pub session_bin: PathBuf,
    pub app_home_is_explicit: bool,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

fn app_home_from_inputs(home: PathBuf, app_home_env: Option<&str>) -> (PathBuf, bool) {
    match app_home_env {
        Some(v) if !v.trim().is_empty() => (PathBuf::from(v.trim()), true),
        _ => (home.join(".tg-autothread"), false),
    }
}

pub fn resolve_paths() -> Result<AutothreadPaths> {
    let home = required_home_dir()?;
    let app_home_env = env::var("AUTOTHREAD_HOME").ok();
    let (app_home, is_explicit) = app_home_from_inputs(home.clone(), app_home_env.as_deref());

    let state_dir = env_or_default_path("AUTOTHREAD_STATE_DIR", app_home.join("state"));
    let logs_dir = env_or_default_path("AUTOTHREAD_LOGS_DIR", app_home.join("logs"));
    let forum_state_file = env_or_default_path(
        "AUTOTHREAD_FORUM_STATE_FILE",
        state_dir.join("forum_state.json"),
    );
    let daemon_state_file = env_or_default_path(
        "AUTOTHREAD_DAEMON_STATE_FILE",
        state_dir.join("daemon_state.json"),
    );
    let session_bin = env_or_default_path(
        "TG_SESSION_BIN",
        home.join(".local/bin/tg-session-bridge"),
    );

    Ok(AutothreadPaths {
        app_home,
        state_dir,
        logs_dir,
        forum_state_file,
        daemon_state_file,
        session_bin,
        app_home_is_explicit: is_explicit,
    })
}
