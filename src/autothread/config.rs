use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;

pub const SECRET_ENV_KEYS: [&str; 1] = ["TG_BOT_TOKEN"];

const DEFAULT_WELCOME_TEXT: &str = "👋 What's on your mind?";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub poll_interval_secs: u64,
    pub create_cooldown_secs: u64,
    pub global_cooldown_secs: u64,
    pub ledger_retention_days: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            create_cooldown_secs: 15,
            global_cooldown_secs: 10,
            ledger_retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    pub title: String,
    pub reply_window: u32,
    pub topics_list_limit: u32,
    pub propagation_delay_ms: u64,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            title: "General".to_string(),
            reply_window: 10,
            topics_list_limit: 50,
            propagation_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForumConfig {
    pub display_name: String,
    pub welcome_text: String,
    pub protected_thread_ids: Vec<i64>,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            welcome_text: DEFAULT_WELCOME_TEXT.to_string(),
            protected_thread_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AutothreadConfig {
    pub engine: EngineConfig,
    pub inbox: InboxConfig,
    pub forums: BTreeMap<String, ForumConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAutothreadConfig {
    engine: Option<EngineConfig>,
    inbox: Option<InboxConfig>,
    forums: Option<BTreeMap<String, ForumConfig>>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

pub fn parse_forum_id(key: &str) -> Result<i64> {
    key.trim()
        .parse::<i64>()
        .map_err(|_| anyhow!("invalid forum id `{key}`: expected a numeric chat id"))
}

pub fn masked_env_secret(key: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => {
            let v = v.trim();
            if v.chars().count() < 8 {
                "***".to_string()
            } else {
                let tail: String = v.chars().skip(v.chars().count() - 4).collect();
                format!("***{tail}")
            }
        }
        _ => "unset".to_string(),
    }
}

fn validate(cfg: &AutothreadConfig) -> Result<()> {
    if cfg.engine.poll_interval_secs == 0 {
        return Err(anyhow!("invalid poll interval: must be >= 1 second"));
    }
    if cfg.engine.ledger_retention_days == 0 {
        return Err(anyhow!("invalid ledger retention: must be >= 1 day"));
    }
    if cfg.inbox.title.trim().is_empty() {
        return Err(anyhow!("invalid inbox title: cannot be empty"));
    }
    if cfg.inbox.reply_window < 2 {
        return Err(anyhow!(
            "invalid reply window: must be >= 2 to observe an exchange"
        ));
    }
    if cfg.inbox.topics_list_limit == 0 {
        return Err(anyhow!("invalid topics list limit: must be >= 1"));
    }
    if cfg.forums.is_empty() {
        return Err(anyhow!(
            "no forums configured: add at least one [forums.<chat_id>] section"
        ));
    }
    for (key, forum) in &cfg.forums {
        parse_forum_id(key)?;
        if forum.display_name.trim().is_empty() {
            return Err(anyhow!("forum {key}: display_name is required"));
        }
        if forum.welcome_text.trim().is_empty() {
            return Err(anyhow!("forum {key}: welcome_text cannot be empty"));
        }
    }
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("AUTOTHREAD_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    if let Ok(home_override) = env::var("AUTOTHREAD_HOME") {
        let trimmed = home_override.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed).join("autothread.toml"));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".tg-autothread").join("autothread.toml"))
}

fn merge_file_config(base: &mut AutothreadConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)
        .map_err(|err| anyhow!("failed to read config {}: {err}", path.display()))?;
    let parsed: PartialAutothreadConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse config {}: {err}", path.display()))?;
    if let Some(engine) = parsed.engine {
        base.engine = engine;
    }
    if let Some(inbox) = parsed.inbox {
        base.inbox = inbox;
    }
    if let Some(forums) = parsed.forums {
        base.forums = forums;
    }
    Ok(())
}

pub fn load_config() -> Result<AutothreadConfig> {
    let mut cfg = AutothreadConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.engine.poll_interval_secs = env_or_u64(
        "AUTOTHREAD_POLL_INTERVAL_SECS",
        cfg.engine.poll_interval_secs,
    );
    cfg.engine.create_cooldown_secs = env_or_u64(
        "AUTOTHREAD_CREATE_COOLDOWN_SECS",
        cfg.engine.create_cooldown_secs,
    );
    cfg.engine.global_cooldown_secs = env_or_u64(
        "AUTOTHREAD_GLOBAL_COOLDOWN_SECS",
        cfg.engine.global_cooldown_secs,
    );
    cfg.engine.ledger_retention_days = env_or_u64(
        "AUTOTHREAD_RETENTION_DAYS",
        cfg.engine.ledger_retention_days,
    );
    cfg.inbox.title = env_or_string("AUTOTHREAD_INBOX_TITLE", &cfg.inbox.title);
    cfg.inbox.reply_window = env_or_u32("AUTOTHREAD_REPLY_WINDOW", cfg.inbox.reply_window);
    cfg.inbox.topics_list_limit = env_or_u32(
        "AUTOTHREAD_TOPICS_LIST_LIMIT",
        cfg.inbox.topics_list_limit,
    );
    cfg.inbox.propagation_delay_ms = env_or_u64(
        "AUTOTHREAD_PROPAGATION_DELAY_MS",
        cfg.inbox.propagation_delay_ms,
    );

    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::{AutothreadConfig, ForumConfig, PartialAutothreadConfig, parse_forum_id, validate};

    fn config_with_one_forum() -> AutothreadConfig {
        let mut cfg = AutothreadConfig::default();
        cfg.forums.insert(
            "-1003643461316".to_string(),
            ForumConfig {
                display_name: "Conversations".to_string(),
                ..ForumConfig::default()
            },
        );
        cfg
    }

    #[test]
    fn defaults_pass_validation_once_a_forum_exists() {
        let cfg = config_with_one_forum();
        assert!(validate(&cfg).is_ok());
        assert_eq!(cfg.engine.create_cooldown_secs, 15);
        assert_eq!(cfg.engine.global_cooldown_secs, 10);
        assert_eq!(cfg.inbox.title, "General");
    }

    #[test]
    fn empty_forums_fail_validation() {
        let cfg = AutothreadConfig::default();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("no forums configured"));
    }

    #[test]
    fn non_numeric_forum_key_fails_validation() {
        let mut cfg = config_with_one_forum();
        cfg.forums.insert(
            "conversations".to_string(),
            ForumConfig {
                display_name: "Conversations".to_string(),
                ..ForumConfig::default()
            },
        );
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn parse_forum_id_accepts_negative_supergroup_ids() {
        assert_eq!(parse_forum_id("-1003643461316").unwrap(), -1003643461316);
        assert!(parse_forum_id("not-a-chat").is_err());
    }

    #[test]
    fn partial_toml_merges_over_defaults() {
        let raw = r#"
[engine]
poll_interval_secs = 60

[forums.-1003643461316]
display_name = "Conversations"
protected_thread_ids = [1]
"#;
        let parsed: PartialAutothreadConfig = toml::from_str(raw).expect("parse partial config");
        let mut cfg = AutothreadConfig::default();
        if let Some(engine) = parsed.engine {
            cfg.engine = engine;
        }
        if let Some(forums) = parsed.forums {
            cfg.forums = forums;
        }

        assert_eq!(cfg.engine.poll_interval_secs, 60);
        // untouched fields keep their defaults
        assert_eq!(cfg.engine.create_cooldown_secs, 15);
        let forum = cfg.forums.get("-1003643461316").expect("forum");
        assert_eq!(forum.protected_thread_ids, vec![1]);
        assert!(!forum.welcome_text.is_empty());
    }
}
