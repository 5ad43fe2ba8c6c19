use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::autothread::detector::ThreadMessage;
use crate::autothread::paths::AutothreadPaths;
use crate::autothread::util::{self, DEFAULT_EXTERNAL_COMMAND_TIMEOUT_SECS};
use crate::error::PlatformError;

/// Icon color applied to every inbox topic we create (Telegram's light blue).
pub const INBOX_ICON_COLOR: u32 = 0x6FB9F0;

/// Messages are only inspected for detection and titling, so the bridge
/// prefix is all we keep.
pub const MESSAGE_TEXT_CAP_CHARS: usize = 50;

/// Topic creation gets a bounded inline retry on rate limits and timeouts.
pub const CREATE_MAX_ATTEMPTS: u32 = 3;

/// Flood waits above this outlive any sensible in-tick retry.
const MAX_INLINE_FLOOD_WAIT_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected { account_id: i64 },
}

#[derive(Debug, Clone)]
pub struct ForumThread {
    pub thread_id: i64,
    pub title: String,
    pub is_closed: bool,
}

#[derive(Debug, Deserialize)]
struct WhoAmIReply {
    account_id: i64,
}

#[derive(Debug, Deserialize)]
struct TopicRow {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct CreatedTopicReply {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct MessageRow {
    sender_id: i64,
    timestamp: i64,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    attachment: Option<String>,
}

/// Account-session operations, shelled out to the `tg-session-bridge`
/// helper. Every call is one bridge invocation; the handle only tracks
/// whether the session behind it last looked usable.
pub struct SessionClient {
    bin: PathBuf,
    timeout_secs: u64,
    state: SessionState,
}

fn resolve_session_bin(bin: &Path) -> Result<PathBuf, PlatformError> {
    if bin.exists() {
        return Ok(bin.to_path_buf());
    }
    which::which("tg-session-bridge").map_err(|_| {
        PlatformError::Connection(
            "tg-session-bridge binary not found in TG_SESSION_BIN or PATH".to_string(),
        )
    })
}

fn parse_flood_wait_secs(lower: &str) -> Option<u64> {
    let idx = lower.find("flood_wait_")?;
    let digits: String = lower[idx + "flood_wait_".len()..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Maps a failed bridge invocation onto the error taxonomy by sniffing its
/// output. The bridge prints upstream error names verbatim, so the usual
/// platform markers are all we need.
fn classify_bridge_failure(op: &str, stdout: &str, stderr: &str) -> PlatformError {
    let combined = format!("{stdout}\n{stderr}");
    let lower = combined.to_ascii_lowercase();
    let excerpt = combined.trim().chars().take(200).collect::<String>();

    if let Some(wait) = parse_flood_wait_secs(&lower) {
        return PlatformError::rate_limited(format!("{op}: {excerpt}"), wait);
    }
    if lower.contains("flood") || lower.contains("rate limit") {
        return PlatformError::transient(format!("{op}: {excerpt}"));
    }
    if lower.contains("auth_key")
        || lower.contains("session_revoked")
        || lower.contains("session expired")
        || lower.contains("unauthorized")
        || lower.contains("not logged in")
    {
        return PlatformError::Connection(format!("{op}: {excerpt}"));
    }
    if lower.contains("not found") || lower.contains("topic_deleted") || lower.contains("topic_id_invalid")
    {
        return PlatformError::NotFound(format!("{op}: {excerpt}"));
    }
    PlatformError::transient(format!("{op}: {excerpt}"))
}

fn decode<T: serde::de::DeserializeOwned>(op: &str, raw: &str) -> Result<T, PlatformError> {
    serde_json::from_str(raw.trim())
        .map_err(|err| PlatformError::transient(format!("{op}: unreadable bridge output: {err}")))
}

fn threads_from_rows(rows: Vec<TopicRow>) -> Vec<ForumThread> {
    rows.into_iter()
        .map(|row| ForumThread {
            thread_id: row.id,
            title: row.title,
            is_closed: row.closed,
        })
        .collect()
}

fn messages_from_rows(rows: Vec<MessageRow>) -> Vec<ThreadMessage> {
    let mut messages: Vec<ThreadMessage> = rows
        .into_iter()
        .map(|row| ThreadMessage {
            sender_id: row.sender_id,
            timestamp: row.timestamp,
            text: row
                .text
                .unwrap_or_default()
                .chars()
                .take(MESSAGE_TEXT_CAP_CHARS)
                .collect(),
            has_attachment: row.attachment.is_some(),
            attachment_kind: row.attachment,
        })
        .collect();
    messages.sort_by_key(|m| m.timestamp);
    messages
}

/// Creation dedupe marker: fixed across the retries of one create call,
/// unique across calls, so a create whose reply got lost cannot
/// double-create when retried.
pub fn dedupe_token(forum_id: i64, title: &str, nanos: u128) -> String {
    let mut hasher = Sha256::new();
    hasher.update(forum_id.to_le_bytes());
    hasher.update(title.as_bytes());
    hasher.update(nanos.to_le_bytes());
    let digest = hasher.finalize();
    let mut token: u64 = 0;
    for byte in digest.iter().take(8) {
        token = (token << 8) | u64::from(*byte);
    }
    format!("{token:016x}")
}

impl SessionClient {
    pub fn new(paths: &AutothreadPaths) -> Self {
        Self {
            bin: paths.session_bin.clone(),
            timeout_secs: DEFAULT_EXTERNAL_COMMAND_TIMEOUT_SECS,
            state: SessionState::Disconnected,
        }
    }

    /// Verifies the session and caches our own account id. Cheap once
    /// connected; every operation below goes through here first.
    pub fn ensure_connected(&mut self) -> Result<i64, PlatformError> {
        if let SessionState::Connected { account_id } = self.state {
            return Ok(account_id);
        }
        let stdout = self.checked_run("whoami", &["whoami".into(), "--json".into()])?;
        let who: WhoAmIReply = decode("whoami", &stdout)?;
        self.state = SessionState::Connected {
            account_id: who.account_id,
        };
        Ok(who.account_id)
    }

    pub fn list_threads(
        &mut self,
        forum_id: i64,
        limit: u32,
    ) -> Result<Vec<ForumThread>, PlatformError> {
        self.ensure_connected()?;
        let stdout = self.checked_run(
            "topics list",
            &[
                "topics".into(),
                "list".into(),
                "--chat".into(),
                forum_id.to_string(),
                "--limit".into(),
                limit.to_string(),
                "--json".into(),
            ],
        )?;
        Ok(threads_from_rows(decode("topics list", &stdout)?))
    }

    /// Creates a forum topic. Rate limits and timeouts are retried inline a
    /// couple of times; the dedupe token is fixed up front so every attempt
    /// refers to the same logical create.
    pub fn create_thread(&mut self, forum_id: i64, title: &str) -> Result<i64, PlatformError> {
        self.ensure_connected()?;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let token = dedupe_token(forum_id, title, nanos);

        let mut last_err = PlatformError::transient("topics create never attempted");
        for attempt in 0..CREATE_MAX_ATTEMPTS {
            if attempt > 0 {
                thread::sleep(Duration::from_millis(250 * u64::from(attempt + 1)));
            }
            let err = match self.create_thread_once(forum_id, title, &token) {
                Ok(id) => return Ok(id),
                Err(err) => err,
            };
            match err {
                PlatformError::Transient {
                    message,
                    retry_after_secs,
                } => {
                    match retry_after_secs {
                        // A flood window this long outlives the tick; surface
                        // it and let the pass-level backoff own the wait.
                        Some(secs) if secs > MAX_INLINE_FLOOD_WAIT_SECS => {
                            return Err(PlatformError::rate_limited(message, secs));
                        }
                        Some(secs) => thread::sleep(Duration::from_secs(secs)),
                        None => {}
                    }
                    last_err = PlatformError::Transient {
                        message,
                        retry_after_secs,
                    };
                }
                other => return Err(other),
            }
        }
        Err(last_err)
    }

    fn create_thread_once(
        &mut self,
        forum_id: i64,
        title: &str,
        token: &str,
    ) -> Result<i64, PlatformError> {
        let stdout = self.checked_run(
            "topics create",
            &[
                "topics".into(),
                "create".into(),
                "--chat".into(),
                forum_id.to_string(),
                "--title".into(),
                title.to_string(),
                "--icon-color".into(),
                INBOX_ICON_COLOR.to_string(),
                "--dedupe".into(),
                token.to_string(),
                "--json".into(),
            ],
        )?;
        let created: CreatedTopicReply = decode("topics create", &stdout)?;
        Ok(created.id)
    }

    pub fn rename_thread(
        &mut self,
        forum_id: i64,
        thread_id: i64,
        new_title: &str,
    ) -> Result<(), PlatformError> {
        self.ensure_connected()?;
        self.checked_run(
            "topics rename",
            &[
                "topics".into(),
                "rename".into(),
                "--chat".into(),
                forum_id.to_string(),
                "--topic".into(),
                thread_id.to_string(),
                "--title".into(),
                new_title.to_string(),
                "--json".into(),
            ],
        )?;
        Ok(())
    }

    pub fn fetch_recent_messages(
        &mut self,
        forum_id: i64,
        thread_id: i64,
        limit: u32,
    ) -> Result<Vec<ThreadMessage>, PlatformError> {
        self.ensure_connected()?;
        let stdout = self.checked_run(
            "replies",
            &[
                "replies".into(),
                "--chat".into(),
                forum_id.to_string(),
                "--topic".into(),
                thread_id.to_string(),
                "--limit".into(),
                limit.to_string(),
                "--json".into(),
            ],
        )?;
        Ok(messages_from_rows(decode("replies", &stdout)?))
    }

    /// Forget the cached session. The next operation re-verifies it.
    pub fn invalidate(&mut self) {
        self.state = SessionState::Disconnected;
    }

    /// Releases the handle. The bridge holds no long-lived connection on our
    /// side, so this only resets the cached state.
    pub fn shutdown(&mut self) {
        self.state = SessionState::Disconnected;
    }

    fn checked_run(&mut self, op: &str, args: &[String]) -> Result<String, PlatformError> {
        let bin = resolve_session_bin(&self.bin)?;
        let mut cmd = Command::new(&bin);
        cmd.args(args);
        let output = util::run_command_with_optional_timeout(&mut cmd, Some(self.timeout_secs))
            .map_err(|err| {
                PlatformError::transient(format!("{op}: failed to run `{}`: {err:#}", bin.display()))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        let err = classify_bridge_failure(op, &stdout, &stderr);
        if matches!(err, PlatformError::Connection(_)) {
            self.state = SessionState::Disconnected;
        }
        Err(err)
    }
}
