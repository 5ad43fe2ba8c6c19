use std::env;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";
pub const NOTIFY_TIMEOUT_SECS: u64 = 10;
pub const NOTIFY_MAX_ATTEMPTS: u32 = 3;

/// Flood waits above this are not worth stalling a whole tick for.
const MAX_HONORED_RETRY_AFTER_SECS: u64 = 30;

/// Doubling delay before retry `attempt`, 500ms after the first failure.
fn notify_backoff(attempt: u32) -> Duration {
    Duration::from_millis(250u64 << attempt.min(4))
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    message_thread_id: i64,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

impl BotApiResponse {
    fn retry_after_secs(&self) -> Option<u64> {
        self.parameters
            .as_ref()
            .and_then(|p| p.retry_after)
            .or(self.retry_after)
    }
}

/// Thin client for the Bot HTTP API. Only `sendMessage` is needed; every
/// other platform mutation goes through the session bridge.
pub struct BotNotifier {
    token: String,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl BotNotifier {
    pub fn new(token: &str, base_url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(NOTIFY_TIMEOUT_SECS))
            .build()
            .context("failed to build http client for bot notifications")?;
        Ok(Self {
            token: token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_env() -> Result<Self> {
        let token = env::var("TG_BOT_TOKEN")
            .map_err(|_| anyhow!("TG_BOT_TOKEN is not set; the welcome notifier cannot start"))?;
        let base_url =
            env::var("TELEGRAM_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());
        Self::new(&token, &base_url)
    }

    /// Posts one message into a thread, retrying transient failures up to
    /// [`NOTIFY_MAX_ATTEMPTS`] times and honoring flood-wait hints.
    pub fn send_message(
        &self,
        chat_id: i64,
        message_thread_id: i64,
        text: &str,
    ) -> Result<(), PlatformError> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let request = SendMessageRequest {
            chat_id,
            message_thread_id,
            text,
        };

        let mut last_err = PlatformError::transient("sendMessage never attempted");
        for attempt in 0..NOTIFY_MAX_ATTEMPTS {
            if attempt > 0 {
                thread::sleep(notify_backoff(attempt));
            }

            let response = match self.client.post(&url).json(&request).send() {
                Ok(response) => response,
                Err(err) => {
                    last_err =
                        PlatformError::transient(format!("sendMessage transport failure: {err}"));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(PlatformError::Connection(format!(
                    "bot token rejected with status {status}"
                )));
            }

            let parsed = match response.json::<BotApiResponse>() {
                Ok(parsed) => parsed,
                Err(err) => {
                    last_err = PlatformError::transient(format!(
                        "sendMessage returned status {status} with unreadable body: {err}"
                    ));
                    continue;
                }
            };

            if parsed.ok {
                return Ok(());
            }

            let description = parsed.description.clone().unwrap_or_default();
            if description.to_lowercase().contains("thread not found") {
                return Err(PlatformError::NotFound(format!(
                    "sendMessage target thread {message_thread_id} in {chat_id}: {description}"
                )));
            }

            if status.as_u16() == 429 {
                let wait = parsed
                    .retry_after_secs()
                    .unwrap_or(1)
                    .min(MAX_HONORED_RETRY_AFTER_SECS);
                last_err = PlatformError::rate_limited(
                    format!("sendMessage flood wait: {description}"),
                    wait,
                );
                thread::sleep(Duration::from_secs(wait));
                continue;
            }

            last_err = PlatformError::transient(format!(
                "sendMessage failed with status {status}: {description}"
            ));
        }

        Err(last_err)
    }
}
