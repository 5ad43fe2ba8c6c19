use thiserror::Error;

/// Failure classes surfaced by the two platform interfaces. The engine
/// downcasts these to pick a step outcome; everything else is treated as
/// retryable.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("session unavailable: {0}")]
    Connection(String),
    #[error("transient platform failure: {message}")]
    Transient {
        message: String,
        retry_after_secs: Option<u64>,
    },
    #[error("expected thread missing: {0}")]
    NotFound(String),
    #[error("state document corrupt: {0}")]
    CorruptState(String),
    #[error("partial transition: {0}")]
    PartialTransition(String),
}

impl PlatformError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after_secs: Some(retry_after_secs),
        }
    }
}
