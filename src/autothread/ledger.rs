use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CREATED_SOURCE_ENSURE_INBOX: &str = "ensure_inbox";
pub const CREATED_SOURCE_TRANSITION: &str = "transition";

/// Result of one best-effort platform mutation inside a transition, kept in
/// the processed entry so the next tick inspects what actually happened
/// instead of re-deriving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    #[default]
    Succeeded,
    FailedRetryable,
    FailedPermanent,
}

impl StepOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::FailedRetryable => "failed_retryable",
            Self::FailedPermanent => "failed_permanent",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CreatedEntry {
    pub timestamp: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProcessedEntry {
    pub timestamp: String,
    pub renamed_to: String,
    #[serde(alias = "new_general")]
    pub new_inbox: Option<i64>,
    pub rename: StepOutcome,
    pub create: StepOutcome,
    pub notify: StepOutcome,
}

/// Append/prune log of recent inbox creations and archives, plus the global
/// last-transition marker. Entry keys are `<forum_id>:<thread_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationLedger {
    pub schema_version: u32,
    #[serde(alias = "created_topics")]
    pub created: BTreeMap<String, CreatedEntry>,
    pub processed: BTreeMap<String, ProcessedEntry>,
    pub last_autothread_timestamp: Option<String>,
}

impl Default for ReconciliationLedger {
    fn default() -> Self {
        Self {
            schema_version: 1,
            created: BTreeMap::new(),
            processed: BTreeMap::new(),
            last_autothread_timestamp: None,
        }
    }
}

pub fn entry_key(forum_id: i64, thread_id: i64) -> String {
    format!("{forum_id}:{thread_id}")
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn age_secs(timestamp: &str, now: DateTime<Utc>) -> Option<i64> {
    parse_timestamp(timestamp).map(|t| (now - t).num_seconds())
}

/// Cooldown gate. No measurable age means no cooldown to wait out; a clock
/// skew that produces a negative age keeps the gate closed.
pub fn cooldown_elapsed(age_secs: Option<i64>, cooldown_secs: u64) -> bool {
    match age_secs {
        None => true,
        Some(age) => age >= cooldown_secs as i64,
    }
}

impl ReconciliationLedger {
    pub fn has_processed(&self, forum_id: i64, thread_id: i64) -> bool {
        self.processed.contains_key(&entry_key(forum_id, thread_id))
    }

    pub fn created_age_secs(&self, forum_id: i64, thread_id: i64, now: DateTime<Utc>) -> Option<i64> {
        self.created
            .get(&entry_key(forum_id, thread_id))
            .and_then(|entry| age_secs(&entry.timestamp, now))
    }

    /// Youngest processed entry in this forum whose replacement inbox is the
    /// given thread. Used for the cooldown on inboxes born from a transition.
    pub fn replacement_age_secs(
        &self,
        forum_id: i64,
        thread_id: i64,
        now: DateTime<Utc>,
    ) -> Option<i64> {
        let prefix = format!("{forum_id}:");
        self.processed
            .iter()
            .filter(|(key, entry)| {
                key.starts_with(&prefix) && entry.new_inbox == Some(thread_id)
            })
            .filter_map(|(_, entry)| age_secs(&entry.timestamp, now))
            .min()
    }

    pub fn last_transition_age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_autothread_timestamp
            .as_deref()
            .and_then(|ts| age_secs(ts, now))
    }

    pub fn record_created(&mut self, forum_id: i64, thread_id: i64, source: &str, now: DateTime<Utc>) {
        self.created.insert(
            entry_key(forum_id, thread_id),
            CreatedEntry {
                timestamp: now.to_rfc3339(),
                source: source.to_string(),
            },
        );
    }

    pub fn record_processed(&mut self, forum_id: i64, thread_id: i64, entry: ProcessedEntry) {
        self.processed.insert(entry_key(forum_id, thread_id), entry);
    }

    pub fn mark_transition(&mut self, now: DateTime<Utc>) {
        self.last_autothread_timestamp = Some(now.to_rfc3339());
    }

    /// Drops entries past the retention horizon from both maps. Entries whose
    /// timestamp does not parse are treated as expired.
    pub fn prune_expired(&mut self, now: DateTime<Utc>, retention_days: u64) -> usize {
        let horizon_secs = retention_days as i64 * 86_400;
        let before = self.created.len() + self.processed.len();

        self.created
            .retain(|_, entry| matches!(age_secs(&entry.timestamp, now), Some(age) if age < horizon_secs));
        self.processed
            .retain(|_, entry| matches!(age_secs(&entry.timestamp, now), Some(age) if age < horizon_secs));

        before - (self.created.len() + self.processed.len())
    }
}
