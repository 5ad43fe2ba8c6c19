use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use fs2::FileExt;

use crate::autothread::audit;
use crate::autothread::config::{self, AutothreadConfig, ForumConfig};
use crate::autothread::daemon_lock::{self, DaemonLockPayload};
use crate::autothread::detector;
use crate::autothread::ledger::{
    CREATED_SOURCE_ENSURE_INBOX, CREATED_SOURCE_TRANSITION, ProcessedEntry, ReconciliationLedger,
    StepOutcome, cooldown_elapsed,
};
use crate::autothread::paths::AutothreadPaths;
use crate::autothread::state::ForumInboxState;
use crate::autothread::store;
use crate::autothread::title;
use crate::autothread::util;
use crate::autothread::warn::{self, WarnEvent};
use crate::error::PlatformError;
use crate::telegram::bot_api::BotNotifier;
use crate::telegram::session::SessionClient;

/// Fresh topics can lag in the full listing; a short re-list is enough to
/// confirm the create landed.
pub const RE_LIST_VERIFY_LIMIT: u32 = 10;

const MAX_FAILURE_BACKOFF_SECS: u64 = 300;
const STOP_POLL_INTERVAL_MS: u64 = 250;

/// One reconciliation pass at a time, even when embedded in-process next to
/// other callers. Cross-process exclusion is the daemon lock's job.
static RECONCILE_GATE: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Transitioned,
    Skipped,
    Failed,
}

impl TickStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transitioned => "transitioned",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForumTickOutcome {
    pub forum_id: i64,
    pub status: TickStatus,
    pub inbox_thread_id: Option<i64>,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct PassOutcome {
    pub transitioned: usize,
    pub skipped: usize,
    pub failed: usize,
    pub forums: Vec<ForumTickOutcome>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
}

enum EnsuredInbox {
    Existing(i64),
    Adopted(i64),
    Created(i64),
    WouldCreate,
}

fn skipped_outcome(forum_id: i64, inbox: Option<i64>, detail: &str) -> ForumTickOutcome {
    ForumTickOutcome {
        forum_id,
        status: TickStatus::Skipped,
        inbox_thread_id: inbox,
        detail: detail.to_string(),
    }
}

fn warn_forum(code: &str, stage: &str, forum_id: i64, thread_id: Option<i64>, reason: &str, err: &str) {
    let forum = forum_id.to_string();
    let thread = thread_id.map(|t| t.to_string()).unwrap_or_else(|| "na".to_string());
    warn::emit(WarnEvent {
        code,
        stage,
        forum: &forum,
        thread: &thread,
        step: "na",
        retry: "na",
        reason,
        err,
    });
}

/// Runs one full reconciliation pass over every configured forum. Forum
/// failures are isolated; only an unusable session aborts the pass.
pub fn run_once(
    paths: &AutothreadPaths,
    config: &AutothreadConfig,
    client: &mut SessionClient,
    notifier: &BotNotifier,
    options: RunOptions,
) -> Result<PassOutcome> {
    let _gate = RECONCILE_GATE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let now = Utc::now();
    let mut state: ForumInboxState =
        store::load_or_default(&paths.forum_state_file, "forum inbox state")?;
    let mut ledger: ReconciliationLedger =
        store::load_or_default(&paths.daemon_state_file, "reconciliation ledger")?;

    let pruned = ledger.prune_expired(now, config.engine.ledger_retention_days);
    if pruned > 0 && !options.dry_run {
        store::save_atomic(&paths.daemon_state_file, &ledger)?;
    }

    let own_account_id = client
        .ensure_connected()
        .context("failed to verify the account session")?;

    let mut outcomes = Vec::with_capacity(config.forums.len());
    for (key, forum_cfg) in &config.forums {
        let forum_id = config::parse_forum_id(key)?;
        let outcome = match reconcile_forum(
            paths,
            config,
            forum_id,
            forum_cfg,
            &mut state,
            &mut ledger,
            client,
            notifier,
            own_account_id,
            options,
            now,
        ) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn_forum(
                    "FORUM_RECONCILE_FAILED",
                    "reconcile",
                    forum_id,
                    state.inbox_for(forum_id),
                    "forum_skipped_this_tick",
                    &format!("{err:#}"),
                );
                let _ = audit::append_event(
                    paths,
                    "reconcile",
                    "degraded",
                    &format!("forum {forum_id}: {err:#}"),
                );
                ForumTickOutcome {
                    forum_id,
                    status: TickStatus::Failed,
                    inbox_thread_id: state.inbox_for(forum_id),
                    detail: format!("{err:#}"),
                }
            }
        };
        outcomes.push(outcome);
    }

    let transitioned = outcomes
        .iter()
        .filter(|o| o.status == TickStatus::Transitioned)
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| o.status == TickStatus::Skipped)
        .count();
    let failed = outcomes
        .iter()
        .filter(|o| o.status == TickStatus::Failed)
        .count();

    let _ = audit::append_event(
        paths,
        "pass",
        if failed == 0 { "ok" } else { "degraded" },
        &format!("transitioned={transitioned} skipped={skipped} failed={failed}"),
    );

    Ok(PassOutcome {
        transitioned,
        skipped,
        failed,
        forums: outcomes,
    })
}

#[allow(clippy::too_many_arguments)]
fn reconcile_forum(
    paths: &AutothreadPaths,
    config: &AutothreadConfig,
    forum_id: i64,
    forum_cfg: &ForumConfig,
    state: &mut ForumInboxState,
    ledger: &mut ReconciliationLedger,
    client: &mut SessionClient,
    notifier: &BotNotifier,
    own_account_id: i64,
    options: RunOptions,
    now: DateTime<Utc>,
) -> Result<ForumTickOutcome> {
    let inbox_id = match ensure_inbox(
        paths, config, forum_id, forum_cfg, state, ledger, client, notifier, options, now,
    )? {
        EnsuredInbox::WouldCreate => {
            return Ok(skipped_outcome(
                forum_id,
                None,
                "dry run: no open inbox, would create one",
            ));
        }
        EnsuredInbox::Created(id) => {
            return Ok(skipped_outcome(
                forum_id,
                Some(id),
                "inbox created, waiting for traffic",
            ));
        }
        EnsuredInbox::Existing(id) | EnsuredInbox::Adopted(id) => id,
    };

    if let Some(reason) = guard_skip_reason(config, forum_cfg, ledger, forum_id, inbox_id, now) {
        return Ok(skipped_outcome(forum_id, Some(inbox_id), &reason));
    }

    let messages = client.fetch_recent_messages(forum_id, inbox_id, config.inbox.reply_window)?;
    if !detector::is_conversation(&messages, own_account_id) {
        return Ok(skipped_outcome(
            forum_id,
            Some(inbox_id),
            "no two-sided exchange yet",
        ));
    }

    let archive_title = title::derive_title(&messages, own_account_id, Local::now());
    if options.dry_run {
        return Ok(skipped_outcome(
            forum_id,
            Some(inbox_id),
            &format!("dry run: would archive as \"{archive_title}\""),
        ));
    }

    let (new_inbox, rename) = perform_transition(
        paths,
        config,
        forum_id,
        forum_cfg,
        state,
        ledger,
        client,
        notifier,
        inbox_id,
        &archive_title,
        now,
    )?;

    let detail = if rename == StepOutcome::Succeeded {
        format!("archived \"{archive_title}\", new inbox {new_inbox}")
    } else {
        format!("superseded inbox {inbox_id} (rename failed), new inbox {new_inbox}")
    };
    Ok(ForumTickOutcome {
        forum_id,
        status: TickStatus::Transitioned,
        inbox_thread_id: Some(new_inbox),
        detail,
    })
}

/// Skip reasons evaluated strictly in order: protection, prior archive,
/// creation cooldown, replacement cooldown, global cooldown.
fn guard_skip_reason(
    config: &AutothreadConfig,
    forum_cfg: &ForumConfig,
    ledger: &ReconciliationLedger,
    forum_id: i64,
    inbox_id: i64,
    now: DateTime<Utc>,
) -> Option<String> {
    if forum_cfg.protected_thread_ids.contains(&inbox_id) {
        return Some(format!("thread {inbox_id} is protected"));
    }
    if ledger.has_processed(forum_id, inbox_id) {
        return Some(format!("thread {inbox_id} was already archived"));
    }

    let create_cooldown = config.engine.create_cooldown_secs;
    if let Some(age) = ledger.created_age_secs(forum_id, inbox_id, now)
        && !cooldown_elapsed(Some(age), create_cooldown)
    {
        return Some(format!(
            "inbox created {age}s ago, create cooldown is {create_cooldown}s"
        ));
    }
    if let Some(age) = ledger.replacement_age_secs(forum_id, inbox_id, now)
        && !cooldown_elapsed(Some(age), create_cooldown)
    {
        return Some(format!(
            "inbox replaced a previous one {age}s ago, create cooldown is {create_cooldown}s"
        ));
    }

    let global_cooldown = config.engine.global_cooldown_secs;
    if let Some(age) = ledger.last_transition_age_secs(now)
        && !cooldown_elapsed(Some(age), global_cooldown)
    {
        return Some(format!(
            "last transition was {age}s ago, global cooldown is {global_cooldown}s"
        ));
    }

    None
}

#[allow(clippy::too_many_arguments)]
fn ensure_inbox(
    paths: &AutothreadPaths,
    config: &AutothreadConfig,
    forum_id: i64,
    forum_cfg: &ForumConfig,
    state: &mut ForumInboxState,
    ledger: &mut ReconciliationLedger,
    client: &mut SessionClient,
    notifier: &BotNotifier,
    options: RunOptions,
    now: DateTime<Utc>,
) -> Result<EnsuredInbox> {
    let threads = client.list_threads(forum_id, config.inbox.topics_list_limit)?;

    if let Some(cached) = state.inbox_for(forum_id) {
        if threads
            .iter()
            .any(|t| t.thread_id == cached && !t.is_closed)
        {
            return Ok(EnsuredInbox::Existing(cached));
        }
        warn_forum(
            "INBOX_POINTER_STALE",
            "ensure_inbox",
            forum_id,
            Some(cached),
            "cached_inbox_closed_or_missing",
            "na",
        );
    }

    if let Some(best) = threads
        .iter()
        .filter(|t| !t.is_closed && t.title == config.inbox.title)
        .map(|t| t.thread_id)
        .max()
    {
        if state.inbox_for(forum_id) != Some(best) && !options.dry_run {
            state.set_inbox(forum_id, best);
            store::save_atomic(&paths.forum_state_file, state)?;
        }
        return Ok(EnsuredInbox::Adopted(best));
    }

    if options.dry_run {
        return Ok(EnsuredInbox::WouldCreate);
    }

    let created_id = client.create_thread(forum_id, &config.inbox.title)?;
    thread::sleep(Duration::from_millis(config.inbox.propagation_delay_ms));
    let final_id = confirm_created_inbox(client, forum_id, created_id, &config.inbox.title, None);

    state.set_inbox(forum_id, final_id);
    store::save_atomic(&paths.forum_state_file, state)?;
    ledger.record_created(forum_id, final_id, CREATED_SOURCE_ENSURE_INBOX, now);
    store::save_atomic(&paths.daemon_state_file, ledger)?;
    let _ = audit::append_event(
        paths,
        "ensure_inbox",
        "created",
        &format!("forum {forum_id}: inbox {final_id}"),
    );

    if let Err(err) = notifier.send_message(forum_id, final_id, &forum_cfg.welcome_text) {
        warn_forum(
            "NOTIFY_FAILED",
            "ensure_inbox",
            forum_id,
            Some(final_id),
            "welcome_not_delivered",
            &err.to_string(),
        );
    }

    Ok(EnsuredInbox::Created(final_id))
}

/// The freshly created id wins unless the re-list disagrees, in which case
/// the highest open thread carrying the inbox title does. `exclude` is the
/// thread a transition just superseded: a failed rename leaves it carrying
/// the inbox title, and it must never be re-adopted as its own replacement.
fn confirm_created_inbox(
    client: &mut SessionClient,
    forum_id: i64,
    created_id: i64,
    inbox_title: &str,
    exclude: Option<i64>,
) -> i64 {
    match client.list_threads(forum_id, RE_LIST_VERIFY_LIMIT) {
        Ok(threads) => {
            if threads.iter().any(|t| t.thread_id == created_id) {
                return created_id;
            }
            if let Some(best) = threads
                .iter()
                .filter(|t| {
                    !t.is_closed && t.title == inbox_title && Some(t.thread_id) != exclude
                })
                .map(|t| t.thread_id)
                .max()
            {
                warn_forum(
                    "INBOX_VERIFY_MISMATCH",
                    "ensure_inbox",
                    forum_id,
                    Some(best),
                    "created_id_not_listed_adopting_best",
                    "na",
                );
                return best;
            }
            warn_forum(
                "INBOX_VERIFY_LAG",
                "ensure_inbox",
                forum_id,
                Some(created_id),
                "created_id_not_listed_yet",
                "na",
            );
            created_id
        }
        Err(err) => {
            warn_forum(
                "INBOX_VERIFY_FAILED",
                "ensure_inbox",
                forum_id,
                Some(created_id),
                "re_list_failed",
                &err.to_string(),
            );
            created_id
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn perform_transition(
    paths: &AutothreadPaths,
    config: &AutothreadConfig,
    forum_id: i64,
    forum_cfg: &ForumConfig,
    state: &mut ForumInboxState,
    ledger: &mut ReconciliationLedger,
    client: &mut SessionClient,
    notifier: &BotNotifier,
    old_inbox: i64,
    archive_title: &str,
    now: DateTime<Utc>,
) -> Result<(i64, StepOutcome)> {
    // The rename is best-effort. Its outcome lands in the processed entry so
    // the next tick sees the exchange as archived even when the old thread
    // kept its title.
    let rename = match client.rename_thread(forum_id, old_inbox, archive_title) {
        Ok(()) => StepOutcome::Succeeded,
        Err(err) => {
            warn_forum(
                "RENAME_FAILED",
                "transition",
                forum_id,
                Some(old_inbox),
                "old_inbox_keeps_its_title",
                &err.to_string(),
            );
            classify_step(&err)
        }
    };

    let new_inbox = match client.create_thread(forum_id, &config.inbox.title) {
        Ok(id) => id,
        Err(err) if rename != StepOutcome::Succeeded => {
            // Neither mutation landed. Leave no trace so the next tick
            // retries the whole transition.
            return Err(err.into());
        }
        Err(err) => {
            // Past the point of no return: the old inbox already lost its
            // title. Record what happened and drop the pointer so the next
            // tick's ensure step builds a fresh inbox.
            state.clear_inbox(forum_id);
            store::save_atomic(&paths.forum_state_file, state)?;
            ledger.record_processed(
                forum_id,
                old_inbox,
                ProcessedEntry {
                    timestamp: now.to_rfc3339(),
                    renamed_to: archive_title.to_string(),
                    new_inbox: None,
                    rename: StepOutcome::Succeeded,
                    create: classify_step(&err),
                    notify: StepOutcome::FailedRetryable,
                },
            );
            ledger.mark_transition(now);
            store::save_atomic(&paths.daemon_state_file, ledger)?;
            let _ = audit::append_event(
                paths,
                "transition",
                "partial",
                &format!("forum {forum_id}: renamed {old_inbox} but creating a fresh inbox failed"),
            );
            return Err(PlatformError::PartialTransition(format!(
                "forum {forum_id}: archived {old_inbox} as \"{archive_title}\" but creating a fresh inbox failed: {err}"
            ))
            .into());
        }
    };

    thread::sleep(Duration::from_millis(config.inbox.propagation_delay_ms));
    let final_inbox = confirm_created_inbox(
        client,
        forum_id,
        new_inbox,
        &config.inbox.title,
        Some(old_inbox),
    );

    state.set_inbox(forum_id, final_inbox);
    store::save_atomic(&paths.forum_state_file, state)?;

    let notify = match notifier.send_message(forum_id, final_inbox, &forum_cfg.welcome_text) {
        Ok(()) => StepOutcome::Succeeded,
        Err(err) => {
            warn_forum(
                "NOTIFY_FAILED",
                "transition",
                forum_id,
                Some(final_inbox),
                "welcome_not_delivered",
                &err.to_string(),
            );
            classify_step(&err)
        }
    };

    ledger.record_created(forum_id, final_inbox, CREATED_SOURCE_TRANSITION, now);
    ledger.record_processed(
        forum_id,
        old_inbox,
        ProcessedEntry {
            timestamp: now.to_rfc3339(),
            renamed_to: archive_title.to_string(),
            new_inbox: Some(final_inbox),
            rename,
            create: StepOutcome::Succeeded,
            notify,
        },
    );
    ledger.mark_transition(now);
    store::save_atomic(&paths.daemon_state_file, ledger)?;
    let status = if rename == StepOutcome::Succeeded && notify == StepOutcome::Succeeded {
        "ok"
    } else {
        "degraded"
    };
    let _ = audit::append_event(
        paths,
        "transition",
        status,
        &format!(
            "forum {forum_id}: {old_inbox} -> {final_inbox} title \"{archive_title}\" rename={} notify={}",
            rename.as_str(),
            notify.as_str()
        ),
    );

    Ok((final_inbox, rename))
}

fn classify_step(err: &PlatformError) -> StepOutcome {
    match err {
        PlatformError::Transient { .. } | PlatformError::Connection(_) => {
            StepOutcome::FailedRetryable
        }
        PlatformError::NotFound(_)
        | PlatformError::CorruptState(_)
        | PlatformError::PartialTransition(_) => StepOutcome::FailedPermanent,
    }
}

/// Long-running mode: one pass per interval, exponential backoff on failing
/// passes, cooperative stop through the sentinel file.
pub fn run_daemon(
    paths: &AutothreadPaths,
    config: &AutothreadConfig,
    client: &mut SessionClient,
    notifier: &BotNotifier,
    interval_secs: u64,
) -> Result<()> {
    let lock_file = acquire_daemon_lock(paths)?;
    let sentinel = daemon_lock::stop_sentinel_path(paths);
    // A sentinel left behind by an earlier run must not stop this one.
    let _ = fs::remove_file(&sentinel);

    let _ = audit::append_event(
        paths,
        "daemon",
        "started",
        &format!("pid {} interval {}s", process::id(), interval_secs),
    );

    let mut consecutive_failures: u32 = 0;
    loop {
        if sentinel.exists() {
            break;
        }

        match run_once(paths, config, client, notifier, RunOptions::default()) {
            Ok(_) => {
                consecutive_failures = 0;
            }
            Err(err) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                warn::emit(WarnEvent {
                    code: "PASS_FAILED",
                    stage: "daemon",
                    forum: "na",
                    thread: "na",
                    step: "na",
                    retry: &consecutive_failures.to_string(),
                    reason: "pass_skipped_backing_off",
                    err: &format!("{err:#}"),
                });
                let _ = audit::append_event(
                    paths,
                    "daemon",
                    "degraded",
                    &format!("pass failed ({consecutive_failures} in a row): {err:#}"),
                );
                client.invalidate();
            }
        }

        let delay = if consecutive_failures == 0 {
            interval_secs
        } else {
            failure_backoff_secs(interval_secs, consecutive_failures)
        };
        if sleep_until_stop(&sentinel, delay) {
            break;
        }
    }

    let _ = audit::append_event(paths, "daemon", "stopped", "stop requested");
    client.shutdown();
    let _ = fs::remove_file(&sentinel);
    drop(lock_file);
    let _ = fs::remove_file(daemon_lock::daemon_lock_path(paths));
    Ok(())
}

fn acquire_daemon_lock(paths: &AutothreadPaths) -> Result<fs::File> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let lock_path = daemon_lock::daemon_lock_path(paths);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("failed to open daemon lock {}", lock_path.display()))?;

    if file.try_lock_exclusive().is_err() {
        let holder = daemon_lock::read_daemon_lock_payload(paths)
            .ok()
            .flatten()
            .map(|p| p.pid.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        anyhow::bail!("another autothread daemon already holds the lock (pid {holder})");
    }

    let payload = DaemonLockPayload {
        pid: process::id(),
        started_at_epoch_secs: util::now_epoch_secs()?,
        build_uuid: env!("BUILD_UUID").to_string(),
        state_home: paths.app_home.display().to_string(),
    };
    file.set_len(0)
        .with_context(|| format!("failed to truncate daemon lock {}", lock_path.display()))?;
    file.write_all(serde_json::to_string(&payload)?.as_bytes())
        .with_context(|| format!("failed to write daemon lock {}", lock_path.display()))?;
    let _ = file.sync_all();

    Ok(file)
}

pub(crate) fn failure_backoff_secs(interval_secs: u64, consecutive_failures: u32) -> u64 {
    let multiplier = 1u64 << u64::from(consecutive_failures.saturating_sub(1).min(4));
    interval_secs
        .saturating_mul(multiplier)
        .min(MAX_FAILURE_BACKOFF_SECS.max(interval_secs))
}

/// Sleeps in short slices so a stop request takes effect within a fraction
/// of a second. Returns true when the sentinel appeared.
fn sleep_until_stop(sentinel: &Path, total_secs: u64) -> bool {
    let deadline = Instant::now() + Duration::from_secs(total_secs);
    loop {
        if sentinel.exists() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        let remaining = deadline - now;
        thread::sleep(remaining.min(Duration::from_millis(STOP_POLL_INTERVAL_MS)));
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_step, failure_backoff_secs, guard_skip_reason, sleep_until_stop};
    use crate::autothread::config::{AutothreadConfig, ForumConfig};
    use crate::autothread::ledger::{
        CreatedEntry, ProcessedEntry, ReconciliationLedger, StepOutcome, entry_key,
    };
    use crate::error::PlatformError;
    use chrono::{Duration, Utc};

    const FORUM: i64 = -1003643461316;
    const INBOX: i64 = 41;

    fn forum_cfg() -> ForumConfig {
        ForumConfig {
            display_name: "ops".to_string(),
            welcome_text: "👋 What's on your mind?".to_string(),
            protected_thread_ids: vec![1],
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(failure_backoff_secs(30, 1), 30);
        assert_eq!(failure_backoff_secs(30, 2), 60);
        assert_eq!(failure_backoff_secs(30, 3), 120);
        assert_eq!(failure_backoff_secs(30, 4), 240);
        assert_eq!(failure_backoff_secs(30, 5), 300);
        assert_eq!(failure_backoff_secs(30, 40), 300);
        assert_eq!(failure_backoff_secs(600, 3), 600);
    }

    #[test]
    fn protected_inbox_is_never_touched() {
        let cfg = AutothreadConfig::default();
        let ledger = ReconciliationLedger::default();
        let reason = guard_skip_reason(&cfg, &forum_cfg(), &ledger, FORUM, 1, Utc::now());
        assert!(reason.is_some_and(|r| r.contains("protected")));
    }

    #[test]
    fn archived_inbox_is_not_archived_twice() {
        let cfg = AutothreadConfig::default();
        let mut ledger = ReconciliationLedger::default();
        ledger.processed.insert(
            entry_key(FORUM, INBOX),
            ProcessedEntry {
                timestamp: Utc::now().to_rfc3339(),
                renamed_to: "DNS caching?".to_string(),
                new_inbox: Some(42),
                ..ProcessedEntry::default()
            },
        );
        let reason = guard_skip_reason(&cfg, &forum_cfg(), &ledger, FORUM, INBOX, Utc::now());
        assert!(reason.is_some_and(|r| r.contains("already archived")));
    }

    #[test]
    fn young_inbox_waits_out_the_create_cooldown() {
        let cfg = AutothreadConfig::default();
        let now = Utc::now();
        let mut ledger = ReconciliationLedger::default();
        ledger.created.insert(
            entry_key(FORUM, INBOX),
            CreatedEntry {
                timestamp: (now - Duration::seconds(5)).to_rfc3339(),
                source: "ensure_inbox".to_string(),
            },
        );
        assert!(guard_skip_reason(&cfg, &forum_cfg(), &ledger, FORUM, INBOX, now).is_some());

        ledger.created.insert(
            entry_key(FORUM, INBOX),
            CreatedEntry {
                timestamp: (now - Duration::seconds(20)).to_rfc3339(),
                source: "ensure_inbox".to_string(),
            },
        );
        assert!(guard_skip_reason(&cfg, &forum_cfg(), &ledger, FORUM, INBOX, now).is_none());
    }

    #[test]
    fn fresh_global_transition_pauses_every_forum() {
        let cfg = AutothreadConfig::default();
        let now = Utc::now();
        let mut ledger = ReconciliationLedger::default();
        ledger.last_autothread_timestamp = Some((now - Duration::seconds(5)).to_rfc3339());
        let reason = guard_skip_reason(&cfg, &forum_cfg(), &ledger, FORUM, INBOX, now);
        assert!(reason.is_some_and(|r| r.contains("global cooldown")));

        ledger.last_autothread_timestamp = Some((now - Duration::seconds(20)).to_rfc3339());
        assert!(guard_skip_reason(&cfg, &forum_cfg(), &ledger, FORUM, INBOX, now).is_none());
    }

    #[test]
    fn replacement_inbox_waits_out_the_create_cooldown() {
        let cfg = AutothreadConfig::default();
        let now = Utc::now();
        let mut ledger = ReconciliationLedger::default();
        ledger.processed.insert(
            entry_key(FORUM, 37),
            ProcessedEntry {
                timestamp: (now - Duration::seconds(4)).to_rfc3339(),
                renamed_to: "old chat".to_string(),
                new_inbox: Some(INBOX),
                ..ProcessedEntry::default()
            },
        );
        let reason = guard_skip_reason(&cfg, &forum_cfg(), &ledger, FORUM, INBOX, now);
        assert!(reason.is_some_and(|r| r.contains("replaced")));
    }

    #[test]
    fn step_outcomes_follow_the_error_class() {
        assert_eq!(
            classify_step(&PlatformError::transient("boom")),
            StepOutcome::FailedRetryable
        );
        assert_eq!(
            classify_step(&PlatformError::Connection("gone".to_string())),
            StepOutcome::FailedRetryable
        );
        assert_eq!(
            classify_step(&PlatformError::NotFound("missing".to_string())),
            StepOutcome::FailedPermanent
        );
    }

    #[test]
    fn sleep_stops_early_when_the_sentinel_shows_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sentinel = dir.path().join("stop");
        std::fs::write(&sentinel, b"").expect("write sentinel");
        let started = std::time::Instant::now();
        assert!(sleep_until_stop(&sentinel, 30));
        assert!(started.elapsed().as_secs() < 5);

        std::fs::remove_file(&sentinel).expect("remove sentinel");
        assert!(!sleep_until_stop(&sentinel, 0));
    }
}
