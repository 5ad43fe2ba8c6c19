use anyhow::Result;

use crate::autothread::config;
use crate::autothread::engine::{self, RunOptions};
use crate::autothread::paths::resolve_paths;
use crate::commands::CommandReport;
use crate::telegram::bot_api::BotNotifier;
use crate::telegram::session::SessionClient;

#[derive(Debug, Clone, Default)]
pub struct RunFlags {
    pub once: bool,
    pub daemon: bool,
    pub interval_secs: Option<u64>,
    pub dry_run: bool,
}

pub fn run(flags: &RunFlags) -> Result<CommandReport> {
    let mut report = CommandReport::new("run");

    if flags.once && flags.daemon {
        report.issue("invalid flags: use only one of --once or --daemon");
        return Ok(report);
    }
    if flags.dry_run && flags.daemon {
        report.issue("invalid flags: --dry-run is only valid with --once");
        return Ok(report);
    }
    if flags.interval_secs.is_some() && !flags.daemon {
        report.issue("invalid flags: --interval is only valid with --daemon");
        return Ok(report);
    }
    if flags.interval_secs == Some(0) {
        report.issue("invalid flags: --interval must be at least 1 second");
        return Ok(report);
    }

    if flags.daemon
        && let Ok(exe) = std::env::current_exe()
    {
        let exe_str = exe.display().to_string();
        if exe_str.contains("target/debug")
            || exe_str.contains("target/release")
            || exe_str.contains("target\\debug")
            || exe_str.contains("target\\release")
        {
            report.issue(
                "CRITICAL: Running the background daemon via `cargo run` is disabled for stability.",
            );
            report.issue(
                "Cargo run holds file locks and causes severe CPU/IO spikes when the daemon restarts.",
            );
            report.issue("Please install the binary to your path first: `cargo install --path .`");
            report.issue("Then start the daemon using the compiled binary: `autothread run --daemon`");
            return Ok(report);
        }
    }

    let paths = resolve_paths()?;
    let config = config::load_config()?;
    let notifier = BotNotifier::from_env()?;
    let mut client = SessionClient::new(&paths);

    if flags.daemon {
        let interval = flags
            .interval_secs
            .unwrap_or(config.engine.poll_interval_secs);
        report.detail(format!("starting autothread daemon, interval {interval}s"));
        engine::run_daemon(&paths, &config, &mut client, &notifier, interval)?;
        report.detail("daemon stopped");
        return Ok(report);
    }

    let outcome = engine::run_once(
        &paths,
        &config,
        &mut client,
        &notifier,
        RunOptions {
            dry_run: flags.dry_run,
        },
    )?;
    client.shutdown();

    report.detail("reconciliation pass completed");
    if flags.dry_run {
        report.detail("dry_run=true");
    }
    report.detail(format!(
        "state_file={}",
        paths.forum_state_file.display()
    ));
    report.detail(format!(
        "ledger_file={}",
        paths.daemon_state_file.display()
    ));
    report.detail(format!(
        "forums={} transitioned={} skipped={} failed={}",
        outcome.forums.len(),
        outcome.transitioned,
        outcome.skipped,
        outcome.failed
    ));
    for forum in &outcome.forums {
        let inbox = forum
            .inbox_thread_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string());
        report.detail(format!(
            "forum={} status={} inbox={} detail={}",
            forum.forum_id,
            forum.status.as_str(),
            inbox,
            forum.detail
        ));
    }
    if outcome.failed > 0 {
        report.issue(format!(
            "{} forum(s) were skipped by failures this pass",
            outcome.failed
        ));
    }

    Ok(report)
}
