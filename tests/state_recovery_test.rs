#![cfg(not(windows))]
use predicates::str::contains;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const FORUM_ID: &str = "-1003643461316";

fn write_fake_bridge(bin_path: &Path) {
    let script = r#"#!/usr/bin/env bash
set -euo pipefail

if [[ "${1:-}" == "whoami" ]]; then
  echo '{"account_id":777000111}'
  exit 0
fi

if [[ "${1:-}" == "topics" && "${2:-}" == "list" ]]; then
  echo "${AUTOTHREAD_TEST_TOPICS_JSON:-[]}"
  exit 0
fi

if [[ "${1:-}" == "replies" ]]; then
  echo '[]'
  exit 0
fi

exit 0
"#;
    fs::write(bin_path, script).expect("write fake bridge");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(bin_path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(bin_path, perms).expect("chmod");
    }
}

fn seed_home(app_home: &Path) {
    fs::create_dir_all(app_home.join("state")).expect("mkdir state");
    fs::write(
        app_home.join("autothread.toml"),
        format!(
            r#"[forums.{FORUM_ID}]
display_name = "Conversations"
"#
        ),
    )
    .expect("write config");
}

fn corrupt_backups(state_dir: &Path, stem: &str) -> Vec<String> {
    fs::read_dir(state_dir)
        .expect("read state dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(stem) && name.contains("corrupt"))
        .collect()
}

#[test]
#[cfg(not(windows))]
fn corrupt_forum_state_is_backed_up_and_the_pass_continues() {
    let tmp = tempdir().expect("tempdir");
    let app_home = tmp.path().join("home");
    seed_home(&app_home);
    fs::write(app_home.join("state/forum_state.json"), "{not json at all")
        .expect("write garbage");

    let bridge = tmp.path().join("tg-session-bridge");
    write_fake_bridge(&bridge);

    assert_cmd::cargo::cargo_bin_cmd!("autothread")
        .current_dir(tmp.path())
        .env("AUTOTHREAD_HOME", &app_home)
        .env("TG_SESSION_BIN", &bridge)
        .env("TG_BOT_TOKEN", "TESTTOKEN")
        .env("AUTOTHREAD_PROPAGATION_DELAY_MS", "0")
        .env(
            "AUTOTHREAD_TEST_TOPICS_JSON",
            r#"[{"id":41,"title":"General","closed":false}]"#,
        )
        .arg("run")
        .arg("--once")
        .assert()
        .success()
        .stdout(contains("no two-sided exchange yet"))
        .stderr(contains("AUTOTHREAD_WARN code=STATE_CORRUPT"))
        .stderr(contains("step=forum_inbox_state"))
        .stderr(contains("reason=json-parse-failed"));

    let backups = corrupt_backups(&app_home.join("state"), "forum_state");
    assert_eq!(backups.len(), 1, "expected one corrupt backup: {backups:?}");

    // the pass rebuilt the document from the live topic list
    let state: Value = serde_json::from_str(
        &fs::read_to_string(app_home.join("state/forum_state.json")).expect("read state"),
    )
    .expect("parse state");
    assert_eq!(
        state["forums"][FORUM_ID]["inbox_thread_id"].as_i64(),
        Some(41)
    );
}

#[test]
#[cfg(not(windows))]
fn corrupt_ledger_is_backed_up_and_the_pass_continues() {
    let tmp = tempdir().expect("tempdir");
    let app_home = tmp.path().join("home");
    seed_home(&app_home);
    fs::write(app_home.join("state/daemon_state.json"), "[1, 2, oops")
        .expect("write garbage");

    let bridge = tmp.path().join("tg-session-bridge");
    write_fake_bridge(&bridge);

    assert_cmd::cargo::cargo_bin_cmd!("autothread")
        .current_dir(tmp.path())
        .env("AUTOTHREAD_HOME", &app_home)
        .env("TG_SESSION_BIN", &bridge)
        .env("TG_BOT_TOKEN", "TESTTOKEN")
        .env("AUTOTHREAD_PROPAGATION_DELAY_MS", "0")
        .env(
            "AUTOTHREAD_TEST_TOPICS_JSON",
            r#"[{"id":41,"title":"General","closed":false}]"#,
        )
        .arg("run")
        .arg("--once")
        .assert()
        .success()
        .stdout(contains("no two-sided exchange yet"))
        .stderr(contains("AUTOTHREAD_WARN code=STATE_CORRUPT"))
        .stderr(contains("step=reconciliation_ledger"));

    let backups = corrupt_backups(&app_home.join("state"), "daemon_state");
    assert_eq!(backups.len(), 1, "expected one corrupt backup: {backups:?}");
}
