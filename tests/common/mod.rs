//! Shared test utilities for replaying captured sessions.
//!
//! Fixture logs hold one record per line:
//! - `start <url>` connection-start record
//! - `send <payload>` client-to-server message
//! - `recv <payload>` server-to-client message
//! - `known <channel> <payload>` message with a known channel
//!
//! Blank lines and lines starting with `#` are skipped.

#![allow(dead_code)]

use streamstate::{Simulator, Snapshot};

/// Installs a fmt subscriber that writes through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Feeds every record of `log` to `simulator` in order and returns the
/// channels resolved for `recv` records.
pub fn replay(simulator: &mut dyn Simulator, log: &str) -> Vec<String> {
    let mut resolved = Vec::new();
    for (number, line) in log.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (kind, rest) = line.split_once(' ').unwrap_or((line, ""));
        let context = || format!("line {}: {line}", number + 1);
        match kind {
            "start" => simulator
                .process_start(rest.as_bytes())
                .unwrap_or_else(|e| panic!("{}: {e}", context())),
            "send" => {
                simulator
                    .process_send(rest.as_bytes())
                    .unwrap_or_else(|e| panic!("{}: {e}", context()));
            }
            "recv" => resolved.push(
                simulator
                    .process_message_ws(rest.as_bytes())
                    .unwrap_or_else(|e| panic!("{}: {e}", context())),
            ),
            "known" => {
                let (channel, payload) = rest
                    .split_once(' ')
                    .unwrap_or_else(|| panic!("{}: missing channel", context()));
                simulator
                    .process_message_channel_known(channel, payload.as_bytes())
                    .unwrap_or_else(|e| panic!("{}: {e}", context()));
            }
            other => panic!("{}: unknown record kind '{other}'", context()),
        }
    }
    resolved
}

/// Restores `snapshots` into `fresh` and asserts that it checkpoints to the
/// same state lines.
pub fn assert_restores(fresh: &mut dyn Simulator, snapshots: &[Snapshot]) {
    fresh.restore(snapshots).expect("Failed to restore state lines");
    let restored = fresh
        .take_state_snapshot()
        .expect("Failed to take state snapshot");
    assert_eq!(payloads(&restored), payloads(snapshots));
}

/// Renders snapshots as `(channel, payload)` text pairs for readable diffs.
pub fn payloads(snapshots: &[Snapshot]) -> Vec<(String, String)> {
    snapshots
        .iter()
        .map(|snapshot| {
            (
                snapshot.channel.clone(),
                String::from_utf8_lossy(&snapshot.payload).into_owned(),
            )
        })
        .collect()
}
