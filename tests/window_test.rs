//! Window resolution against stored events, across UTC day boundaries.

mod common;

use agent_spend::aggregate::{aggregate_events, window_bounds, Window};
use agent_spend::refresh::run_refresh;
use agent_spend::store::EventStore;
use chrono::{TimeZone, Utc};
use common::*;
use tempfile::TempDir;

#[tokio::test]
async fn local_day_window_crosses_utc_partitions() {
    let dir = TempDir::new().unwrap();
    let config = sandboxed_config(&dir);

    // Three turns around Los Angeles midnight on 2026-02-10 (08:00 UTC):
    // 30 minutes before, 30 minutes after, and midday.
    write_claude_transcript(
        &config.claude.dir,
        "-home-user-app",
        "session-a",
        &[
            claude_turn("2026-02-10T07:30:00Z", "req-before", 1000, 100),
            claude_turn("2026-02-10T08:30:00Z", "req-after", 2000, 200),
            claude_turn("2026-02-10T18:00:00Z", "req-midday", 3000, 300),
        ],
    );
    run_refresh(&config).await.unwrap();

    let tz: chrono_tz::Tz = "America/Los_Angeles".parse().unwrap();
    let now = Utc.with_ymd_and_hms(2026, 2, 10, 20, 0, 0).unwrap();

    let store = EventStore::new(&config.storage.data_dir);
    let bounds = window_bounds(Window::Today, tz, now, store.earliest_day().unwrap());
    let (from_day, to_day) = bounds.utc_days();
    let events = store.read_range(from_day, to_day).unwrap();

    let summary = aggregate_events(&events, tz, bounds);

    // The 07:30 UTC turn is 23:30 the previous local day and stays out.
    assert_eq!(summary.totals.count, 2);
    assert_eq!(summary.totals.tokens.input, 5000);
}

#[tokio::test]
async fn all_time_window_spans_every_partition() {
    let dir = TempDir::new().unwrap();
    let config = sandboxed_config(&dir);

    write_claude_transcript(
        &config.claude.dir,
        "-home-user-app",
        "session-a",
        &[
            claude_turn("2026-01-05T12:00:00Z", "req-1", 100, 10),
            claude_turn("2026-02-10T12:00:00Z", "req-2", 200, 20),
        ],
    );
    run_refresh(&config).await.unwrap();

    let tz: chrono_tz::Tz = "UTC".parse().unwrap();
    let now = Utc.with_ymd_and_hms(2026, 2, 11, 0, 0, 0).unwrap();

    let store = EventStore::new(&config.storage.data_dir);
    let earliest = store.earliest_day().unwrap();
    assert_eq!(
        earliest,
        Some(chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap())
    );

    let bounds = window_bounds(Window::AllTime, tz, now, earliest);
    let (from_day, to_day) = bounds.utc_days();
    let events = store.read_range(from_day, to_day).unwrap();

    let summary = aggregate_events(&events, tz, bounds);
    assert_eq!(summary.totals.count, 2);
}
