//! Fallback-chain behavior observed through the whole pipeline.

mod common;

use agent_spend::models::Source;
use agent_spend::refresh::run_refresh;
use agent_spend::store::EventStore;
use agent_spend::sync::SyncState;
use chrono::Utc;
use common::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn without_credentials_local_state_is_used() {
    let dir = TempDir::new().unwrap();
    let config = sandboxed_config(&dir);

    write_cursor_local_events(
        config.cursor.app_dir.as_ref().unwrap(),
        r#"[{"timestamp":"2026-02-10T11:00:00Z","model":"gpt-5",
            "tokenUsage":{"inputTokens":400,"outputTokens":80}}]"#,
    );

    let report = run_refresh(&config).await.unwrap();
    assert_eq!(report.failed_sources(), 0);

    let store = EventStore::new(&config.storage.data_dir);
    let events = store.read_all().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, Source::Cursor);
}

#[tokio::test]
async fn fresh_cache_suppresses_weaker_tiers() {
    let dir = TempDir::new().unwrap();
    let config = sandboxed_config(&dir);

    write_cursor_local_events(
        config.cursor.app_dir.as_ref().unwrap(),
        r#"[{"timestamp":"2026-02-10T11:00:00Z","model":"gpt-5",
            "tokenUsage":{"inputTokens":400,"outputTokens":80}}]"#,
    );

    // Seed persisted sync state as if the dashboard endpoint was checked
    // moments ago: the chain must stop at the cache, not read local state.
    let sync_path = config.storage.data_dir.join("sync.json");
    let mut sync = SyncState::default();
    sync.mark_checked("dashboard:personal", Utc::now(), None);
    sync.save(&sync_path).unwrap();

    let report = run_refresh(&config).await.unwrap();
    assert_eq!(report.failed_sources(), 0);
    assert_eq!(report.appended, 0);
}

#[tokio::test]
async fn transcripts_back_stop_the_chain() {
    let dir = TempDir::new().unwrap();
    let config = sandboxed_config(&dir);

    let chats = config
        .cursor
        .app_dir
        .as_ref()
        .unwrap()
        .join("User/workspaceStorage/ws1/chats");
    std::fs::create_dir_all(&chats).unwrap();
    std::fs::write(
        chats.join("chat.json"),
        r#"{"createdAt":"2026-02-10T11:00:00Z","messages":[
            {"role":"user","text":"hello there"},
            {"role":"assistant","text":"General Kenobi"}]}"#,
    )
    .unwrap();

    let report = run_refresh(&config).await.unwrap();
    assert_eq!(report.failed_sources(), 0);
    assert_eq!(report.appended, 1);

    let store = EventStore::new(&config.storage.data_dir);
    let events = store.read_all().unwrap();
    // "hello there" is 11 chars, "General Kenobi" is 14: ceil(/4) = 3 and 4.
    assert_eq!(events[0].tokens.input, 3);
    assert_eq!(events[0].tokens.output, 4);
}

#[tokio::test]
async fn upstream_not_modified_stops_the_chain() {
    let dir = TempDir::new().unwrap();
    let mut config = sandboxed_config(&dir);
    let server = MockServer::start().await;

    config.cursor.session_token = Some("tok-1".to_string());
    config.cursor.dashboard_url = format!("{}/dashboard", server.uri());
    config.cursor.team_url = format!("{}/team", server.uri());
    // A zero TTL keeps every run on the conditional-request path instead
    // of the local cache-freshness skip.
    config.network.cache_ttl_minutes = 0;

    // The dashboard has nothing, so each run falls through to the team
    // endpoint.
    Mock::given(method("POST"))
        .and(path("/dashboard"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(2)
        .mount(&server)
        .await;

    // A conditional request carrying the stored validator gets 304.
    Mock::given(method("GET"))
        .and(path("/team"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/team"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"v1\"")
                .set_body_json(json!({"events": [{
                    "id": "row-1",
                    "timestamp": "2026-02-10T08:00:00Z",
                    "model": "claude-sonnet-4",
                    "costCents": 125.0,
                    "tokenUsage": {"inputTokens": 900, "outputTokens": 400}
                }]})),
        )
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    // Rows tier 3 would pick up if the chain wrongly fell through.
    write_cursor_local_events(
        config.cursor.app_dir.as_ref().unwrap(),
        r#"[{"timestamp":"2026-02-10T11:00:00Z","model":"gpt-5",
            "tokenUsage":{"inputTokens":400,"outputTokens":80}}]"#,
    );

    let first = run_refresh(&config).await.unwrap();
    assert_eq!(first.failed_sources(), 0);
    assert_eq!(first.appended, 1);

    let key = format!("team:{}", config.cursor.team_url);
    let sync_path = config.storage.data_dir.join("sync.json");
    let sync = SyncState::load(&sync_path);
    assert_eq!(sync.endpoints[&key].validator.as_deref(), Some("\"v1\""));
    let checked_after_first = sync.endpoints[&key].last_checked;

    // Second run: upstream answers "unchanged". Nothing new, and the
    // weaker tiers must not be consulted despite available local rows.
    let second = run_refresh(&config).await.unwrap();
    assert_eq!(second.failed_sources(), 0);
    assert_eq!(second.appended, 0);

    let sync = SyncState::load(&sync_path);
    assert_eq!(sync.endpoints[&key].validator.as_deref(), Some("\"v1\""));
    assert!(sync.endpoints[&key].last_checked >= checked_after_first);

    let store = EventStore::new(&config.storage.data_dir);
    assert_eq!(store.read_all().unwrap().len(), 1);
}

#[tokio::test]
async fn disabled_source_is_not_collected() {
    let dir = TempDir::new().unwrap();
    let mut config = sandboxed_config(&dir);
    config.cursor.enabled = false;

    write_cursor_local_events(
        config.cursor.app_dir.as_ref().unwrap(),
        r#"[{"timestamp":"2026-02-10T11:00:00Z","model":"gpt-5",
            "tokenUsage":{"inputTokens":400,"outputTokens":80}}]"#,
    );

    let report = run_refresh(&config).await.unwrap();
    assert_eq!(report.sources.len(), 2);
    assert!(report.sources.iter().all(|s| s.source != Source::Cursor));
}

#[tokio::test]
async fn successful_runs_are_recorded_in_sync_state() {
    let dir = TempDir::new().unwrap();
    let config = sandboxed_config(&dir);

    run_refresh(&config).await.unwrap();

    let sync = SyncState::load(&config.storage.data_dir.join("sync.json"));
    assert!(sync.collectors.contains_key("claude_code"));
    assert!(sync.collectors.contains_key("codex"));
    assert!(sync.collectors.contains_key("cursor"));
}
