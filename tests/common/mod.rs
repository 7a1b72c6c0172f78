use agent_spend::config::Config;
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Config rooted entirely inside `dir`, with no credentials, so no test
/// ever touches the network or the real home directory.
pub fn sandboxed_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().join("data");
    config.claude.dir = dir.path().join("claude");
    config.codex.dir = dir.path().join("codex");
    config.cursor.app_dir = Some(dir.path().join("cursor"));
    config
}

#[allow(dead_code)]
pub fn write_claude_transcript(claude_dir: &Path, project: &str, session: &str, lines: &[String]) {
    let dir = claude_dir.join("projects").join(project);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{session}.jsonl")), lines.join("\n") + "\n").unwrap();
}

#[allow(dead_code)]
pub fn claude_turn(timestamp: &str, request_id: &str, input: u64, output: u64) -> String {
    json!({
        "type": "assistant",
        "timestamp": timestamp,
        "requestId": request_id,
        "message": {
            "model": "claude-sonnet-4",
            "usage": {"input_tokens": input, "output_tokens": output}
        }
    })
    .to_string()
}

#[allow(dead_code)]
pub fn write_codex_session(codex_dir: &Path, session: &str, lines: &[String]) {
    let dir = codex_dir.join("sessions/2026/02/10");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{session}.jsonl")), lines.join("\n") + "\n").unwrap();
}

#[allow(dead_code)]
pub fn codex_token_count(timestamp: &str, input: u64, cached: u64, output: u64) -> String {
    json!({
        "timestamp": timestamp,
        "type": "event_msg",
        "payload": {
            "type": "token_count",
            "info": {
                "model": "gpt-5",
                "total_token_usage": {
                    "input_tokens": input,
                    "cached_input_tokens": cached,
                    "output_tokens": output
                }
            }
        }
    })
    .to_string()
}

#[allow(dead_code)]
pub fn write_cursor_local_events(app_dir: &Path, rows: &str) {
    let storage = app_dir.join("User/globalStorage");
    fs::create_dir_all(&storage).unwrap();
    fs::write(
        storage.join("usage-events.json"),
        format!(r#"{{"events":{rows}}}"#),
    )
    .unwrap();
}
