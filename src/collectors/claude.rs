//! Terminal-agent transcript collector.
//!
//! Scans `<claude_dir>/projects/*/*.jsonl` conversation logs. Each assistant
//! turn carries a usage block with per-turn token deltas, an optional
//! pre-computed cost, and message/request ids used as the session
//! discriminator. Non-assistant turns, summaries, and tool-call records are
//! filtered out before token extraction; turns with all four token fields at
//! zero carry no cost signal and are dropped.

use super::{model_of, timestamp_of, u64_of, Collector, CollectorContext};
use crate::models::{
    CostInfo, EventMeta, ProjectRef, Provider, Source, TokenUsage, UsageEvent,
};
use anyhow::Result;
use async_trait::async_trait;
use glob::glob;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

pub struct ClaudeCollector;

#[async_trait]
impl Collector for ClaudeCollector {
    fn source(&self) -> Source {
        Source::ClaudeCode
    }

    async fn collect(&self, ctx: &CollectorContext) -> Result<Vec<UsageEvent>> {
        let root = ctx.config.claude.dir.clone();
        let projects_dir = root.join("projects");
        if !projects_dir.exists() {
            debug!(dir = %projects_dir.display(), "No claude projects directory, skipping");
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        for file in find_transcript_files(&projects_dir) {
            events.extend(scan_transcript(&file, ctx));
        }

        debug!(count = events.len(), "Collected claude events");
        Ok(events)
    }
}

fn find_transcript_files(projects_dir: &Path) -> Vec<PathBuf> {
    let pattern = projects_dir.join("*").join("*.jsonl");
    let mut files = Vec::new();
    if let Ok(paths) = glob(&pattern.to_string_lossy()) {
        files.extend(paths.flatten());
    }
    files.sort();
    files
}

fn scan_transcript(path: &Path, ctx: &CollectorContext) -> Vec<UsageEvent> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return Vec::new(),
    };
    let reader = BufReader::new(file);

    let project = project_of(path);
    let session_id = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("unknown")
        .to_string();

    let mut events = Vec::new();
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => continue,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => {
                trace!(path = %path.display(), "Skipping unparsable transcript line");
                continue;
            }
        };

        if let Some(event) = normalize_turn(&value, path, &session_id, &project, ctx) {
            events.push(event);
        }
    }
    events
}

fn normalize_turn(
    value: &Value,
    path: &Path,
    session_id: &str,
    project: &ProjectRef,
    ctx: &CollectorContext,
) -> Option<UsageEvent> {
    // Only actual model invocations carry cost signal; user turns,
    // summaries, and tool results do not.
    if value.get("type").and_then(Value::as_str) != Some("assistant") {
        return None;
    }

    let usage = value
        .get("message")
        .and_then(|message| message.get("usage"))
        .or_else(|| value.get("usage"))?;

    let tokens = TokenUsage {
        input: u64_of(usage.get("input_tokens")),
        output: u64_of(usage.get("output_tokens")),
        cache_write: u64_of(usage.get("cache_creation_input_tokens")),
        cache_read: u64_of(usage.get("cache_read_input_tokens")),
    };
    if tokens.is_zero() {
        return None;
    }

    let reported_usd = value.get("costUSD").and_then(Value::as_f64);
    let request_id = value
        .get("requestId")
        .and_then(Value::as_str)
        .or_else(|| {
            value
                .get("message")
                .and_then(|message| message.get("id"))
                .and_then(Value::as_str)
        })
        .map(str::to_string);

    Some(
        UsageEvent {
            id: String::new(),
            timestamp: timestamp_of(value, ctx.now),
            source: Source::ClaudeCode,
            provider: Provider::Anthropic,
            model: model_of(value),
            tokens,
            cost: CostInfo::unpriced(reported_usd),
            project: project.clone(),
            meta: EventMeta::ClaudeLog {
                file: path.to_string_lossy().to_string(),
                session_id: session_id.to_string(),
                request_id,
                billing: Some(ctx.config.claude.billing),
            },
        }
        .with_id(),
    )
}

/// Project directories encode the workspace path with dashes for
/// separators: `-home-user-projects-demo` names the `demo` project rooted
/// at `/home/user/projects/demo`.
fn project_of(transcript: &Path) -> ProjectRef {
    let dir_name = transcript
        .parent()
        .and_then(|dir| dir.file_name())
        .and_then(|name| name.to_str())
        .unwrap_or("");

    if dir_name.is_empty() {
        return ProjectRef::default();
    }

    let root = if dir_name.starts_with('-') {
        Some(dir_name.replace('-', "/"))
    } else {
        None
    };
    let name = dir_name
        .rsplit('-')
        .find(|part| !part.is_empty())
        .map(str::to_string);

    ProjectRef {
        id: Some(dir_name.to_string()),
        name,
        root,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::Billing;
    use crate::sync::SyncState;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn ctx() -> CollectorContext {
        CollectorContext {
            config: Config::default(),
            sync: Arc::new(Mutex::new(SyncState::default())),
            now: Utc::now(),
        }
    }

    fn turn(value: Value) -> Option<UsageEvent> {
        normalize_turn(
            &value,
            Path::new("/tmp/projects/-home-user-demo/conv.jsonl"),
            "conv",
            &ProjectRef::default(),
            &ctx(),
        )
    }

    #[test]
    fn assistant_turn_with_usage_normalizes() {
        let event = turn(json!({
            "type": "assistant",
            "timestamp": "2026-01-15T12:00:00Z",
            "requestId": "req-1",
            "costUSD": 0.02,
            "message": {
                "id": "msg-1",
                "model": "claude-sonnet-4-20250514",
                "usage": {
                    "input_tokens": 120,
                    "output_tokens": 80,
                    "cache_creation_input_tokens": 10,
                    "cache_read_input_tokens": 400
                }
            }
        }))
        .unwrap();

        assert_eq!(event.source, Source::ClaudeCode);
        assert_eq!(event.provider, Provider::Anthropic);
        assert_eq!(event.model.as_deref(), Some("claude-sonnet-4-20250514"));
        assert_eq!(event.tokens.input, 120);
        assert_eq!(event.tokens.cache_read, 400);
        assert_eq!(event.cost.reported_usd, Some(0.02));
        assert_eq!(event.meta.billing(), Some(Billing::Usage));
        assert!(!event.id.is_empty());
    }

    #[test]
    fn non_assistant_turns_are_filtered() {
        assert!(turn(json!({"type": "user", "message": {"usage": {"input_tokens": 5}}})).is_none());
        assert!(turn(json!({"type": "summary", "summary": "..."})).is_none());
        assert!(turn(json!({"type": "tool_result", "usage": {"input_tokens": 5}})).is_none());
    }

    #[test]
    fn zero_token_turns_are_dropped() {
        assert!(turn(json!({
            "type": "assistant",
            "message": {"model": "claude-sonnet-4", "usage": {
                "input_tokens": 0, "output_tokens": 0,
                "cache_creation_input_tokens": 0, "cache_read_input_tokens": 0
            }}
        }))
        .is_none());
    }

    #[test]
    fn missing_timestamp_falls_back_to_now() {
        let now = ctx().now;
        let event = turn(json!({
            "type": "assistant",
            "message": {"model": "claude-sonnet-4", "usage": {"output_tokens": 3}}
        }))
        .unwrap();
        assert!((event.timestamp - now).num_seconds().abs() <= 1);
    }

    #[test]
    fn project_decodes_dashed_workspace_dirs() {
        let project = project_of(Path::new("/x/projects/-home-user-projects-demo/c.jsonl"));
        assert_eq!(project.name.as_deref(), Some("demo"));
        assert_eq!(project.root.as_deref(), Some("/home/user/projects/demo"));
        assert_eq!(project.id.as_deref(), Some("-home-user-projects-demo"));
    }

    #[tokio::test]
    async fn missing_source_directory_yields_no_events() {
        let mut ctx = ctx();
        ctx.config.claude.dir = std::path::PathBuf::from("/does/not/exist");
        let events = ClaudeCollector.collect(&ctx).await.unwrap();
        assert!(events.is_empty());
    }
}
