//! Terminal-agent collector for sources that report running totals.
//!
//! Scans `<codex_dir>/sessions/**/*.jsonl`. Token counts arrive as
//! cumulative totals per session, so each observation is converted to a
//! delta against the last-seen total: `max(new - last, 0)` per field, with
//! all-zero deltas discarded. A session's unflushed remainder after its
//! final observation is never recorded; that approximation is accepted.

use super::{timestamp_of, u64_of, Collector, CollectorContext};
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

pub struct CodexCollector;

#[async_trait]
impl Collector for CodexCollector {
    fn source(&self) -> Source {
        Source::Codex
    }

    async fn collect(&self, ctx: &CollectorContext) -> Result<Vec<UsageEvent>> {
        let sessions_dir = ctx.config.codex.dir.join("sessions");
        if !sessions_dir.exists() {
            debug!(dir = %sessions_dir.display(), "No codex sessions directory, skipping");
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        for file in find_session_files(&sessions_dir) {
            events.extend(scan_session(&file, &sessions_dir, ctx));
        }

        debug!(count = events.len(), "Collected codex events");
        Ok(events)
    }
}

fn find_session_files(sessions_dir: &Path) -> Vec<PathBuf> {
    let pattern = sessions_dir.join("**").join("*.jsonl");
    let mut files = Vec::new();
    if let Ok(paths) = glob(&pattern.to_string_lossy()) {
        files.extend(paths.flatten());
    }
    files.sort();
    files
}

fn scan_session(path: &Path, sessions_dir: &Path, ctx: &CollectorContext) -> Vec<UsageEvent> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return Vec::new(),
    };
    let reader = BufReader::new(file);

    let session_id = session_id_of(path, sessions_dir);
    let mut events = Vec::new();
    let mut last_totals: Option<TokenUsage> = None;
    let mut current_model: Option<String> = None;

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
                trace!(path = %path.display(), "Skipping unparsable session line");
                continue;
            }
        };

        let entry_type = value.get("type").and_then(Value::as_str).unwrap_or("");

        // The active model arrives out-of-band in turn context records.
        if entry_type == "turn_context" {
            if let Some(model) = value
                .get("payload")
                .and_then(|payload| payload.get("model"))
                .and_then(Value::as_str)
            {
                current_model = Some(model.to_string());
            }
            continue;
        }

        if entry_type != "event_msg" {
            continue;
        }
        let Some(payload) = value.get("payload") else {
            continue;
        };
        if payload.get("type").and_then(Value::as_str) != Some("token_count") {
            continue;
        }

        let timestamp = timestamp_of(&value, ctx.now);

        let info = payload.get("info");
        let Some(totals) = read_totals(info.and_then(|info| info.get("total_token_usage"))) else {
            continue;
        };

        let delta = delta_from_totals(totals, last_totals);
        last_totals = Some(totals);
        if delta.is_zero() {
            continue;
        }

        if let Some(model) = info
            .and_then(|info| info.get("model"))
            .and_then(Value::as_str)
        {
            current_model = Some(model.to_string());
        }

        events.push(
            UsageEvent {
                id: String::new(),
                timestamp,
                source: Source::Codex,
                provider: Provider::Openai,
                model: current_model.clone(),
                tokens: delta,
                cost: CostInfo::unpriced(None),
                project: ProjectRef::default(),
                meta: EventMeta::CodexSession {
                    file: path.to_string_lossy().to_string(),
                    session_id: session_id.clone(),
                },
            }
            .with_id(),
        );
    }

    events
}

fn read_totals(value: Option<&Value>) -> Option<TokenUsage> {
    let record = value?.as_object()?;
    let input = u64_of(record.get("input_tokens"));
    let cached = u64_of(
        record
            .get("cached_input_tokens")
            .or_else(|| record.get("cache_read_input_tokens")),
    );
    Some(TokenUsage {
        // Cached reads are billed separately, so they come out of input.
        input: input.saturating_sub(cached),
        output: u64_of(record.get("output_tokens")),
        cache_write: 0,
        cache_read: cached.min(input),
    })
}

/// Running totals to per-observation delta. Totals can regress when the
/// producing app rewrites a session file; negative deltas clamp to zero.
fn delta_from_totals(current: TokenUsage, last: Option<TokenUsage>) -> TokenUsage {
    let last = last.unwrap_or_default();
    TokenUsage {
        input: current.input.saturating_sub(last.input),
        output: current.output.saturating_sub(last.output),
        cache_write: current.cache_write.saturating_sub(last.cache_write),
        cache_read: current.cache_read.saturating_sub(last.cache_read),
    }
}

fn session_id_of(path: &Path, sessions_dir: &Path) -> String {
    let relative = path.strip_prefix(sessions_dir).unwrap_or(path);
    let mut session_id = relative.to_string_lossy().replace('\\', "/");
    if let Some(stripped) = session_id.strip_suffix(".jsonl") {
        session_id = stripped.to_string();
    }
    session_id
}
