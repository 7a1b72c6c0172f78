//! Collector Strategy Chain
//!
//! One collector per upstream source. Each discovers raw records (local log
//! files or API responses) and emits zero or more normalized events.
//! Collectors are side-effect-isolated: a failure or malformed record in one
//! never blocks the others, so they run as independent concurrent tasks and
//! are joined before costing.
//!
//! Shared here: the collector contract, the per-run context, and the
//! tolerant field extraction helpers every normalizer uses - an explicit
//! ordered list of candidate accessors tried in sequence, first defined
//! result wins.

pub mod claude;
pub mod codex;
pub mod cursor;

use crate::config::Config;
use crate::models::{Source, UsageEvent};
use crate::sync::SyncState;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Shared, read-only run context. The sync state is the one shared mutable
/// resource; collectors key their entries distinctly so there is no
/// cross-collector collision.
pub struct CollectorContext {
    pub config: Config,
    pub sync: Arc<Mutex<SyncState>>,
    pub now: DateTime<Utc>,
}

/// The collector-to-core contract. A missing or empty source directory
/// yields an empty list, never an error.
#[async_trait]
pub trait Collector: Send + Sync {
    fn source(&self) -> Source;

    async fn collect(&self, ctx: &CollectorContext) -> Result<Vec<UsageEvent>>;
}

pub fn default_collectors(config: &Config) -> Vec<Arc<dyn Collector>> {
    let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
    if config.claude.enabled {
        collectors.push(Arc::new(claude::ClaudeCollector));
    }
    if config.codex.enabled {
        collectors.push(Arc::new(codex::CodexCollector));
    }
    if config.cursor.enabled {
        collectors.push(Arc::new(cursor::CursorCollector));
    }
    collectors
}

/// Run all collectors concurrently and join them. Each task's failure is
/// contained and surfaced per source.
pub async fn run_collectors(
    collectors: Vec<Arc<dyn Collector>>,
    ctx: Arc<CollectorContext>,
) -> Vec<(Source, Result<Vec<UsageEvent>>)> {
    let mut sources = Vec::with_capacity(collectors.len());
    let mut handles = Vec::with_capacity(collectors.len());
    for collector in collectors {
        let ctx = ctx.clone();
        sources.push(collector.source());
        handles.push(tokio::spawn(async move { collector.collect(&ctx).await }));
    }

    let joined = join_all(handles).await;
    sources
        .into_iter()
        .zip(joined)
        .map(|(source, joined)| {
            let result = match joined {
                Ok(result) => result,
                Err(join_error) => {
                    warn!(source = %source, error = %join_error, "Collector task panicked");
                    Err(anyhow::anyhow!("collector task failed: {}", join_error))
                }
            };
            (source, result)
        })
        .collect()
}

/// Parse one instant string, tolerating both RFC 3339 and bare naive
/// datetimes (assumed UTC).
pub(crate) fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}

/// Timestamp extraction across candidate fields, in priority order. Falls
/// back to `now` rather than failing the record.
pub(crate) fn timestamp_of(value: &Value, now: DateTime<Utc>) -> DateTime<Utc> {
    const CANDIDATES: [&str; 4] = ["timestamp", "ts", "created_at", "createdAt"];
    CANDIDATES
        .iter()
        .filter_map(|key| value.get(key).and_then(Value::as_str))
        .find_map(parse_instant)
        .unwrap_or(now)
}

/// Model extraction across candidate locations, in priority order.
pub(crate) fn model_of(value: &Value) -> Option<String> {
    let accessors: [fn(&Value) -> Option<&Value>; 3] = [
        |v| v.get("message").and_then(|m| m.get("model")),
        |v| v.get("model"),
        |v| v.get("modelIntent"),
    ];
    accessors
        .iter()
        .filter_map(|accessor| accessor(value).and_then(Value::as_str))
        .map(str::to_string)
        .next()
}

/// Non-negative integer extraction tolerant of numbers and numeric strings.
pub(crate) fn u64_of(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(number)) => number.as_u64().unwrap_or(0),
        Some(Value::String(raw)) => raw.parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_instant_accepts_zulu_offset_and_naive() {
        assert!(parse_instant("2026-01-15T12:00:00Z").is_some());
        assert!(parse_instant("2026-01-15T12:00:00+02:00").is_some());
        assert!(parse_instant("2026-01-15T12:00:00.123").is_some());
        assert!(parse_instant("yesterday-ish").is_none());
    }

    #[test]
    fn timestamp_of_tries_candidates_then_now() {
        let now = Utc::now();
        let value = json!({"created_at": "2026-01-15T12:00:00Z"});
        assert_eq!(
            timestamp_of(&value, now).to_rfc3339(),
            "2026-01-15T12:00:00+00:00"
        );

        let value = json!({"timestamp": "garbage", "ts": "2026-01-16T00:00:00Z"});
        assert_eq!(
            timestamp_of(&value, now).to_rfc3339(),
            "2026-01-16T00:00:00+00:00"
        );

        let value = json!({"no_time": true});
        assert_eq!(timestamp_of(&value, now), now);
    }

    #[test]
    fn model_of_prefers_message_model() {
        let value = json!({"message": {"model": "claude-sonnet-4"}, "model": "other"});
        assert_eq!(model_of(&value).as_deref(), Some("claude-sonnet-4"));

        let value = json!({"model": "gpt-5"});
        assert_eq!(model_of(&value).as_deref(), Some("gpt-5"));

        assert_eq!(model_of(&json!({})), None);
    }

    #[test]
    fn u64_of_tolerates_strings() {
        assert_eq!(u64_of(Some(&json!(12))), 12);
        assert_eq!(u64_of(Some(&json!("34"))), 34);
        assert_eq!(u64_of(Some(&json!(-5))), 0);
        assert_eq!(u64_of(None), 0);
    }
}
