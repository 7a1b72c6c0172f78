//! Remote-billed IDE collector with a multi-tier fallback chain.
//!
//! The source has no direct per-request billing visibility, so collection
//! escalates through an explicit ordered list of strategies:
//!
//! 1. dashboard/billing API - authenticated, paginated, reports cost in
//!    cents; session credentials come from config or are extracted from the
//!    host app's local storage
//! 2. team/admin API - alternate authenticated endpoint with conditional
//!    requests (ETag / 304)
//! 3. local application state - structured local storage read directly
//! 4. transcript heuristic - token counts reconstructed from conversation
//!    transcripts at four characters per token, rounded up
//!
//! A tier advances to the next only on a true empty-attempted result. A
//! still-valid cache entry or an upstream "unchanged" response is a
//! legitimate "nothing new" outcome and stops the chain: authoritative
//! reported cost is always preferred over local estimation when reachable.

use super::{model_of, timestamp_of, u64_of, Collector, CollectorContext};
use crate::models::{
    Billing, CostInfo, EventMeta, ProjectRef, Provider, Source, TokenUsage, UsageEvent,
};
use crate::sync::SyncState;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use glob::glob;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 50;

pub struct CursorCollector;

/// Result of one fallback tier.
enum TierOutcome {
    /// The tier was attempted and produced rows (possibly zero).
    Rows(Vec<UsageEvent>),
    /// A still-valid cache or an upstream "unchanged" response; nothing
    /// new, and no reason to fall through to weaker tiers.
    SkippedCache,
    /// Attempted, nothing there; escalate.
    Empty,
}

#[derive(Debug, Clone, Copy)]
enum Tier {
    Dashboard,
    Team,
    LocalState,
    Transcripts,
}

#[async_trait]
impl Collector for CursorCollector {
    fn source(&self) -> Source {
        Source::Cursor
    }

    async fn collect(&self, ctx: &CollectorContext) -> Result<Vec<UsageEvent>> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(ctx.config.network.timeout_secs))
            .build()
            .context("Failed to build http client")?;

        for tier in [
            Tier::Dashboard,
            Tier::Team,
            Tier::LocalState,
            Tier::Transcripts,
        ] {
            let outcome = match tier {
                Tier::Dashboard => dashboard_tier(&client, ctx).await,
                Tier::Team => team_tier(&client, ctx).await,
                Tier::LocalState => Ok(local_state_tier(ctx)),
                Tier::Transcripts => Ok(transcript_tier(ctx)),
            };

            let outcome = outcome.unwrap_or_else(|error| {
                warn!(?tier, %error, "Cursor tier failed, escalating");
                TierOutcome::Empty
            });

            match outcome {
                TierOutcome::Rows(events) if !events.is_empty() => {
                    debug!(?tier, count = events.len(), "Cursor tier produced events");
                    return Ok(events);
                }
                TierOutcome::Rows(_) | TierOutcome::Empty => continue,
                TierOutcome::SkippedCache => {
                    debug!(?tier, "Cursor tier cache still valid, nothing new");
                    return Ok(Vec::new());
                }
            }
        }

        Ok(Vec::new())
    }
}

fn with_sync<R>(ctx: &CollectorContext, f: impl FnOnce(&mut SyncState) -> R) -> Result<R> {
    let mut sync = ctx
        .sync
        .lock()
        .map_err(|_| anyhow::anyhow!("sync state lock poisoned"))?;
    Ok(f(&mut sync))
}

fn cache_ttl(ctx: &CollectorContext) -> Duration {
    Duration::minutes(ctx.config.network.cache_ttl_minutes)
}

/// Tier 1: paginated dashboard/billing API. Reported cost arrives in cents.
async fn dashboard_tier(client: &reqwest::Client, ctx: &CollectorContext) -> Result<TierOutcome> {
    let team = ctx.config.cursor.team_id.clone();
    let key = format!(
        "dashboard:{}",
        team.as_deref().unwrap_or("personal")
    );

    if with_sync(ctx, |sync| sync.is_fresh(&key, cache_ttl(ctx), ctx.now))? {
        return Ok(TierOutcome::SkippedCache);
    }

    let Some(token) = session_token(ctx) else {
        debug!("No cursor session credentials, escalating past dashboard tier");
        return Ok(TierOutcome::Empty);
    };

    let endpoint = ctx.config.cursor.dashboard_url.clone();
    let mut events = Vec::new();

    for page in 1..=MAX_PAGES {
        let body = match &team {
            Some(team_id) => json!({"teamId": team_id, "page": page, "pageSize": PAGE_SIZE}),
            None => json!({"page": page, "pageSize": PAGE_SIZE}),
        };

        let response = client
            .post(&endpoint)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .context("Dashboard request failed")?
            .error_for_status()
            .context("Dashboard request rejected")?;

        let payload: Value = response
            .json()
            .await
            .context("Dashboard response was not JSON")?;
        let rows = api_rows(&payload);
        let row_count = rows.len();

        for row in rows {
            if let Some(event) = normalize_api_row(row, &endpoint, team.as_deref(), ctx) {
                events.push(event);
            }
        }

        if row_count < PAGE_SIZE {
            break;
        }
    }

    with_sync(ctx, |sync| sync.mark_checked(&key, ctx.now, None))?;
    Ok(TierOutcome::Rows(events))
}

/// Tier 2: team/admin API with conditional requests. A 304 is
/// skipped-with-cache, not zero-rows-fall-through.
async fn team_tier(client: &reqwest::Client, ctx: &CollectorContext) -> Result<TierOutcome> {
    let endpoint = ctx.config.cursor.team_url.clone();
    let key = format!("team:{}", endpoint);

    if with_sync(ctx, |sync| sync.is_fresh(&key, cache_ttl(ctx), ctx.now))? {
        return Ok(TierOutcome::SkippedCache);
    }

    let Some(token) = session_token(ctx) else {
        debug!("No cursor session credentials, escalating past team tier");
        return Ok(TierOutcome::Empty);
    };

    let mut request = client.get(&endpoint).bearer_auth(&token);
    let validator = with_sync(ctx, |sync| sync.validator(&key))?;
    if let Some(validator) = &validator {
        request = request.header(reqwest::header::IF_NONE_MATCH, validator.as_str());
    }

    let response = request.send().await.context("Team usage request failed")?;

    if response.status() == StatusCode::NOT_MODIFIED {
        with_sync(ctx, |sync| sync.mark_checked(&key, ctx.now, validator))?;
        return Ok(TierOutcome::SkippedCache);
    }

    let response = response
        .error_for_status()
        .context("Team usage request rejected")?;
    let etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let payload: Value = response
        .json()
        .await
        .context("Team usage response was not JSON")?;

    let mut events = Vec::new();
    for row in api_rows(&payload) {
        if let Some(event) = normalize_api_row(row, &endpoint, ctx.config.cursor.team_id.as_deref(), ctx)
        {
            events.push(event);
        }
    }

    with_sync(ctx, |sync| sync.mark_checked(&key, ctx.now, etag))?;
    Ok(TierOutcome::Rows(events))
}

/// Tier 3: the host application's own structured local storage.
fn local_state_tier(ctx: &CollectorContext) -> TierOutcome {
    let Some(app_dir) = app_dir(ctx) else {
        return TierOutcome::Empty;
    };

    // Candidate documents, newest layout first.
    let candidates = [
        app_dir.join("User/globalStorage/usage-events.json"),
        app_dir.join("User/globalStorage/cursor-usage/events.json"),
    ];

    for path in candidates {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(payload) = serde_json::from_str::<Value>(&content) else {
            continue;
        };

        let mut events = Vec::new();
        for row in api_rows(&payload) {
            if let Some(event) = normalize_local_row(row, &path, ctx) {
                events.push(event);
            }
        }
        if !events.is_empty() {
            return TierOutcome::Rows(events);
        }
    }

    TierOutcome::Empty
}

/// Tier 4: no authoritative source exists; reconstruct approximate token
/// counts from stored conversation transcripts by character-count proxy.
fn transcript_tier(ctx: &CollectorContext) -> TierOutcome {
    let Some(app_dir) = app_dir(ctx) else {
        return TierOutcome::Empty;
    };

    let pattern = app_dir.join("User/workspaceStorage/*/chats/*.json");
    let mut events = Vec::new();

    if let Ok(paths) = glob(&pattern.to_string_lossy()) {
        for path in paths.flatten() {
            if let Some(event) = estimate_from_transcript(&path, ctx) {
                events.push(event);
            }
        }
    }

    if events.is_empty() {
        TierOutcome::Empty
    } else {
        TierOutcome::Rows(events)
    }
}

fn app_dir(ctx: &CollectorContext) -> Option<PathBuf> {
    ctx.config
        .cursor
        .app_dir
        .clone()
        .or_else(|| dirs::config_dir().map(|dir| dir.join("Cursor")))
}

/// Session credential: explicit config first, then extraction from the
/// host app's local storage document.
fn session_token(ctx: &CollectorContext) -> Option<String> {
    if let Some(token) = &ctx.config.cursor.session_token {
        return Some(token.clone());
    }
    let storage = app_dir(ctx)?.join("User/globalStorage/storage.json");
    let content = std::fs::read_to_string(storage).ok()?;
    let value: Value = serde_json::from_str(&content).ok()?;

    const TOKEN_KEYS: [&str; 3] = [
        "cursorAuth/accessToken",
        "cursorAuth/refreshToken",
        "workos.sessionToken",
    ];
    TOKEN_KEYS
        .iter()
        .filter_map(|key| value.get(key).and_then(Value::as_str))
        .map(str::to_string)
        .next()
}

/// Rows live under different keys depending on endpoint generation.
fn api_rows(payload: &Value) -> Vec<&Value> {
    const ROW_KEYS: [&str; 4] = ["items", "usageEvents", "events", "rows"];

    if let Some(rows) = payload.as_array() {
        return rows.iter().collect();
    }
    for key in ROW_KEYS {
        if let Some(rows) = payload.get(key).and_then(Value::as_array) {
            return rows.iter().collect();
        }
    }
    Vec::new()
}

fn normalize_api_row(
    row: &Value,
    endpoint: &str,
    team: Option<&str>,
    ctx: &CollectorContext,
) -> Option<UsageEvent> {
    let tokens = row_tokens(row);
    let reported_usd = row_cost_usd(row);
    // A row with neither token counts nor a reported figure carries no
    // cost signal.
    if tokens.is_zero() && reported_usd.is_none() {
        return None;
    }

    let model = model_of(row);
    let billing = row_billing(row);
    let row_id = row
        .get("id")
        .map(|id| match id {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        })
        .filter(|id| !id.is_empty());

    Some(
        UsageEvent {
            id: String::new(),
            timestamp: timestamp_of(row, ctx.now),
            source: Source::Cursor,
            provider: provider_for_model(model.as_deref()),
            model,
            tokens,
            cost: CostInfo::unpriced(reported_usd),
            project: ProjectRef::default(),
            meta: EventMeta::CursorApi {
                endpoint: endpoint.to_string(),
                team: team.map(str::to_string),
                row_id,
                billing,
            },
        }
        .with_id(),
    )
}

fn normalize_local_row(row: &Value, path: &Path, ctx: &CollectorContext) -> Option<UsageEvent> {
    let tokens = row_tokens(row);
    let reported_usd = row_cost_usd(row);
    if tokens.is_zero() && reported_usd.is_none() {
        return None;
    }

    let model = model_of(row);
    Some(
        UsageEvent {
            id: String::new(),
            timestamp: timestamp_of(row, ctx.now),
            source: Source::Cursor,
            provider: provider_for_model(model.as_deref()),
            model,
            tokens,
            cost: CostInfo::unpriced(reported_usd),
            project: ProjectRef::default(),
            meta: EventMeta::CursorLocal {
                file: path.to_string_lossy().to_string(),
                billing: row_billing(row),
            },
        }
        .with_id(),
    )
}

fn row_tokens(row: &Value) -> TokenUsage {
    let detail = row.get("tokenUsage").unwrap_or(row);
    TokenUsage {
        input: u64_of(detail.get("inputTokens").or_else(|| detail.get("input_tokens"))),
        output: u64_of(
            detail
                .get("outputTokens")
                .or_else(|| detail.get("output_tokens")),
        ),
        cache_write: u64_of(
            detail
                .get("cacheWriteTokens")
                .or_else(|| detail.get("cache_write_tokens")),
        ),
        cache_read: u64_of(
            detail
                .get("cacheReadTokens")
                .or_else(|| detail.get("cache_read_tokens")),
        ),
    }
}

/// Upstream reports cost in minor currency units.
fn row_cost_usd(row: &Value) -> Option<f64> {
    const CENT_KEYS: [&str; 3] = ["costCents", "priceCents", "requestCostCents"];
    CENT_KEYS
        .iter()
        .filter_map(|key| row.get(key).and_then(Value::as_f64))
        .map(|cents| cents / 100.0)
        .next()
}

fn row_billing(row: &Value) -> Option<Billing> {
    let kind = row.get("kind").and_then(Value::as_str)?;
    if kind.contains("included") || kind.contains("subscription") {
        Some(Billing::Subscription)
    } else {
        Some(Billing::Usage)
    }
}

/// Which entity bills for the model named by this row.
fn provider_for_model(model: Option<&str>) -> Provider {
    let Some(model) = model else {
        return Provider::Cursor;
    };
    let model = model.to_ascii_lowercase();
    if model.contains("claude") {
        Provider::Anthropic
    } else if model.starts_with("gpt") || model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4") {
        Provider::Openai
    } else {
        Provider::Cursor
    }
}

const CHARS_PER_TOKEN: u64 = 4;

fn approx_tokens(chars: u64) -> u64 {
    chars.div_ceil(CHARS_PER_TOKEN)
}

fn estimate_from_transcript(path: &Path, ctx: &CollectorContext) -> Option<UsageEvent> {
    let content = std::fs::read_to_string(path).ok()?;
    let value: Value = serde_json::from_str(&content).ok()?;
    let messages = value.get("messages").and_then(Value::as_array)?;

    let mut input_chars: u64 = 0;
    let mut output_chars: u64 = 0;
    for message in messages {
        let text = message
            .get("text")
            .or_else(|| message.get("content"))
            .and_then(Value::as_str)
            .unwrap_or("");
        match message.get("role").and_then(Value::as_str) {
            Some("assistant") => output_chars += text.chars().count() as u64,
            _ => input_chars += text.chars().count() as u64,
        }
    }

    let tokens = TokenUsage {
        input: approx_tokens(input_chars),
        output: approx_tokens(output_chars),
        cache_write: 0,
        cache_read: 0,
    };
    if tokens.is_zero() {
        return None;
    }

    let model = model_of(&value);
    Some(
        UsageEvent {
            id: String::new(),
            timestamp: timestamp_of(&value, ctx.now),
            source: Source::Cursor,
            provider: provider_for_model(model.as_deref()),
            model,
            tokens,
            cost: CostInfo::unpriced(None),
            project: ProjectRef::default(),
            meta: EventMeta::CursorLocal {
                file: path.to_string_lossy().to_string(),
                billing: None,
            },
        }
        .with_id(),
    )
}
