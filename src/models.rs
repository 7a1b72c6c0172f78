//! Core Data Models
//!
//! This module defines the primary data structures used throughout the spend
//! tracking pipeline. Heterogeneous per-tool log records are normalized into
//! a single canonical event shape, costed, persisted, and aggregated.
//!
//! ## Data Flow
//!
//! 1. **Collection**: per-source collectors emit [`UsageEvent`] values
//! 2. **Attribution**: the costing engine fills in [`CostInfo`]
//! 3. **Storage**: the event store persists events by calendar day
//! 4. **Aggregation**: events fold into [`Totals`] and [`Summary`] views
//!
//! ## Core Types
//!
//! - [`UsageEvent`] - the canonical unit, content-addressed by [`UsageEvent::content_id`]
//! - [`TokenUsage`] - the four token counters, always present, default zero
//! - [`CostInfo`] / [`CostMode`] - reported vs estimated vs final cost and its provenance
//! - [`EventMeta`] - per-source provenance behind a tagged union
//! - [`Totals`] / [`Summary`] - mutable accumulator and windowed report shape
//!
//! Events are immutable values once emitted; pipeline stages pass them by
//! copy and never mutate another stage's in-flight event in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

/// The originating tool whose logs produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    ClaudeCode,
    Codex,
    Cursor,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::ClaudeCode => "claude_code",
            Source::Codex => "codex",
            Source::Cursor => "cursor",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The billing entity for an event. Distinct from [`Source`]: a single IDE
/// source may bill through several providers depending on the model used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Anthropic,
    Openai,
    Cursor,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::Openai => "openai",
            Provider::Cursor => "cursor",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token counters for one event. All four fields are always present and
/// default to zero when a source omits them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub cache_write: u64,
    #[serde(default)]
    pub cache_read: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_write + self.cache_read
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_write += other.cache_write;
        self.cache_read += other.cache_read;
    }
}

/// How an event's final cost was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostMode {
    /// An upstream API supplied an authoritative figure.
    Reported,
    /// Computed locally from token counts and the rate table.
    Estimated,
    /// Reported figure used, with a local estimate also on record.
    Mixed,
    /// No pricing entry resolved for (provider, model).
    Unknown,
    /// Covered by a flat-rate plan; final cost is zero by policy.
    Subscription,
}

impl CostMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostMode::Reported => "reported",
            CostMode::Estimated => "estimated",
            CostMode::Mixed => "mixed",
            CostMode::Unknown => "unknown",
            CostMode::Subscription => "subscription",
        }
    }
}

/// Cost figures for one event. `final_usd` is non-null once attribution has
/// run, except when `mode` is [`CostMode::Unknown`] and unknown-inclusion is
/// disabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostInfo {
    pub reported_usd: Option<f64>,
    pub estimated_usd: Option<f64>,
    pub final_usd: Option<f64>,
    pub mode: CostMode,
}

impl CostInfo {
    /// Cost state of a freshly collected event, before attribution.
    pub fn unpriced(reported_usd: Option<f64>) -> Self {
        Self {
            reported_usd,
            estimated_usd: None,
            final_usd: None,
            mode: CostMode::Unknown,
        }
    }
}

impl Default for CostInfo {
    fn default() -> Self {
        Self::unpriced(None)
    }
}

/// Project attribution for an event, when the source records one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub root: Option<String>,
}

/// Billing hint attached by a collector when the source knows how the
/// usage is billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Billing {
    /// Flat-rate plan covers this usage regardless of token volume.
    Subscription,
    /// Pay-per-use billing.
    Usage,
}

/// Source-specific provenance. A closed set of per-source payloads rather
/// than an open map, so each collector's fields stay compile-checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventMeta {
    ClaudeLog {
        file: String,
        session_id: String,
        #[serde(default)]
        request_id: Option<String>,
        #[serde(default)]
        billing: Option<Billing>,
    },
    CodexSession {
        file: String,
        session_id: String,
    },
    CursorApi {
        endpoint: String,
        #[serde(default)]
        team: Option<String>,
        #[serde(default)]
        row_id: Option<String>,
        #[serde(default)]
        billing: Option<Billing>,
    },
    CursorLocal {
        file: String,
        #[serde(default)]
        billing: Option<Billing>,
    },
}

impl EventMeta {
    /// Billing hint, when the source carries one.
    pub fn billing(&self) -> Option<Billing> {
        match self {
            EventMeta::ClaudeLog { billing, .. } => *billing,
            EventMeta::CursorApi { billing, .. } => *billing,
            EventMeta::CursorLocal { billing, .. } => *billing,
            EventMeta::CodexSession { .. } => None,
        }
    }

    /// Session/instance discriminator folded into the content id so that
    /// identical token counts from different sessions stay distinct.
    pub fn discriminator(&self) -> &str {
        match self {
            EventMeta::ClaudeLog {
                request_id: Some(id),
                ..
            } => id,
            EventMeta::ClaudeLog { session_id, .. } => session_id,
            EventMeta::CodexSession { session_id, .. } => session_id,
            EventMeta::CursorApi {
                row_id: Some(id), ..
            } => id,
            EventMeta::CursorApi { endpoint, .. } => endpoint,
            EventMeta::CursorLocal { file, .. } => file,
        }
    }
}

/// The canonical unit flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
    pub provider: Provider,
    pub model: Option<String>,
    #[serde(default)]
    pub tokens: TokenUsage,
    #[serde(default)]
    pub cost: CostInfo,
    #[serde(default)]
    pub project: ProjectRef,
    pub meta: EventMeta,
}

impl UsageEvent {
    /// Content-addressed identity over the stable subset of fields. Cost and
    /// project carry no identity: re-collecting unchanged logs reproduces the
    /// same ids, and repricing never changes them.
    pub fn content_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(b":");
        hasher.update(self.source.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(self.model.as_deref().unwrap_or("").as_bytes());
        hasher.update(b":");
        hasher.update(
            format!(
                "{}:{}:{}:{}",
                self.tokens.input,
                self.tokens.output,
                self.tokens.cache_write,
                self.tokens.cache_read
            )
            .as_bytes(),
        );
        hasher.update(b":");
        hasher.update(self.meta.discriminator().as_bytes());
        hex_digest(&hasher.finalize())
    }

    /// Fills in `id` from the content hash. Collectors call this last, after
    /// every identity-bearing field is set.
    pub fn with_id(mut self) -> Self {
        self.id = self.content_id();
        self
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{:02x}", byte);
    }
    out
}

/// Mutable accumulator for one bucket of events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Totals {
    pub count: u64,
    pub tokens: TokenUsage,
    pub reported_usd: f64,
    pub estimated_usd: f64,
    pub final_usd: f64,
    pub unknown_cost_events: u64,
}

impl Totals {
    pub fn add(&mut self, event: &UsageEvent) {
        self.count += 1;
        self.tokens.accumulate(&event.tokens);
        self.reported_usd += event.cost.reported_usd.unwrap_or(0.0);
        self.estimated_usd += event.cost.estimated_usd.unwrap_or(0.0);
        self.final_usd += event.cost.final_usd.unwrap_or(0.0);
        if event.cost.mode == CostMode::Unknown {
            self.unknown_cost_events += 1;
        }
    }
}

/// A windowed report: one top-level [`Totals`] plus four breakdown maps,
/// all computed in the same fold pass so they always sum consistently.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub timezone: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub totals: Totals,
    pub by_provider: BTreeMap<String, Totals>,
    pub by_source: BTreeMap<String, Totals>,
    pub by_model: BTreeMap<String, Totals>,
    pub by_project: BTreeMap<String, Totals>,
}

impl Summary {
    pub fn new(timezone: impl Into<String>, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            timezone: timezone.into(),
            from,
            to,
            totals: Totals::default(),
            by_provider: BTreeMap::new(),
            by_source: BTreeMap::new(),
            by_model: BTreeMap::new(),
            by_project: BTreeMap::new(),
        }
    }
}
