//! Agent Spend Library
//!
//! Collects, normalizes, and reports LLM coding-assistant usage from several
//! tools into one append-only local store with consistent cost attribution.
//!
//! ## Core Features
//!
//! - **Multi-source collection**: terminal-agent transcripts, session logs
//!   with cumulative counters, and a remote-billed IDE behind a multi-tier
//!   fallback chain
//! - **Content-addressed events**: every event's id is a hash of its
//!   identity fields, so re-collection and overlapping scans deduplicate
//!   naturally and repricing never changes identity
//! - **Cost attribution**: reported figures preferred, local estimates from
//!   a bundled per-million-token rate table otherwise, with subscription
//!   usage zeroed by policy
//! - **Timezone-aware windows**: today / month / year / all-time resolved
//!   against a named IANA zone, not UTC or machine-local offsets
//!
//! ## Architecture Overview
//!
//! - [`models`] - Canonical event, token, cost, and summary types
//! - [`collectors`] - Per-source collection strategies behind one trait
//! - [`costing`] - The cost attribution policy
//! - [`pricing`] - Rate table loading and model resolution
//! - [`store`] - Day-partitioned append-only JSONL event store
//! - [`sync`] - Collector cursors and response-cache validators
//! - [`aggregate`] - Windowed fold into totals and breakdowns
//! - [`refresh`] - The collect, cost, persist pipeline
//! - [`reports`] - Terminal and JSON rendering
//! - [`config`] - Layered configuration with environment overrides
//! - [`logging`] - Structured logging setup

pub mod aggregate;
pub mod collectors;
pub mod config;
pub mod costing;
pub mod logging;
pub mod models;
pub mod pricing;
pub mod refresh;
pub mod reports;
pub mod store;
pub mod sync;

pub use config::{get_config, Config};
pub use models::{Source, Summary, TokenUsage, UsageEvent};
