//! Pricing Resolver
//!
//! Loads a static rate table and answers (provider, model) lookups. Lookup
//! is exact first, then falls back to the first table entry (in table
//! order) for the same provider whose model string is a substring of the
//! queried model. Table order therefore puts more specific model names
//! first.
//!
//! Rates are USD per one million tokens. A model with no table entry is a
//! pricing miss, distinct from a found entry with zero rates.

use crate::models::{Provider, TokenUsage};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

const BUNDLED_TABLE: &str = include_str!("../assets/pricing.toml");

/// Per-model rates, USD per one million tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingModel {
    pub provider: Provider,
    pub model: String,
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub cache_write: Option<f64>,
    #[serde(default)]
    pub cache_read: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub currency: String,
    pub unit: String,
    #[serde(default)]
    pub updated: Option<String>,
}

/// An ordered list of [`PricingModel`] entries plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTable {
    pub table: TableMeta,
    #[serde(rename = "model", default)]
    pub models: Vec<PricingModel>,
}

impl PricingTable {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse pricing table")
    }
}

/// The rate table compiled into the binary, used when no file is configured.
pub fn bundled_table() -> &'static PricingTable {
    static TABLE: OnceLock<PricingTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        PricingTable::parse(BUNDLED_TABLE).expect("bundled pricing table is valid")
    })
}

/// Load the pricing table from `path`, or fall back to the bundled table.
/// Consumed read-only at each refresh.
pub fn load_table(path: Option<&Path>) -> Result<PricingTable> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read pricing table: {}", path.display()))?;
            PricingTable::parse(&content)
        }
        None => Ok(bundled_table().clone()),
    }
}

/// Resolve rates for (provider, model). A null model resolves to no pricing.
pub fn find_pricing<'a>(
    table: &'a PricingTable,
    provider: Provider,
    model: Option<&str>,
) -> Option<&'a PricingModel> {
    let model = model?;

    table
        .models
        .iter()
        .find(|entry| entry.provider == provider && entry.model == model)
        .or_else(|| {
            table
                .models
                .iter()
                .find(|entry| entry.provider == provider && model.contains(entry.model.as_str()))
        })
}

/// Token cost in USD. An absent cache rate contributes zero; no rounding
/// happens here, only at presentation.
pub fn estimate_cost_usd(pricing: &PricingModel, tokens: &TokenUsage) -> f64 {
    (tokens.input as f64 / 1_000_000.0) * pricing.input
        + (tokens.output as f64 / 1_000_000.0) * pricing.output
        + (tokens.cache_write as f64 / 1_000_000.0) * pricing.cache_write.unwrap_or(0.0)
        + (tokens.cache_read as f64 / 1_000_000.0) * pricing.cache_read.unwrap_or(0.0)
}
