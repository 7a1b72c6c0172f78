//! Cost Attribution Engine
//!
//! Reconciles provider-reported cost, locally estimated cost, and flat-rate
//! subscription coverage into one authoritative `final_usd` figure plus a
//! provenance tag. Pure over its inputs: the incoming event is never
//! mutated.
//!
//! Decision order, first matching rule wins:
//! 1. subscription billing hint - final cost is zero, estimate kept for
//!    "what this would have cost" visibility
//! 2. upstream reported cost - used verbatim; `mixed` when an estimate was
//!    also computed, `reported` otherwise
//! 3. pricing miss - mode `unknown`; final cost follows the
//!    unknown-inclusion switch
//! 4. estimate from the rate table

use crate::models::{Billing, CostInfo, CostMode, UsageEvent};
use crate::pricing::{self, PricingTable};

#[derive(Debug, Clone, Copy, Default)]
pub struct CostingOptions {
    /// Include events with unresolvable pricing in final totals.
    pub include_unknown: bool,
}

/// Apply the attribution policy to one event, returning a costed copy.
pub fn apply_costing(
    event: &UsageEvent,
    table: &PricingTable,
    options: &CostingOptions,
) -> UsageEvent {
    let mut costed = event.clone();

    let resolved = pricing::find_pricing(table, event.provider, event.model.as_deref());
    let estimate = resolved.map(|entry| pricing::estimate_cost_usd(entry, &event.tokens));

    costed.cost = if event.meta.billing() == Some(Billing::Subscription) {
        CostInfo {
            reported_usd: event.cost.reported_usd,
            estimated_usd: estimate,
            final_usd: Some(0.0),
            mode: CostMode::Subscription,
        }
    } else if let Some(reported) = event.cost.reported_usd {
        CostInfo {
            reported_usd: Some(reported),
            estimated_usd: estimate,
            final_usd: Some(reported),
            mode: if estimate.is_some() {
                CostMode::Mixed
            } else {
                CostMode::Reported
            },
        }
    } else if resolved.is_none() {
        CostInfo {
            reported_usd: None,
            // No pricing existed, so the estimate stays null; with
            // unknown-inclusion enabled the final mirrors it.
            estimated_usd: estimate,
            final_usd: if options.include_unknown { estimate } else { None },
            mode: CostMode::Unknown,
        }
    } else {
        CostInfo {
            reported_usd: None,
            estimated_usd: estimate,
            final_usd: estimate,
            mode: CostMode::Estimated,
        }
    };

    costed
}
