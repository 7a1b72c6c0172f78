//! Terminal and JSON rendering of summaries and refresh results.

use crate::models::{Summary, Totals};
use crate::refresh::RefreshReport;
use anyhow::Result;
use colored::Colorize;
use std::collections::BTreeMap;

fn usd(value: f64) -> String {
    format!("${:.4}", value)
}

fn print_breakdown(title: &str, breakdown: &BTreeMap<String, Totals>) {
    if breakdown.is_empty() {
        return;
    }
    println!("\n{}", title.bright_cyan().bold());

    // Highest spend first; map order is only alphabetical.
    let mut rows: Vec<(&String, &Totals)> = breakdown.iter().collect();
    rows.sort_by(|a, b| {
        b.1.final_usd
            .partial_cmp(&a.1.final_usd)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for (key, totals) in rows {
        println!(
            "  {:<40} {:>12} {:>10} events {:>14} tokens",
            key.bright_white(),
            usd(totals.final_usd).bright_green(),
            totals.count,
            totals.tokens.total()
        );
    }
}

/// Render a windowed summary, either as a colored table or as JSON.
pub fn print_summary(summary: &Summary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(72).bright_cyan());
    println!(
        "{} {} ({} to {}, {})",
        "Spend Report".bright_white().bold(),
        summary.timezone.bright_yellow(),
        summary.from.format("%Y-%m-%d %H:%M UTC"),
        summary.to.format("%Y-%m-%d %H:%M UTC"),
        format!("{} events", summary.totals.count).bright_white()
    );
    println!("{}", "=".repeat(72).bright_cyan());

    println!(
        "\n  {:<18} {}",
        "Final cost:",
        usd(summary.totals.final_usd).bright_green().bold()
    );
    println!("  {:<18} {}", "Reported:", usd(summary.totals.reported_usd));
    println!("  {:<18} {}", "Estimated:", usd(summary.totals.estimated_usd));
    println!(
        "  {:<18} {}",
        "Total tokens:",
        summary.totals.tokens.total()
    );
    if summary.totals.unknown_cost_events > 0 {
        println!(
            "  {:<18} {}",
            "Unpriced events:",
            summary
                .totals
                .unknown_cost_events
                .to_string()
                .bright_yellow()
        );
    }

    print_breakdown("By source", &summary.by_source);
    print_breakdown("By provider", &summary.by_provider);
    print_breakdown("By model", &summary.by_model);
    print_breakdown("By project", &summary.by_project);
    println!();

    Ok(())
}

/// Render the outcome of a refresh run. Partial failure is visible but
/// does not change the exit path; the caller decides what is fatal.
pub fn print_refresh_report(report: &RefreshReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for source in &report.sources {
        match &source.error {
            None => println!(
                "{} {:<12} {} events",
                "ok".bright_green(),
                source.source.as_str(),
                source.collected
            ),
            Some(error) => println!(
                "{} {:<12} {}",
                "failed".bright_red(),
                source.source.as_str(),
                error
            ),
        }
    }
    println!(
        "\n{} new, {} duplicates skipped",
        report.appended.to_string().bright_green().bold(),
        report.duplicates
    );

    Ok(())
}
