use agent_spend::aggregate::{aggregate_events, window_bounds, Window};
use agent_spend::config::Config;
use agent_spend::logging::init_logging;
use agent_spend::refresh::{run_refresh, run_reprice};
use agent_spend::reports::{print_refresh_report, print_summary};
use agent_spend::store::EventStore;
use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

#[derive(Parser)]
#[command(name = "agent-spend")]
#[command(about = "Track and report LLM coding-assistant spend across tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect new usage from all enabled sources into the local store
    Refresh {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Report spend over a time window
    Report {
        /// Reporting window
        #[arg(long, value_enum, default_value_t = WindowArg::Today)]
        window: WindowArg,
        /// IANA timezone override (defaults to configured zone)
        #[arg(long)]
        timezone: Option<String>,
        /// Collect new usage before reporting
        #[arg(long)]
        refresh: bool,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Re-run cost attribution over all stored events
    Reprice,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WindowArg {
    Today,
    Month,
    Year,
    All,
}

impl From<WindowArg> for Window {
    fn from(arg: WindowArg) -> Self {
        match arg {
            WindowArg::Today => Window::Today,
            WindowArg::Month => Window::MonthToDate,
            WindowArg::Year => Window::YearToDate,
            WindowArg::All => Window::AllTime,
        }
    }
}

async fn report(
    config: &Config,
    window: WindowArg,
    timezone: Option<String>,
    refresh: bool,
    json: bool,
) -> Result<()> {
    if refresh {
        let report = run_refresh(config).await?;
        if !json {
            print_refresh_report(&report, false)?;
        }
    }

    let tz = match timezone {
        Some(name) => name
            .parse()
            .map_err(|_| anyhow::anyhow!("Unknown timezone: {name}"))?,
        None => config.timezone(),
    };

    let store = EventStore::new(&config.storage.data_dir);
    let bounds = window_bounds(window.into(), tz, Utc::now(), store.earliest_day()?);
    let (from_day, to_day) = bounds.utc_days();
    let events = store.read_range(from_day, to_day)?;

    let summary = aggregate_events(&events, tz, bounds);
    print_summary(&summary, json)
}

#[tokio::main]
async fn main() -> Result<()> {
    // One load, seeded globally, so the logging setup and the run share
    // the same configuration.
    let config = agent_spend::config::init_config(Config::load()?);
    let _log_guard = init_logging();
    if let Some(path) = &config.source_file {
        info!(config_file = %path.display(), "Loaded configuration from file");
    }

    let command = Cli::parse().command.unwrap_or(Commands::Report {
        window: WindowArg::Today,
        timezone: None,
        refresh: false,
        json: false,
    });

    match command {
        Commands::Refresh { json } => {
            let refresh_report = run_refresh(config).await?;
            print_refresh_report(&refresh_report, json)?;
            if refresh_report.failed_sources() == refresh_report.sources.len()
                && !refresh_report.sources.is_empty()
            {
                anyhow::bail!("All sources failed");
            }
            Ok(())
        }
        Commands::Report {
            window,
            timezone,
            refresh,
            json,
        } => report(config, window, timezone, refresh, json).await,
        Commands::Reprice => {
            let count = run_reprice(config)?;
            println!("Repriced {count} events");
            Ok(())
        }
    }
}
