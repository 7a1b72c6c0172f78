//! The collect-cost-persist pipeline behind `refresh` and `reprice`.
//!
//! Collectors run concurrently, one task per enabled source. A failing
//! source degrades the run instead of aborting it: its error is carried in
//! the report and the remaining sources persist normally.

use crate::collectors::{default_collectors, run_collectors, CollectorContext};
use crate::config::Config;
use crate::costing::{apply_costing, CostingOptions};
use crate::models::{Source, UsageEvent};
use crate::pricing::load_table;
use crate::store::EventStore;
use crate::sync::SyncState;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Outcome of one source within a refresh run.
#[derive(Debug, Serialize)]
pub struct SourceReport {
    pub source: Source,
    pub collected: usize,
    pub error: Option<String>,
}

/// Outcome of a whole refresh run.
#[derive(Debug, Default, Serialize)]
pub struct RefreshReport {
    pub sources: Vec<SourceReport>,
    pub appended: usize,
    pub duplicates: usize,
}

impl RefreshReport {
    pub fn failed_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.error.is_some()).count()
    }
}

fn sync_path(config: &Config) -> PathBuf {
    config.storage.data_dir.join("sync.json")
}

/// Collect from every enabled source, attribute cost, and append to the
/// store. Deduplication happens at append time via content ids, so running
/// this twice in a row is a no-op on the second pass.
pub async fn run_refresh(config: &Config) -> Result<RefreshReport> {
    let now = Utc::now();
    let sync = Arc::new(Mutex::new(SyncState::load(&sync_path(config))));
    let ctx = Arc::new(CollectorContext {
        config: config.clone(),
        sync: Arc::clone(&sync),
        now,
    });

    let collectors = default_collectors(config);
    let outcomes = run_collectors(collectors, Arc::clone(&ctx)).await;

    let table = load_table(config.pricing.table_path.as_deref())?;
    let options = CostingOptions {
        include_unknown: config.report.include_unknown,
    };

    let mut report = RefreshReport::default();
    let mut costed: Vec<UsageEvent> = Vec::new();

    for (source, outcome) in outcomes {
        match outcome {
            Ok(events) => {
                info!(source = %source, count = events.len(), "Source collected");
                report.sources.push(SourceReport {
                    source,
                    collected: events.len(),
                    error: None,
                });
                costed.extend(events.iter().map(|event| apply_costing(event, &table, &options)));
            }
            Err(error) => {
                warn!(source = %source, error = %format!("{error:#}"), "Source failed");
                report.sources.push(SourceReport {
                    source,
                    collected: 0,
                    error: Some(format!("{error:#}")),
                });
            }
        }
    }

    let store = EventStore::new(&config.storage.data_dir);
    let appended = store.append(&costed)?;
    report.appended = appended.appended;
    report.duplicates = appended.duplicates;

    {
        let mut sync = sync
            .lock()
            .map_err(|_| anyhow::anyhow!("sync state lock poisoned"))?;
        for source_report in &report.sources {
            if source_report.error.is_none() {
                sync.record_run(
                    source_report.source.as_str(),
                    now,
                    source_report.collected as u64,
                );
            }
        }
        sync.save(&sync_path(config))
            .context("Failed to persist sync state")?;
    }

    info!(
        appended = report.appended,
        duplicates = report.duplicates,
        failed_sources = report.failed_sources(),
        "Refresh complete"
    );
    Ok(report)
}

/// Re-run cost attribution over every stored event against the current
/// pricing table and rewrite the partitions wholesale. Content ids ignore
/// cost fields, so identity is stable across repricing.
pub fn run_reprice(config: &Config) -> Result<usize> {
    let table = load_table(config.pricing.table_path.as_deref())?;
    let options = CostingOptions {
        include_unknown: config.report.include_unknown,
    };

    let store = EventStore::new(&config.storage.data_dir);
    let events = store.read_all()?;
    let costed: Vec<UsageEvent> = events
        .iter()
        .map(|event| apply_costing(event, &table, &options))
        .collect();

    store.overwrite(&costed)?;
    info!(count = costed.len(), "Repriced stored events");
    Ok(costed.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn offline_config(data_dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = data_dir.to_path_buf();
        // Point every source at empty directories so nothing is scanned
        // and no network tier has credentials to fire with.
        config.claude.dir = data_dir.join("claude");
        config.codex.dir = data_dir.join("codex");
        config.cursor.app_dir = Some(data_dir.join("cursor"));
        config
    }

    #[tokio::test]
    async fn refresh_with_empty_sources_reports_cleanly() {
        let dir = TempDir::new().unwrap();
        let config = offline_config(dir.path());

        let report = run_refresh(&config).await.unwrap();
        assert_eq!(report.sources.len(), 3);
        assert_eq!(report.failed_sources(), 0);
        assert_eq!(report.appended, 0);

        // Successful sources are recorded in persisted sync state.
        let sync = SyncState::load(&sync_path(&config));
        assert_eq!(sync.collectors.len(), 3);
    }

    #[tokio::test]
    async fn refresh_twice_appends_nothing_new() {
        let dir = TempDir::new().unwrap();
        let mut config = offline_config(dir.path());

        // Seed one claude transcript.
        let projects = config.claude.dir.join("projects/-home-user-app");
        std::fs::create_dir_all(&projects).unwrap();
        std::fs::write(
            projects.join("session.jsonl"),
            concat!(
                r#"{"type":"assistant","timestamp":"2026-02-10T09:00:00Z","sessionId":"s1","#,
                r#""requestId":"req-1","message":{"model":"claude-sonnet-4","#,
                r#""usage":{"input_tokens":1000,"output_tokens":200}}}"#,
                "\n"
            ),
        )
        .unwrap();
        config.cursor.enabled = false;
        config.codex.enabled = false;

        let first = run_refresh(&config).await.unwrap();
        assert_eq!(first.appended, 1);

        let second = run_refresh(&config).await.unwrap();
        assert_eq!(second.appended, 0);
        assert_eq!(second.duplicates, 1);
    }

    #[tokio::test]
    async fn reprice_preserves_event_ids() {
        let dir = TempDir::new().unwrap();
        let mut config = offline_config(dir.path());
        config.cursor.enabled = false;
        config.codex.enabled = false;

        let projects = config.claude.dir.join("projects/-home-user-app");
        std::fs::create_dir_all(&projects).unwrap();
        std::fs::write(
            projects.join("session.jsonl"),
            concat!(
                r#"{"type":"assistant","timestamp":"2026-02-10T09:00:00Z","sessionId":"s1","#,
                r#""requestId":"req-1","message":{"model":"claude-sonnet-4","#,
                r#""usage":{"input_tokens":1000,"output_tokens":200}}}"#,
                "\n"
            ),
        )
        .unwrap();

        run_refresh(&config).await.unwrap();
        let store = EventStore::new(&config.storage.data_dir);
        let before: Vec<String> = store.read_all().unwrap().iter().map(|e| e.id.clone()).collect();

        let count = run_reprice(&config).unwrap();
        assert_eq!(count, before.len());

        let after: Vec<String> = store.read_all().unwrap().iter().map(|e| e.id.clone()).collect();
        assert_eq!(before, after);
    }
}
