//! Sync/Cache State
//!
//! Small persisted key-value records consumed by collectors to avoid
//! redundant network calls: per-endpoint last-checked timestamps with an
//! opaque validator token, and per-collector last-run records. Read at
//! collector start, conditionally updated at collector end. An absent or
//! corrupt state file is "never run", never an error.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointState {
    pub last_checked: DateTime<Utc>,
    /// Opaque revalidation token from the upstream, e.g. an HTTP ETag.
    #[serde(default)]
    pub validator: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorRun {
    pub last_run: DateTime<Utc>,
    pub item_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointState>,
    #[serde(default)]
    pub collectors: BTreeMap<String, CollectorRun>,
}

impl SyncState {
    pub fn load(path: &Path) -> SyncState {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(_) => {
                    debug!(path = %path.display(), "Corrupt sync state, starting empty");
                    SyncState::default()
                }
            },
            Err(_) => SyncState::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state dir: {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize sync state")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write sync state: {}", path.display()))?;
        Ok(())
    }

    /// True when the endpoint was checked within the TTL window; the owning
    /// tier is skipped rather than re-fetched.
    pub fn is_fresh(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.endpoints
            .get(key)
            .map(|endpoint| now - endpoint.last_checked < ttl)
            .unwrap_or(false)
    }

    pub fn validator(&self, key: &str) -> Option<String> {
        self.endpoints
            .get(key)
            .and_then(|endpoint| endpoint.validator.clone())
    }

    pub fn mark_checked(&mut self, key: &str, now: DateTime<Utc>, validator: Option<String>) {
        self.endpoints.insert(
            key.to_string(),
            EndpointState {
                last_checked: now,
                validator,
            },
        );
    }

    pub fn record_run(&mut self, collector: &str, now: DateTime<Utc>, item_count: u64) {
        self.collectors.insert(
            collector.to_string(),
            CollectorRun {
                last_run: now,
                item_count,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn absent_or_corrupt_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.json");

        let state = SyncState::load(&path);
        assert!(state.endpoints.is_empty());

        fs::write(&path, "{{{ not json").unwrap();
        let state = SyncState::load(&path);
        assert!(state.endpoints.is_empty());
        assert!(state.collectors.is_empty());
    }

    #[test]
    fn round_trips_and_reports_freshness() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.json");
        let now = Utc::now();

        let mut state = SyncState::default();
        state.mark_checked("dashboard:acme", now, Some("etag-1".to_string()));
        state.record_run("cursor", now, 42);
        state.save(&path).unwrap();

        let loaded = SyncState::load(&path);
        assert!(loaded.is_fresh("dashboard:acme", Duration::minutes(15), now));
        assert!(!loaded.is_fresh(
            "dashboard:acme",
            Duration::minutes(15),
            now + Duration::minutes(16)
        ));
        assert!(!loaded.is_fresh("other", Duration::minutes(15), now));
        assert_eq!(loaded.validator("dashboard:acme").as_deref(), Some("etag-1"));
        assert_eq!(loaded.collectors.get("cursor").unwrap().item_count, 42);
    }
}
