//! Event Store
//!
//! Day-partitioned, append-only, content-addressed event log. Each calendar
//! day (in the event's own recorded instant, not write time) maps to one
//! line-delimited JSON file under `<data_dir>/events/`. The write path is an
//! upsert-by-id no-op for already-seen ids, which makes re-collection
//! idempotent.
//!
//! Reads are line-oriented and tolerant: blank lines and lines that fail to
//! parse are skipped, never fatal. Logs are cross-tool, append-friendly, and
//! occasionally truncated by the producing application.

use crate::models::UsageEvent;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Outcome of one append pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendReport {
    pub appended: usize,
    pub duplicates: usize,
}

pub struct EventStore {
    dir: PathBuf,
}

impl EventStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("events"),
        }
    }

    fn day_path(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.jsonl", day.format(DAY_FORMAT)))
    }

    /// Append events, deduplicated against each day's existing ids and
    /// within the batch itself. Append order is arrival order; persisted
    /// lines are never reordered or rewritten.
    pub fn append(&self, events: &[UsageEvent]) -> Result<AppendReport> {
        if events.is_empty() {
            return Ok(AppendReport::default());
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create event store dir: {}", self.dir.display()))?;

        let mut report = AppendReport::default();

        for (day, day_events) in group_by_day(events) {
            let path = self.day_path(day);
            let mut seen: HashSet<String> = self
                .read_day(&path)?
                .into_iter()
                .map(|event| event.id)
                .collect();

            let mut buffer = String::new();
            for event in day_events {
                if !seen.insert(event.id.clone()) {
                    report.duplicates += 1;
                    continue;
                }
                let line = serde_json::to_string(event)
                    .context("Failed to serialize event for storage")?;
                buffer.push_str(&line);
                buffer.push('\n');
                report.appended += 1;
            }

            if buffer.is_empty() {
                continue;
            }

            // One write call per day so an interrupted run leaves whole
            // lines, not a half-serialized record.
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open day partition: {}", path.display()))?;
            file.write_all(buffer.as_bytes())
                .with_context(|| format!("Failed to append to: {}", path.display()))?;
            file.flush()?;

            debug!(day = %day, path = %path.display(), "Appended events to day partition");
        }

        Ok(report)
    }

    /// Replace each affected day's file wholesale with the given corrected
    /// event set. For reprocessing only (cost or attribution changes); the
    /// ordinary refresh path must use [`EventStore::append`] since overwrite
    /// discards the existing file's dedup history.
    pub fn overwrite(&self, events: &[UsageEvent]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create event store dir: {}", self.dir.display()))?;

        for (day, day_events) in group_by_day(events) {
            let path = self.day_path(day);
            let mut buffer = String::new();
            for event in day_events {
                let line = serde_json::to_string(event)
                    .context("Failed to serialize event for storage")?;
                buffer.push_str(&line);
                buffer.push('\n');
            }

            // Full content lands in a temp file first; rename keeps the
            // partition whole-or-absent even on a mid-write failure.
            let tmp = path.with_extension("jsonl.tmp");
            fs::write(&tmp, buffer.as_bytes())
                .with_context(|| format!("Failed to write: {}", tmp.display()))?;
            fs::rename(&tmp, &path)
                .with_context(|| format!("Failed to replace day partition: {}", path.display()))?;

            debug!(day = %day, path = %path.display(), "Rewrote day partition");
        }

        Ok(())
    }

    /// Read events for calendar days in `[from, to]` inclusive.
    pub fn read_range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<UsageEvent>> {
        let mut events = Vec::new();
        for day in from.iter_days().take_while(|day| *day <= to) {
            events.extend(self.read_day(&self.day_path(day))?);
        }
        Ok(events)
    }

    /// Read every persisted event, partitions in date order.
    pub fn read_all(&self) -> Result<Vec<UsageEvent>> {
        let mut events = Vec::new();
        for day in self.partition_days()? {
            events.extend(self.read_day(&self.day_path(day))?);
        }
        Ok(events)
    }

    /// Earliest day with any stored events, derived from partition file
    /// names rather than event contents: all-time query setup stays bounded
    /// by partition count, not event count.
    pub fn earliest_day(&self) -> Result<Option<NaiveDate>> {
        Ok(self.partition_days()?.into_iter().next())
    }

    fn partition_days(&self) -> Result<Vec<NaiveDate>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut days = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list event store dir: {}", self.dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            let stem = match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(stem) => stem,
                None => continue,
            };
            if let Ok(day) = NaiveDate::parse_from_str(stem, DAY_FORMAT) {
                days.push(day);
            }
        }
        days.sort();
        Ok(days)
    }

    fn read_day(&self, path: &Path) -> Result<Vec<UsageEvent>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(path)
            .with_context(|| format!("Failed to open day partition: {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<UsageEvent>(line) {
                Ok(event) => events.push(event),
                Err(_) => trace!(path = %path.display(), "Skipping unparsable line"),
            }
        }
        Ok(events)
    }
}

fn group_by_day(events: &[UsageEvent]) -> BTreeMap<NaiveDate, Vec<&UsageEvent>> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&UsageEvent>> = BTreeMap::new();
    for event in events {
        by_day
            .entry(event.timestamp.date_naive())
            .or_default()
            .push(event);
    }
    by_day
}
