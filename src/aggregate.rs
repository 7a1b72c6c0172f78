//! Windowed aggregation over stored events.
//!
//! Windows are resolved in a named timezone, not in UTC and not in the
//! machine's local offset. "Today" means the current calendar day in the
//! configured zone, from local midnight up to the query instant, and both
//! endpoints are converted to UTC instants once so the fold itself is a
//! plain instant comparison.

use crate::models::{Summary, Totals, UsageEvent};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;

/// Reporting window, anchored to "now" in the configured timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Today,
    MonthToDate,
    YearToDate,
    AllTime,
}

/// Resolved window as UTC instants, both endpoints inclusive. `end` is the
/// query's "now": a record stamped later than the query instant is not part
/// of the window, whatever clock produced it.
#[derive(Debug, Clone, Copy)]
pub struct WindowBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl WindowBounds {
    /// UTC calendar days the window can touch, for partition-range reads.
    /// A local-midnight boundary rarely lands on a UTC day boundary, so
    /// this is wider than the local day span.
    pub fn utc_days(&self) -> (NaiveDate, NaiveDate) {
        (self.start.date_naive(), self.end.date_naive())
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

/// UTC instant of local midnight on `date`. On a zone transition where
/// midnight is skipped, the first valid interpretation of the day is used.
fn local_midnight(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&naive).earliest() {
        Some(instant) => instant.with_timezone(&Utc),
        None => DateTime::from_naive_utc_and_offset(naive, Utc),
    }
}

/// Resolve a window against `now`. `earliest_day` anchors [`Window::AllTime`]
/// and comes from the store's partition names; when the store is empty the
/// all-time window collapses to today.
pub fn window_bounds(
    window: Window,
    tz: Tz,
    now: DateTime<Utc>,
    earliest_day: Option<NaiveDate>,
) -> WindowBounds {
    let today = now.with_timezone(&tz).date_naive();
    let from = match window {
        Window::Today => today,
        Window::MonthToDate => today.with_day(1).unwrap_or(today),
        Window::YearToDate => {
            NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today)
        }
        Window::AllTime => earliest_day.unwrap_or(today).min(today),
    };

    WindowBounds {
        start: local_midnight(tz, from),
        end: now,
    }
}

fn bucket_add(map: &mut BTreeMap<String, Totals>, key: &str, event: &UsageEvent) {
    map.entry(key.to_string()).or_default().add(event);
}

/// Fold events inside `bounds` into a [`Summary`]. One pass produces the
/// top-level totals and all four breakdowns, so they always agree.
pub fn aggregate_events(events: &[UsageEvent], tz: Tz, bounds: WindowBounds) -> Summary {
    let mut summary = Summary::new(tz.name(), bounds.start, bounds.end);

    for event in events {
        if !bounds.contains(event.timestamp) {
            continue;
        }

        summary.totals.add(event);
        bucket_add(&mut summary.by_source, event.source.as_str(), event);
        bucket_add(&mut summary.by_provider, event.provider.as_str(), event);
        bucket_add(
            &mut summary.by_model,
            event.model.as_deref().unwrap_or("unknown"),
            event,
        );

        let project = event
            .project
            .name
            .as_deref()
            .or(event.project.id.as_deref())
            .unwrap_or("unassigned");
        bucket_add(&mut summary.by_project, project, event);
    }

    summary
}

/// Window span in whole local days, for per-day averages in reports.
pub fn window_days(bounds: WindowBounds, tz: Tz) -> i64 {
    let from = bounds.start.with_timezone(&tz).date_naive();
    let to = bounds.end.with_timezone(&tz).date_naive();
    ((to - from).num_days() + 1).max(1)
}
