//! Point-in-time index universe
//!
//! Replays index-membership change events into one immutable membership
//! snapshot per quarter boundary, so that every historical decision only sees
//! the securities that were actually index members at that time.

use crate::calendar::QuarterlyCalendar;
use crate::error::{BacktestError, Result};
use crate::types::{Date, Symbol, DATE_FORMAT};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single index-membership change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub effective_date: Date,
    pub added: Option<Symbol>,
    pub removed: Option<Symbol>,
}

/// Membership change as delivered by an upstream provider, before date parsing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawChangeEvent {
    pub date: String,
    #[serde(default)]
    pub added: Option<String>,
    #[serde(default)]
    pub removed: Option<String>,
}

impl ChangeEvent {
    /// Event adding `symbol` on `date`
    pub fn addition(date: Date, symbol: impl Into<Symbol>) -> Self {
        Self {
            effective_date: date,
            added: Some(symbol.into()),
            removed: None,
        }
    }

    /// Event removing `symbol` on `date`
    pub fn removal(date: Date, symbol: impl Into<Symbol>) -> Self {
        Self {
            effective_date: date,
            added: None,
            removed: Some(symbol.into()),
        }
    }

    /// Convert a raw provider record.
    ///
    /// Unparseable dates become `NaiveDate::MIN`, so the event sorts first and is
    /// applied before every boundary. Blank symbols are dropped.
    pub fn from_raw(raw: &RawChangeEvent) -> Self {
        let effective_date = parse_event_date(&raw.date).unwrap_or_else(|| {
            log::warn!(
                "Unparseable membership date '{}' (added={:?}, removed={:?}); treating as earliest",
                raw.date,
                raw.added,
                raw.removed
            );
            NaiveDate::MIN
        });

        Self {
            effective_date,
            added: non_blank(raw.added.as_deref()),
            removed: non_blank(raw.removed.as_deref()),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<Symbol> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Lenient date parsing for provider records
pub fn parse_event_date(value: &str) -> Option<Date> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| NaiveDate::parse_from_str(value, "%m/%d/%Y").ok())
}

/// Index membership as of one quarter boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseSnapshot {
    pub quarter_date: Date,
    pub members: BTreeSet<Symbol>,
}

impl UniverseSnapshot {
    pub fn contains(&self, symbol: &str) -> bool {
        self.members.contains(symbol)
    }

    /// Members in ascending symbol order
    pub fn members_sorted(&self) -> Vec<Symbol> {
        self.members.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Ordered, immutable sequence of quarterly snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniverseTimeline {
    snapshots: Vec<UniverseSnapshot>,
}

impl UniverseTimeline {
    /// Build from already-materialized snapshots (e.g. a persisted timeline)
    pub fn from_snapshots(mut snapshots: Vec<UniverseSnapshot>) -> Self {
        snapshots.sort_by_key(|s| s.quarter_date);
        snapshots.dedup_by_key(|s| s.quarter_date);
        Self { snapshots }
    }

    pub fn snapshots(&self) -> &[UniverseSnapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Snapshot at `date`, or the latest one strictly before it. Never a later one.
    pub fn as_of(&self, date: Date) -> Option<&UniverseSnapshot> {
        let idx = self.snapshots.partition_point(|s| s.quarter_date <= date);
        idx.checked_sub(1).map(|i| &self.snapshots[i])
    }

    /// Every symbol that is a member in at least one snapshot
    pub fn all_symbols(&self) -> BTreeSet<Symbol> {
        self.snapshots
            .iter()
            .flat_map(|s| s.members.iter().cloned())
            .collect()
    }
}

/// Build the quarterly point-in-time universe.
///
/// Events are stably sorted by effective date and replayed in a single forward
/// pass. Events dated before `output_start_year` are applied too, so membership
/// on the first boundary is already correct.
pub fn build_timeline(
    events: &[ChangeEvent],
    output_start_year: i32,
    end_year: i32,
) -> Result<UniverseTimeline> {
    if events.is_empty() {
        return Err(BacktestError::DataUnavailable(
            "no index membership events".to_string(),
        ));
    }
    if output_start_year > end_year {
        return Err(BacktestError::ConfigError(format!(
            "universe start year {} is after end year {}",
            output_start_year, end_year
        )));
    }

    let mut sorted: Vec<&ChangeEvent> = events.iter().collect();
    sorted.sort_by_key(|e| e.effective_date);

    let boundaries = QuarterlyCalendar::new().year_range(output_start_year, end_year);

    let snapshots = boundaries
        .into_iter()
        .scan(
            (0usize, BTreeSet::<Symbol>::new()),
            |(cursor, active), quarter_date| {
                while *cursor < sorted.len() && sorted[*cursor].effective_date <= quarter_date {
                    apply_event(active, sorted[*cursor]);
                    *cursor += 1;
                }
                Some(UniverseSnapshot {
                    quarter_date,
                    members: active.clone(),
                })
            },
        )
        .collect::<Vec<_>>();

    log::info!(
        "Built universe timeline: {} snapshots from {} events",
        snapshots.len(),
        events.len()
    );

    Ok(UniverseTimeline { snapshots })
}

// Removal first, so an event carrying both fields for the same symbol leaves it a member.
fn apply_event(active: &mut BTreeSet<Symbol>, event: &ChangeEvent) {
    if let Some(symbol) = &event.removed {
        active.remove(symbol);
    }
    if let Some(symbol) = &event.added {
        active.insert(symbol.clone());
    }
}
