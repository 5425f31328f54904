//! Tiered snapshot retention.
//!
//! The planner partitions the existing snapshots into a keep-set and a
//! remove-set by taking the union of four independent rules: keep
//! everything recent, then one snapshot per day, per week and per month
//! for configurable spans. Within a day/week/month bucket the latest
//! snapshot wins. Planning is pure: the same snapshot list, policy and
//! clock reading always produce the same partition.

use crate::snapshot::Snapshot;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use std::collections::BTreeSet;

/// Tiered decay policy. Tier spans count backwards from the planning
/// clock, not from any snapshot's own creation time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionPolicy {
    /// Keep every snapshot taken within this many days of now. Evaluated
    /// as a rolling 24h-per-day window for determinism.
    pub keep_all: u32,
    /// Keep the latest snapshot of each of the most recent N calendar days.
    pub keep_one_per_day: u32,
    /// Keep the latest snapshot of each of the most recent N calendar
    /// weeks (Monday-anchored).
    pub keep_one_per_week: u32,
    /// Keep the latest snapshot of each of the most recent N calendar
    /// months.
    pub keep_one_per_month: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_all: 1,
            keep_one_per_day: 7,
            keep_one_per_week: 4,
            keep_one_per_month: 12,
        }
    }
}

/// Exact partition of the snapshot list, both halves ascending by stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPlan {
    pub keep: Vec<Snapshot>,
    pub remove: Vec<Snapshot>,
}

/// Compute the keep/remove partition for `snapshots` as of `now` (UTC).
pub fn plan(snapshots: &[Snapshot], policy: &RetentionPolicy, now: NaiveDateTime) -> RetentionPlan {
    let mut ordered: Vec<Snapshot> = snapshots.to_vec();
    ordered.sort();

    let mut keep: BTreeSet<&str> = BTreeSet::new();

    if policy.keep_all > 0 {
        let min = now - Duration::days(i64::from(policy.keep_all));
        for snap in ordered.iter().filter(|s| min <= s.stamp && s.stamp <= now) {
            keep.insert(&snap.name);
        }
    }

    let midnight = now.date().and_time(NaiveTime::MIN);
    for i in 0..i64::from(policy.keep_one_per_day) {
        let start = midnight - Duration::days(i);
        if let Some(snap) = latest_within(&ordered, start, start + Duration::days(1)) {
            keep.insert(&snap.name);
        }
    }

    let monday = midnight - Duration::days(i64::from(now.date().weekday().num_days_from_monday()));
    for i in 0..i64::from(policy.keep_one_per_week) {
        let start = monday - Duration::weeks(i);
        if let Some(snap) = latest_within(&ordered, start, start + Duration::days(7)) {
            keep.insert(&snap.name);
        }
    }

    let mut start = month_start(now.date());
    let mut end = next_month_start(now.date());
    for _ in 0..policy.keep_one_per_month {
        if let Some(snap) = latest_within(&ordered, start, end) {
            keep.insert(&snap.name);
        }
        end = start;
        start = previous_month_start(start);
    }

    let (keep, remove): (Vec<Snapshot>, Vec<Snapshot>) = ordered
        .iter()
        .cloned()
        .partition(|snap| keep.contains(snap.name.as_str()));
    RetentionPlan { keep, remove }
}

/// Latest snapshot with `min <= stamp < max`, if any.
fn latest_within(ordered: &[Snapshot], min: NaiveDateTime, max: NaiveDateTime) -> Option<&Snapshot> {
    ordered
        .iter()
        .filter(|s| min <= s.stamp && s.stamp < max)
        .max_by_key(|s| s.stamp)
}

fn month_start(date: NaiveDate) -> NaiveDateTime {
    first_of(date.year(), date.month())
}

fn next_month_start(date: NaiveDate) -> NaiveDateTime {
    if date.month() == 12 {
        first_of(date.year() + 1, 1)
    } else {
        first_of(date.year(), date.month() + 1)
    }
}

fn previous_month_start(start: NaiveDateTime) -> NaiveDateTime {
    if start.month() == 1 {
        first_of(start.year() - 1, 12)
    } else {
        first_of(start.year(), start.month() - 1)
    }
}

fn first_of(year: i32, month: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, 1)
        .expect("first of a month is always a valid date")
        .and_time(NaiveTime::MIN)
}
