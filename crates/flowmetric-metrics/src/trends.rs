//! Weekly trend series.
//!
//! A trend is a sorted sequence of `(week-start, value)` points covering
//! every ISO week (Monday start, UTC) touched by the window. Weeks with
//! no observations yield `None`, never zero.

use crate::stats::median;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use flowmetric_types::{TrendPoint, Window};
use std::collections::BTreeMap;

/// Monday of the ISO week containing `date`.
#[must_use]
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Per-week observation counts over the window.
#[must_use]
pub fn weekly_counts<I>(timestamps: I, window: &Window) -> Vec<TrendPoint>
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let mut buckets: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for t in timestamps {
        if window.contains(t) {
            *buckets.entry(week_start(t.date_naive())).or_default() += 1;
        }
    }
    series(window, |week| buckets.get(&week).map(|&count| count as f64))
}

/// Per-week median of `(timestamp, value)` observations over the window.
#[must_use]
pub fn weekly_medians<I>(observations: I, window: &Window) -> Vec<TrendPoint>
where
    I: IntoIterator<Item = (DateTime<Utc>, f64)>,
{
    let mut buckets: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for (t, value) in observations {
        if window.contains(t) {
            buckets.entry(week_start(t.date_naive())).or_default().push(value);
        }
    }
    series(window, |week| buckets.get(&week).and_then(|v| median(v)))
}

fn series<F>(window: &Window, value_for: F) -> Vec<TrendPoint>
where
    F: Fn(NaiveDate) -> Option<f64>,
{
    if window.is_empty() {
        return Vec::new();
    }
    let first = week_start(window.since.date_naive());
    // The instant `until` is exclusive, so back off one second.
    let last = week_start((window.until - Duration::seconds(1)).date_naive());

    let mut points = Vec::new();
    let mut week = first;
    while week <= last {
        points.push(TrendPoint {
            week_start: week,
            value: value_for(week),
        });
        week += Duration::weeks(1);
    }
    points
}
