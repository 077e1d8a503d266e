//! Date windows and the range-spec grammar.
//!
//! A [`RangeSpec`] names a reporting period (`90d`, `Q1-2026`, `2026`,
//! `2026-01-01:2026-03-31`) and resolves to a half-open [`Window`]:
//! inclusive on `since`, exclusive on `until`. Range specs map 1-1 to
//! cache-file stems, so parsing and formatting must round-trip.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Day counts accepted by the `Nd` form.
const ALLOWED_DAY_SPANS: [u32; 5] = [30, 60, 90, 180, 365];

/// Errors from parsing or resolving a range spec.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RangeSpecError {
    #[error("unrecognized range spec: {0:?}")]
    Unrecognized(String),

    #[error("day span {0} not allowed (expected one of 30, 60, 90, 180, 365)")]
    DaySpan(u32),

    #[error("quarter must be 1-4, got {0}")]
    Quarter(u8),

    #[error("explicit range end {end} precedes start {start}")]
    Inverted { start: NaiveDate, end: NaiveDate },
}

/// An absolute half-open date window `[since, until)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Inclusive start.
    pub since: DateTime<Utc>,
    /// Exclusive end.
    pub until: DateTime<Utc>,
}

impl Window {
    /// Build a window, clamping `until` to be no earlier than `since`.
    #[must_use]
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            since,
            until: until.max(since),
        }
    }

    /// Membership test: `since <= t < until`.
    #[must_use]
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.since <= t && t < self.until
    }

    /// Window length in whole days (fractional days rounded up).
    #[must_use]
    pub fn len_days(&self) -> i64 {
        let seconds = (self.until - self.since).num_seconds();
        (seconds + 86_399) / 86_400
    }

    /// `since == until` yields an empty window and empty metrics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.since >= self.until
    }

    /// Shift both bounds back by `days`. Used for time-offset alignment
    /// against a historical snapshot; both upstream clients must receive
    /// the same shift or cross-service correlation silently fails.
    #[must_use]
    pub fn shifted_back(&self, days: u32) -> Self {
        let delta = Duration::days(i64::from(days));
        Self {
            since: self.since - delta,
            until: self.until - delta,
        }
    }

    /// Intersection with another window; `None` when disjoint.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let since = self.since.max(other.since);
        let until = self.until.min(other.until);
        (since < until).then_some(Self { since, until })
    }
}

/// A named reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeSpec {
    /// Trailing `N` days ending now.
    Days(u32),
    /// Calendar quarter.
    Quarter { quarter: u8, year: i32 },
    /// Calendar year.
    Year(i32),
    /// Explicit inclusive date range.
    Explicit { start: NaiveDate, end: NaiveDate },
}

impl RangeSpec {
    /// Resolve to an absolute window. `now` anchors the trailing-days
    /// form; calendar forms ignore it.
    #[must_use]
    pub fn window(&self, now: DateTime<Utc>) -> Window {
        match *self {
            Self::Days(n) => Window::new(now - Duration::days(i64::from(n)), now),
            Self::Quarter { quarter, year } => {
                let start_month = u32::from(quarter - 1) * 3 + 1;
                let start = first_day(year, start_month);
                let end = if quarter == 4 {
                    first_day(year + 1, 1)
                } else {
                    first_day(year, start_month + 3)
                };
                Window::new(start, end)
            }
            Self::Year(year) => Window::new(first_day(year, 1), first_day(year + 1, 1)),
            Self::Explicit { start, end } => Window::new(
                midnight(start),
                midnight(end + Duration::days(1)),
            ),
        }
    }

    /// Path-safe stem for cache-file naming (`:` is not portable in
    /// file names, so explicit ranges use `_`).
    #[must_use]
    pub fn file_stem(&self) -> String {
        match *self {
            Self::Explicit { start, end } => format!("{start}_{end}"),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Days(n) => write!(f, "{n}d"),
            Self::Quarter { quarter, year } => write!(f, "Q{quarter}-{year}"),
            Self::Year(year) => write!(f, "{year}"),
            Self::Explicit { start, end } => write!(f, "{start}:{end}"),
        }
    }
}

impl FromStr for RangeSpec {
    type Err = RangeSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unrecognized = || RangeSpecError::Unrecognized(s.to_string());

        if let Some(days) = s.strip_suffix('d') {
            let n: u32 = days.parse().map_err(|_| unrecognized())?;
            if !ALLOWED_DAY_SPANS.contains(&n) {
                return Err(RangeSpecError::DaySpan(n));
            }
            return Ok(Self::Days(n));
        }

        if let Some(rest) = s.strip_prefix('Q') {
            let (q, year) = rest.split_once('-').ok_or_else(unrecognized)?;
            let quarter: u8 = q.parse().map_err(|_| unrecognized())?;
            if !(1..=4).contains(&quarter) {
                return Err(RangeSpecError::Quarter(quarter));
            }
            let year: i32 = year.parse().map_err(|_| unrecognized())?;
            return Ok(Self::Quarter { quarter, year });
        }

        if let Some((start, end)) = s.split_once(':') {
            let start: NaiveDate = start.parse().map_err(|_| unrecognized())?;
            let end: NaiveDate = end.parse().map_err(|_| unrecognized())?;
            if end < start {
                return Err(RangeSpecError::Inverted { start, end });
            }
            return Ok(Self::Explicit { start, end });
        }

        if s.len() == 4 {
            if let Ok(year) = s.parse::<i32>() {
                return Ok(Self::Year(year));
            }
        }

        Err(unrecognized())
    }
}

impl Serialize for RangeSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RangeSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn first_day(year: i32, month: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC)
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}
