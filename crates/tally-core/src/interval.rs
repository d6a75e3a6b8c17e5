//! UTC day boundaries and interval arithmetic.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A half-open time interval `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Interval {
    pub const fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }
}

/// Start of the UTC day containing `time`.
pub fn floor_day(time: DateTime<Utc>) -> DateTime<Utc> {
    time.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Whole UTC days starting at or after `floor_day(from)` and ending at or
/// before `to`.
pub fn days(from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Interval> {
    let mut days = Vec::new();
    let mut start = floor_day(from);
    while start + Duration::days(1) <= to {
        let end = start + Duration::days(1);
        days.push(Interval::new(start, end));
        start = end;
    }
    days
}

/// Parts of `range` not covered by any interval in `covered`.
///
/// `covered` may be unsorted and may overlap or extend past `range`.
pub fn missing_intervals(range: Interval, covered: &[Interval]) -> Vec<Interval> {
    let mut covered: Vec<Interval> = covered
        .iter()
        .filter(|interval| !interval.is_empty())
        .copied()
        .collect();
    covered.sort();

    let mut missing = Vec::new();
    let mut cursor = range.from;
    for interval in covered {
        if interval.to <= cursor {
            continue;
        }
        if interval.from >= range.to {
            break;
        }
        if interval.from > cursor {
            missing.push(Interval::new(cursor, interval.from));
        }
        cursor = interval.to;
        if cursor >= range.to {
            return missing;
        }
    }
    if cursor < range.to {
        missing.push(Interval::new(cursor, range.to));
    }
    missing
}
