//! Half-open time intervals used for windows, periods and chunk timeframes.
//!
//! A `TimeFrame` is `[start, end)` where either bound may be absent
//! (unbounded on that side). Emptiness is tracked explicitly rather than
//! derived from the bounds, so a degenerate `[t, t]` frame describing a
//! single-row chunk is distinct from "no data".

use std::fmt;

use chrono::{DateTime, Utc};

/// A possibly-unbounded, possibly-empty half-open time interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeFrame {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    empty: bool,
}

impl TimeFrame {
    /// The interval covering all time.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// The empty interval.
    pub fn empty() -> Self {
        TimeFrame {
            start: None,
            end: None,
            empty: true,
        }
    }

    /// Bounded interval between `start` and `end`.
    ///
    /// Returns the empty frame when `start > end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::from_bounds(Some(start), Some(end))
    }

    /// Interval with optional bounds on either side.
    pub fn from_bounds(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        match (start, end) {
            (Some(s), Some(e)) if s > e => Self::empty(),
            _ => TimeFrame {
                start,
                end,
                empty: false,
            },
        }
    }

    /// Lower bound (inclusive), if any.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start
    }

    /// Upper bound (exclusive for filtering), if any.
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    /// True if this frame contains no instants.
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// True if at least one bound is set.
    pub fn is_bounded(&self) -> bool {
        !self.empty && (self.start.is_some() || self.end.is_some())
    }

    /// Half-open membership test: `start <= ts < end`.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        if self.empty {
            return false;
        }
        self.start.is_none_or(|s| ts >= s) && self.end.is_none_or(|e| ts < e)
    }

    /// Intersection of two frames.
    ///
    /// The later start and the earlier end win; the result is empty when
    /// either input is empty or when the bounds cross (`start >= end`).
    pub fn intersect(&self, other: &TimeFrame) -> TimeFrame {
        if self.empty || other.empty {
            return TimeFrame::empty();
        }

        let start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        match (start, end) {
            (Some(s), Some(e)) if s >= e => TimeFrame::empty(),
            _ => TimeFrame {
                start,
                end,
                empty: false,
            },
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.empty {
            return write!(f, "empty");
        }
        let render = |b: Option<DateTime<Utc>>| b.map(|t| t.to_rfc3339()).unwrap_or_default();
        // A single-instant frame is closed on both sides.
        let close = match (self.start, self.end) {
            (Some(s), Some(e)) if s == e => ']',
            _ => ')',
        };
        write!(f, "[{}, {}{close}", render(self.start), render(self.end))
    }
}
