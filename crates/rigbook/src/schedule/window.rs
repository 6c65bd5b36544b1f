//! Inclusive date windows and the one overlap rule.
//!
//! Two windows `[s1, e1]` and `[s2, e2]` overlap iff `s1 <= e2 && s2 <= e1`.
//! Candidate search, the in-lock re-check and the conflict scan all go
//! through [`Window::overlaps`] or its SQL rendering [`overlap_sql`], so the
//! three can never disagree about what counts as a clash.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest window a single allocation request may ask for, in days.
pub const MAX_ALLOCATION_DAYS: u32 = 30;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("window start {start} is after end {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
    #[error("allocation must span at least 1 day")]
    Empty,
    #[error("allocation of {days} days exceeds the {max}-day maximum")]
    TooLong { days: u32, max: u32 },
    #[error("window arithmetic overflowed the calendar")]
    OutOfRange,
}

/// A closed date interval `[start, end]`. `start == end` is a one-day window.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "RawWindow")]
pub struct Window {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawWindow> for Window {
    type Error = WindowError;

    fn try_from(raw: RawWindow) -> Result<Self, Self::Error> {
        Window::new(raw.start, raw.end)
    }
}

impl Window {
    /// Rejects `start > end`. Length is not limited here; stored rows may
    /// legitimately be longer than a new request is allowed to be.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window of `days` days starting at `start` (`end = start + days - 1`).
    pub fn from_duration(start: NaiveDate, days: u32) -> Result<Self, WindowError> {
        if days == 0 {
            return Err(WindowError::Empty);
        }
        let end = start
            .checked_add_days(Days::new(u64::from(days - 1)))
            .ok_or(WindowError::OutOfRange)?;
        Ok(Self { start, end })
    }

    /// A window suitable for a new allocation: ordered and within
    /// `1..=MAX_ALLOCATION_DAYS` days.
    pub fn for_request(start: NaiveDate, end: NaiveDate) -> Result<Self, WindowError> {
        let window = Self::new(start, end)?;
        window.ensure_bookable()?;
        Ok(window)
    }

    pub fn ensure_bookable(&self) -> Result<(), WindowError> {
        let days = self.days();
        if days > MAX_ALLOCATION_DAYS {
            return Err(WindowError::TooLong {
                days,
                max: MAX_ALLOCATION_DAYS,
            });
        }
        Ok(())
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days covered, counting both ends.
    pub fn days(&self) -> u32 {
        let span = (self.end - self.start).num_days() + 1;
        u32::try_from(span).unwrap_or(u32::MAX)
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// The same-length window moved `days` days later.
    pub fn shifted(&self, days: u32) -> Result<Self, WindowError> {
        let delta = Days::new(u64::from(days));
        let start = self
            .start
            .checked_add_days(delta)
            .ok_or(WindowError::OutOfRange)?;
        let end = self
            .end
            .checked_add_days(delta)
            .ok_or(WindowError::OutOfRange)?;
        Ok(Self { start, end })
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// SQL form of [`Window::overlaps`] against the `start_date`/`end_date`
/// columns of `alias`, with the probe window bound at `$start_param` and
/// `$end_param`.
pub fn overlap_sql(alias: &str, start_param: u8, end_param: u8) -> String {
    format!("{alias}.start_date <= ${end_param} AND ${start_param} <= {alias}.end_date")
}
