//! Event time reconstruction.
//!
//! Feeds carry time-of-day as a packed decimal `HHMMSSffffff` with leading
//! zeros dropped (`91814838927` is 09:18:14.838927). The calendar date is
//! never in the record; it comes from the run.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

/// Width of a fully padded packed time-of-day.
pub const PACKED_TIME_DIGITS: usize = 12;

const MAX_PACKED: u64 = 999_999_999_999;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("packed time '{0}' is not a decimal number")]
    NotDecimal(String),

    #[error("packed time {0} has more than 12 digits")]
    TooWide(u64),

    #[error("packed time {packed} is out of range ({hour:02}:{minute:02}:{second:02})")]
    OutOfRange {
        packed: u64,
        hour: u32,
        minute: u32,
        second: u32,
    },
}

/// A packed `HHMMSSffffff` time-of-day value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackedTime(u64);

impl PackedTime {
    pub fn new(packed: u64) -> Result<Self, TimeError> {
        if packed > MAX_PACKED {
            return Err(TimeError::TooWide(packed));
        }
        Ok(Self(packed))
    }

    /// Parse the textual field of a delimited record.
    pub fn parse(field: &str) -> Result<Self, TimeError> {
        let field = field.trim();
        if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimeError::NotDecimal(field.to_string()));
        }
        if field.len() > PACKED_TIME_DIGITS {
            let packed = field.parse().unwrap_or(u64::MAX);
            return Err(TimeError::TooWide(packed));
        }
        let packed = field
            .parse()
            .map_err(|_| TimeError::NotDecimal(field.to_string()))?;
        Self::new(packed)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Split into a wall-clock time with microsecond precision.
    pub fn to_time(self) -> Result<NaiveTime, TimeError> {
        let hour = (self.0 / 10_000_000_000) as u32;
        let minute = ((self.0 / 100_000_000) % 100) as u32;
        let second = ((self.0 / 1_000_000) % 100) as u32;
        let micro = (self.0 % 1_000_000) as u32;

        // No leap seconds in feed time.
        if hour > 23 || minute > 59 || second > 59 {
            return Err(TimeError::OutOfRange {
                packed: self.0,
                hour,
                minute,
                second,
            });
        }
        NaiveTime::from_hms_micro_opt(hour, minute, second, micro).ok_or(TimeError::OutOfRange {
            packed: self.0,
            hour,
            minute,
            second,
        })
    }

    /// Combine with the run's calendar date.
    pub fn on(self, date: NaiveDate) -> Result<NaiveDateTime, TimeError> {
        Ok(date.and_time(self.to_time()?))
    }
}

/// Microseconds since the Unix epoch, treating the naive instant as UTC.
///
/// This is the physical value stored in the `event_time` column.
#[inline]
pub fn epoch_micros(instant: NaiveDateTime) -> i64 {
    instant.and_utc().timestamp_micros()
}

/// Inverse of [`epoch_micros`].
pub fn from_epoch_micros(micros: i64) -> Option<NaiveDateTime> {
    chrono::DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}
