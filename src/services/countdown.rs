//! Record countdown: time left in a `"h:mm AM - h:mm PM"` window.
//!
//! Display only. The window is re-anchored to the current day on every
//! computation; an end at or before the start falls on the next day.

use std::fmt;

use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, Time};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CountdownError {
    #[error("time range must look like `h:mm AM - h:mm PM`: {0}")]
    Malformed(String),
    #[error("invalid clock time `{value}`: {reason}")]
    Clock { value: String, reason: String },
}

impl crate::frame::ErrorCode for CountdownError {
    fn error_code(&self) -> &'static str {
        "E_INVALID_TIME_RANGE"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Left(Duration),
    Ended,
}

impl Remaining {
    #[must_use]
    pub fn is_ended(self) -> bool {
        matches!(self, Self::Ended)
    }
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = match self {
            Self::Left(left) => left.whole_seconds().max(0),
            Self::Ended => 0,
        };
        write!(f, "{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// A parsed capture window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: Time,
    pub end: Time,
}

impl Window {
    pub fn parse(range: &str) -> Result<Self, CountdownError> {
        let Some((start, end)) = range.split_once('-') else {
            return Err(CountdownError::Malformed(range.to_string()));
        };
        Ok(Self { start: parse_clock(start)?, end: parse_clock(end)? })
    }

    /// Time left from `now` until the end of today's window.
    #[must_use]
    pub fn remaining(&self, now: PrimitiveDateTime) -> Remaining {
        let date = now.date();
        let mut end = PrimitiveDateTime::new(date, self.end);
        if self.end <= self.start {
            let Some(next) = date.next_day() else {
                return Remaining::Ended;
            };
            end = PrimitiveDateTime::new(next, self.end);
        }
        let left = end - now;
        if left.is_positive() { Remaining::Left(left) } else { Remaining::Ended }
    }
}

pub fn remaining(range: &str, now: PrimitiveDateTime) -> Result<Remaining, CountdownError> {
    Ok(Window::parse(range)?.remaining(now))
}

/// Wall clock in the local zone, or UTC when the offset is unknown.
#[must_use]
pub fn local_now() -> PrimitiveDateTime {
    let now = match OffsetDateTime::now_local() {
        Ok(now) => now,
        Err(_) => OffsetDateTime::now_utc(),
    };
    PrimitiveDateTime::new(now.date(), now.time())
}

fn parse_clock(raw: &str) -> Result<Time, CountdownError> {
    let format = format_description!("[hour repr:12 padding:none]:[minute] [period case_sensitive:false]");
    let value = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    Time::parse(&value, &format).map_err(|err| CountdownError::Clock { value, reason: err.to_string() })
}

#[cfg(test)]
#[path = "countdown_test.rs"]
mod tests;
