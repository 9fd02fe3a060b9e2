//! Weekly session times and the overlap rule used for conflict detection.

use crate::db::DbSession;
use crate::error::RegistrarError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

// "Mon 08:00-09:40", optionally followed by "@ Room 101"
static SESSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(mon|tue|wed|thu|fri|sat|sun)[a-z]*\s+(\d{1,2}):(\d{2})\s*-\s*(\d{1,2}):(\d{2})\s*(?:@\s*(.+?))?\s*$",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Weekday {
    Mon = 1,
    Tue = 2,
    Wed = 3,
    Thu = 4,
    Fri = 5,
    Sat = 6,
    Sun = 7,
}

impl Weekday {
    /// ISO day number, Monday = 1.
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Some(match n {
            1 => Weekday::Mon,
            2 => Weekday::Tue,
            3 => Weekday::Wed,
            4 => Weekday::Thu,
            5 => Weekday::Fri,
            6 => Weekday::Sat,
            7 => Weekday::Sun,
            _ => return None,
        })
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Some(match prefix.to_ascii_lowercase().as_str() {
            "mon" => Weekday::Mon,
            "tue" => Weekday::Tue,
            "wed" => Weekday::Wed,
            "thu" => Weekday::Thu,
            "fri" => Weekday::Fri,
            "sat" => Weekday::Sat,
            "sun" => Weekday::Sun,
            _ => return None,
        })
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Weekday::Mon => "Mon",
            Weekday::Tue => "Tue",
            Weekday::Wed => "Wed",
            Weekday::Thu => "Thu",
            Weekday::Fri => "Fri",
            Weekday::Sat => "Sat",
            Weekday::Sun => "Sun",
        }
    }
}

/// One weekly meeting: a day and a half-open minute range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionTime {
    pub day: Weekday,
    pub start_minute: u16,
    pub end_minute: u16,
}

impl SessionTime {
    pub fn new(day: Weekday, start_minute: u16, end_minute: u16) -> Result<Self, RegistrarError> {
        if start_minute >= end_minute || end_minute > 24 * 60 {
            return Err(RegistrarError::InvalidSchedule {
                input: format!("{} {}-{}", day.short_name(), start_minute, end_minute),
                reason: "start must be before end, within one day".to_string(),
            });
        }
        Ok(Self {
            day,
            start_minute,
            end_minute,
        })
    }

    /// Same day and intersecting ranges. Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &SessionTime) -> bool {
        self.day == other.day
            && self.start_minute < other.end_minute
            && other.start_minute < self.end_minute
    }

    /// Builds a session time from a stored row.
    pub fn from_row(row: &DbSession) -> Result<Self, RegistrarError> {
        let day = Weekday::from_number(row.day_of_week).ok_or_else(|| {
            RegistrarError::InvalidSchedule {
                input: format!("day {}", row.day_of_week),
                reason: "day of week must be 1-7".to_string(),
            }
        })?;
        Self::new(day, row.start_minute, row.end_minute)
    }
}

impl fmt::Display for SessionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:{:02}-{:02}:{:02}",
            self.day.short_name(),
            self.start_minute / 60,
            self.start_minute % 60,
            self.end_minute / 60,
            self.end_minute % 60
        )
    }
}

impl FromStr for SessionTime {
    type Err = RegistrarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_session(s).map(|(time, _)| time)
    }
}

/// Parses session notation such as `"Mon 08:00-09:40 @ Room 101"`.
///
/// Returns the session time and the room, if one was given.
pub fn parse_session(input: &str) -> Result<(SessionTime, Option<String>), RegistrarError> {
    let invalid = |reason: &str| RegistrarError::InvalidSchedule {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let caps = SESSION_REGEX
        .captures(input)
        .ok_or_else(|| invalid("expected e.g. 'Mon 08:00-09:40'"))?;

    let day = Weekday::from_prefix(&caps[1]).ok_or_else(|| invalid("unknown weekday"))?;
    let minute_of = |hour: &str, minute: &str| -> Result<u16, RegistrarError> {
        let hour: u16 = hour.parse().map_err(|_| invalid("bad hour"))?;
        let minute: u16 = minute.parse().map_err(|_| invalid("bad minute"))?;
        if hour > 24 || minute > 59 || (hour == 24 && minute > 0) {
            return Err(invalid("time out of range"));
        }
        Ok(hour * 60 + minute)
    };

    let start = minute_of(&caps[2], &caps[3])?;
    let end = minute_of(&caps[4], &caps[5])?;
    let room = caps.get(6).map(|m| m.as_str().to_string());

    let time = SessionTime::new(day, start, end).map_err(|_| invalid("start must be before end"))?;
    Ok((time, room))
}

/// Finds the first overlapping pair between two session sets.
pub fn first_overlap(
    candidate: &[SessionTime],
    existing: &[SessionTime],
) -> Option<(SessionTime, SessionTime)> {
    candidate.iter().find_map(|c| {
        existing
            .iter()
            .find(|e| c.overlaps(e))
            .map(|e| (*c, *e))
    })
}
