//! Market-hours calendar: a weekly schedule plus date exceptions.
//!
//! Weekdays are numbered 0 (Monday) through 6 (Sunday). Times are minutes
//! since midnight, 0 through 1439, and windows are inclusive at both ends.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike, Weekday};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::error::DeskError;

pub const LAST_MINUTE: u16 = 24 * 60 - 1;
pub const DEFAULT_OPEN_MINUTE: u16 = 9 * 60;
pub const DEFAULT_CLOSE_MINUTE: u16 = 17 * 60;

const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// An operator override for one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub weekday: u8,
    pub open_minute: u16,
    pub close_minute: u16,
    pub enabled: bool,
}

impl ScheduleEntry {
    pub fn new(
        weekday: u8,
        open_minute: u16,
        close_minute: u16,
        enabled: bool,
    ) -> Result<Self, DeskError> {
        validate_weekday(weekday)?;
        if !enabled {
            // A closed day keeps no hours of its own.
            return Ok(ScheduleEntry {
                weekday,
                open_minute: 0,
                close_minute: 0,
                enabled: false,
            });
        }
        let window = TradingWindow::new(open_minute, close_minute)?;
        Ok(ScheduleEntry {
            weekday,
            open_minute: window.open_minute,
            close_minute: window.close_minute,
            enabled: true,
        })
    }
}

/// A date on which the market stays closed regardless of weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarException {
    pub holiday_date: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TradingWindow {
    pub open_minute: u16,
    pub close_minute: u16,
}

impl TradingWindow {
    pub fn new(open_minute: u16, close_minute: u16) -> Result<Self, DeskError> {
        for (label, minute) in [("open", open_minute), ("close", close_minute)] {
            if minute > LAST_MINUTE {
                return Err(DeskError::InvalidSchedule {
                    reason: format!("{label} minute {minute} is outside 0..={LAST_MINUTE}"),
                });
            }
        }
        if open_minute > close_minute {
            return Err(DeskError::InvalidSchedule {
                reason: format!(
                    "opens at {} but closes at {}",
                    format_hhmm(open_minute),
                    format_hhmm(close_minute)
                ),
            });
        }
        Ok(TradingWindow {
            open_minute,
            close_minute,
        })
    }

    pub fn whole_day() -> Self {
        TradingWindow {
            open_minute: 0,
            close_minute: LAST_MINUTE,
        }
    }

    pub fn contains(&self, minute: u16) -> bool {
        self.open_minute <= minute && minute <= self.close_minute
    }
}

/// What a weekday without an operator override does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultHours {
    /// Monday–Friday inside the window, weekends closed.
    Weekdays(TradingWindow),
    AlwaysOpen,
    Closed,
}

impl Default for DefaultHours {
    fn default() -> Self {
        DefaultHours::Weekdays(TradingWindow {
            open_minute: DEFAULT_OPEN_MINUTE,
            close_minute: DEFAULT_CLOSE_MINUTE,
        })
    }
}

impl DefaultHours {
    pub fn window_for(&self, weekday: u8) -> Option<TradingWindow> {
        match self {
            DefaultHours::Weekdays(window) if weekday < 5 => Some(*window),
            DefaultHours::Weekdays(_) => None,
            DefaultHours::AlwaysOpen => Some(TradingWindow::whole_day()),
            DefaultHours::Closed => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HoursSource {
    Override,
    Default,
}

/// Effective hours for one weekday, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayHours {
    pub weekday: u8,
    /// `None` means closed all day.
    pub window: Option<TradingWindow>,
    pub source: HoursSource,
}

impl fmt::Display for DayHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = weekday_name(self.weekday);
        let source = match self.source {
            HoursSource::Override => "override",
            HoursSource::Default => "default",
        };
        match self.window {
            Some(w) => write!(
                f,
                "{name:<9} {}-{} ({source})",
                format_hhmm(w.open_minute),
                format_hhmm(w.close_minute)
            ),
            None => write!(f, "{name:<9} closed ({source})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarketCalendar {
    pub default_hours: DefaultHours,
}

impl MarketCalendar {
    pub fn new(default_hours: DefaultHours) -> Self {
        MarketCalendar { default_hours }
    }

    pub fn hours_for(&self, weekday: u8, entry: Option<&ScheduleEntry>) -> DayHours {
        match entry {
            Some(e) => DayHours {
                weekday,
                window: e.enabled.then_some(TradingWindow {
                    open_minute: e.open_minute,
                    close_minute: e.close_minute,
                }),
                source: HoursSource::Override,
            },
            None => DayHours {
                weekday,
                window: self.default_hours.window_for(weekday),
                source: HoursSource::Default,
            },
        }
    }

    /// `entry` is the override for `now`'s weekday, if any; `is_exception`
    /// says whether `now`'s date is a calendar exception.
    pub fn is_open(
        &self,
        now: NaiveDateTime,
        entry: Option<&ScheduleEntry>,
        is_exception: bool,
    ) -> bool {
        if is_exception {
            return false;
        }
        let weekday = weekday_index(now.weekday());
        debug_assert!(entry.is_none_or(|e| e.weekday == weekday));
        self.hours_for(weekday, entry)
            .window
            .is_some_and(|w| w.contains(minute_of_day(now)))
    }

    pub fn weekly_hours(&self, entries: &[ScheduleEntry]) -> Vec<DayHours> {
        (0..7u8)
            .map(|day| self.hours_for(day, entries.iter().find(|e| e.weekday == day)))
            .collect()
    }
}

pub fn validate_weekday(weekday: u8) -> Result<u8, DeskError> {
    if weekday > 6 {
        return Err(DeskError::InvalidSchedule {
            reason: format!("weekday {weekday} is outside 0 (Monday) ..= 6 (Sunday)"),
        });
    }
    Ok(weekday)
}

pub fn weekday_index(day: Weekday) -> u8 {
    day.num_days_from_monday() as u8
}

pub fn weekday_name(weekday: u8) -> &'static str {
    WEEKDAY_NAMES.get(weekday as usize).copied().unwrap_or("?")
}

/// Accepts `0`–`6` or a weekday name / three-letter abbreviation.
pub fn parse_weekday(raw: &str) -> Result<u8, DeskError> {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<u8>() {
        return validate_weekday(n);
    }
    Weekday::from_str(trimmed)
        .map(weekday_index)
        .map_err(|_| DeskError::InvalidSchedule {
            reason: format!("{trimmed:?} is not a weekday"),
        })
}

pub fn minute_of_day(now: NaiveDateTime) -> u16 {
    (now.hour() * 60 + now.minute()) as u16
}

pub fn format_hhmm(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Parses `HH:MM` (24-hour) into minutes since midnight.
pub fn parse_hhmm(raw: &str) -> Result<u16, DeskError> {
    let invalid = || DeskError::InvalidSchedule {
        reason: format!("{raw:?} is not a HH:MM time"),
    };
    let (h, m) = raw.trim().split_once(':').ok_or_else(invalid)?;
    let hours: u16 = h.parse().map_err(|_| invalid())?;
    let minutes: u16 = m.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    Ok(hours * 60 + minutes)
}
