//! Calendar attributes for the date dimension
//!
//! `date_spine` is the pure reference for what the `dim_dates` model builds;
//! the `season()` and `day_name()` template functions render the same tables
//! as SQL.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ethiopian seasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Season {
    /// Dry season
    Bega,
    /// Short rains
    Belg,
    /// Main rains
    Kiremt,
}

/// Months (1-12) of each season
pub const SEASONS: [(Season, [u32; 4]); 3] = [
    (Season::Bega, [10, 11, 12, 1]),
    (Season::Belg, [2, 3, 4, 5]),
    (Season::Kiremt, [6, 7, 8, 9]),
];

/// Day names indexed by day of week (0 = Sunday)
pub const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

impl Season {
    pub fn for_month(month: u32) -> Self {
        SEASONS
            .iter()
            .find(|(_, months)| months.contains(&month))
            .map(|(season, _)| *season)
            .unwrap_or(Season::Kiremt)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bega => "Bega",
            Self::Belg => "Belg",
            Self::Kiremt => "Kiremt",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the date dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    /// YYYYMMDD
    pub date_key: i64,
    pub full_date: NaiveDate,
    pub year: i32,
    pub quarter: u32,
    pub month: u32,
    pub day: u32,
    /// 0 = Sunday
    pub day_of_week: u32,
    pub day_name: String,
    pub is_weekend: bool,
    pub season: Season,
}

impl CalendarDay {
    pub fn from_date(date: NaiveDate) -> Self {
        let day_of_week = date.weekday().num_days_from_sunday();
        Self {
            date_key: i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day()),
            full_date: date,
            year: date.year(),
            quarter: (date.month() + 2) / 3,
            month: date.month(),
            day: date.day(),
            day_of_week,
            day_name: DAY_NAMES[day_of_week as usize].to_string(),
            is_weekend: day_of_week == 0 || day_of_week == 6,
            season: Season::for_month(date.month()),
        }
    }
}

/// Every day from `start` to `end` inclusive; empty when `start > end`
pub fn date_spine(start: NaiveDate, end: NaiveDate) -> Vec<CalendarDay> {
    let mut days = Vec::new();
    let mut current = Some(start);

    while let Some(date) = current.filter(|d| *d <= end) {
        days.push(CalendarDay::from_date(date));
        current = date.succ_opt();
    }

    days
}
