//! Calendar helpers: reporting periods and natural-language date phrases.

use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;

/// A reporting period relative to "today".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
}

impl Period {
    /// Inclusive `(start, end)` range. Weeks start on Monday; "this week" and
    /// "this month" end today.
    pub fn range(self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            Self::Today => (today, today),
            Self::Yesterday => {
                let y = today - Duration::days(1);
                (y, y)
            }
            Self::ThisWeek => (start_of_week(today), today),
            Self::LastWeek => {
                let start = start_of_week(today) - Duration::days(7);
                (start, start + Duration::days(6))
            }
            Self::ThisMonth => (today.with_day(1).unwrap_or(today), today),
            Self::LastMonth => {
                let first_of_this = today.with_day(1).unwrap_or(today);
                let end = first_of_this - Duration::days(1);
                (end.with_day(1).unwrap_or(end), end)
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::ThisWeek => "this week",
            Self::LastWeek => "last week",
            Self::ThisMonth => "this month",
            Self::LastMonth => "last month",
        }
    }
}

fn start_of_week(day: NaiveDate) -> NaiveDate {
    day - Duration::days(day.weekday().num_days_from_monday() as i64)
}

const WEEKDAYS: [(&str, Weekday); 7] = [
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sunday", Weekday::Sun),
];

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());
static DMY_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4}|\d{2})\b").unwrap());

/// Parse a weekday name (`"friday"`, case-insensitive).
pub fn parse_weekday(name: &str) -> Option<Weekday> {
    let lower = name.to_lowercase();
    WEEKDAYS
        .iter()
        .find(|(n, _)| *n == lower)
        .map(|(_, w)| *w)
}

/// Find a date mentioned in free text.
///
/// Recognizes `today`, `yesterday`, `tomorrow`, weekday names (most recent
/// occurrence, one week further back with `last`), ISO dates and
/// day-first dates (`25/3/2025`, `25-03-25`; two-digit years below 50 are 20xx).
pub fn parse_date_phrase(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lower = text.to_lowercase();

    if lower.contains("today") {
        return Some(today);
    }
    if lower.contains("yesterday") {
        return Some(today - Duration::days(1));
    }
    if lower.contains("tomorrow") {
        return Some(today + Duration::days(1));
    }

    for (name, weekday) in WEEKDAYS {
        if lower.contains(name) {
            let today_idx = today.weekday().num_days_from_monday() as i64;
            let target_idx = weekday.num_days_from_monday() as i64;
            let mut back = (today_idx - target_idx).rem_euclid(7);
            if lower.contains(&format!("last {name}")) {
                back += 7;
            }
            return Some(today - Duration::days(back));
        }
    }

    if let Some(caps) = ISO_DATE.captures(text) {
        let (y, m, d) = (caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?);
        if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
            return Some(date);
        }
    }

    if let Some(caps) = DMY_DATE.captures(text) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let mut year: i32 = caps[3].parse().ok()?;
        if caps[3].len() == 2 {
            year += if year < 50 { 2000 } else { 1900 };
        }
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    None
}
