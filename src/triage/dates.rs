//! Date expression parser: free text to an absolute point in time.
//!
//! Strategies, first success wins:
//! 1. Relative terms ("tomorrow", "próxima semana", ...)
//! 2. Strict absolute formats (day/month/year and ISO variants)
//! 3. "day N" / "dia N" within the current month
//!
//! Failure is an expected outcome (`DateParseError`), never a pipeline error.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use regex::Regex;

use crate::error::DateParseError;
use crate::triage::vocabulary::{RELATIVE_DATE_TERMS, RelativeOffset};

/// Absolute formats in match order. Two-digit-year variants come first so a
/// four-digit year is never read by `%y` (the trailing digits make it fail).
static ABSOLUTE_FORMATS: &[&str] = &[
    "%d/%m/%y",
    "%d/%m/%Y",
    "%d-%m-%y",
    "%d-%m-%Y",
    "%d.%m.%y",
    "%d.%m.%Y",
    "%Y-%m-%d",
    "%Y/%m/%d",
];

static DAY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:day|dia)\s+(\d{1,2})\b").expect("valid day-marker regex"));

/// Parse `text` relative to the current time.
pub fn parse(text: &str) -> Result<DateTime<Utc>, DateParseError> {
    parse_at(text, Utc::now())
}

/// Parse `text` relative to `now`.
pub fn parse_at(text: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, DateParseError> {
    let lowered = text.trim().to_lowercase();

    if let Some(resolved) = resolve_relative(&lowered, now) {
        return Ok(resolved);
    }
    if let Some(resolved) = resolve_absolute(&lowered) {
        return Ok(resolved);
    }
    if let Some(resolved) = resolve_day_of_month(&lowered, now) {
        return Ok(resolved);
    }

    Err(DateParseError {
        text: text.to_string(),
    })
}

fn resolve_relative(lowered: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (_, offset) = RELATIVE_DATE_TERMS
        .iter()
        .find(|(term, _)| lowered.contains(term))?;

    match *offset {
        RelativeOffset::Days(days) => now.checked_add_signed(Duration::days(days)),
        RelativeOffset::Months(months) => now.checked_add_months(Months::new(months)),
    }
}

fn resolve_absolute(lowered: &str) -> Option<DateTime<Utc>> {
    ABSOLUTE_FORMATS
        .iter()
        .filter(|format| four_digit_year(lowered, format))
        .find_map(|format| NaiveDate::parse_from_str(lowered, format).ok())
        .and_then(start_of_day)
}

/// `%Y` accepts any digit count; only exactly four digits are a year here.
fn four_digit_year(lowered: &str, format: &str) -> bool {
    if !format.contains("%Y") {
        return true;
    }
    let mut fields = lowered.split(['/', '-', '.']);
    let year = if format.starts_with("%Y") {
        fields.next()
    } else {
        fields.next_back()
    };
    year.is_some_and(|y| y.len() == 4 && y.bytes().all(|b| b.is_ascii_digit()))
}

fn resolve_day_of_month(lowered: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let caps = DAY_MARKER.captures(lowered)?;
    let day: u32 = caps.get(1)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(now.year(), now.month(), day).and_then(start_of_day)
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 14, 30, 0).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn today_is_now() {
        assert_eq!(parse_at("today", now()).unwrap(), now());
        assert_eq!(parse_at("Hoje", now()).unwrap(), now());
    }

    #[test]
    fn tomorrow_is_one_day_later() {
        let resolved = parse_at("tomorrow", now()).unwrap();
        assert_eq!(resolved, now() + Duration::days(1));
        assert_eq!(resolved.date_naive(), (now() + Duration::hours(24)).date_naive());
    }

    #[test]
    fn colloquial_phrasings_share_offsets() {
        assert_eq!(
            parse_at("amanhã", now()).unwrap(),
            parse_at("tomorrow", now()).unwrap()
        );
        assert_eq!(
            parse_at("semana que vem", now()).unwrap(),
            parse_at("next week", now()).unwrap()
        );
        assert_eq!(
            parse_at("mês que vem", now()).unwrap(),
            parse_at("next month", now()).unwrap()
        );
    }

    #[test]
    fn next_month_adds_calendar_month() {
        let end_of_jan = Utc.with_ymd_and_hms(2026, 1, 31, 9, 0, 0).unwrap();
        // Clamped to the last day of February.
        assert_eq!(
            parse_at("next month", end_of_jan).unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 28, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn relative_term_inside_longer_text() {
        let resolved = parse_at("até amanhã cedo", now()).unwrap();
        assert_eq!(resolved, now() + Duration::days(1));
    }

    #[test]
    fn absolute_day_month_year() {
        assert_eq!(parse_at("25/12/2026", now()).unwrap(), ymd(2026, 12, 25));
        assert_eq!(parse_at("25/12/26", now()).unwrap(), ymd(2026, 12, 25));
        assert_eq!(parse_at("05-04-2026", now()).unwrap(), ymd(2026, 4, 5));
        assert_eq!(parse_at("05.04.26", now()).unwrap(), ymd(2026, 4, 5));
    }

    #[test]
    fn three_digit_year_is_rejected() {
        assert!(parse_at("25/12/202", now()).is_err());
        assert!(parse_at("25-12-202", now()).is_err());
        assert!(parse_at("202-12-25", now()).is_err());
        assert!(parse_at("25/12/20266", now()).is_err());
    }

    #[test]
    fn absolute_iso() {
        assert_eq!(parse_at("2026-07-01", now()).unwrap(), ymd(2026, 7, 1));
        assert_eq!(parse_at("2026/07/01", now()).unwrap(), ymd(2026, 7, 1));
    }

    #[test]
    fn day_marker_uses_current_month() {
        assert_eq!(parse_at("dia 15", now()).unwrap(), ymd(2026, 3, 15));
        assert_eq!(parse_at("by day 3", now()).unwrap(), ymd(2026, 3, 3));
    }

    #[test]
    fn day_marker_out_of_range_fails() {
        let feb = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        assert!(parse_at("dia 30", feb).is_err());
    }

    #[test]
    fn unparseable_text_returns_error() {
        let err = parse_at("sometime soon", now()).unwrap_err();
        assert_eq!(err.text, "sometime soon");
        assert!(parse_at("", now()).is_err());
        assert!(parse_at("99/99/9999", now()).is_err());
        assert!(parse_at("15:00", now()).is_err());
    }
}
