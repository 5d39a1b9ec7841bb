use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

/// Years at or below this are treated as noise (version numbers, ticket ids).
const MIN_PLAUSIBLE_YEAR: i32 = 2020;

static SLASH_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").unwrap());

static MONTH_NAME_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b",
    )
    .unwrap()
});

static DAY_MON_YY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})-(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)-(\d{2,4})\b")
        .unwrap()
});

/// Best-effort due-date extraction from free text.
///
/// An ordered chain of independent literal extractors, each returning
/// `Option<NaiveDate>`; the first pattern yielding a plausible date wins.
/// Relative phrases ("tomorrow", "next week") are deliberately not handled
/// here; a miss leaves the due date unset rather than guessing.
pub fn parse_due_date(text: &str) -> Option<NaiveDate> {
    parse_slash_date(text)
        .or_else(|| parse_month_name_date(text))
        .or_else(|| parse_day_mon_yy(text))
}

/// `DD/MM/YYYY`
fn parse_slash_date(text: &str) -> Option<NaiveDate> {
    for capture in SLASH_DATE.captures_iter(text) {
        let day: u32 = capture[1].parse().ok()?;
        let month: u32 = capture[2].parse().ok()?;
        let year: i32 = capture[3].parse().ok()?;
        if year <= MIN_PLAUSIBLE_YEAR {
            continue;
        }
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }
    None
}

/// `Month DD, YYYY`
fn parse_month_name_date(text: &str) -> Option<NaiveDate> {
    for capture in MONTH_NAME_DATE.captures_iter(text) {
        let month = month_number(&capture[1])?;
        let day: u32 = capture[2].parse().ok()?;
        let year: i32 = capture[3].parse().ok()?;
        if year <= MIN_PLAUSIBLE_YEAR {
            continue;
        }
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }
    None
}

/// `DD-Mon-YY` (two-digit years resolve into the 2000s)
fn parse_day_mon_yy(text: &str) -> Option<NaiveDate> {
    for capture in DAY_MON_YY.captures_iter(text) {
        let day: u32 = capture[1].parse().ok()?;
        let month = month_number(&capture[2])?;
        let mut year: i32 = capture[3].parse().ok()?;
        if year < 100 {
            year += 2000;
        }
        if year <= MIN_PLAUSIBLE_YEAR {
            continue;
        }
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }
    None
}

fn month_number(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    let number = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(number)
}
