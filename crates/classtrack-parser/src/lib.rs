//! Score-table text to [`EventRecord`] extraction.
//!
//! Accepts text copied from a classification record page. Each line is
//! matched independently; headers, footers and malformed rows are skipped.

use classtrack_core::EventRecord;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use time::{Date, Month};
use tracing::trace;

#[allow(clippy::expect_used)]
static CLASSIFIER_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<date>\d+/\d+/\d+)\s+(?P<key>\d{2}-\d{2})\s+(?P<club>.+\S)\s+(?P<flag>[A-Z])\s+(?P<percent>[\d.]+)\s+(?P<rate>[\d.]+)",
    )
    .expect("invalid classifier row regex")
});

#[allow(clippy::expect_used)]
static MAJOR_MATCH_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<date>\d+/\d+/\d+)\s+(?P<club>.+\S)\s+(?P<flag>[A-Z])\s+(?P<percent>[\d.]+)\s+-\s+-\s+Major Match$",
    )
    .expect("invalid major match row regex")
});

#[derive(Debug, Clone, PartialEq)]
pub struct ParseReport {
    pub records: Vec<EventRecord>,
    /// Non-blank lines that did not yield a record.
    pub skipped_lines: usize,
}

/// Parses one table row. Returns `None` for anything that is not a complete
/// classifier or major match row.
#[must_use]
pub fn parse_line(input: &str) -> Option<EventRecord> {
    let line = input.trim();
    if let Some(captures) = CLASSIFIER_ROW.captures(line) {
        return record_from(&captures, true);
    }
    MAJOR_MATCH_ROW
        .captures(line)
        .and_then(|captures| record_from(&captures, false))
}

#[must_use]
pub fn parse_text_input(input: &str) -> Vec<EventRecord> {
    parse_report(input).records
}

#[must_use]
pub fn parse_report(input: &str) -> ParseReport {
    let mut records = Vec::new();
    let mut skipped_lines = 0_usize;

    for (index, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(record) => records.push(record),
            None => {
                trace!(line_number = index + 1, "skipping unrecognized line");
                skipped_lines += 1;
            }
        }
    }

    ParseReport {
        records,
        skipped_lines,
    }
}

/// Parses `M/D/YY` or `M/D/YYYY`. Two-digit years 00-49 are 20xx and
/// 50-99 are 19xx.
#[must_use]
pub fn parse_score_date(raw: &str) -> Option<Date> {
    let mut parts = raw.trim().split('/');
    let (Some(month), Some(day), Some(year), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    let month = Month::try_from(month.parse::<u8>().ok()?).ok()?;
    let day = day.parse::<u8>().ok()?;
    let mut full_year = year.parse::<i32>().ok()?;
    if year.len() <= 2 {
        full_year += if full_year < 50 { 2000 } else { 1900 };
    }

    Date::from_calendar_date(full_year, month, day).ok()
}

fn record_from(captures: &Captures<'_>, keyed: bool) -> Option<EventRecord> {
    let occurred_on = parse_score_date(captures.name("date")?.as_str())?;
    let score = captures
        .name("percent")?
        .as_str()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())?;

    Some(EventRecord {
        occurred_on,
        event_key: if keyed {
            captures.name("key").map(|key| key.as_str().to_string())
        } else {
            None
        },
        score,
        origin: captures
            .name("club")
            .map(|club| club.as_str().trim().to_string()),
        status_flag: captures.name("flag").map(|flag| flag.as_str().to_string()),
        raw_rate: captures
            .name("rate")
            .and_then(|rate| rate.as_str().parse::<f64>().ok())
            .filter(|value| value.is_finite()),
    })
}
