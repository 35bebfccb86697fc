//! Lenient parsing of the date and duration strings podcast feeds emit.
//!
//! Publish dates go through an ordered ladder of formats; the first match wins.
//! A value no rung accepts is logged and yields `None`, which callers turn into
//! the zero timestamp rather than rejecting the entry.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

type Attempt = fn(&str) -> Option<DateTime<Utc>>;

/// Tried top to bottom.
const LADDER: &[(&str, Attempt)] = &[
    ("rfc2822", rfc2822),
    ("rfc3339", rfc3339),
    ("zoned", zoned),
    ("named-zone", named_zone),
    ("naive", naive),
    ("date-only", date_only),
];

const ZONED_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M %z",
    "%d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M %z",
    "%a, %d %B %Y %H:%M:%S %z",
    "%A, %d %B %Y %H:%M:%S %z",
    "%a, %e %b %Y %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%a, %d %b %Y", "%d %b %Y", "%B %d, %Y"];

// Zone names seen in the wild that rfc2822 parsing does not know.
const NAMED_ZONES: &[(&str, &str)] = &[
    ("UTC", "+0000"),
    ("Z", "+0000"),
    ("BST", "+0100"),
    ("CET", "+0100"),
    ("CEST", "+0200"),
    ("IST", "+0530"),
    ("AEST", "+1000"),
    ("AEDT", "+1100"),
];

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    for (name, attempt) in LADDER {
        if let Some(dt) = attempt(value) {
            tracing::trace!(format = *name, value, "parsed timestamp");
            return Some(dt);
        }
    }

    tracing::warn!(value, "unrecognised date format, using zero timestamp");
    None
}

fn rfc2822(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn zoned(value: &str) -> Option<DateTime<Utc>> {
    ZONED_FORMATS.iter().find_map(|fmt| {
        DateTime::parse_from_str(value, fmt)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn named_zone(value: &str) -> Option<DateTime<Utc>> {
    let (head, zone) = value.rsplit_once(' ')?;
    let offset = NAMED_ZONES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(zone))
        .map(|(_, offset)| *offset)?;
    let rewritten = format!("{head} {offset}");
    rfc2822(&rewritten).or_else(|| zoned(&rewritten))
}

fn naive(value: &str) -> Option<DateTime<Utc>> {
    NAIVE_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(value, fmt)
            .ok()
            .map(|dt| dt.and_utc())
    })
}

fn date_only(value: &str) -> Option<DateTime<Utc>> {
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(value, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    })
}

/// Parses `HH:MM:SS`, `MM:SS` or plain seconds. Anything malformed is 0.
pub fn parse_duration(raw: &str) -> i64 {
    let value = raw.trim();
    if value.is_empty() {
        return 0;
    }

    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() > 3 {
        tracing::debug!(value, "malformed duration");
        return 0;
    }

    let mut total = 0.0_f64;
    for part in &parts {
        match part.trim().parse::<f64>() {
            Ok(n) if n.is_finite() && n >= 0.0 => total = total * 60.0 + n,
            _ => {
                tracing::debug!(value, "malformed duration");
                return 0;
            }
        }
    }

    total.floor() as i64
}
