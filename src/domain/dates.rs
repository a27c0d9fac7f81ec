use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime};

/// Parses a calendar date, accepting `YYYY-MM-DD` and anything that starts with
/// it (`2024-01-01 08:00:00`, RFC3339 timestamps).
pub fn parse_date(raw: &str) -> Option<Date> {
    let trimmed = raw.trim();
    let head = trimmed.get(..10)?;
    if trimmed.len() > 10 && !matches!(trimmed.as_bytes()[10], b' ' | b'T' | b't') {
        return None;
    }
    Date::parse(head, format_description!("[year]-[month]-[day]")).ok()
}

pub fn format_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string())
}

/// Longest duration accepted from input. Anything past it would run beyond
/// the last representable date anyway.
pub const MAX_DURATION_DAYS: i64 = 3_652_425;

pub fn duration_in_range(duration_days: i64) -> bool {
    (0..=MAX_DURATION_DAYS).contains(&duration_days)
}

/// Inclusive end date: a one-day activity ends on its start date. Spans past
/// `MAX_DURATION_DAYS` end on `Date::MAX`.
pub fn derive_end_date(start: Date, duration_days: i64) -> Date {
    let span = duration_days.saturating_sub(1).clamp(0, MAX_DURATION_DAYS);
    start.saturating_add(Duration::days(span))
}

pub fn derive_duration(start: Date, end: Date) -> i64 {
    (end - start).whole_days().max(0)
}

pub fn normalize_date(raw: Option<&str>) -> Option<String> {
    raw.and_then(parse_date).map(format_date)
}

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .expect("RFC3339 formatting for UTC timestamp should never fail")
}
