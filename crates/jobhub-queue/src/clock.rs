//! Timestamp helpers.
//!
//! All timestamps are truncated to microseconds so that values read back from
//! the SQLite store compare equal to the ones written.

use chrono::{DateTime, Local, SecondsFormat, SubsecRound, TimeZone, Utc};

/// Current time at microsecond precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC3339 text. Lexical order equals time order.
pub fn to_text(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn from_text(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Start of the current local day, used for "today" counters.
pub fn local_midnight() -> DateTime<Utc> {
    let today = Local::now().date_naive();
    today
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| now() - chrono::Duration::hours(24))
}
