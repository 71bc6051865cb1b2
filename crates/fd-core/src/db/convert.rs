//! Column conversions for the SQLite backend, which stores UUIDs, dates and
//! timestamps as TEXT.
//!
//! Timestamps are written in one fixed-width UTC format so that string
//! comparison in SQL matches chronological order.

use super::DbError;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use uuid::Uuid;

pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn fmt_opt_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(fmt_ts)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Serialization(format!("Invalid timestamp '{}': {}", s, e)))
}

pub fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, DbError> {
    s.as_deref().map(parse_ts).transpose()
}

pub fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn fmt_opt_date(d: Option<NaiveDate>) -> Option<String> {
    d.map(fmt_date)
}

pub fn parse_opt_date(s: Option<String>) -> Result<Option<NaiveDate>, DbError> {
    s.map(|s| {
        NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map_err(|e| DbError::Serialization(format!("Invalid date '{}': {}", s, e)))
    })
    .transpose()
}

pub fn parse_uuid(s: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(s).map_err(|e| DbError::Serialization(format!("Invalid UUID '{}': {}", s, e)))
}

pub fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>, DbError> {
    s.as_deref().map(parse_uuid).transpose()
}

pub fn opt_uuid(id: Option<Uuid>) -> Option<String> {
    id.map(|u| u.to_string())
}

/// Parses a stored enum column through its `from_db_str`.
pub fn parse_enum<T>(value: &str, parse: fn(&str) -> Option<T>, what: &str) -> Result<T, DbError> {
    parse(value).ok_or_else(|| DbError::Serialization(format!("Invalid {}: {}", what, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format_is_fixed_width_and_ordered() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        assert_eq!(fmt_ts(a), "2024-01-02T03:04:05.000000Z");
        assert!(fmt_ts(a) < fmt_ts(b));
        assert_eq!(parse_ts(&fmt_ts(b)).unwrap(), b);
    }

    #[test]
    fn test_parse_errors_are_serialization_errors() {
        assert!(matches!(parse_ts("yesterday"), Err(DbError::Serialization(_))));
        assert!(matches!(parse_uuid("nope"), Err(DbError::Serialization(_))));
        assert!(matches!(
            parse_opt_date(Some("2024-13-01".into())),
            Err(DbError::Serialization(_))
        ));
        assert_eq!(parse_opt_date(None).unwrap(), None);
    }
}
