/// Timestamp coercion and date windows
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{FeedError, Result};

/// Formats tried for timestamps carrying their own offset
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Formats tried for naive timestamps (interpreted in the configured zone)
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
];

/// Epoch integers above this are taken as milliseconds
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Parse an IANA timezone name such as "UTC" or "America/New_York"
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| FeedError::InvalidTimezone(name.to_string()))
}

/// Coerce a raw timestamp cell to UTC; naive values are read in `naive_tz`
pub fn coerce_timestamp(raw: &str, naive_tz: Tz) -> Result<DateTime<Utc>> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(FeedError::InvalidTimestamp("empty timestamp".to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return localize(naive, naive_tz, value);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return localize(naive, naive_tz, value);
        }
    }
    if let Ok(epoch) = value.parse::<i64>() {
        let parsed = if epoch.unsigned_abs() >= EPOCH_MILLIS_THRESHOLD.unsigned_abs() {
            DateTime::from_timestamp_millis(epoch)
        } else {
            DateTime::from_timestamp(epoch, 0)
        };
        return parsed.ok_or_else(|| FeedError::InvalidTimestamp(value.to_string()));
    }

    Err(FeedError::InvalidTimestamp(value.to_string()))
}

fn localize(naive: NaiveDateTime, tz: Tz, raw: &str) -> Result<DateTime<Utc>> {
    // DST folds resolve to the earlier instant; gaps are rejected
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| FeedError::InvalidTimestamp(format!("{} does not exist in {}", raw, tz)))
}

/// Anything accepted as a date-range bound; naive inputs are assumed UTC
pub trait IntoUtc {
    fn into_utc(self) -> Result<DateTime<Utc>>;
}

impl IntoUtc for DateTime<Utc> {
    fn into_utc(self) -> Result<DateTime<Utc>> {
        Ok(self)
    }
}

impl IntoUtc for DateTime<FixedOffset> {
    fn into_utc(self) -> Result<DateTime<Utc>> {
        Ok(self.with_timezone(&Utc))
    }
}

impl IntoUtc for DateTime<Tz> {
    fn into_utc(self) -> Result<DateTime<Utc>> {
        Ok(self.with_timezone(&Utc))
    }
}

impl IntoUtc for NaiveDateTime {
    fn into_utc(self) -> Result<DateTime<Utc>> {
        Ok(Utc.from_utc_datetime(&self))
    }
}

impl IntoUtc for NaiveDate {
    fn into_utc(self) -> Result<DateTime<Utc>> {
        self.and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or_else(|| FeedError::InvalidTimestamp(self.to_string()))
    }
}

impl IntoUtc for &str {
    fn into_utc(self) -> Result<DateTime<Utc>> {
        coerce_timestamp(self, Tz::UTC)
    }
}

impl IntoUtc for String {
    fn into_utc(self) -> Result<DateTime<Utc>> {
        coerce_timestamp(&self, Tz::UTC)
    }
}

impl IntoUtc for &String {
    fn into_utc(self) -> Result<DateTime<Utc>> {
        coerce_timestamp(self, Tz::UTC)
    }
}

/// Closed `[start, end]` window; a missing bound is unbounded on that side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateWindow {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        DateWindow { start, end }
    }

    pub fn unbounded() -> Self {
        DateWindow::default()
    }

    /// Build from optional config strings, rejecting inverted windows.
    /// Naive bounds are UTC, like every other date-range bound.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let start = start.map(IntoUtc::into_utc).transpose()?;
        let end = end.map(IntoUtc::into_utc).transpose()?;
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(FeedError::ConfigError(format!(
                    "window start {} is after end {}",
                    s, e
                )));
            }
        }
        Ok(DateWindow { start, end })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_coerce_formats() {
        let expected = utc(2024, 1, 2, 9, 30, 0);
        assert_eq!(coerce_timestamp("2024-01-02T09:30:00Z", Tz::UTC).unwrap(), expected);
        assert_eq!(coerce_timestamp("2024-01-02 09:30:00", Tz::UTC).unwrap(), expected);
        assert_eq!(coerce_timestamp("2024-01-02 09:30", Tz::UTC).unwrap(), expected);
        assert_eq!(coerce_timestamp("2024-01-02T04:30:00-05:00", Tz::UTC).unwrap(), expected);
        assert_eq!(coerce_timestamp("2024-01-02 10:30:00+01:00", Tz::UTC).unwrap(), expected);
        assert_eq!(coerce_timestamp("1704187800", Tz::UTC).unwrap(), expected);
        assert_eq!(coerce_timestamp("1704187800000", Tz::UTC).unwrap(), expected);
        assert_eq!(
            coerce_timestamp("2024-01-02", Tz::UTC).unwrap(),
            utc(2024, 1, 2, 0, 0, 0)
        );
    }

    #[test]
    fn test_naive_in_configured_zone() {
        let tz = parse_timezone("America/New_York").unwrap();
        // EST is UTC-5 in January
        assert_eq!(
            coerce_timestamp("2024-01-02 09:30:00", tz).unwrap(),
            utc(2024, 1, 2, 14, 30, 0)
        );
        // Explicit offsets ignore the configured zone
        assert_eq!(
            coerce_timestamp("2024-01-02T09:30:00Z", tz).unwrap(),
            utc(2024, 1, 2, 9, 30, 0)
        );
    }

    #[test]
    fn test_coerce_rejects_garbage() {
        assert!(coerce_timestamp("", Tz::UTC).is_err());
        assert!(coerce_timestamp("not a date", Tz::UTC).is_err());
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_window_is_closed() {
        let window = DateWindow::parse(Some("2024-01-02"), Some("2024-01-03")).unwrap();
        assert!(window.contains(utc(2024, 1, 2, 0, 0, 0)));
        assert!(window.contains(utc(2024, 1, 3, 0, 0, 0)));
        assert!(!window.contains(utc(2024, 1, 3, 0, 0, 1)));
        assert!(!window.contains(utc(2024, 1, 1, 23, 59, 59)));

        assert!(DateWindow::unbounded().contains(utc(1990, 1, 1, 0, 0, 0)));
        assert!(DateWindow::parse(Some("2024-02-01"), Some("2024-01-01")).is_err());
    }

    #[test]
    fn test_extreme_epoch_is_rejected_not_panicking() {
        assert!(coerce_timestamp("-9223372036854775808", Tz::UTC).is_err());
        assert!(coerce_timestamp("9223372036854775807", Tz::UTC).is_err());
        assert_eq!(
            coerce_timestamp("-1704187800000", Tz::UTC).unwrap(),
            DateTime::from_timestamp_millis(-1_704_187_800_000).unwrap()
        );
    }

    #[test]
    fn test_window_bounds_ignore_cell_zone() {
        let window = DateWindow::parse(Some("2024-01-02"), None).unwrap();
        assert_eq!(window.start, Some(utc(2024, 1, 2, 0, 0, 0)));
        assert!(window.contains(utc(2024, 1, 2, 1, 0, 0)));
    }

    #[test]
    fn test_into_utc_bounds() {
        let naive = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(naive.into_utc().unwrap(), utc(2024, 5, 1, 0, 0, 0));
        assert_eq!("2024-05-01 12:00".into_utc().unwrap(), utc(2024, 5, 1, 12, 0, 0));
    }
}
