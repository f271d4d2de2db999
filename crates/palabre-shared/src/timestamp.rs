use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::{SystemTime, UNIX_EPOCH};

/// A nanoseconds-granularity Unix timestamp, represented as an integer.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default, Hash,
)]
#[serde(transparent)]
pub struct NanoTimestamp(pub u64);

impl NanoTimestamp {
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before unix epoch");
        Self(duration.as_nanos() as u64)
    }

    /// Canonical decimal string form, used as the per-message identity key.
    pub fn nanos_string(self) -> String {
        self.0.to_string()
    }

    pub fn to_datetime(self) -> Option<chrono::DateTime<chrono::Utc>> {
        let secs = i64::try_from(self.0 / 1_000_000_000).ok()?;
        let nsec = u32::try_from(self.0 % 1_000_000_000).ok()?;
        chrono::DateTime::from_timestamp(secs, nsec)
    }
}

impl std::fmt::Display for NanoTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A timestamp as either backend emits it: integer nanoseconds, a
/// digit-only string of nanoseconds, or an ISO-8601 datetime string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RawTimestamp {
    Nanos(u64),
    Text(String),
}

/// Normalize any wire timestamp into canonical nanoseconds.
///
/// Unparseable input maps to zero rather than an error; such messages sort
/// as the oldest in descending order and callers must tolerate that.
pub fn normalize(raw: &RawTimestamp) -> NanoTimestamp {
    match raw {
        RawTimestamp::Nanos(n) => NanoTimestamp(*n),
        RawTimestamp::Text(s) => normalize_str(s),
    }
}

pub fn normalize_str(value: &str) -> NanoTimestamp {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return NanoTimestamp(0);
    }
    if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return NanoTimestamp(trimmed.parse().unwrap_or(0));
    }
    parse_iso(trimmed).unwrap_or_default()
}

fn parse_iso(value: &str) -> Option<NanoTimestamp> {
    let value = truncate_fraction(value);

    // RFC 3339 carries its own zone offset ('Z' or +-HH:MM).
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(&value) {
        return Some(floor_nanos(dt.timestamp_nanos_opt()));
    }

    // Zoneless datetimes default to UTC.
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&value, fmt) {
            return Some(floor_nanos(naive.and_utc().timestamp_nanos_opt()));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(&value, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        return Some(floor_nanos(midnight.and_utc().timestamp_nanos_opt()));
    }

    None
}

/// Pre-epoch and overflowing instants floor at zero.
fn floor_nanos(nanos: Option<i64>) -> NanoTimestamp {
    NanoTimestamp(nanos.unwrap_or(0).max(0) as u64)
}

/// Cut fractional seconds beyond nanosecond precision so chrono accepts the
/// string; digits past the ninth carry no representable information.
fn truncate_fraction(value: &str) -> Cow<'_, str> {
    let Some(dot) = value.find('.') else {
        return Cow::Borrowed(value);
    };
    let frac_start = dot + 1;
    let frac_len = value[frac_start..]
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if frac_len <= 9 {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len());
    out.push_str(&value[..frac_start + 9]);
    out.push_str(&value[frac_start + frac_len..]);
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digit_string_roundtrip() {
        let ts = normalize_str("1700000000123456789");
        assert_eq!(ts, NanoTimestamp(1_700_000_000_123_456_789));
        assert_eq!(normalize_str(&ts.nanos_string()), ts);
    }

    #[test]
    fn test_integer_passthrough() {
        let raw = RawTimestamp::Nanos(42);
        assert_eq!(normalize(&raw), NanoTimestamp(42));
    }

    #[test]
    fn test_iso_with_zone() {
        let ts = normalize_str("2024-01-02T03:04:05Z");
        assert_eq!(ts, NanoTimestamp(1_704_164_645_000_000_000));
    }

    #[test]
    fn test_iso_offset_matches_utc() {
        let utc = normalize_str("2024-01-02T03:04:05Z");
        let offset = normalize_str("2024-01-02T04:04:05+01:00");
        assert_eq!(utc, offset);
    }

    #[test]
    fn test_zoneless_defaults_to_utc() {
        let zoneless = normalize_str("2024-01-02T03:04:05");
        let utc = normalize_str("2024-01-02T03:04:05Z");
        assert_eq!(zoneless, utc);
    }

    #[test]
    fn test_fractional_seconds_monotonic() {
        let a = normalize_str("2024-01-02T03:04:05.1Z");
        let b = normalize_str("2024-01-02T03:04:05.25Z");
        let c = normalize_str("2024-01-02T03:04:05.250000001Z");
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_fraction_beyond_nanos_truncated() {
        let nine = normalize_str("2024-01-02T03:04:05.123456789Z");
        let twelve = normalize_str("2024-01-02T03:04:05.123456789999Z");
        assert_eq!(nine, twelve);
    }

    #[test]
    fn test_unparseable_is_zero() {
        assert_eq!(normalize_str("not a timestamp"), NanoTimestamp(0));
        assert_eq!(normalize_str(""), NanoTimestamp(0));
        assert_eq!(normalize_str("12.5 bananas"), NanoTimestamp(0));
    }

    #[test]
    fn test_pre_epoch_floors_at_zero() {
        assert_eq!(
            normalize_str("1969-12-31T23:59:59Z"),
            NanoTimestamp(0)
        );
    }

    #[test]
    fn test_bare_date() {
        let date = normalize_str("2024-01-02");
        let midnight = normalize_str("2024-01-02T00:00:00Z");
        assert_eq!(date, midnight);
    }
}
