// src/types/timestamp.rs
//! Lenient ISO-8601 timestamps: the API emits both offset-aware and naive (UTC) forms

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// `#[serde(with = "timestamp::optional")]` for `Option<DateTime<Utc>>` fields.
/// Unparseable values become `None` instead of failing the whole payload.
pub mod optional {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse_timestamp))
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_some(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_offset_and_naive_forms() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2025-03-01T09:30:00+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-01T10:30:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-01T09:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-01 09:30:00"), Some(expected));
    }

    #[test]
    fn test_parse_fractional_seconds() {
        let parsed = parse_timestamp("2025-03-01T09:30:00.123456").unwrap();
        assert_eq!(parsed.timestamp_subsec_micros(), 123456);
    }

    #[test]
    fn test_garbage_is_none() {
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }
}
