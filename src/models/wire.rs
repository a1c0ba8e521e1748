//! Lenient deserializers for backend JSON quirks.
//!
//! The backend serializes numeric primary keys as JSON numbers in some
//! payloads and as strings in others, and emits zone-less timestamps for
//! fields mapped from `LocalDateTime`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de;

/// Accept a JSON string or integer and normalize it to a `String`.
pub fn string_or_number<'de, D: de::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = String;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("string or integer id")
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }
        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }
        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }
    }
    d.deserialize_any(Visitor)
}

/// Like [`string_or_number`] for optional fields (`null` or absent -> `None`).
pub fn opt_string_or_number<'de, D: de::Deserializer<'de>>(
    d: D,
) -> Result<Option<String>, D::Error> {
    #[derive(serde::Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "string_or_number")] String);

    let v: Option<Wrapper> = serde::Deserialize::deserialize(d)?;
    Ok(v.map(|w| w.0))
}

/// Parse an RFC 3339 timestamp, falling back to a zone-less ISO timestamp read as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn timestamp<'de, D: de::Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let s: String = serde::Deserialize::deserialize(d)?;
    parse_timestamp(&s).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", s)))
}
