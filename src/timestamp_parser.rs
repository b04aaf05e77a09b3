use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Values above this are treated as Unix milliseconds rather than seconds.
const MILLIS_THRESHOLD: f64 = 1e11;

/// Handles parsing timestamps from the formats found in usage logs
pub struct TimestampParser;

impl TimestampParser {
    /// Parse a timestamp string into a DateTime<Utc>
    /// Accepts RFC3339 (with or without fractional seconds), naive ISO 8601
    /// (assumed UTC) and bare Unix numbers.
    pub fn parse(timestamp_str: &str) -> Result<DateTime<Utc>> {
        let trimmed = timestamp_str.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(dt.with_timezone(&Utc));
        }

        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
        }

        if let Ok(number) = trimmed.parse::<f64>() {
            return Self::from_unix(number);
        }

        anyhow::bail!("Failed to parse timestamp: {}", timestamp_str)
    }

    /// Parse the `timestamp` field of a raw record, which may be a string or a number
    pub fn parse_value(value: &Value) -> Result<DateTime<Utc>> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Number(n) => match n.as_f64() {
                Some(number) => Self::from_unix(number),
                None => anyhow::bail!("Timestamp out of range: {}", n),
            },
            other => anyhow::bail!("Unsupported timestamp value: {}", other),
        }
    }

    fn from_unix(number: f64) -> Result<DateTime<Utc>> {
        if !number.is_finite() || number < 0.0 {
            anyhow::bail!("Invalid Unix timestamp: {}", number);
        }
        let millis = if number >= MILLIS_THRESHOLD {
            number as i64
        } else {
            (number * 1000.0) as i64
        };
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| anyhow::anyhow!("Unix timestamp out of range: {}", number))
    }
}
