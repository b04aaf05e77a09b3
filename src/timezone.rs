use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;

/// Timezone used to assign events to calendar dates and to print times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayTimezone {
    #[default]
    Local,
    Utc,
    Fixed(FixedOffset),
}

impl DisplayTimezone {
    pub fn date_of(&self, ts: DateTime<Utc>) -> NaiveDate {
        match self {
            Self::Local => ts.with_timezone(&Local).date_naive(),
            Self::Utc => ts.date_naive(),
            Self::Fixed(offset) => ts.with_timezone(offset).date_naive(),
        }
    }

    pub fn format(&self, ts: DateTime<Utc>, fmt: &str) -> String {
        match self {
            Self::Local => ts.with_timezone(&Local).format(fmt).to_string(),
            Self::Utc => ts.format(fmt).to_string(),
            Self::Fixed(offset) => ts.with_timezone(offset).format(fmt).to_string(),
        }
    }
}

impl FromStr for DisplayTimezone {
    type Err = anyhow::Error;

    /// `local`, `utc`/`z`, or an offset such as `+09:00` / `-0530`
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "utc" | "z" => Ok(Self::Utc),
            other => {
                let offset = parse_offset(other)
                    .with_context(|| format!("Invalid timezone '{s}', expected local, utc or ±HH:MM"))?;
                Ok(Self::Fixed(offset))
            }
        }
    }
}

impl fmt::Display for DisplayTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Utc => write!(f, "utc"),
            Self::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Parse a CLI date as `YYYYMMDD` or `YYYY-MM-DD`
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .with_context(|| format!("Invalid date '{s}', expected YYYYMMDD or YYYY-MM-DD"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_timezones() {
        assert_eq!("UTC".parse::<DisplayTimezone>().unwrap(), DisplayTimezone::Utc);
        assert_eq!("local".parse::<DisplayTimezone>().unwrap(), DisplayTimezone::Local);
        assert_eq!(
            "+09:00".parse::<DisplayTimezone>().unwrap(),
            DisplayTimezone::Fixed(FixedOffset::east_opt(9 * 3600).unwrap())
        );
        assert_eq!(
            "-0530".parse::<DisplayTimezone>().unwrap(),
            DisplayTimezone::Fixed(FixedOffset::west_opt(5 * 3600 + 30 * 60).unwrap())
        );
        assert!("Mars/Olympus".parse::<DisplayTimezone>().is_err());
        assert!("+25:00".parse::<DisplayTimezone>().is_err());
    }

    #[test]
    fn test_date_of_crosses_midnight() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 23, 30, 0).unwrap();
        let tokyo: DisplayTimezone = "+09:00".parse().unwrap();
        assert_eq!(DisplayTimezone::Utc.date_of(ts).to_string(), "2024-01-15");
        assert_eq!(tokyo.date_of(ts).to_string(), "2024-01-16");
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("20240115").unwrap(), parse_date("2024-01-15").unwrap());
        assert!(parse_date("15/01/2024").is_err());
    }
}
