//! Timestamp bucketing for event counters.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

use super::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    FiveMinute,
    Hourly,
    #[default]
    Daily,
}

impl Granularity {
    pub fn truncate(self, at: PrimitiveDateTime) -> PrimitiveDateTime {
        match self {
            Granularity::FiveMinute => five_minute(at),
            Granularity::Hourly => hourly(at),
            Granularity::Daily => daily(at),
        }
    }

    /// Width of one bucket.
    pub fn step(self) -> Duration {
        match self {
            Granularity::FiveMinute => Duration::minutes(5),
            Granularity::Hourly => Duration::hours(1),
            Granularity::Daily => Duration::days(1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::FiveMinute => "five_minute",
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
        }
    }
}

impl FromStr for Granularity {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "five_minute" | "5m" => Ok(Granularity::FiveMinute),
            "hourly" | "hour" => Ok(Granularity::Hourly),
            "daily" | "day" => Ok(Granularity::Daily),
            other => Err(DomainError::validation(format!(
                "unknown granularity `{other}`"
            ))),
        }
    }
}

pub fn five_minute(at: PrimitiveDateTime) -> PrimitiveDateTime {
    let minute = at.minute() - at.minute() % 5;
    daily(at) + Duration::hours(at.hour().into()) + Duration::minutes(minute.into())
}

pub fn hourly(at: PrimitiveDateTime) -> PrimitiveDateTime {
    daily(at) + Duration::hours(at.hour().into())
}

pub fn daily(at: PrimitiveDateTime) -> PrimitiveDateTime {
    at.date().midnight()
}

/// Current UTC wall-clock time without an offset.
pub fn utc_now() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

/// `YYYY-MM-DDTHH:MM:SS`, the form used inside bucket key names.
pub fn iso_timestamp(at: PrimitiveDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    at.format(format)
        .unwrap_or_else(|_| format!("{} {}", at.date(), at.time()))
}
