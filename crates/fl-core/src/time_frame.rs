//! Symbolic time frames and the window filter.
//!
//! Windows are anchored to an explicit "now" that carries its own time zone, so
//! "start of day" is the caller's local midnight rather than UTC midnight.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::record::UsageRecord;
use crate::types::AnalyticsError;

/// A window anchored to the current instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeFrame {
    /// Since local midnight today.
    Daily,
    /// Since local midnight of the most recent Sunday.
    Weekly,
    /// Since local midnight on the first of the month.
    Monthly,
}

impl TimeFrame {
    pub const ALL: [Self; 3] = [Self::Daily, Self::Weekly, Self::Monthly];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Human label for report headers.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Daily => "Today",
            Self::Weekly => "This week",
            Self::Monthly => "This month",
        }
    }

    /// Inclusive start of the window containing `now`.
    pub fn window_start<Tz: TimeZone>(self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let today = now.date_naive();
        let first_day = match self {
            Self::Daily => today,
            Self::Weekly => {
                today - Duration::days(i64::from(today.weekday().num_days_from_sunday()))
            }
            Self::Monthly => today.with_day(1).unwrap_or(today),
        };
        start_of_day(first_day, &now.timezone())
    }
}

/// Local midnight of `date` in `tz`.
///
/// Ambiguous midnights (DST fall-back) resolve to the earlier instant. When
/// midnight does not exist (DST spring-forward), the first valid minute of the
/// day is used.
fn start_of_day<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Tz> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt,
        LocalResult::None => (1..=180)
            .find_map(|minutes| {
                tz.from_local_datetime(&(midnight + Duration::minutes(minutes)))
                    .earliest()
            })
            .unwrap_or_else(|| tz.from_utc_datetime(&midnight)),
    }
}

/// Returns the records whose timestamp lies in `[frame start, now]`.
///
/// Records after `now` are excluded: the window never looks forward.
pub fn filter_by_time_frame<Tz: TimeZone>(
    records: &[UsageRecord],
    frame: TimeFrame,
    now: &DateTime<Tz>,
) -> Vec<UsageRecord> {
    let start = frame.window_start(now).with_timezone(&Utc);
    let end = now.with_timezone(&Utc);

    records
        .iter()
        .filter(|r| r.timestamp >= start && r.timestamp <= end)
        .cloned()
        .collect()
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TimeFrame {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(AnalyticsError::InvalidTimeFrame {
                value: s.to_string(),
            }),
        }
    }
}

impl Serialize for TimeFrame {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TimeFrame {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
